//! Outbound message construction.
//!
//! A message is built per recipient from the sender identity, a subject and
//! body template, and an optional attachment. Building does no I/O; the
//! MIME rendering happens when a transport session sends the message.

pub mod builder;
pub mod template;

use std::fmt;
use std::sync::Arc;

use lettre::message::Mailbox;
use lettre::Address;
use thiserror::Error;

use crate::extract::ValidatedAddress;

pub use builder::MessageBuilder;
pub use template::{render, TemplateValues, DEFAULT_COVER_LETTER, DEFAULT_SUBJECT};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("invalid attachment content type: {0}")]
    InvalidContentType(String),

    #[error("failed to build message: {0}")]
    Build(String),
}

/// Who a message is sent as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
    address: Address,
}

impl Identity {
    pub fn new(name: &str, address: &str) -> Result<Self, MessageError> {
        let address: Address = address
            .trim()
            .parse()
            .map_err(|_| MessageError::InvalidAddress(address.to_string()))?;

        Ok(Self {
            name: name.trim().to_string(),
            address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub(crate) fn mailbox(&self) -> Mailbox {
        let name = (!self.name.is_empty()).then(|| self.name.clone());
        Mailbox::new(name, self.address.clone())
    }
}

/// A file attached to every message of a batch.
///
/// The bytes are shared, so cloning an attachment per recipient is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Arc<[u8]>,
}

impl Attachment {
    /// Content type is guessed from the filename, falling back to PDF.
    pub fn new(filename: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_raw()
            .unwrap_or("application/pdf")
            .to_string();

        Self {
            filename,
            content_type,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One message addressed to exactly one recipient.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub sender: Identity,
    pub recipient: ValidatedAddress,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

impl OutboundMessage {
    pub fn recipient(&self) -> &str {
        self.recipient.as_str()
    }
}
