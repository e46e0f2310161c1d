//! Relay sessions.
//!
//! A [`Connector`] opens [`Session`]s; each session holds one connected,
//! encrypted and authenticated relay connection that is reused for every
//! message sent through it.
//!
//! ## Session Lifecycle
//!
//! ```text
//! open (connect → STARTTLS → AUTH) → send × N → close (QUIT)
//! ```

pub mod error;
pub mod smtp;
pub mod stub;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::message::OutboundMessage;

pub use error::{ConnectionError, SendError};
pub use smtp::{SmtpConnector, SmtpSession};
pub use stub::{StubConnector, StubSession};

/// How the relay connection is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// Plain connection upgraded with STARTTLS; fails if the relay does not offer it
    StartTls,
    /// STARTTLS when offered, plaintext otherwise
    Opportunistic,
    /// TLS from the first byte (port 465)
    Implicit,
    /// No encryption (local test relays only)
    None,
}

/// Relay connection settings.
#[derive(Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
    /// Login; authentication is skipped when empty
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encryption", &self.encryption)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Opens sessions against one relay configuration.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    /// Connect, upgrade encryption and authenticate; the handshake is paid once per session.
    async fn open(&self) -> Result<Self::Session, ConnectionError>;
}

/// One live relay connection.
#[async_trait]
pub trait Session: Send + 'static {
    /// Send one message over the open connection.
    ///
    /// A [`SendError::ConnectionLost`] means the session must not be used again.
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), SendError>;

    /// Release the connection. Calling it more than once is a no-op.
    async fn close(&mut self);
}
