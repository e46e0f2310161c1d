//! Session error taxonomy.

use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A session could not be opened.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not connect to relay: {0}")]
    Connect(#[source] BoxError),

    #[error("relay does not offer STARTTLS")]
    StartTlsUnavailable,

    #[error("encryption upgrade failed: {0}")]
    Encryption(#[source] BoxError),

    #[error("authentication failed: {0}")]
    Authentication(#[source] BoxError),
}

impl ConnectionError {
    /// Short description safe to show to end users.
    pub fn summary(&self) -> &'static str {
        match self {
            ConnectionError::Connect(_) => "could not reach mail relay",
            ConnectionError::StartTlsUnavailable | ConnectionError::Encryption(_) => {
                "secure connection failed"
            }
            ConnectionError::Authentication(_) => "authentication failed",
        }
    }
}

/// A single message could not be sent.
#[derive(Debug, Error)]
pub enum SendError {
    /// The relay refused this message; the session is still usable.
    #[error("message rejected ({code}): {detail}")]
    Rejected {
        code: String,
        detail: String,
        permanent: bool,
    },

    /// No reply within the per-send timeout.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// The message could not be rendered.
    #[error("message could not be built: {0}")]
    InvalidMessage(String),

    /// The connection is gone; the session must be replaced.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl SendError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SendError::ConnectionLost(_))
    }
}
