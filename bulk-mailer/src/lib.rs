//! Bulkmail - bulk job-application mailer.
//!
//! This library provides the shared modules for the two binaries:
//! - `bulkmail`: command line sender
//! - `bulkmail-web`: HTTP API over the same pipeline
//!
//! ## Architecture
//!
//! ```text
//! raw text → extract → MessageBuilder → Dispatcher → Session(s) → SendReport
//! ```

pub mod campaign;
pub mod config;
pub mod dispatch;
pub mod extract;
pub mod message;
pub mod transport;
pub mod web;

// Re-export commonly used types
pub use campaign::{Campaign, CampaignError, CampaignOutcome};
pub use config::{Config, ConfigError};
pub use dispatch::{
    DelayRange, DispatchPolicy, Dispatcher, FailureReason, ProgressObserver, ReportSummary,
    SendMode, SendReport, SendResult,
};
pub use extract::{extract, Extraction, ValidatedAddress};
pub use message::{Attachment, Identity, MessageBuilder, OutboundMessage};
pub use transport::{
    ConnectionError, Connector, SendError, Session, SmtpConnector, StubConnector, TransportConfig,
};
pub use web::AppState;
