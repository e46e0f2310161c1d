//! Per-recipient outcomes and the batch report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::transport::SendError;

/// Why a recipient was not sent to, in words fit for end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RecipientRejected,
    TemporarilyRejected,
    ConnectionLost,
    TimedOut,
    InvalidMessage,
    Cancelled,
    Aborted,
}

impl FailureReason {
    pub fn summary(&self) -> &'static str {
        match self {
            FailureReason::RecipientRejected => "recipient rejected",
            FailureReason::TemporarilyRejected => "relay temporarily refused the message",
            FailureReason::ConnectionLost => "connection lost",
            FailureReason::TimedOut => "send timed out",
            FailureReason::InvalidMessage => "message could not be built",
            FailureReason::Cancelled => "cancelled before sending",
            FailureReason::Aborted => "sending aborted",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.summary())
    }
}

impl From<&SendError> for FailureReason {
    fn from(error: &SendError) -> Self {
        match error {
            SendError::Rejected { permanent: true, .. } => FailureReason::RecipientRejected,
            SendError::Rejected { permanent: false, .. } => FailureReason::TemporarilyRejected,
            SendError::Timeout(_) => FailureReason::TimedOut,
            SendError::InvalidMessage(_) => FailureReason::InvalidMessage,
            SendError::ConnectionLost(_) => FailureReason::ConnectionLost,
        }
    }
}

/// Outcome for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendResult {
    pub recipient: String,
    /// Position of the message in the submitted batch
    pub position: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReason>,
    pub timestamp: DateTime<Utc>,
}

impl SendResult {
    pub fn sent(recipient: &str, position: usize) -> Self {
        Self {
            recipient: recipient.to_string(),
            position,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(recipient: &str, position: usize, reason: FailureReason) -> Self {
        Self {
            recipient: recipient.to_string(),
            position,
            success: false,
            error: Some(reason),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for SendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error {
            None => write!(f, "✓ {}", self.recipient),
            Some(reason) => write!(f, "✗ {} - {}", self.recipient, reason),
        }
    }
}

/// All outcomes of one batch, in the order they completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SendReport {
    pub results: Vec<SendResult>,
    pub succeeded: usize,
    pub failed: usize,
}

impl SendReport {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
            succeeded: 0,
            failed: 0,
        }
    }

    pub fn push(&mut self, result: SendResult) {
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn summary(&self) -> ReportSummary {
        let total = self.total();
        ReportSummary {
            total,
            successful: self.succeeded,
            failed: self.failed,
            success_rate: if total > 0 {
                self.succeeded as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

/// Counts for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, 0–100
    pub success_rate: f64,
}
