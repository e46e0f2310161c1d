//! In-memory connector for dry runs and tests.
//!
//! Nothing leaves the process. Failures can be scripted by send ordinal
//! (counted across all sessions of one connector, starting at 1).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{Connector, ConnectionError, SendError, Session};
use crate::message::OutboundMessage;

#[derive(Debug, Clone, Default)]
struct Script {
    refuse_opens: usize,
    reject_every: Option<usize>,
    lose_connection_on: HashSet<usize>,
    reject_recipients: HashSet<String>,
    latency: Duration,
}

#[derive(Debug, Default)]
struct Ledger {
    open_attempts: usize,
    opens: usize,
    closes: usize,
    open_now: usize,
    peak_open: usize,
    attempts: usize,
    delivered: Vec<String>,
}

/// Connector whose sessions accept messages without any network I/O.
#[derive(Debug, Clone, Default)]
pub struct StubConnector {
    script: Script,
    ledger: Arc<Mutex<Ledger>>,
}

impl StubConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` open attempts.
    pub fn refuse_opens(mut self, count: usize) -> Self {
        self.script.refuse_opens = count;
        self
    }

    /// Reject every `n`th send with a permanent error.
    pub fn reject_every(mut self, n: usize) -> Self {
        self.script.reject_every = (n > 0).then_some(n);
        self
    }

    /// Break the session carrying the given send ordinal.
    pub fn lose_connection_on(mut self, ordinal: usize) -> Self {
        self.script.lose_connection_on.insert(ordinal);
        self
    }

    /// Permanently reject one recipient (compared case-insensitively).
    pub fn reject_recipient(mut self, address: &str) -> Self {
        self.script.reject_recipients.insert(address.to_lowercase());
        self
    }

    /// Simulated time each send takes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.script.latency = latency;
        self
    }

    pub fn opens(&self) -> usize {
        self.ledger().opens
    }

    pub fn open_attempts(&self) -> usize {
        self.ledger().open_attempts
    }

    pub fn closes(&self) -> usize {
        self.ledger().closes
    }

    /// Highest number of sessions that were open at the same time.
    pub fn peak_open_sessions(&self) -> usize {
        self.ledger().peak_open
    }

    /// Total send calls across all sessions.
    pub fn attempts(&self) -> usize {
        self.ledger().attempts
    }

    /// Recipients whose messages were accepted, in acceptance order.
    pub fn delivered(&self) -> Vec<String> {
        self.ledger().delivered.clone()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        // A panicking test thread must not hide the counters from the others
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Connector for StubConnector {
    type Session = StubSession;

    async fn open(&self) -> Result<StubSession, ConnectionError> {
        let mut ledger = self.ledger();
        ledger.open_attempts += 1;

        if ledger.open_attempts <= self.script.refuse_opens {
            return Err(ConnectionError::Connect("connection refused".into()));
        }

        ledger.opens += 1;
        ledger.open_now += 1;
        ledger.peak_open = ledger.peak_open.max(ledger.open_now);

        Ok(StubSession {
            connector: self.clone(),
            broken: false,
            closed: false,
        })
    }
}

/// Session handed out by [`StubConnector`].
#[derive(Debug)]
pub struct StubSession {
    connector: StubConnector,
    broken: bool,
    closed: bool,
}

impl StubSession {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut ledger = self.connector.ledger();
            ledger.open_now = ledger.open_now.saturating_sub(1);
        }
    }
}

#[async_trait]
impl Session for StubSession {
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), SendError> {
        if self.closed || self.broken {
            return Err(SendError::ConnectionLost("stub session unusable".to_string()));
        }

        let ordinal = {
            let mut ledger = self.connector.ledger();
            ledger.attempts += 1;
            ledger.attempts
        };

        if !self.connector.script.latency.is_zero() {
            tokio::time::sleep(self.connector.script.latency).await;
        }

        let script = &self.connector.script;

        if script.lose_connection_on.contains(&ordinal) {
            self.broken = true;
            return Err(SendError::ConnectionLost("stub connection reset".to_string()));
        }

        let rejected_by_ordinal = script.reject_every.is_some_and(|n| ordinal % n == 0);
        let rejected_by_address = script
            .reject_recipients
            .contains(&message.recipient().to_lowercase());

        if rejected_by_ordinal || rejected_by_address {
            return Err(SendError::Rejected {
                code: "550".to_string(),
                detail: format!("mailbox unavailable: {}", message.recipient()),
                permanent: true,
            });
        }

        self.connector
            .ledger()
            .delivered
            .push(message.recipient().to_string());

        info!(recipient = %message.recipient(), ordinal = ordinal, "stub_message_accepted");
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.connector.ledger().closes += 1;
        }
        self.release();
    }
}

impl Drop for StubSession {
    fn drop(&mut self) {
        self.release();
    }
}
