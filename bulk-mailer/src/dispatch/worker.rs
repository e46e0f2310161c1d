//! Send loop shared by every mode.
//!
//! A worker owns exactly one session at a time and pulls messages from the
//! batch queue until it is empty, the batch is cancelled, or its connection
//! is lost beyond repair.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::report::{FailureReason, SendResult};
use super::{DelayRange, DispatchPolicy};
use crate::message::OutboundMessage;
use crate::transport::{ConnectionError, Connector, SendError, Session};

/// A message together with its position in the submitted batch.
pub(crate) struct Job {
    pub position: usize,
    pub message: OutboundMessage,
}

/// FIFO of unsent messages shared by the workers of one batch.
pub(crate) struct WorkQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl WorkQueue {
    pub fn new(messages: Vec<OutboundMessage>) -> Self {
        let jobs = messages
            .into_iter()
            .enumerate()
            .map(|(position, message)| Job { position, message })
            .collect();

        Self {
            jobs: Mutex::new(jobs),
        }
    }

    pub fn next(&self) -> Option<Job> {
        self.jobs().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Take everything nobody picked up.
    pub fn drain(&self) -> Vec<Job> {
        self.jobs().drain(..).collect()
    }

    fn jobs(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What workers report back to the collector.
pub(crate) enum Event {
    OpenFailed(ConnectionError),
    Finished(SendResult),
}

pub(crate) struct Worker<C: Connector> {
    pub id: usize,
    pub connector: Arc<C>,
    pub queue: Arc<WorkQueue>,
    pub events: UnboundedSender<Event>,
    pub policy: DispatchPolicy,
    pub delay: DelayRange,
    pub cancel: CancellationToken,
}

impl<C: Connector> Worker<C> {
    pub async fn run(self) {
        let mut session = match self.connector.open().await {
            Ok(session) => session,
            Err(error) => {
                warn!(worker = self.id, error = %error, "worker_session_open_failed");
                let _ = self.events.send(Event::OpenFailed(error));
                return;
            }
        };

        let mut consecutive_timeouts = 0u32;
        let mut attempted = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                info!(worker = self.id, "worker_cancelled");
                break;
            }

            let Some(job) = self.queue.next() else {
                break;
            };

            let outcome = match timeout(self.policy.send_timeout, session.send(&job.message)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SendError::Timeout(self.policy.send_timeout)),
            };

            let connection_lost = match &outcome {
                Ok(()) => {
                    consecutive_timeouts = 0;
                    false
                }
                Err(SendError::Timeout(_)) => {
                    consecutive_timeouts += 1;
                    consecutive_timeouts >= self.policy.max_consecutive_timeouts.max(1)
                }
                Err(error) => {
                    consecutive_timeouts = 0;
                    error.is_connection_lost()
                }
            };

            let result = match &outcome {
                Ok(()) => SendResult::sent(job.message.recipient(), job.position),
                Err(error) => {
                    warn!(
                        worker = self.id,
                        recipient = %job.message.recipient(),
                        error = %error,
                        "send_failed"
                    );
                    SendResult::failed(job.message.recipient(), job.position, FailureReason::from(error))
                }
            };
            attempted += 1;
            let _ = self.events.send(Event::Finished(result));

            if connection_lost {
                warn!(
                    worker = self.id,
                    consecutive_timeouts = consecutive_timeouts,
                    "worker_connection_lost"
                );
                session.close().await;

                if self.queue.is_empty() {
                    return;
                }

                match self.reopen().await {
                    Some(fresh) => {
                        session = fresh;
                        consecutive_timeouts = 0;
                    }
                    None => {
                        warn!(worker = self.id, attempted = attempted, "worker_retired");
                        return;
                    }
                }
            }

            if self.queue.is_empty() {
                continue;
            }

            let pause = self.delay.sample();
            tokio::select! {
                _ = sleep(pause) => {}
                _ = self.cancel.cancelled() => {
                    info!(worker = self.id, "worker_cancelled");
                    break;
                }
            }
        }

        session.close().await;
        info!(worker = self.id, attempted = attempted, "worker_finished");
    }

    /// Try to replace a lost session.
    async fn reopen(&self) -> Option<C::Session> {
        for attempt in 1..=self.policy.reconnect_attempts {
            if self.cancel.is_cancelled() {
                return None;
            }

            match self.connector.open().await {
                Ok(session) => {
                    info!(worker = self.id, attempt = attempt, "worker_reconnected");
                    return Some(session);
                }
                Err(error) => {
                    warn!(
                        worker = self.id,
                        attempt = attempt,
                        error = %error,
                        "worker_reconnect_failed"
                    );
                }
            }
        }

        None
    }
}
