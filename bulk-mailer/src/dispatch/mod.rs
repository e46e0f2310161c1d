//! Bulk dispatch over transport sessions.
//!
//! Every mode runs the same worker loop; they differ only in how many
//! workers share the batch and how long each worker pauses between sends.
//!
//! | Mode | Workers | Pause between sends |
//! |---|---|---|
//! | Safe | 1 | random within a range |
//! | Fast | 1 | none |
//! | Instant | `min(width, messages)` | none |
//!
//! Results flow back to a single collector over a channel, so the report
//! has exactly one writer.

pub mod progress;
pub mod report;
mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::message::OutboundMessage;
use crate::transport::{ConnectionError, Connector};

pub use progress::ProgressObserver;
pub use report::{FailureReason, ReportSummary, SendReport, SendResult};

use worker::{Event, WorkQueue, Worker};

/// Default pool width for instant mode.
pub const DEFAULT_PARALLEL_WIDTH: usize = 10;

/// Inclusive range a pause between two sends is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Default pacing for safe mode.
    pub const SAFE: DelayRange = DelayRange {
        min: Duration::from_secs(2),
        max: Duration::from_secs(5),
    };

    /// Slower pacing for relays with strict rate limits.
    pub const CONSERVATIVE: DelayRange = DelayRange {
        min: Duration::from_secs(10),
        max: Duration::from_secs(15),
    };

    /// Bounds given in either order are accepted.
    pub fn new(a: Duration, b: Duration) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn from_secs(min: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }

    /// Draw a pause uniformly from the range, at millisecond resolution.
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }

        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }
}

/// How a batch is paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// One session, random pause between sends
    Safe(DelayRange),
    /// One session, no pause
    Fast,
    /// Bounded pool of sessions sending concurrently
    Instant { max_concurrency: usize },
}

impl SendMode {
    pub fn name(&self) -> &'static str {
        match self {
            SendMode::Safe(_) => "safe",
            SendMode::Fast => "fast",
            SendMode::Instant { .. } => "instant",
        }
    }
}

/// Limits applied to every session of a batch.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Longest a single send may take
    pub send_timeout: Duration,
    /// Timeouts in a row after which a session counts as lost
    pub max_consecutive_timeouts: u32,
    /// Fresh opens tried after a lost connection
    pub reconnect_attempts: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(30),
            max_consecutive_timeouts: 3,
            reconnect_attempts: 2,
        }
    }
}

/// Sends batches of messages through sessions opened by `C`.
pub struct Dispatcher<C: Connector> {
    connector: Arc<C>,
    policy: DispatchPolicy,
    observer: Option<Arc<dyn ProgressObserver>>,
    cancel: CancellationToken,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(connector: C, policy: DispatchPolicy) -> Self {
        Self {
            connector: Arc::new(connector),
            policy,
            observer: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(self, observer: impl ProgressObserver + 'static) -> Self {
        self.with_shared_progress(Arc::new(observer))
    }

    pub fn with_shared_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use an externally owned token; cancelling it stops the batch.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub async fn dispatch(
        &self,
        messages: Vec<OutboundMessage>,
        mode: SendMode,
    ) -> Result<SendReport, ConnectionError> {
        match mode {
            SendMode::Safe(range) => self.dispatch_sequential(messages, range).await,
            SendMode::Fast => self.dispatch_sequential(messages, DelayRange::ZERO).await,
            SendMode::Instant { max_concurrency } => {
                self.dispatch_parallel(messages, max_concurrency).await
            }
        }
    }

    /// Send in input order over one session, pausing between sends.
    pub async fn dispatch_sequential(
        &self,
        messages: Vec<OutboundMessage>,
        delay: DelayRange,
    ) -> Result<SendReport, ConnectionError> {
        self.run(messages, 1, delay).await
    }

    /// Send over at most `max_concurrency` sessions at once.
    ///
    /// Results arrive in completion order.
    pub async fn dispatch_parallel(
        &self,
        messages: Vec<OutboundMessage>,
        max_concurrency: usize,
    ) -> Result<SendReport, ConnectionError> {
        self.run(messages, max_concurrency.max(1), DelayRange::ZERO).await
    }

    async fn run(
        &self,
        messages: Vec<OutboundMessage>,
        width: usize,
        delay: DelayRange,
    ) -> Result<SendReport, ConnectionError> {
        let total = messages.len();
        let mut report = SendReport::with_capacity(total);
        if total == 0 {
            return Ok(report);
        }

        let started = Instant::now();
        let workers = width.min(total);
        info!(total = total, workers = workers, delay = ?delay, "dispatch_started");

        let recipients: Vec<String> = messages.iter().map(|m| m.recipient().to_string()).collect();
        let queue = Arc::new(WorkQueue::new(messages));
        let (events, mut incoming) = mpsc::unbounded_channel();

        // Stops the workers if this future is dropped mid-batch
        let batch = self.cancel.child_token();
        let _stop_on_drop = batch.clone().drop_guard();

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                tokio::spawn(
                    Worker {
                        id,
                        connector: Arc::clone(&self.connector),
                        queue: Arc::clone(&queue),
                        events: events.clone(),
                        policy: self.policy.clone(),
                        delay,
                        cancel: batch.clone(),
                    }
                    .run(),
                )
            })
            .collect();
        drop(events);

        let mut recorded = vec![false; total];
        let mut open_failures = Vec::new();

        while let Some(event) = incoming.recv().await {
            match event {
                Event::OpenFailed(error) => open_failures.push(error),
                Event::Finished(result) => {
                    if let Some(seen) = recorded.get_mut(result.position) {
                        *seen = true;
                    }
                    self.record(&mut report, result, total);
                }
            }
        }

        for outcome in join_all(handles).await {
            if let Err(e) = outcome {
                error!(error = %e, "dispatch_worker_aborted");
            }
        }

        if report.total() == 0 && open_failures.len() == workers {
            if let Some(first) = open_failures.into_iter().next() {
                error!(error = %first, "dispatch_no_session");
                return Err(first);
            }
        }

        let leftover = if self.cancel.is_cancelled() {
            FailureReason::Cancelled
        } else {
            FailureReason::ConnectionLost
        };
        for job in queue.drain() {
            recorded[job.position] = true;
            self.record(
                &mut report,
                SendResult::failed(job.message.recipient(), job.position, leftover),
                total,
            );
        }

        // Taken by a worker that died before reporting
        for (position, recipient) in recipients.iter().enumerate() {
            if !recorded[position] {
                self.record(
                    &mut report,
                    SendResult::failed(recipient, position, FailureReason::Aborted),
                    total,
                );
            }
        }

        info!(
            total = total,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch_complete"
        );

        Ok(report)
    }

    fn record(&self, report: &mut SendReport, result: SendResult, total: usize) {
        report.push(result);
        if let (Some(observer), Some(latest)) = (&self.observer, report.results.last()) {
            progress::notify(observer.as_ref(), report.total(), total, latest);
        }
    }
}
