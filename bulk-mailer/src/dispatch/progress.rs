//! Progress notifications.

use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use super::report::SendResult;

/// Receives one call per finished send, in any mode.
///
/// Implementations must return quickly; the dispatcher calls them inline.
pub trait ProgressObserver: Send + Sync {
    fn on_result(&self, completed: usize, total: usize, latest: &SendResult);
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize, &SendResult) + Send + Sync,
{
    fn on_result(&self, completed: usize, total: usize, latest: &SendResult) {
        self(completed, total, latest)
    }
}

/// Invoke an observer, containing any panic it raises.
pub(crate) fn notify(
    observer: &dyn ProgressObserver,
    completed: usize,
    total: usize,
    latest: &SendResult,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        observer.on_result(completed, total, latest)
    }));

    if outcome.is_err() {
        warn!(
            completed = completed,
            total = total,
            recipient = %latest.recipient,
            "progress_observer_panicked"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_observer() {
        let seen = AtomicUsize::new(0);
        let observer = |completed: usize, _total: usize, _latest: &SendResult| {
            seen.store(completed, Ordering::SeqCst);
        };

        notify(&observer, 3, 5, &SendResult::sent("a@x.com", 2));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let observer = |_: usize, _: usize, _: &SendResult| panic!("ui went away");
        notify(&observer, 1, 1, &SendResult::sent("a@x.com", 0));
    }
}
