//! Coalesced consumer wakeup.
//!
//! `Notify` holds at most one stored permit, so any number of signals sent
//! while the consumer is busy collapse into a single wakeup.

use crate::metrics::DispatchMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// How urgently a post wants the consumer to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Count the push; signal only when the coalescing threshold is reached.
    Lazy,
    /// Signal now (last record of a response, streaming update, priority).
    Now,
}

#[derive(Debug)]
pub(crate) struct Wakeup {
    notify: Notify,
    /// Lazy pushes since the last signal.
    pushes: AtomicU64,
    threshold: u64,
    metrics: Arc<DispatchMetrics>,
}

impl Wakeup {
    pub(crate) fn new(threshold: u64, metrics: Arc<DispatchMetrics>) -> Self {
        Self {
            notify: Notify::new(),
            pushes: AtomicU64::new(0),
            threshold,
            metrics,
        }
    }

    /// Counts one committed push. Returns `true` if it signalled.
    pub(crate) fn record_push(&self, wake: Wake) -> bool {
        let pushes = self.pushes.fetch_add(1, Ordering::AcqRel) + 1;
        if wake == Wake::Now || pushes >= self.threshold {
            self.signal();
            return true;
        }
        false
    }

    /// Wakes the consumer and resets the push counter.
    pub(crate) fn signal(&self) {
        self.pushes.store(0, Ordering::Release);
        self.notify.notify_one();
        self.metrics.add_signals(1);
    }

    /// Schedules another consumer turn without touching the push counter.
    pub(crate) fn rearm(&self) {
        self.notify.notify_one();
        self.metrics.add_signals(1);
    }

    /// Lazy pushes not yet covered by a signal.
    pub(crate) fn pending_pushes(&self) -> u64 {
        self.pushes.load(Ordering::Acquire)
    }

    /// Waits for the next (coalesced) signal.
    pub(crate) async fn wait(&self) {
        self.notify.notified().await;
        self.metrics.add_wakeups(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wakeup(threshold: u64) -> (Wakeup, Arc<DispatchMetrics>) {
        let metrics = Arc::new(DispatchMetrics::default());
        (Wakeup::new(threshold, Arc::clone(&metrics)), metrics)
    }

    #[test]
    fn test_threshold_signals_and_resets() {
        let (w, metrics) = wakeup(3);
        assert!(!w.record_push(Wake::Lazy));
        assert!(!w.record_push(Wake::Lazy));
        assert!(w.record_push(Wake::Lazy));
        assert_eq!(w.pending_pushes(), 0);
        assert!(!w.record_push(Wake::Lazy));
        assert_eq!(w.pending_pushes(), 1);
        assert_eq!(metrics.snapshot().signals, 1);
    }

    #[test]
    fn test_forced_push_signals_immediately() {
        let (w, _) = wakeup(1024);
        assert!(!w.record_push(Wake::Lazy));
        assert!(w.record_push(Wake::Now));
        assert_eq!(w.pending_pushes(), 0);
    }

    #[tokio::test]
    async fn test_signals_coalesce_into_one_wakeup() {
        let (w, metrics) = wakeup(1);
        for _ in 0..5 {
            w.signal();
        }
        w.wait().await;
        // Only one permit was stored.
        let second = tokio::time::timeout(Duration::from_millis(20), w.wait()).await;
        assert!(second.is_err());
        assert_eq!(metrics.snapshot().wakeups, 1);
        assert_eq!(metrics.snapshot().signals, 5);
    }
}
