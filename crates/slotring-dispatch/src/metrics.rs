use std::sync::atomic::{AtomicU64, Ordering};

/// Bridge counters. Always on; every update is a relaxed add.
#[derive(Debug, Default)]
pub(crate) struct DispatchMetrics {
    wakeups: AtomicU64,
    signals: AtomicU64,
    batches: AtomicU64,
    delivered: AtomicU64,
    priority_delivered: AtomicU64,
    undecodable: AtomicU64,
    bad_records: AtomicU64,
    overflows: AtomicU64,
}

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchMetricsSnapshot {
    /// Times the consumer woke up.
    pub wakeups: u64,
    /// Wakeup signals sent (forced, threshold, re-arm, shutdown).
    pub signals: u64,
    /// Batches handed downstream.
    pub batches: u64,
    /// Records handed downstream, both channels.
    pub delivered: u64,
    /// Of which came from the priority channel.
    pub priority_delivered: u64,
    /// Slots whose payload failed to decode.
    pub undecodable: u64,
    /// Records abandoned by their producer.
    pub bad_records: u64,
    /// Posts refused by a full channel.
    pub overflows: u64,
}

macro_rules! counter {
    ($add:ident, $field:ident) => {
        #[inline]
        pub(crate) fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl DispatchMetrics {
    counter!(add_wakeups, wakeups);
    counter!(add_signals, signals);
    counter!(add_batches, batches);
    counter!(add_delivered, delivered);
    counter!(add_priority_delivered, priority_delivered);
    counter!(add_undecodable, undecodable);
    counter!(add_bad_records, bad_records);
    counter!(add_overflows, overflows);

    pub(crate) fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            wakeups: self.wakeups.load(Ordering::Relaxed),
            signals: self.signals.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            priority_delivered: self.priority_delivered.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            bad_records: self.bad_records.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }
}
