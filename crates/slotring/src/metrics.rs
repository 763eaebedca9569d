use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe queue counters (uses atomics internally).
///
/// Only updated when `Config::enable_metrics` is set.
#[derive(Debug, Default)]
pub struct Metrics {
    claims: AtomicU64,
    commits: AtomicU64,
    abandons: AtomicU64,
    pops: AtomicU64,
    releases: AtomicU64,
    fragments: AtomicU64,
    retries: AtomicU64,
    overflows: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Successful claims.
    pub claims: u64,
    /// Claims published to the consumer.
    pub commits: u64,
    /// Claims abandoned without publishing.
    pub abandons: u64,
    /// Committed records handed to the consumer.
    pub pops: u64,
    /// Slots returned to the free pool (records and dead space).
    pub releases: u64,
    /// Wraparound fragments created by claims.
    pub fragments: u64,
    /// Failed claim attempts that were retried.
    pub retries: u64,
    /// Allocations that gave up with `QueueError::Overflow`.
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

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(add_claims, claims);
    counter!(add_commits, commits);
    counter!(add_abandons, abandons);
    counter!(add_pops, pops);
    counter!(add_releases, releases);
    counter!(add_fragments, fragments);
    counter!(add_retries, retries);
    counter!(add_overflows, overflows);

    /// Copies the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            claims: self.claims.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            abandons: self.abandons.load(Ordering::Relaxed),
            pops: self.pops.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            fragments: self.fragments.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let m = Metrics::new();
        m.add_claims(3);
        m.add_commits(2);
        m.add_overflows(1);

        let s = m.snapshot();
        assert_eq!(s.claims, 3);
        assert_eq!(s.commits, 2);
        assert_eq!(s.overflows, 1);
        assert_eq!(s.pops, 0);
    }
}
