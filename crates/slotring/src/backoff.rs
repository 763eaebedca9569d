use crate::config::RetryPolicy;
use std::hint;
use std::thread;

/// Spin-then-yield backoff for short CAS waits.
///
/// Spins `2^step` PAUSE hints per call up to 64, then yields to the OS.
/// `is_completed` turns true once yielding has gone on long enough that the
/// caller should switch to sleeping.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;

    #[inline]
    pub(crate) fn new() -> Self {
        Self { step: 0 }
    }

    #[inline]
    pub(crate) fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        if self.step <= Self::YIELD_LIMIT {
            self.step += 1;
        }
    }

    #[inline]
    pub(crate) fn is_completed(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }
}

/// Bounded retry budget for `Queue::allocate`.
///
/// Each failed attempt first burns through a [`Backoff`] (spin, then yield),
/// and once that is exhausted sleeps for `policy.sleep` per attempt. The
/// total number of attempts never exceeds `policy.max_attempts`, which caps
/// how long a producer can stall behind a lagging consumer.
#[derive(Debug)]
pub(crate) struct Retry {
    policy: RetryPolicy,
    attempts: u32,
    backoff: Backoff,
}

impl Retry {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            backoff: Backoff::new(),
        }
    }

    /// Number of attempts made so far.
    #[inline]
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failed attempt. Returns `false` once the budget is spent.
    pub(crate) fn wait(&mut self) -> bool {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return false;
        }
        if self.backoff.is_completed() {
            thread::sleep(self.policy.sleep);
        } else {
            self.backoff.snooze();
        }
        true
    }
}
