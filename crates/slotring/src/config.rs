use crate::error::QueueError;
use crate::header::{BLOCK_SIZE, HEADER_SIZE};
use std::time::Duration;

/// Allocation retry budget.
///
/// When the consumer lags, `allocate` stalls the producer for at most
/// `max_attempts` attempts before reporting `QueueError::Overflow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total claim attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep between attempts once the spin/yield phase is exhausted.
    pub sleep: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    pub const fn new(max_attempts: u32, sleep: Duration) -> Self {
        Self {
            max_attempts,
            sleep,
        }
    }

    /// Fail on the first attempt that finds no room.
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    /// 100 attempts with 1 ms sleeps: roughly 100 ms worst-case stall.
    fn default() -> Self {
        Self::new(100, Duration::from_millis(1))
    }
}

/// Configuration for a `Queue`.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Buffer size in bytes. Must be a power of two.
    pub buffer_size: usize,
    /// Allocation retry budget.
    pub retry: RetryPolicy,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
}

impl Config {
    /// Creates a new configuration with custom settings.
    pub const fn new(buffer_size: usize, retry: RetryPolicy, enable_metrics: bool) -> Self {
        Self {
            buffer_size,
            retry,
            enable_metrics,
        }
    }

    /// Default settings with the given buffer size.
    pub const fn with_buffer_size(buffer_size: usize) -> Self {
        Self::new(buffer_size, RetryPolicy::new(100, Duration::from_millis(1)), false)
    }

    /// Sets the retry policy.
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables metrics.
    pub const fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Returns the buffer capacity in bytes.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.buffer_size
    }

    /// Returns the mask for offset wrapping.
    #[inline]
    pub const fn mask(&self) -> usize {
        self.buffer_size - 1
    }

    /// Smallest accepted buffer: two blocks, so any slot plus a wraparound
    /// fragment can exist.
    pub const MIN_BUFFER_SIZE: usize = 2 * BLOCK_SIZE;

    /// Largest payload a single record can carry.
    #[inline]
    pub const fn max_payload(&self) -> usize {
        self.buffer_size - HEADER_SIZE
    }

    /// Checks the buffer size. Called by `Queue::new`.
    pub fn validate(&self) -> Result<(), QueueError> {
        if !self.buffer_size.is_power_of_two() {
            return Err(QueueError::NotPowerOfTwo(self.buffer_size));
        }
        if self.buffer_size < Self::MIN_BUFFER_SIZE {
            return Err(QueueError::BufferTooSmall {
                size: self.buffer_size,
                min: Self::MIN_BUFFER_SIZE,
            });
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        MAIN_QUEUE_CONFIG
    }
}

/// High-volume record queue (16 MiB).
pub const MAIN_QUEUE_CONFIG: Config = Config::with_buffer_size(16 * 1024 * 1024);

/// Small queue for urgent records such as errors (1 MiB).
pub const PRIORITY_QUEUE_CONFIG: Config = Config::with_buffer_size(1024 * 1024);
