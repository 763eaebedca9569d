//! Configuration for dispatch behavior.

use crate::error::DispatchError;
use slotring_rs::{Config, MAIN_QUEUE_CONFIG, PRIORITY_QUEUE_CONFIG};

/// Configuration for the two-channel bridge and its drain loop.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// High-volume record channel.
    ///
    /// Default: 16 MiB ring
    pub main: Config,

    /// Small channel for errors and response summaries, drained first.
    ///
    /// Default: 1 MiB ring
    pub priority: Config,

    /// Maximum records handed downstream in one batch.
    ///
    /// Default: 1024
    pub max_batch: usize,

    /// Lazy posts between forced wakeups.
    ///
    /// Every `coalesce_threshold` lazy posts the consumer is signalled even
    /// if no producer asked for it.
    ///
    /// Default: 1024
    pub coalesce_threshold: u64,

    /// Full batches delivered per wakeup before the consumer yields and
    /// re-arms itself.
    ///
    /// Default: 16
    pub max_batches_per_wakeup: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            main: MAIN_QUEUE_CONFIG,
            priority: PRIORITY_QUEUE_CONFIG,
            max_batch: 1024,
            coalesce_threshold: 1024,
            max_batches_per_wakeup: 16,
        }
    }
}

impl DispatchConfig {
    /// Every post wakes the consumer; small batches.
    pub fn low_latency() -> Self {
        Self {
            max_batch: 64,
            coalesce_threshold: 1,
            ..Self::default()
        }
    }

    /// Rare wakeups, large batches.
    pub fn high_throughput() -> Self {
        Self {
            max_batch: 4096,
            coalesce_threshold: 8192,
            max_batches_per_wakeup: 64,
            ..Self::default()
        }
    }

    /// Sets the main channel configuration.
    pub fn with_main(mut self, main: Config) -> Self {
        self.main = main;
        self
    }

    /// Sets the priority channel configuration.
    pub fn with_priority(mut self, priority: Config) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the batch cap.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Sets the push-counter threshold.
    pub fn with_coalesce_threshold(mut self, threshold: u64) -> Self {
        self.coalesce_threshold = threshold;
        self
    }

    /// Sets the number of batches drained per wakeup.
    pub fn with_max_batches_per_wakeup(mut self, batches: usize) -> Self {
        self.max_batches_per_wakeup = batches;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), DispatchError> {
        if self.max_batch == 0 {
            return Err(DispatchError::InvalidConfig("max_batch must be positive"));
        }
        if self.coalesce_threshold == 0 {
            return Err(DispatchError::InvalidConfig("coalesce_threshold must be positive"));
        }
        if self.max_batches_per_wakeup == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_batches_per_wakeup must be positive",
            ));
        }
        self.main.validate()?;
        self.priority.validate()?;
        Ok(())
    }
}
