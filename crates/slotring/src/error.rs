//! Error types for queue operations.

use thiserror::Error;

/// Errors produced by `Queue` construction and allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No room could be claimed within the retry budget.
    #[error("queue overflow: no room for a {size}-byte slot after {attempts} attempts")]
    Overflow {
        /// Slot size (header included) that was requested.
        size: usize,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The request can never fit, however much the consumer frees.
    #[error("record of {size} bytes exceeds the {capacity}-byte buffer")]
    RecordTooLarge {
        /// Slot size (header included) that was requested.
        size: usize,
        /// Buffer capacity.
        capacity: usize,
    },

    /// Buffer size is not a power of two.
    #[error("buffer size {0} is not a power of two")]
    NotPowerOfTwo(usize),

    /// Buffer is too small to hold a slot and a wraparound fragment.
    #[error("buffer size {size} is below the minimum of {min} bytes")]
    BufferTooSmall {
        /// Configured size.
        size: usize,
        /// Minimum accepted size.
        min: usize,
    },

    /// The queue already has its single consumer.
    #[error("a consumer is already attached to this queue")]
    ConsumerAttached,
}

impl QueueError {
    /// Returns `true` for backpressure that may clear once the consumer catches up.
    #[inline]
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow { .. })
    }

    /// Returns `true` if retrying the same call can never succeed.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !self.is_overflow()
    }
}
