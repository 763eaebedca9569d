//! Error types for dispatch operations.

use slotring_rs::QueueError;
use thiserror::Error;

/// Errors raised while building or decoding a record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The producer found its input unusable while writing the record.
    #[error("bad record: {0}")]
    BadRecord(String),

    /// The payload could not be encoded or decoded.
    #[error("record codec: {0}")]
    Codec(#[from] bincode::Error),
}

/// Errors that can occur in bridge operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The underlying queue refused the allocation.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The record could not be built.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// The bridge has been shut down.
    #[error("bridge has been shut down")]
    ShutDown,

    /// The consumer side is already attached.
    #[error("a drain is already attached to this bridge")]
    AlreadyAttached,

    /// Rejected at construction.
    #[error("invalid dispatch config: {0}")]
    InvalidConfig(&'static str),
}

impl DispatchError {
    /// Returns `true` if this is a recoverable error (queue overflow).
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Queue(e) if e.is_overflow())
    }

    /// Returns `true` if this error indicates the bridge is permanently unusable.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShutDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifiers() {
        let overflow = DispatchError::from(QueueError::Overflow { size: 32, attempts: 1 });
        assert!(overflow.is_recoverable());
        assert!(!overflow.is_terminal());

        assert!(DispatchError::ShutDown.is_terminal());
        assert!(!DispatchError::ShutDown.is_recoverable());

        let bad = DispatchError::from(RecordError::BadRecord("empty symbol".into()));
        assert!(!bad.is_recoverable());
        assert_eq!(bad.to_string(), "bad record: empty symbol");
    }
}
