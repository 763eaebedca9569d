//! slotring - Lock-Free Circular Byte-Slot Allocator
//!
//! Many producer threads hand variable-length records to exactly one consumer
//! through a fixed, power-of-two byte buffer. Each record lives in a slot: a
//! 16-byte header followed by the payload. The header's atomic indicator word
//! (tag + size) is the only synchronization between a producer and the
//! consumer.
//!
//! # Key Features
//!
//! - Lock-free claim via CAS on an unbounded `head` position
//! - Safe wraparound: a claim straddling the end splits off a `Failed`
//!   fragment the consumer skips and reclaims
//! - Single release-store publish, acquire-load pop
//! - Bounded producer stall under overflow (`RetryPolicy`), then a loud
//!   `QueueError::Overflow`, never torn memory
//!
//! # Example
//!
//! ```
//! use slotring_rs::{Config, Queue};
//!
//! let queue = Queue::new(Config::with_buffer_size(4096)).unwrap();
//! let mut consumer = queue.consumer().unwrap();
//!
//! // Producer: allocate, write, commit
//! let mut claim = queue.allocate(5).unwrap();
//! claim.payload_mut().copy_from_slice(b"hello");
//! claim.commit();
//!
//! // Consumer: pop, read, release
//! let record = consumer.pop().unwrap();
//! assert_eq!(record.payload(), b"hello");
//! record.release();
//!
//! assert!(consumer.pop().is_none());
//! ```

mod backoff;
mod config;
mod error;
mod header;
mod invariants;
mod metrics;
mod queue;
mod slot;

pub use config::{Config, RetryPolicy, MAIN_QUEUE_CONFIG, PRIORITY_QUEUE_CONFIG};
pub use error::QueueError;
pub use header::{round_up, slot_size, SlotState, BLOCK_SIZE, HEADER_SIZE};
pub use metrics::{Metrics, MetricsSnapshot};
pub use queue::{Consumer, Queue};
pub use slot::{Claim, Record};
