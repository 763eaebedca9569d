//! Two-Channel Dispatch Bridge for slotring-rs
//!
//! Any number of producer threads post records; a single cooperative
//! consumer drains them in batches, woken through one coalesced signal.
//!
//! # Features
//!
//! - **Two channels**: a small priority queue (errors, response summaries)
//!   always drained ahead of the high-volume main queue
//! - **Coalesced wakeups**: producers signal immediately when it matters and
//!   otherwise only every `coalesce_threshold` posts
//! - **Bounded batches**: at most `max_batch` records per delivery and
//!   `max_batches_per_wakeup` deliveries per wakeup, then the consumer
//!   re-arms itself and yields
//! - **Graceful shutdown**: producers are closed out, the consumer makes a
//!   final full drain and hands back its downstream
//!
//! # Example
//!
//! ```
//! use slotring_dispatch::{Bridge, DispatchConfig, Event, Wake};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bridge = Bridge::new(DispatchConfig::default()).unwrap();
//!
//! let mut seen = Vec::new();
//! let drain = bridge
//!     .attach(move |batch: Vec<Event>| seen.extend(batch))
//!     .unwrap();
//! let consumer = tokio::spawn(drain.run());
//!
//! let producer = bridge.clone();
//! std::thread::spawn(move || {
//!     producer.post(&Event::ServerTime { time: 42 }, Wake::Now).unwrap();
//! })
//! .join()
//! .unwrap();
//!
//! bridge.shutdown();
//! let _downstream = consumer.await.unwrap();
//! # }
//! ```

mod bridge;
mod config;
mod drain;
mod error;
mod invariants;
mod metrics;
pub mod record;
mod shutdown;
mod wakeup;

pub use bridge::Bridge;
pub use config::DispatchConfig;
pub use drain::{Buffered, Downstream, Drain, DrainReport, EventStream};
pub use error::{DispatchError, RecordError};
pub use metrics::DispatchMetricsSnapshot;
pub use record::{ErrorCode, Event, SessionStatus};
pub use shutdown::ShutdownSignal;
pub use wakeup::Wake;

// Re-export useful stream combinators
pub use tokio_stream::StreamExt;
