//! Producer side of the bridge.

use crate::config::DispatchConfig;
use crate::drain::{Buffered, Downstream, Drain, EventStream};
use crate::error::{DispatchError, RecordError};
use crate::metrics::{DispatchMetrics, DispatchMetricsSnapshot};
use crate::record::{self, ErrorCode, Event};
use crate::shutdown::{ShutdownSignal, ShutdownState};
use crate::wakeup::{Wake, Wakeup};
use slotring_rs::{MetricsSnapshot, Queue};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Main,
    Priority,
}

/// Whether a failed main-channel post reports itself on the priority channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnFailure {
    Report,
    Quiet,
}

pub(crate) struct BridgeInner {
    pub(crate) main: Queue,
    pub(crate) priority: Queue,
    pub(crate) wakeup: Arc<Wakeup>,
    pub(crate) shutdown: Arc<ShutdownState>,
    pub(crate) metrics: Arc<DispatchMetrics>,
    pub(crate) config: DispatchConfig,
}

impl BridgeInner {
    pub(crate) fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal::new(Arc::clone(&self.shutdown), Arc::clone(&self.wakeup))
    }
}

/// Shared producer context.
///
/// Cheap to clone; every producer thread gets its own handle. Records go
/// to the main channel unless they are errors or response summaries, which
/// use the small priority channel the drain always empties first.
///
/// # Example
///
/// ```
/// use slotring_dispatch::{Bridge, DispatchConfig, Event, Wake};
///
/// let bridge = Bridge::new(DispatchConfig::default()).unwrap();
/// let mut drain = bridge.attach(|batch: Vec<Event>| println!("{batch:?}")).unwrap();
///
/// bridge.post(&Event::ServerTime { time: 1 }, Wake::Lazy).unwrap();
/// bridge.report_success(7, 0).unwrap();
///
/// let report = drain.drain_once();
/// assert_eq!((report.records, report.priority), (2, 1));
/// ```
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Allocates both channels.
    pub fn new(config: DispatchConfig) -> Result<Self, DispatchError> {
        config.validate()?;
        let metrics = Arc::new(DispatchMetrics::default());
        let wakeup = Arc::new(Wakeup::new(config.coalesce_threshold, Arc::clone(&metrics)));

        Ok(Self {
            inner: Arc::new(BridgeInner {
                main: Queue::new(config.main)?,
                priority: Queue::new(config.priority)?,
                wakeup,
                shutdown: Arc::new(ShutdownState::default()),
                metrics,
                config,
            }),
        })
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Posts a record.
    ///
    /// Errors and success summaries go to the priority channel and always
    /// wake the consumer; everything else goes to the main channel.
    pub fn post(&self, event: &Event, wake: Wake) -> Result<(), DispatchError> {
        self.post_event(event, wake, OnFailure::Report)
    }

    /// Posts a record on the priority channel and wakes the consumer.
    pub fn post_priority(&self, event: &Event) -> Result<(), DispatchError> {
        let len = record::encoded_len(event)?;
        self.publish(Channel::Priority, Wake::Now, len, OnFailure::Report, |buf| {
            record::encode_into(event, buf)
        })
    }

    /// Writes a main-channel record directly into its slot.
    ///
    /// `write` receives exactly `len` bytes and must leave a record in the
    /// form produced by [`record::encode_into`](crate::record::encode_into).
    /// If it fails, the slot is abandoned (never delivered) and the failure
    /// is reported as an error record on the priority channel.
    pub fn post_with<F>(&self, len: usize, wake: Wake, write: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&mut [u8]) -> Result<(), RecordError>,
    {
        self.publish(Channel::Main, wake, len, OnFailure::Report, write)
    }

    /// Reports an error on the priority channel.
    pub fn report_error(
        &self,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Result<(), DispatchError> {
        self.post_priority(&Event::error(code, message))
    }

    /// Reports a completed request on the priority channel.
    pub fn report_success(&self, request: u64, records: u32) -> Result<(), DispatchError> {
        self.post_priority(&Event::Success { request, records })
    }

    /// Posts a multi-record response.
    ///
    /// Records go to the main channel with lazy wakeups, except the last,
    /// which is marked `end` and wakes the consumer. A success summary
    /// follows on the priority channel. If a record cannot be posted, the
    /// failure is reported once, as a `ResponseFailed` error record, and the
    /// rest is dropped.
    ///
    /// Returns the number of records posted.
    pub fn publish_response<I>(&self, request: u64, records: I) -> Result<u32, DispatchError>
    where
        I: IntoIterator<Item = Event>,
    {
        let mut records = records.into_iter().peekable();
        let mut posted = 0u32;

        while let Some(mut event) = records.next() {
            let wake = if records.peek().is_none() {
                event.mark_end();
                Wake::Now
            } else {
                Wake::Lazy
            };
            if let Err(e) = self.post_event(&event, wake, OnFailure::Quiet) {
                if !e.is_terminal() {
                    let _ = self.report_error(
                        ErrorCode::ResponseFailed,
                        format!("request {}: {} after {} records", request, e, posted),
                    );
                }
                return Err(e);
            }
            posted += 1;
        }

        self.report_success(request, posted)?;
        Ok(posted)
    }

    /// Wakes the consumer now, regardless of the push counter.
    pub fn signal(&self) {
        self.inner.wakeup.signal();
    }

    fn post_event(
        &self,
        event: &Event,
        wake: Wake,
        on_failure: OnFailure,
    ) -> Result<(), DispatchError> {
        let len = record::encoded_len(event)?;
        let (channel, wake) = if event.is_priority() {
            (Channel::Priority, Wake::Now)
        } else {
            (Channel::Main, wake)
        };
        self.publish(channel, wake, len, on_failure, |buf| {
            record::encode_into(event, buf)
        })
    }

    fn publish<F>(
        &self,
        channel: Channel,
        wake: Wake,
        len: usize,
        on_failure: OnFailure,
        write: F,
    ) -> Result<(), DispatchError>
    where
        F: FnOnce(&mut [u8]) -> Result<(), RecordError>,
    {
        // Held until the record is committed or abandoned.
        let Some(_guard) = self.inner.shutdown.enter() else {
            return Err(DispatchError::ShutDown);
        };
        let report = channel == Channel::Main && on_failure == OnFailure::Report;
        let queue = match channel {
            Channel::Main => &self.inner.main,
            Channel::Priority => &self.inner.priority,
        };

        let mut claim = match queue.allocate(len) {
            Ok(claim) => claim,
            Err(e) => {
                if e.is_overflow() {
                    self.inner.metrics.add_overflows(1);
                }
                tracing::warn!(?channel, len, error = %e, "post refused");
                if report && e.is_overflow() {
                    // Best effort; the priority channel may be full as well.
                    let _ = self.report_error(ErrorCode::Overflow, e.to_string());
                }
                return Err(e.into());
            }
        };

        if let Err(e) = write(claim.payload_mut()) {
            claim.abandon();
            self.inner.metrics.add_bad_records(1);
            tracing::warn!(?channel, error = %e, "record abandoned");
            if report {
                let _ = self.report_error(ErrorCode::BadRecord, e.to_string());
            }
            return Err(e.into());
        }

        claim.commit();
        self.inner.wakeup.record_push(wake);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // CONSUMER & LIFECYCLE
    // ---------------------------------------------------------------------

    /// Attaches the single drain, delivering to `downstream`.
    ///
    /// Fails with `DispatchError::AlreadyAttached` while another drain lives.
    pub fn attach<D: Downstream>(&self, downstream: D) -> Result<Drain<D>, DispatchError> {
        Drain::new(Arc::clone(&self.inner), downstream)
    }

    /// Attaches the drain as a stream of delivered batches.
    pub fn stream(&self) -> Result<EventStream, DispatchError> {
        Ok(self.attach(Buffered::default())?.into_stream())
    }

    /// Closes the bridge to new posts and wakes the drain for a final pass.
    pub fn shutdown(&self) {
        self.shutdown_signal().shutdown();
    }

    /// Returns a cloneable shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.inner.shutdown_signal()
    }

    /// Returns `true` if shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_closed()
    }

    /// Lazy posts not yet covered by a wakeup.
    pub fn pending_pushes(&self) -> u64 {
        self.inner.wakeup.pending_pushes()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Bridge counters.
    pub fn metrics(&self) -> DispatchMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Allocator counters of the main channel (if enabled in its config).
    pub fn main_metrics(&self) -> MetricsSnapshot {
        self.inner.main.metrics()
    }

    /// Allocator counters of the priority channel (if enabled in its config).
    pub fn priority_metrics(&self) -> MetricsSnapshot {
        self.inner.priority.metrics()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("main", &self.inner.main)
            .field("priority", &self.inner.priority)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotring_rs::{Config, RetryPolicy};

    fn small() -> DispatchConfig {
        let queue = Config::with_buffer_size(4096).with_retry(RetryPolicy::no_retry());
        DispatchConfig::default()
            .with_main(queue)
            .with_priority(queue)
            .with_coalesce_threshold(4)
    }

    #[test]
    fn test_lazy_posts_coalesce() {
        let bridge = Bridge::new(small()).unwrap();
        let time = Event::ServerTime { time: 1 };
        for _ in 0..3 {
            bridge.post(&time, Wake::Lazy).unwrap();
        }
        assert_eq!(bridge.metrics().signals, 0);
        assert_eq!(bridge.pending_pushes(), 3);

        bridge.post(&time, Wake::Lazy).unwrap();
        assert_eq!(bridge.metrics().signals, 1);
        assert_eq!(bridge.pending_pushes(), 0);
    }

    #[test]
    fn test_priority_post_signals() {
        let bridge = Bridge::new(small()).unwrap();
        bridge.report_error(ErrorCode::Upstream(5), "login failed").unwrap();
        assert_eq!(bridge.metrics().signals, 1);
    }

    #[test]
    fn test_error_records_route_to_priority() {
        let bridge = Bridge::new(small()).unwrap();
        let mut drain = bridge.attach(|_: Vec<Event>| {}).unwrap();

        bridge.post(&Event::ServerTime { time: 1 }, Wake::Lazy).unwrap();
        bridge
            .post(&Event::error(ErrorCode::Upstream(3), "rejected"), Wake::Lazy)
            .unwrap();
        bridge.post(&Event::Success { request: 2, records: 0 }, Wake::Lazy).unwrap();
        assert_eq!(bridge.metrics().signals, 2);

        let report = drain.drain_once();
        assert_eq!((report.records, report.priority), (3, 2));
    }

    #[test]
    fn test_post_after_shutdown_fails() {
        let bridge = Bridge::new(small()).unwrap();
        bridge.shutdown();
        let err = bridge.post(&Event::ServerTime { time: 1 }, Wake::Now).unwrap_err();
        assert!(matches!(err, DispatchError::ShutDown));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_second_attach_is_rejected() {
        let bridge = Bridge::new(small()).unwrap();
        let drain = bridge.attach(|_: Vec<Event>| {}).unwrap();
        assert!(matches!(
            bridge.attach(|_: Vec<Event>| {}),
            Err(DispatchError::AlreadyAttached)
        ));
        drop(drain);
        assert!(bridge.attach(|_: Vec<Event>| {}).is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            Bridge::new(DispatchConfig::default().with_max_batch(0)),
            Err(DispatchError::InvalidConfig(_))
        ));
    }
}
