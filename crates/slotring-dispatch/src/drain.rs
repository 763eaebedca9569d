//! Consumer side of the bridge: batch building and the wakeup loop.

use crate::bridge::BridgeInner;
use crate::error::DispatchError;
use crate::invariants::{
    debug_assert_batch_bounded, debug_assert_priority_first, debug_assert_rearmed,
    debug_assert_shutdown_drained,
};
use crate::record::{self, Event};
use crate::shutdown::ShutdownSignal;
use futures_core::Stream;
use slotring_rs::{Consumer, QueueError};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

/// Receives decoded records from the drain.
///
/// `project` runs while the record's slot is still held, so an
/// implementation can copy out whatever it needs; `deliver` then receives
/// the batch in order: priority records first, then main records.
pub trait Downstream {
    /// The downstream's own record representation.
    type Item;

    /// Converts one decoded record.
    fn project(&mut self, event: Event) -> Self::Item;

    /// Receives one batch of at most `max_batch` items.
    fn deliver(&mut self, batch: Vec<Self::Item>);
}

impl<F> Downstream for F
where
    F: FnMut(Vec<Event>),
{
    type Item = Event;

    fn project(&mut self, event: Event) -> Event {
        event
    }

    fn deliver(&mut self, batch: Vec<Event>) {
        self(batch);
    }
}

/// Downstream that keeps delivered batches until they are taken.
#[derive(Debug, Default)]
pub struct Buffered {
    batches: VecDeque<Vec<Event>>,
}

impl Buffered {
    /// Takes the oldest delivered batch.
    pub fn pop(&mut self) -> Option<Vec<Event>> {
        self.batches.pop_front()
    }

    /// Number of batches waiting.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl Downstream for Buffered {
    type Item = Event;

    fn project(&mut self, event: Event) -> Event {
        event
    }

    fn deliver(&mut self, batch: Vec<Event>) {
        self.batches.push_back(batch);
    }
}

/// Async stream of delivered batches, ending after the shutdown drain.
pub type EventStream = Pin<Box<dyn Stream<Item = Vec<Event>> + Send>>;

/// What one drain pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Batches delivered.
    pub batches: usize,
    /// Records delivered, both channels.
    pub records: usize,
    /// Of which came from the priority channel.
    pub priority: usize,
    /// Slots dropped because their payload did not decode.
    pub undecodable: usize,
    /// The pass stopped at `max_batches_per_wakeup` with a full last batch.
    pub exhausted: bool,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.batches += other.batches;
        self.records += other.records;
        self.priority += other.priority;
        self.undecodable += other.undecodable;
        self.exhausted = other.exhausted;
    }
}

/// The bridge's single consumer.
///
/// Created by [`Bridge::attach`](crate::Bridge::attach). Never polls: it
/// only runs when a producer, the push counter, shutdown, or its own
/// re-arm signals the shared wakeup.
pub struct Drain<D: Downstream> {
    inner: Arc<BridgeInner>,
    main: Consumer,
    priority: Consumer,
    downstream: D,
    finished: bool,
}

impl<D: Downstream> Drain<D> {
    pub(crate) fn new(inner: Arc<BridgeInner>, downstream: D) -> Result<Self, DispatchError> {
        let attached = |e: QueueError| match e {
            QueueError::ConsumerAttached => DispatchError::AlreadyAttached,
            other => DispatchError::Queue(other),
        };
        let main = inner.main.consumer().map_err(attached)?;
        let priority = inner.priority.consumer().map_err(attached)?;
        tracing::info!(
            main = inner.main.capacity(),
            priority = inner.priority.capacity(),
            "drain attached"
        );

        Ok(Self {
            inner,
            main,
            priority,
            downstream,
            finished: false,
        })
    }

    /// Builds one batch: priority records first, then main, up to `max_batch`.
    fn fill_batch(&mut self, report: &mut DrainReport) -> Vec<D::Item> {
        let max = self.inner.config.max_batch;
        let mut batch = Vec::new();

        let priority = take_into(
            &mut self.priority,
            &mut self.downstream,
            &mut batch,
            max,
            &mut report.undecodable,
        );
        debug_assert_priority_first!(priority, batch.len());
        take_into(
            &mut self.main,
            &mut self.downstream,
            &mut batch,
            max,
            &mut report.undecodable,
        );
        debug_assert_batch_bounded!(batch.len(), max);

        report.priority += priority;
        batch
    }

    /// Runs one wakeup's worth of draining without waiting.
    ///
    /// Delivers full batches back to back until a batch comes up short or
    /// `max_batches_per_wakeup` is reached.
    pub fn drain_once(&mut self) -> DrainReport {
        let max_batch = self.inner.config.max_batch;
        let max_batches = self.inner.config.max_batches_per_wakeup;
        let mut report = DrainReport::default();

        while report.batches < max_batches {
            let batch = self.fill_batch(&mut report);
            if batch.is_empty() {
                break;
            }
            let full = batch.len() == max_batch;
            report.batches += 1;
            report.records += batch.len();
            self.downstream.deliver(batch);
            if !full {
                break;
            }
            report.exhausted = report.batches == max_batches;
        }

        let metrics = &self.inner.metrics;
        metrics.add_batches(report.batches as u64);
        metrics.add_delivered(report.records as u64);
        metrics.add_priority_delivered(report.priority as u64);
        metrics.add_undecodable(report.undecodable as u64);
        report
    }

    /// Drains until a pass finds both channels empty.
    fn drain_all(&mut self) -> DrainReport {
        let mut total = DrainReport::default();
        loop {
            let pass = self.drain_once();
            total.merge(pass);
            if pass.records == 0 && pass.undecodable == 0 {
                debug_assert_shutdown_drained!(self.inner.shutdown.is_closed(), pass.records);
                return total;
            }
        }
    }

    /// Final pass after shutdown.
    ///
    /// Posts that got past the closed check may still be committing; keep
    /// draining (and freeing room for them) until none is left in flight,
    /// then empty both channels one last time.
    async fn drain_final(&mut self) -> DrainReport {
        let mut total = DrainReport::default();
        loop {
            let settled = self.inner.shutdown.in_flight() == 0;
            total.merge(self.drain_all());
            if settled {
                return total;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Waits for the next wakeup and drains.
    ///
    /// A wakeup that delivered anything re-arms itself, so leftovers and
    /// lazily posted records are picked up on the next turn. After shutdown
    /// the final pass drains everything and later calls return `None`.
    pub async fn next_wakeup(&mut self) -> Option<DrainReport> {
        if self.finished {
            return None;
        }
        self.inner.wakeup.wait().await;

        if self.inner.shutdown.is_closed() {
            let report = self.drain_final().await;
            self.finished = true;
            self.inner.shutdown.mark_drained();
            tracing::info!(records = report.records, "drain finished after shutdown");
            return Some(report);
        }

        let report = self.drain_once();
        let rearmed = report.records > 0;
        if rearmed {
            self.inner.wakeup.rearm();
        }
        debug_assert_rearmed!(report.records, rearmed);
        tracing::debug!(
            batches = report.batches,
            records = report.records,
            priority = report.priority,
            exhausted = report.exhausted,
            "drain pass"
        );
        Some(report)
    }

    /// Runs until shutdown, then returns the downstream.
    pub async fn run(mut self) -> D {
        while self.next_wakeup().await.is_some() {}
        self.downstream
    }

    /// Returns a signal that shuts the bridge down.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.inner.shutdown_signal()
    }

    pub fn downstream(&self) -> &D {
        &self.downstream
    }

    pub fn downstream_mut(&mut self) -> &mut D {
        &mut self.downstream
    }

    /// Detaches and returns the downstream. Undrained records stay queued.
    pub fn into_downstream(self) -> D {
        self.downstream
    }

    /// Returns `true` once the shutdown drain has completed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drain<Buffered> {
    /// Turns this drain into a stream of delivered batches.
    pub fn into_stream(self) -> EventStream {
        Box::pin(futures_util::stream::unfold(self, |mut drain| async move {
            loop {
                if let Some(batch) = drain.downstream.pop() {
                    return Some((batch, drain));
                }
                drain.next_wakeup().await?;
            }
        }))
    }
}

impl<D: Downstream> std::fmt::Debug for Drain<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drain")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Moves records from one channel into `batch` until it holds `max` items or
/// the channel has nothing published. Returns the number of items added.
fn take_into<D: Downstream>(
    consumer: &mut Consumer,
    downstream: &mut D,
    batch: &mut Vec<D::Item>,
    max: usize,
    undecodable: &mut usize,
) -> usize {
    let mut taken = 0;
    while batch.len() < max {
        let Some(record) = consumer.pop() else {
            break;
        };
        match record::decode(record.payload()) {
            Ok(event) => {
                batch.push(downstream.project(event));
                taken += 1;
            }
            Err(e) => {
                tracing::warn!(offset = record.offset(), error = %e, "undecodable record dropped");
                *undecodable += 1;
            }
        }
        record.release();
    }
    taken
}
