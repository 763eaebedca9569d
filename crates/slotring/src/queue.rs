use crate::backoff::{Backoff, Retry};
use crate::config::Config;
use crate::error::QueueError;
use crate::header::{slot_size, Block, Header, Indicator, SlotState, BLOCK_SIZE, HEADER_SIZE};
use crate::invariants::{
    debug_assert_block_aligned, debug_assert_bounded_live, debug_assert_cursor_order,
    debug_assert_release_in_order,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::slot::{Claim, Record};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// ## Cursors
//
// `head`, `tail` and `trailing` are unbounded u64 byte positions. The buffer
// offset is `pos & mask`. Unbounded positions make every CAS ABA-free and let
// `head - trailing == capacity` mean "full" rather than colliding with "empty".
//
//   trailing ≤ tail ≤ head,   head - trailing ≤ capacity
//
// - producers advance `head` (CAS, many writers)
// - the consumer advances `tail` (CAS, one writer)
// - release advances `trailing` (CAS, consumer side only, strictly in slot order)
//
// ## Ownership transfer
//
// The slot header's indicator word is the only transfer token:
//
// **Producer:**
// 1. Acquire-load `trailing` (synchronizes with the release that freed the space)
// 2. CAS `head` forward: the claimed range is now exclusively ours
// 3. Write payload bytes and the length word (plain writes)
// 4. Release-store `Committed(size)` (publishes 3 to the consumer)
//
// **Consumer:**
// 1. Acquire-load the indicator at `tail`; a zero tag means nothing to pop
// 2. CAS `tail` past the slot: the slot is now exclusively the consumer's
// 3. Read payload (plain reads, ordered after the producer's writes by 1)
// 4. Zero every block word in the slot, then CAS `trailing` forward
//    (release half publishes the zeroes to the next claimant)
//
// A claim that would straddle the physical end claims the leftover tail as
// well and marks it `Failed`; the consumer reclaims it like any other slot.
// When the leftover tail and the slot do not fit together, the tail is
// claimed alone first. If it sits at the release point the producer takes it
// off `tail` and reclaims it itself, with the same CAS on `trailing`.
//
// =============================================================================

/// Lock-free circular byte-slot allocator.
///
/// Any number of threads may `allocate` concurrently; exactly one
/// [`Consumer`] pops and releases. Cloning a `Queue` is cheap and shares the
/// same buffer.
pub struct Queue {
    inner: Arc<QueueInner>,
}

pub(crate) struct QueueInner {
    // === PRODUCER HOT ===
    /// Next claim position (written by producers)
    head: CachePadded<AtomicU64>,

    // === CONSUMER HOT ===
    /// Next pop position (written by the consumer)
    tail: CachePadded<AtomicU64>,
    /// Everything before this position is free (written on release)
    trailing: CachePadded<AtomicU64>,

    // === COLD STATE ===
    consumer_attached: AtomicBool,
    metrics: Metrics,
    config: Config,

    // === DATA BUFFER ===
    /// Fixed storage, never resized. Every byte lives inside an `UnsafeCell`.
    buffer: Box<[Block]>,
}

// Safety: the buffer is only touched through the claim/pop protocol above;
// header words are accessed atomically and payload bytes have a single owner
// at any time.
unsafe impl Send for QueueInner {}
unsafe impl Sync for QueueInner {}

impl QueueInner {
    #[inline]
    fn base(&self) -> *mut u8 {
        self.buffer.as_ptr().cast::<u8>().cast_mut()
    }

    #[inline]
    fn capacity(&self) -> u64 {
        self.config.capacity() as u64
    }

    #[inline]
    fn offset(&self, pos: u64) -> usize {
        (pos as usize) & self.config.mask()
    }

    #[inline]
    pub(crate) fn header(&self, pos: u64) -> Header<'_> {
        // SAFETY: offset is masked into the buffer and every position handed
        // around by the protocol is block aligned.
        unsafe { Header::at(self.base().add(self.offset(pos))) }
    }

    /// Payload pointer of the slot at `pos`.
    #[inline]
    pub(crate) fn payload_ptr(&self, pos: u64) -> *mut u8 {
        // SAFETY: a slot never straddles the physical end, so the payload
        // starts inside the buffer.
        unsafe { self.base().add(self.offset(pos) + HEADER_SIZE) }
    }

    #[inline]
    pub(crate) fn offset_of(&self, pos: u64) -> usize {
        self.offset(pos)
    }

    // ---------------------------------------------------------------------
    // PRODUCER SIDE
    // ---------------------------------------------------------------------

    /// One claim attempt. Returns the slot position or `None` if the claim
    /// would lap `trailing`.
    fn try_claim(&self, size: usize) -> Option<u64> {
        let capacity = self.capacity();
        let size = size as u64;
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let trailing = self.trailing.load(Ordering::Acquire);
            if trailing > head {
                // Our head is stale by at least a full release cycle.
                head = self.head.load(Ordering::Relaxed);
                continue;
            }
            let free = capacity - (head - trailing);
            let remaining = capacity - self.offset(head) as u64;

            // Straddling the end: take the leftover tail as well and start over
            // at 0. If both do not fit, take the leftover tail alone.
            let claim = if size <= remaining {
                size
            } else if remaining + size <= free {
                remaining + size
            } else {
                remaining
            };
            if claim > free {
                return None;
            }

            if let Err(current) = self.head.compare_exchange_weak(
                head,
                head + claim,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                head = current;
                continue;
            }
            // INV-CUR-02: the claim fits in front of trailing
            debug_assert_bounded_live!(head + claim - trailing, capacity);

            if claim == size {
                return Some(head);
            }
            self.publish_fragment(head, remaining);
            if claim > remaining {
                return Some(head + remaining);
            }
            self.reclaim_fragment(head, remaining as usize);
            head = self.head.load(Ordering::Relaxed);
        }
    }

    /// Marks `[pos, pos + bytes)` up to the physical end as dead space.
    fn publish_fragment(&self, pos: u64, bytes: u64) {
        self.header(pos).publish(Indicator::failed(bytes as usize));
        if self.config.enable_metrics {
            self.metrics.add_fragments(1);
        }
        tracing::trace!(at = self.offset(pos), bytes, "wraparound fragment");
    }

    /// Reclaims a fragment on the producer side when it sits exactly at the
    /// release point. Otherwise the consumer skips it in order.
    fn reclaim_fragment(&self, pos: u64, size: usize) {
        if self.trailing.load(Ordering::Acquire) != pos {
            return;
        }
        // The consumer may be taking it right now; whoever moves tail owns it.
        if self
            .tail
            .compare_exchange(pos, pos + size as u64, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.reclaim(pos, size);
        }
    }

    fn claim(&self, len: usize) -> Result<(u64, usize), QueueError> {
        let capacity = self.config.capacity();
        let size = slot_size(len).ok_or(QueueError::RecordTooLarge {
            size: usize::MAX,
            capacity,
        })?;
        if size > capacity {
            return Err(QueueError::RecordTooLarge { size, capacity });
        }

        let mut retry = Retry::new(self.config.retry);
        loop {
            if let Some(pos) = self.try_claim(size) {
                debug_assert_block_aligned!(pos, size);
                // SAFETY: the CAS on head gave us exclusive access to [pos, pos + size).
                unsafe { self.header(pos).write_len(len) };
                if self.config.enable_metrics {
                    self.metrics.add_claims(1);
                }
                return Ok((pos, size));
            }
            if !retry.wait() {
                break;
            }
            if self.config.enable_metrics {
                self.metrics.add_retries(1);
            }
        }

        if self.config.enable_metrics {
            self.metrics.add_overflows(1);
        }
        let attempts = retry.attempts();
        tracing::warn!(size, attempts, capacity, "queue overflow");
        Err(QueueError::Overflow { size, attempts })
    }

    /// Publishes a claimed slot to the consumer.
    pub(crate) fn commit(&self, pos: u64, size: usize) {
        self.header(pos).publish(Indicator::committed(size));
        if self.config.enable_metrics {
            self.metrics.add_commits(1);
        }
    }

    /// Turns a claimed slot into dead space the consumer will reclaim.
    pub(crate) fn abandon(&self, pos: u64, size: usize) {
        self.header(pos).publish(Indicator::failed(size));
        if self.config.enable_metrics {
            self.metrics.add_abandons(1);
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER SIDE
    // ---------------------------------------------------------------------

    /// Takes the slot at `tail` if it has been published.
    fn take_slot(&self) -> Option<(u64, Indicator)> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let indicator = self.header(tail).acquire();
            if indicator.is_free() {
                return None;
            }
            let size = indicator.size();
            debug_assert_block_aligned!(tail, size);

            match self.tail.compare_exchange_weak(
                tail,
                tail + size as u64,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some((tail, indicator)),
                Err(current) => tail = current,
            }
        }
    }

    /// Returns a popped slot to the free pool.
    pub(crate) fn reclaim(&self, pos: u64, size: usize) {
        debug_assert_block_aligned!(pos, size);
        self.zero(pos, size);

        let next = pos + size as u64;
        let mut backoff = Backoff::new();
        while let Err(current) =
            self.trailing
                .compare_exchange_weak(pos, next, Ordering::AcqRel, Ordering::Relaxed)
        {
            // INV-REL-01: we can only be waiting on an earlier slot
            debug_assert_release_in_order!(current, pos);
            backoff.snooze();
        }

        if self.config.enable_metrics {
            self.metrics.add_releases(1);
        }
    }

    /// Clears every block word in `[pos, pos + size)`, last block first.
    fn zero(&self, pos: u64, size: usize) {
        let mut block = pos + size as u64;
        while block > pos {
            block -= BLOCK_SIZE as u64;
            self.header(block).set(Indicator::FREE);
        }
    }
}

impl Queue {
    /// Creates a queue, allocating and zeroing its buffer once.
    ///
    /// Fails if the configured size is not a power of two or is too small.
    pub fn new(config: Config) -> Result<Self, QueueError> {
        config.validate()?;

        let blocks = config.capacity() / BLOCK_SIZE;
        let mut buffer = Vec::with_capacity(blocks);
        buffer.resize_with(blocks, Block::zeroed);

        Ok(Self {
            inner: Arc::new(QueueInner {
                head: CachePadded::new(AtomicU64::new(0)),
                tail: CachePadded::new(AtomicU64::new(0)),
                trailing: CachePadded::new(AtomicU64::new(0)),
                consumer_attached: AtomicBool::new(false),
                metrics: Metrics::new(),
                config,
                buffer: buffer.into_boxed_slice(),
            }),
        })
    }

    // ---------------------------------------------------------------------
    // CONSTANTS & STATUS
    // ---------------------------------------------------------------------

    /// Returns the buffer capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.config.capacity()
    }

    /// Returns the configuration this queue was built with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Offset of the next claim point.
    #[inline]
    pub fn head(&self) -> usize {
        self.inner.offset(self.inner.head.load(Ordering::Acquire))
    }

    /// Offset of the next pop point.
    #[inline]
    pub fn tail(&self) -> usize {
        self.inner.offset(self.inner.tail.load(Ordering::Acquire))
    }

    /// Offset up to which every slot has been released.
    #[inline]
    pub fn trailing(&self) -> usize {
        self.inner.offset(self.inner.trailing.load(Ordering::Acquire))
    }

    /// Bytes claimed and not yet released (`head - trailing`).
    pub fn live_bytes(&self) -> usize {
        let (trailing, _, head) = self.positions();
        (head - trailing) as usize
    }

    /// Bytes claimed and not yet popped (`head - tail`).
    pub fn pending_bytes(&self) -> usize {
        let (_, tail, head) = self.positions();
        (head - tail) as usize
    }

    /// Returns true if nothing is claimed beyond the consumer's position.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending_bytes() == 0
    }

    /// Reads the state of the slot header at a buffer offset.
    ///
    /// Diagnostic only: the answer may be stale by the time it is returned.
    pub fn slot_state(&self, offset: usize) -> Option<SlotState> {
        if offset >= self.capacity() || offset % BLOCK_SIZE != 0 {
            return None;
        }
        Some(self.inner.header(offset as u64).acquire().state())
    }

    /// Snapshot of (trailing, tail, head) positions.
    fn positions(&self) -> (u64, u64, u64) {
        // Load in release order so the snapshot stays ordered.
        let trailing = self.inner.trailing.load(Ordering::Acquire);
        let tail = self.inner.tail.load(Ordering::Acquire);
        let head = self.inner.head.load(Ordering::Acquire);
        // INV-CUR-01: Cursor Ordering
        debug_assert_cursor_order!(trailing, tail, head);
        (trailing, tail, head)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Claims room for a `len`-byte payload.
    ///
    /// Retries per the configured [`RetryPolicy`](crate::RetryPolicy) while the
    /// consumer has not released enough space, then fails with
    /// `QueueError::Overflow`. Requests that can never fit fail immediately
    /// with `QueueError::RecordTooLarge`.
    ///
    /// The returned [`Claim`] grants exclusive write access to the payload.
    /// Publish it with [`Claim::commit`]; dropping it abandons the slot.
    pub fn allocate(&self, len: usize) -> Result<Claim<'_>, QueueError> {
        let (pos, size) = self.inner.claim(len)?;
        Ok(Claim::new(&self.inner, pos, size, len))
    }

    /// Allocates, copies `bytes` in and commits.
    pub fn push(&self, bytes: &[u8]) -> Result<(), QueueError> {
        let mut claim = self.allocate(bytes.len())?;
        claim.payload_mut().copy_from_slice(bytes);
        claim.commit();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Attaches the single consumer.
    ///
    /// Fails with `QueueError::ConsumerAttached` while another `Consumer`
    /// for this queue is alive.
    pub fn consumer(&self) -> Result<Consumer, QueueError> {
        if self
            .inner
            .consumer_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(QueueError::ConsumerAttached);
        }
        Ok(Consumer {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Get a snapshot of metrics if enabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        if self.inner.config.enable_metrics {
            self.inner.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Clone for Queue {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.capacity())
            .field("head", &self.head())
            .field("tail", &self.tail())
            .field("trailing", &self.trailing())
            .finish()
    }
}

/// The queue's single consumer.
///
/// `pop` takes `&mut self` and the returned [`Record`] borrows the consumer,
/// so records are always released in the order they were popped.
pub struct Consumer {
    inner: Arc<QueueInner>,
}

impl Consumer {
    /// Pops the next committed record, or `None` if nothing is published.
    ///
    /// Never blocks. Failed slots (wraparound fragments, abandoned claims)
    /// are reclaimed on the way and never returned.
    pub fn pop(&mut self) -> Option<Record<'_>> {
        let inner: &QueueInner = &self.inner;
        loop {
            let (pos, indicator) = inner.take_slot()?;
            let size = indicator.size();
            if indicator.is_committed() {
                if inner.config.enable_metrics {
                    inner.metrics.add_pops(1);
                }
                // SAFETY: committed via release-store, observed via acquire in take_slot.
                let len = unsafe { inner.header(pos).read_len() };
                return Some(Record::new(inner, pos, size, len));
            }
            inner.reclaim(pos, size);
        }
    }

    /// Pops and releases up to `max` records, handing each payload to `handler`.
    ///
    /// Returns the number of records consumed.
    pub fn consume_up_to<F>(&mut self, max: usize, mut handler: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        let mut count = 0;
        while count < max {
            let Some(record) = self.pop() else {
                break;
            };
            handler(record.payload());
            record.release();
            count += 1;
        }
        count
    }

    /// Returns a handle to the queue this consumer drains.
    pub fn queue(&self) -> Queue {
        Queue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.inner.consumer_attached.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer").finish_non_exhaustive()
    }
}
