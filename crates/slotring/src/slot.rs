use crate::queue::QueueInner;
use std::marker::PhantomData;

/// Exclusive write access to a freshly claimed slot.
///
/// The producer writes into [`payload_mut`](Self::payload_mut), then either
/// [`commit`](Self::commit)s to publish the record or
/// [`abandon`](Self::abandon)s it. A claim dropped without either is
/// abandoned, so an incompletely written record never becomes visible.
///
/// # Example
///
/// ```
/// use slotring_rs::{Config, Queue};
///
/// let queue = Queue::new(Config::with_buffer_size(1024)).unwrap();
/// let mut claim = queue.allocate(3).unwrap();
/// claim.payload_mut().copy_from_slice(b"abc");
/// claim.commit();
/// ```
pub struct Claim<'a> {
    queue: &'a QueueInner,
    pos: u64,
    size: usize,
    len: usize,
    finished: bool,
}

impl<'a> Claim<'a> {
    pub(crate) fn new(queue: &'a QueueInner, pos: u64, size: usize, len: usize) -> Self {
        Self {
            queue,
            pos,
            size,
            len,
            finished: false,
        }
    }

    /// Returns the payload for writing.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: the head CAS gave this claim exclusive access to the slot,
        // which is contiguous and holds at least `len` payload bytes.
        unsafe { std::slice::from_raw_parts_mut(self.queue.payload_ptr(self.pos), self.len) }
    }

    /// Requested payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length payload.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes this slot occupies in the ring, header included.
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.size
    }

    /// Buffer offset of this slot's header.
    #[inline]
    pub fn offset(&self) -> usize {
        self.queue.offset_of(self.pos)
    }

    /// Publishes the record. After this the consumer may pop it.
    pub fn commit(mut self) {
        self.queue.commit(self.pos, self.size);
        self.finished = true;
    }

    /// Gives the slot up without publishing it.
    ///
    /// The consumer skips the slot and returns its space to the pool.
    pub fn abandon(mut self) {
        self.queue.abandon(self.pos, self.size);
        self.finished = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(at = self.offset(), size = self.size, "claim dropped without commit");
            self.queue.abandon(self.pos, self.size);
        }
    }
}

impl std::fmt::Debug for Claim<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Claim")
            .field("offset", &self.offset())
            .field("size", &self.size)
            .field("len", &self.len)
            .finish()
    }
}

/// A popped record, owned by the consumer until released.
///
/// Borrowing the [`Consumer`](crate::Consumer) mutably keeps releases in pop
/// order. Dropping the record releases it.
pub struct Record<'a> {
    queue: &'a QueueInner,
    pos: u64,
    size: usize,
    len: usize,
    _consumer: PhantomData<&'a mut ()>,
}

impl<'a> Record<'a> {
    pub(crate) fn new(queue: &'a QueueInner, pos: u64, size: usize, len: usize) -> Self {
        Self {
            queue,
            pos,
            size,
            len,
            _consumer: PhantomData,
        }
    }

    /// Returns the payload exactly as the producer wrote it.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        // SAFETY: the slot was published with a release-store and observed
        // with an acquire-load; until release only this record touches it.
        unsafe { std::slice::from_raw_parts(self.queue.payload_ptr(self.pos), self.len) }
    }

    /// Returns the payload for in-place modification.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `payload`, and `&mut self` makes the access unique.
        unsafe { std::slice::from_raw_parts_mut(self.queue.payload_ptr(self.pos), self.len) }
    }

    /// Payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length payload.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes this slot occupies in the ring, header included.
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.size
    }

    /// Buffer offset of this slot's header.
    #[inline]
    pub fn offset(&self) -> usize {
        self.queue.offset_of(self.pos)
    }

    /// Returns the slot to the free pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Record<'_> {
    fn drop(&mut self) {
        self.queue.reclaim(self.pos, self.size);
    }
}

impl std::fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("offset", &self.offset())
            .field("size", &self.size)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Config, Queue, RetryPolicy, SlotState};

    fn queue(size: usize) -> Queue {
        Queue::new(
            Config::with_buffer_size(size)
                .with_retry(RetryPolicy::no_retry())
                .with_metrics(true),
        )
        .unwrap()
    }

    #[test]
    fn test_claim_reports_sizes() {
        let q = queue(128);
        let claim = q.allocate(10).unwrap();
        assert_eq!(claim.len(), 10);
        assert_eq!(claim.slot_size(), 32);
        assert_eq!(claim.offset(), 0);
        assert!(!claim.is_empty());
        claim.commit();
    }

    #[test]
    fn test_abandon_is_skipped_and_reclaimed() {
        let q = queue(128);
        let mut consumer = q.consumer().unwrap();

        q.allocate(8).unwrap().abandon();
        q.push(b"kept").unwrap();

        let record = consumer.pop().unwrap();
        assert_eq!(record.payload(), b"kept");
        assert_eq!(record.offset(), 32);
        drop(record);

        assert_eq!(q.live_bytes(), 0);
        assert_eq!(q.metrics().abandons, 1);
        assert_eq!(q.metrics().pops, 1);
        assert_eq!(q.metrics().releases, 2);
    }

    #[test]
    fn test_dropped_claim_is_abandoned() {
        let q = queue(128);
        {
            let mut claim = q.allocate(4).unwrap();
            claim.payload_mut()[0] = 9;
        }
        assert_eq!(q.slot_state(0), Some(SlotState::Failed(32)));

        let mut consumer = q.consumer().unwrap();
        assert!(consumer.pop().is_none());
        assert_eq!(q.live_bytes(), 0);
        assert_eq!(q.slot_state(0), Some(SlotState::Free));
    }

    #[test]
    fn test_record_payload_mut() {
        let q = queue(128);
        let mut consumer = q.consumer().unwrap();
        q.push(&[1, 2, 3]).unwrap();

        let mut record = consumer.pop().unwrap();
        record.payload_mut()[0] = 42;
        assert_eq!(record.payload(), &[42, 2, 3]);
        assert_eq!(record.len(), 3);
        assert_eq!(record.slot_size(), 32);
    }

    #[test]
    fn test_zero_length_record() {
        let q = queue(64);
        let mut consumer = q.consumer().unwrap();
        q.allocate(0).unwrap().commit();

        let record = consumer.pop().unwrap();
        assert!(record.is_empty());
        assert_eq!(record.slot_size(), 16);
    }
}
