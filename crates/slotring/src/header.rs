//! Slot header: the atomic state word in front of every payload.
//!
//! ```text
//!  0               8               16
//!  +---------------+---------------+------------------------+
//!  | indicator u64 | payload len   | payload ...            |
//!  +---------------+---------------+------------------------+
//!  |<------- HEADER_SIZE -------->|
//! ```
//!
//! The indicator packs a two-bit tag and a 62-bit slot size into one word so a
//! single atomic load observes both. A slot's size always includes the header
//! and is a whole number of blocks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes of control data in front of each payload.
pub const HEADER_SIZE: usize = 16;

/// Allocation granularity. Equal to the header size so a header always lands
/// on a valid boundary, including after a wraparound split.
pub const BLOCK_SIZE: usize = HEADER_SIZE;

const TAG_SHIFT: u32 = u64::BITS - 2;
const SIZE_MASK: u64 = u64::MAX >> 2;
const TAG_MASK: u64 = !SIZE_MASK;
const COMMITTED: u64 = 0b10 << TAG_SHIFT;
const FAILED: u64 = 0b11 << TAG_SHIFT;

/// Rounds `value` up to a multiple of `pow2`.
#[inline]
pub const fn round_up(value: usize, pow2: usize) -> usize {
    (value + pow2 - 1) & !(pow2 - 1)
}

/// Total slot size (header included, block-rounded) for a payload length.
///
/// Returns `None` if the computation overflows `usize`.
#[inline]
pub fn slot_size(payload_len: usize) -> Option<usize> {
    payload_len
        .checked_add(HEADER_SIZE + BLOCK_SIZE - 1)
        .map(|v| v & !(BLOCK_SIZE - 1))
}

/// Decoded state of a slot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing to read here (never claimed, released, or claimed but not yet published).
    Free,
    /// Payload fully written; `size` bytes including the header.
    Committed(usize),
    /// Dead space to skip and reclaim; `size` bytes including the header.
    Failed(usize),
}

/// Packed tag + size word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Indicator(u64);

impl Indicator {
    pub(crate) const FREE: Self = Self(0);

    #[inline]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub(crate) const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) const fn committed(size: usize) -> Self {
        Self((size as u64 & SIZE_MASK) | COMMITTED)
    }

    #[inline]
    pub(crate) const fn failed(size: usize) -> Self {
        Self((size as u64 & SIZE_MASK) | FAILED)
    }

    #[inline]
    pub(crate) const fn size(self) -> usize {
        (self.0 & SIZE_MASK) as usize
    }

    /// A zero tag reads as free, whatever the size bits say.
    #[inline]
    pub(crate) const fn is_free(self) -> bool {
        self.0 & TAG_MASK == 0
    }

    #[inline]
    pub(crate) const fn is_committed(self) -> bool {
        self.0 & TAG_MASK == COMMITTED
    }

    #[inline]
    pub(crate) const fn is_failed(self) -> bool {
        self.0 & TAG_MASK == FAILED
    }

    pub(crate) const fn state(self) -> SlotState {
        if self.is_committed() {
            SlotState::Committed(self.size())
        } else if self.is_failed() {
            SlotState::Failed(self.size())
        } else {
            SlotState::Free
        }
    }
}

/// One granule of buffer storage. Its alignment guarantees every block
/// boundary can host an 8-byte atomic header word.
#[repr(C, align(16))]
pub(crate) struct Block(std::cell::UnsafeCell<[u8; BLOCK_SIZE]>);

impl Block {
    pub(crate) const fn zeroed() -> Self {
        Self(std::cell::UnsafeCell::new([0; BLOCK_SIZE]))
    }
}

/// Borrowed view of the header at one block boundary.
#[derive(Clone, Copy)]
pub(crate) struct Header<'a> {
    indicator: &'a AtomicU64,
    len: *mut u64,
}

impl<'a> Header<'a> {
    /// # Safety
    ///
    /// `ptr` must point at a block boundary inside a live buffer that outlives `'a`.
    #[inline]
    pub(crate) unsafe fn at(ptr: *mut u8) -> Self {
        debug_assert_eq!(ptr as usize % BLOCK_SIZE, 0, "header not block aligned");
        Self {
            indicator: AtomicU64::from_ptr(ptr.cast::<u64>()),
            len: ptr.add(8).cast::<u64>(),
        }
    }

    /// Publishes a new tag with release ordering.
    #[inline]
    pub(crate) fn publish(&self, value: Indicator) {
        self.indicator.store(value.raw(), Ordering::Release);
    }

    /// Observes the tag with acquire ordering.
    #[inline]
    pub(crate) fn acquire(&self) -> Indicator {
        Indicator::from_raw(self.indicator.load(Ordering::Acquire))
    }

    /// Relaxed store, for zeroing released space.
    #[inline]
    pub(crate) fn set(&self, value: Indicator) {
        self.indicator.store(value.raw(), Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// Caller must have exclusive write access to this slot.
    #[inline]
    pub(crate) unsafe fn write_len(&self, len: usize) {
        self.len.write(len as u64);
    }

    /// # Safety
    ///
    /// Caller must have observed the slot as committed (acquire) and own it.
    #[inline]
    pub(crate) unsafe fn read_len(&self) -> usize {
        self.len.read() as usize
    }
}
