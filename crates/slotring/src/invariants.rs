//! Debug assertion macros for ring buffer invariants.
//!
//! They are only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.
//!
//! Cursors are unbounded byte positions; the buffer offset is `pos & mask`.

// =============================================================================
// INV-CUR-01: Cursor Ordering
// =============================================================================

/// Assert `trailing ≤ tail ≤ head` for a consistent snapshot.
///
/// Used in: `Queue::positions()`
macro_rules! debug_assert_cursor_order {
    ($trailing:expr, $tail:expr, $head:expr) => {
        debug_assert!(
            $trailing <= $tail && $tail <= $head,
            "INV-CUR-01 violated: trailing {} / tail {} / head {} out of order",
            $trailing,
            $tail,
            $head
        )
    };
}

// =============================================================================
// INV-CUR-02: Bounded Live Bytes
// =============================================================================

/// Assert a claim never makes head lap trailing.
///
/// **Invariant**: `head - trailing ≤ capacity`
///
/// Used in: `QueueInner::try_claim()` after a successful CAS
macro_rules! debug_assert_bounded_live {
    ($live:expr, $capacity:expr) => {
        debug_assert!(
            $live <= $capacity,
            "INV-CUR-02 violated: {} live bytes exceed capacity {}",
            $live,
            $capacity
        )
    };
}

// =============================================================================
// INV-SLOT-01: Block Alignment
// =============================================================================

/// Assert a slot position and size are whole blocks.
///
/// Used in: claim, pop and release paths
macro_rules! debug_assert_block_aligned {
    ($pos:expr, $size:expr) => {
        debug_assert!(
            $pos % crate::header::BLOCK_SIZE as u64 == 0
                && $size % crate::header::BLOCK_SIZE == 0
                && $size > 0,
            "INV-SLOT-01 violated: slot at {} of size {} is not block aligned",
            $pos,
            $size
        )
    };
}

// =============================================================================
// INV-REL-01: In-Order Release
// =============================================================================

/// Assert trailing never runs ahead of the slot being released.
///
/// **Invariant**: a release CAS can only lose to a spurious failure or to an
/// earlier slot's release, never to a later one.
///
/// Used in: `QueueInner::reclaim()`
macro_rules! debug_assert_release_in_order {
    ($trailing:expr, $pos:expr) => {
        debug_assert!(
            $trailing <= $pos,
            "INV-REL-01 violated: trailing {} already past released slot {}",
            $trailing,
            $pos
        )
    };
}

pub(crate) use debug_assert_block_aligned;
pub(crate) use debug_assert_bounded_live;
pub(crate) use debug_assert_cursor_order;
pub(crate) use debug_assert_release_in_order;
