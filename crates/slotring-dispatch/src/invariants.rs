//! Debug assertion macros for drain invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// INV-DRAIN-01: Bounded Batch
// =============================================================================

/// Assert that a batch never exceeds the configured cap.
///
/// **Invariant**: `batch.len() ≤ max_batch`
///
/// Used in: `Drain::fill_batch()`
macro_rules! debug_assert_batch_bounded {
    ($len:expr, $max:expr) => {
        debug_assert!(
            $len <= $max,
            "INV-DRAIN-01 violated: batch of {} exceeds cap {}",
            $len,
            $max
        )
    };
}

// =============================================================================
// INV-DRAIN-02: Priority First
// =============================================================================

/// Assert that priority records lead their batch.
///
/// **Invariant**: within one batch, every priority record precedes every main record
///
/// Used in: `Drain::fill_batch()`
macro_rules! debug_assert_priority_first {
    ($priority_taken:expr, $batch_len_before_main:expr) => {
        debug_assert!(
            $priority_taken == $batch_len_before_main,
            "INV-DRAIN-02 violated: {} priority records but batch held {} before main",
            $priority_taken,
            $batch_len_before_main
        )
    };
}

// =============================================================================
// INV-DRAIN-03: Self Re-arm
// =============================================================================

/// Assert that a wakeup which delivered records scheduled another turn.
///
/// **Invariant**: `records > 0 → rearm()`
///
/// Used in: `Drain::next_wakeup()`
macro_rules! debug_assert_rearmed {
    ($records:expr, $rearmed:expr) => {
        debug_assert!(
            $records == 0 || $rearmed,
            "INV-DRAIN-03 violated: delivered {} records without re-arming",
            $records
        )
    };
}

// =============================================================================
// INV-SHUT-01: Final Drain
// =============================================================================

/// Assert that the final pass ended on an empty drain.
///
/// **Invariant**: `shutdown → drain until a pass delivers nothing`
///
/// Used in: `Drain::drain_all()`
macro_rules! debug_assert_shutdown_drained {
    ($closed:expr, $last_pass:expr) => {
        debug_assert!(
            !$closed || $last_pass == 0,
            "INV-SHUT-01 violated: final drain stopped after a pass of {} records",
            $last_pass
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_batch_bounded;
pub(crate) use debug_assert_priority_first;
pub(crate) use debug_assert_rearmed;
pub(crate) use debug_assert_shutdown_drained;
