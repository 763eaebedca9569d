//! Shutdown utilities for graceful termination.

use crate::wakeup::Wakeup;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared shutdown state between producers and the drain.
#[derive(Debug, Default)]
pub(crate) struct ShutdownState {
    /// Producers may no longer post.
    closed: AtomicBool,
    /// The drain finished its final pass.
    drained: AtomicBool,
    /// Posts between their closed check and their commit or abandon.
    in_flight: AtomicUsize,
}

/// Marks one post as in flight until dropped.
pub(crate) struct PostGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl Drop for PostGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Release);
    }
}

impl ShutdownState {
    /// Closes the bridge and wakes the drain for its final pass.
    ///
    /// Returns `true` for the call that actually closed it.
    pub(crate) fn trigger(&self, wakeup: &Wakeup) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        wakeup.signal();
        true
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Registers a post, or returns `None` once the bridge is closed.
    ///
    /// A post that gets a guard is either seen by the final drain through
    /// `in_flight`, or it saw `closed` and backed out.
    pub(crate) fn enter(&self) -> Option<PostGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = PostGuard {
            in_flight: &self.in_flight,
        };
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    /// Posts that may still commit.
    #[inline]
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn mark_drained(&self) {
        self.drained.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }
}

/// A cloneable signal for triggering shutdown externally.
///
/// Only the first call has effect; later calls are no-ops.
#[derive(Clone)]
pub struct ShutdownSignal {
    state: Arc<ShutdownState>,
    wakeup: Arc<Wakeup>,
}

impl ShutdownSignal {
    pub(crate) fn new(state: Arc<ShutdownState>, wakeup: Arc<Wakeup>) -> Self {
        Self { state, wakeup }
    }

    /// Triggers graceful shutdown.
    ///
    /// New posts fail with `DispatchError::ShutDown`; the drain delivers
    /// everything already committed and then stops.
    pub fn shutdown(&self) {
        if self.state.trigger(&self.wakeup) {
            tracing::info!("bridge shutdown requested");
        }
    }

    /// Returns `true` if shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.state.is_closed()
    }

    /// Returns `true` once the drain has delivered its final batch.
    pub fn is_drained(&self) -> bool {
        self.state.is_drained()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("closed", &self.state.is_closed())
            .field("drained", &self.state.is_drained())
            .finish()
    }
}
