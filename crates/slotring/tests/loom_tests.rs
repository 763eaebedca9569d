//! Loom-based concurrency tests for the slot protocol.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! Loom exhaustively explores thread interleavings. The model below is the
//! queue's claim / publish / pop / reclaim protocol shrunk to one word per
//! block so the state space stays tractable.

#![cfg(feature = "loom")]

use loom::cell::UnsafeCell;
use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;

const COMMITTED: u64 = 0b10 << 62;
const FAILED: u64 = 0b11 << 62;
const SIZE_MASK: u64 = (1 << 62) - 1;

/// Slot ring in block units: `tags[i]` is the indicator, `data[i]` the payload word.
struct LoomSlots {
    head: AtomicU64,
    tail: AtomicU64,
    trailing: AtomicU64,
    tags: Vec<AtomicU64>,
    data: Vec<UnsafeCell<u64>>,
}

unsafe impl Send for LoomSlots {}
unsafe impl Sync for LoomSlots {}

impl LoomSlots {
    fn new(capacity: usize) -> Self {
        Self {
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            trailing: AtomicU64::new(0),
            tags: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            data: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
        }
    }

    fn capacity(&self) -> u64 {
        self.tags.len() as u64
    }

    fn idx(&self, pos: u64) -> usize {
        (pos % self.capacity()) as usize
    }

    /// Producer: claim `size` blocks, splitting off a fragment at the end.
    fn claim(&self, size: u64) -> Option<u64> {
        let capacity = self.capacity();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let trailing = self.trailing.load(Ordering::Acquire);
            if trailing > head {
                head = self.head.load(Ordering::Relaxed);
                continue;
            }
            let free = capacity - (head - trailing);
            let remaining = capacity - head % capacity;
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
            if let Err(current) =
                self.head
                    .compare_exchange(head, head + claim, Ordering::AcqRel, Ordering::Relaxed)
            {
                head = current;
                continue;
            }
            if claim == size {
                return Some(head);
            }
            self.tags[self.idx(head)].store(FAILED | remaining, Ordering::Release);
            if claim > remaining {
                return Some(head + remaining);
            }
            // Fragment alone: reclaim it here if it sits at the release point.
            if self.trailing.load(Ordering::Acquire) == head
                && self
                    .tail
                    .compare_exchange(head, head + remaining, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                self.reclaim(head, remaining);
            }
            head = self.head.load(Ordering::Relaxed);
        }
    }

    fn commit(&self, pos: u64, size: u64, value: u64) {
        let idx = self.idx(pos);
        // Space handed over by reclaim must already read as free.
        assert_eq!(self.tags[idx].load(Ordering::Relaxed), 0);
        self.data[idx].with_mut(|p| unsafe { *p = value });
        self.tags[idx].store(COMMITTED | size, Ordering::Release);
    }

    /// Consumer: pop the next committed value, reclaiming dead space on the way.
    fn pop(&self) -> Option<u64> {
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            let indicator = self.tags[self.idx(tail)].load(Ordering::Acquire);
            if indicator == 0 {
                return None;
            }
            let size = indicator & SIZE_MASK;
            if self
                .tail
                .compare_exchange(tail, tail + size, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            let value = if indicator & FAILED == FAILED {
                None
            } else {
                Some(self.data[self.idx(tail)].with(|p| unsafe { *p }))
            };
            self.reclaim(tail, size);
            if value.is_some() {
                return value;
            }
        }
    }

    fn reclaim(&self, pos: u64, size: u64) {
        for block in (pos..pos + size).rev() {
            self.tags[self.idx(block)].store(0, Ordering::Relaxed);
        }
        while self
            .trailing
            .compare_exchange(pos, pos + size, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            thread::yield_now();
        }
    }
}

/// Two producers race for the head; the consumer sees both values exactly once.
#[test]
fn loom_two_producers_one_consumer() {
    loom::model(|| {
        let ring = Arc::new(LoomSlots::new(4));

        let producers: Vec<_> = [1u64, 2]
            .into_iter()
            .map(|value| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    let pos = ring.claim(1).unwrap();
                    ring.commit(pos, 1, value);
                })
            })
            .collect();

        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(v) = ring.pop() {
                received.push(v);
            }
            thread::yield_now();
        }

        for p in producers {
            p.join().unwrap();
        }
        while let Some(v) = ring.pop() {
            received.push(v);
        }

        received.sort_unstable();
        assert_eq!(received, vec![1, 2]);
    });
}

/// A claim straddling the end publishes a fragment the consumer skips.
#[test]
fn loom_wraparound_fragment_is_skipped() {
    loom::model(|| {
        let ring = Arc::new(LoomSlots::new(4));

        // Move every cursor to 3.
        let pos = ring.claim(3).unwrap();
        ring.commit(pos, 3, 0);
        assert_eq!(ring.pop(), Some(0));

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let pos = ring.claim(2).unwrap();
                assert_eq!(pos, 4);
                ring.commit(pos, 2, 7);
            })
        };

        let first = ring.pop();
        producer.join().unwrap();
        let got = first.or_else(|| ring.pop());

        assert_eq!(got, Some(7));
        assert_eq!(ring.trailing.load(Ordering::Relaxed), 6);
        assert_eq!(ring.head.load(Ordering::Relaxed), 6);
    });
}

/// A producer blocked on a full ring only reuses space after it is zeroed.
#[test]
fn loom_release_hands_zeroed_space_to_producer() {
    loom::model(|| {
        let ring = Arc::new(LoomSlots::new(2));
        let pos = ring.claim(2).unwrap();
        ring.commit(pos, 2, 5);

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for _ in 0..2 {
                    if let Some(pos) = ring.claim(1) {
                        ring.commit(pos, 1, 9);
                        return true;
                    }
                    thread::yield_now();
                }
                false
            })
        };

        assert_eq!(ring.pop(), Some(5));
        let pushed = producer.join().unwrap();
        if pushed {
            assert_eq!(ring.pop(), Some(9));
        }
        assert_eq!(ring.pop(), None);
    });
}

/// A fragment claimed alone at the release point is reclaimed by exactly one
/// side, the producer or a concurrently popping consumer.
#[test]
fn loom_lone_fragment_reclaimed_once() {
    loom::model(|| {
        let ring = Arc::new(LoomSlots::new(4));

        // Move every cursor to 2.
        let pos = ring.claim(2).unwrap();
        ring.commit(pos, 2, 0);
        assert_eq!(ring.pop(), Some(0));

        // 2 + 3 blocks do not fit: the 2-block tail goes alone first.
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for _ in 0..3 {
                    if let Some(pos) = ring.claim(3) {
                        assert_eq!(pos, 4);
                        ring.commit(pos, 3, 7);
                        return true;
                    }
                    thread::yield_now();
                }
                false
            })
        };

        let first = ring.pop();
        let pushed = producer.join().unwrap();
        let got = first.or_else(|| ring.pop());

        if pushed {
            assert_eq!(got, Some(7));
            assert_eq!(ring.trailing.load(Ordering::Relaxed), 7);
        } else {
            assert_eq!(got, None);
        }
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.tail.load(Ordering::Relaxed), ring.head.load(Ordering::Relaxed));
    });
}
