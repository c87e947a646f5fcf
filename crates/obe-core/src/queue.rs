// Bounded producer/consumer FIFO — the one kind of inter-stage edge in the
// pipeline (spec.md §3/§4.1).
//
// Built directly on `std::sync::{Mutex, Condvar}` plus an `AtomicBool`
// cancel flag, the same shape `velocut-media/src/worker.rs` hand-rolls for
// its scrub frame-request slot (`Arc<(Mutex<Option<T>>, Condvar)>`) and its
// probe-concurrency semaphore (`Arc<(Mutex<u32>, Condvar)>`), generalized
// to a `VecDeque`-backed FIFO with both a not-empty and a not-full wait.
//
// The queue never silently drops: every overflow is either a blocking
// stall (the producer waits) or an explicit, counted `DroppedOldest`
// outcome the caller must act on. A queue may additionally carry a hard
// ceiling independent of its blocking capacity — exceeding it is the fatal,
// operator-visible condition spec.md §3 describes for the video-encoder
// input queue, and `push` reports it rather than enforcing it silently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// What happens when a bounded queue is full at push time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block the producer until space frees up or the queue is cancelled.
    Stall,
    /// Drop the oldest queued item to make room, counted by the caller.
    DropOldest,
}

/// Result of a `push` call.
#[derive(Debug)]
pub enum PushOutcome<T> {
    /// The item was enqueued normally.
    Pushed,
    /// `OverflowPolicy::DropOldest` evicted this item to make room.
    DroppedOldest(T),
    /// The queue was cancelled before the item could be enqueued; the item
    /// is handed back so the caller can release it.
    Cancelled(T),
    /// `size()` reached `hard_ceiling` — a fatal, operator-visible condition.
    /// The item was still enqueued; the caller decides how to react (in
    /// practice: log, then terminate).
    FatalCeilingExceeded { size: usize, ceiling: usize },
}

struct Inner<T> {
    items: VecDeque<T>,
}

pub struct Queue<T> {
    name: String,
    cap: Option<usize>,
    overflow: OverflowPolicy,
    hard_ceiling: Option<usize>,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    cancelled: AtomicBool,
}

impl<T> Queue<T> {
    /// An unbounded queue with no fatal ceiling — used for edges where
    /// backpressure is handled upstream (e.g. the mux's fan-in queue, which
    /// is bounded implicitly by each encoder's own input queue).
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cap: None,
            overflow: OverflowPolicy::Stall,
            hard_ceiling: None,
            inner: Mutex::new(Inner { items: VecDeque::new() }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// A bounded queue. `hard_ceiling`, if set, is independent of `cap` and
    /// flags a fatal condition (spec.md §3: "Queue size never exceeds a hard
    /// ceiling (default 1800 items); exceeding it is a fatal operator-visible
    /// condition on the video encoder queue").
    pub fn bounded(
        name: impl Into<String>,
        cap: usize,
        overflow: OverflowPolicy,
        hard_ceiling: Option<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            cap: Some(cap),
            overflow,
            hard_ceiling,
            inner: Mutex::new(Inner { items: VecDeque::new() }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// The fatal-ceiling-guarded video/audio encoder input queue shape used
    /// throughout the pipeline: bounded at `cap`, stalls the producer on
    /// overflow, and reports a fatal condition at 1800 items per spec.md §3.
    pub fn encoder_input(name: impl Into<String>, cap: usize) -> Self {
        Self::bounded(name, cap, OverflowPolicy::Stall, Some(1800))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wake every waiter and mark the queue cancelled. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Locking here isn't required for correctness (the flag is atomic)
        // but avoids a missed-wakeup race against a waiter that checked the
        // flag just before parking on the condvar.
        let _guard = self.inner.lock().unwrap();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Enqueue `item`, taking ownership. Blocks if `cap` is set and the
    /// queue is full under `OverflowPolicy::Stall`; otherwise evicts the
    /// oldest item under `OverflowPolicy::DropOldest`.
    pub fn push(&self, item: T) -> PushOutcome<T> {
        let mut guard = self.inner.lock().unwrap();
        if self.cancelled.load(Ordering::SeqCst) {
            return PushOutcome::Cancelled(item);
        }
        let mut dropped = None;
        if let Some(cap) = self.cap {
            while guard.items.len() >= cap {
                match self.overflow {
                    OverflowPolicy::Stall => {
                        guard = self.not_full.wait(guard).unwrap();
                        if self.cancelled.load(Ordering::SeqCst) {
                            return PushOutcome::Cancelled(item);
                        }
                    }
                    OverflowPolicy::DropOldest => {
                        dropped = guard.items.pop_front();
                        break;
                    }
                }
            }
        }
        guard.items.push_back(item);
        let size = guard.items.len();
        self.not_empty.notify_one();
        drop(guard);

        if let Some(ceiling) = self.hard_ceiling {
            if size >= ceiling {
                return PushOutcome::FatalCeilingExceeded { size, ceiling };
            }
        }
        match dropped {
            Some(d) => PushOutcome::DroppedOldest(d),
            None => PushOutcome::Pushed,
        }
    }

    /// Block until an item is available or the queue is cancelled. Returns
    /// `None` only on cancellation with an empty queue (the sentinel return
    /// spec.md §4.1 describes).
    pub fn pop(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(item) = guard.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if self.cancelled.load(Ordering::SeqCst) {
                return None;
            }
            guard = self.not_empty.wait(guard).unwrap();
        }
    }

    /// Like `pop`, but gives up after `timeout` and returns `None` without
    /// distinguishing "timed out" from "cancelled" — used by smoothing
    /// stages that need to wake on a pacing deadline even with no work
    /// queued.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(item) = guard.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if self.cancelled.load(Ordering::SeqCst) {
                return None;
            }
            let (next_guard, result) = self.not_empty.wait_timeout(guard, timeout).unwrap();
            guard = next_guard;
            if result.timed_out() {
                return None;
            }
        }
    }

    /// Non-destructive look at the head of the queue. `peek` is only ever
    /// callable while holding the queue's lock (spec.md §4.1), modeled here
    /// by handing the closure a guard rather than a detached reference.
    pub fn peek<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.inner.lock().unwrap();
        f(guard.items.front())
    }

    /// Drain and drop every queued item, invoking `release` on each — used
    /// during leaves-first shutdown (spec.md §5: "Each stage on cancel
    /// drains its input queue, freeing frames, before returning").
    pub fn drain_with(&self, mut release: impl FnMut(T)) {
        let mut guard = self.inner.lock().unwrap();
        while let Some(item) = guard.items.pop_front() {
            release(item);
        }
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_is_strict() {
        let q: Queue<i32> = Queue::unbounded("test");
        for i in 0..10 {
            matches!(q.push(i), PushOutcome::Pushed);
        }
        for i in 0..10 {
            assert_eq!(q.pop(), Some(i));
        }
    }

    #[test]
    fn cancel_wakes_blocked_pop_with_empty_queue() {
        let q: Arc<Queue<i32>> = Arc::new(Queue::unbounded("test"));
        let q2 = Arc::clone(&q);
        let h = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(50));
        q.cancel();
        assert_eq!(h.join().unwrap(), None);
    }

    #[test]
    fn cancel_does_not_discard_items_already_queued() {
        let q: Queue<i32> = Queue::unbounded("test");
        q.push(1);
        q.cancel();
        // Cancellation only short-circuits *waiting*; already-queued items
        // must still drain so ownership transfer stays exact.
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn drop_oldest_policy_evicts_and_reports() {
        let q: Queue<i32> = Queue::bounded("test", 2, OverflowPolicy::DropOldest, None);
        q.push(1);
        q.push(2);
        match q.push(3) {
            PushOutcome::DroppedOldest(v) => assert_eq!(v, 1),
            other => panic!("expected DroppedOldest, got {other:?}"),
        }
        assert_eq!(q.size(), 2);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn stall_policy_blocks_producer_until_space_frees() {
        let q: Arc<Queue<i32>> = Arc::new(Queue::bounded("test", 1, OverflowPolicy::Stall, None));
        q.push(1);
        let q2 = Arc::clone(&q);
        let h = thread::spawn(move || {
            matches!(q2.push(2), PushOutcome::Pushed);
        });
        thread::sleep(Duration::from_millis(30));
        assert!(!h.is_finished());
        assert_eq!(q.pop(), Some(1));
        h.join().unwrap();
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn hard_ceiling_is_reported_not_enforced() {
        let q: Queue<i32> = Queue::bounded("enc-in", 10, OverflowPolicy::Stall, Some(3));
        q.push(1);
        q.push(2);
        match q.push(3) {
            PushOutcome::FatalCeilingExceeded { size, ceiling } => {
                assert_eq!(size, 3);
                assert_eq!(ceiling, 3);
            }
            other => panic!("expected FatalCeilingExceeded, got {other:?}"),
        }
        // The item is still enqueued — the caller decides whether to abort.
        assert_eq!(q.size(), 3);
    }

    #[test]
    fn peek_is_non_destructive() {
        let q: Queue<i32> = Queue::unbounded("test");
        q.push(42);
        q.peek(|head| assert_eq!(head, Some(&42)));
        assert_eq!(q.size(), 1);
    }
}
