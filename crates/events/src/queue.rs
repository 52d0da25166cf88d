//! Thread-safe two-lane event queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use tracing::debug;

/// Outcome of a blocking dequeue.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued<T> {
    /// The earliest available item, out-of-band lane first.
    Item(T),
    /// The wait was aborted; nothing was removed.
    Aborted,
}

/// Unbounded FIFO of events with a single-level priority lane.
///
/// Tail-enqueued items are delivered in arrival order. Head-enqueued
/// (out-of-band) items form a second FIFO that is always drained before the
/// normal lane; among themselves they too keep arrival order, so the lane
/// is a priority queue, not a stack.
///
/// The queue expects a single consumer blocking in
/// [`dequeue_wait`](Self::dequeue_wait); producers never block.
pub struct EventQueue<T> {
    lanes: Mutex<Lanes<T>>,
    available: Condvar,
}

struct Lanes<T> {
    oob: VecDeque<T>,
    normal: VecDeque<T>,
    abort: bool,
}

impl<T> EventQueue<T> {
    /// Creates an empty queue with blocking waits armed.
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                oob: VecDeque::new(),
                normal: VecDeque::new(),
                abort: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends an item to the normal lane and wakes a blocked consumer.
    pub fn enqueue_tail(&self, item: T) {
        let mut lanes = self.lanes.lock();
        lanes.normal.push_back(item);
        drop(lanes);
        self.available.notify_one();
    }

    /// Appends an item to the out-of-band lane and wakes a blocked consumer.
    ///
    /// The item is delivered before everything currently in the normal lane,
    /// but after earlier out-of-band items.
    pub fn enqueue_head(&self, item: T) {
        let mut lanes = self.lanes.lock();
        lanes.oob.push_back(item);
        drop(lanes);
        self.available.notify_one();
    }

    /// Blocks until an item is available or the wait is aborted.
    ///
    /// While the abort flag is set, every call (including one already
    /// blocked) returns [`Dequeued::Aborted`] without removing anything;
    /// [`reset_abort`](Self::reset_abort) re-arms the queue. Spurious
    /// wakeups are retried internally.
    pub fn dequeue_wait(&self) -> Dequeued<T> {
        let mut lanes = self.lanes.lock();
        loop {
            if lanes.abort {
                return Dequeued::Aborted;
            }
            let item = if let Some(item) = lanes.oob.pop_front() {
                Some(item)
            } else {
                lanes.normal.pop_front()
            };
            if let Some(item) = item {
                return Dequeued::Item(item);
            }
            self.available.wait(&mut lanes);
        }
    }

    /// Sets the persistent abort flag and wakes the blocked consumer.
    pub fn abort_wait(&self) {
        let mut lanes = self.lanes.lock();
        lanes.abort = true;
        drop(lanes);
        self.available.notify_all();
    }

    /// Clears the abort flag, re-arming blocking waits.
    pub fn reset_abort(&self) {
        self.lanes.lock().abort = false;
    }

    /// Discards everything in both lanes without dispatching.
    ///
    /// Safe only while the consumer is not concurrently dequeuing; the
    /// handler guarantees that by clearing after its worker has exited.
    pub fn clear(&self) {
        let mut lanes = self.lanes.lock();
        let dropped = lanes.oob.len() + lanes.normal.len();
        lanes.oob.clear();
        lanes.normal.clear();
        if dropped > 0 {
            debug!("discarded {} undispatched events", dropped);
        }
    }

    /// Number of queued items across both lanes.
    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.oob.len() + lanes.normal.len()
    }

    /// Whether both lanes are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
