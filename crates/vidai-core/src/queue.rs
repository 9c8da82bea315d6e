//! Blocking work queues with termination.
//!
//! Consumers block in [`BlockingQueue::pop`] until an item arrives or the
//! queue is destroyed. A clamped queue additionally blocks producers while
//! it holds `capacity` items. After [`BlockingQueue::destroy`] every blocked
//! caller wakes: pops return `None` and clamped pushes are dropped, until
//! [`BlockingQueue::initialize`] re-arms the queue. An unbounded push always
//! enqueues.

use parking_lot::{Condvar, Mutex};
use std::collections::{BinaryHeap, VecDeque};
use std::marker::PhantomData;

/// Backing container ordering for a [`BlockingQueue`].
pub trait QueueStore<T>: Default {
    fn put(&mut self, item: T);
    fn take(&mut self) -> Option<T>;
    fn peek(&self) -> Option<&T>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FIFO order.
impl<T> QueueStore<T> for VecDeque<T> {
    fn put(&mut self, item: T) {
        self.push_back(item);
    }

    fn take(&mut self) -> Option<T> {
        self.pop_front()
    }

    fn peek(&self) -> Option<&T> {
        self.front()
    }

    fn len(&self) -> usize {
        VecDeque::len(self)
    }
}

/// Greatest item first.
impl<T: Ord> QueueStore<T> for BinaryHeap<T> {
    fn put(&mut self, item: T) {
        self.push(item);
    }

    fn take(&mut self) -> Option<T> {
        self.pop()
    }

    fn peek(&self) -> Option<&T> {
        BinaryHeap::peek(self)
    }

    fn len(&self) -> usize {
        BinaryHeap::len(self)
    }
}

struct State<C> {
    store: C,
    terminated: bool,
}

/// Multi-producer, multi-consumer blocking queue.
pub struct BlockingQueue<T, C: QueueStore<T> = VecDeque<T>> {
    state: Mutex<State<C>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
    _item: PhantomData<fn() -> T>,
}

/// Blocking queue that pops the greatest item first.
pub type BlockingPriorityQueue<T> = BlockingQueue<T, BinaryHeap<T>>;

impl<T> BlockingQueue<T> {
    /// Unbounded FIFO queue.
    pub fn new() -> Self {
        Self::with_capacity_limit(None)
    }

    /// FIFO queue holding at most `capacity` items (at least one).
    pub fn clamped(capacity: usize) -> Self {
        Self::with_capacity_limit(Some(capacity.max(1)))
    }
}

impl<T: Ord> BlockingQueue<T, BinaryHeap<T>> {
    pub fn new_priority() -> Self {
        Self::with_capacity_limit(None)
    }

    pub fn clamped_priority(capacity: usize) -> Self {
        Self::with_capacity_limit(Some(capacity.max(1)))
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: QueueStore<T>> BlockingQueue<T, C> {
    fn with_capacity_limit(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                store: C::default(),
                terminated: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            _item: PhantomData,
        }
    }

    /// Enqueue an item, waking one consumer.
    ///
    /// A clamped queue blocks while full and returns `false` (dropping the
    /// item) if it is terminated. An unbounded push always succeeds.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if let Some(capacity) = self.capacity {
            while state.store.len() >= capacity && !state.terminated {
                self.not_full.wait(&mut state);
            }
            if state.terminated {
                return false;
            }
        }
        state.store.put(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Block until an item is available and remove it.
    ///
    /// Returns `None` once the queue is terminated, even if items remain.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.store.is_empty() && !state.terminated {
            self.not_empty.wait(&mut state);
        }
        if state.terminated {
            return None;
        }
        let item = state.store.take();
        drop(state);
        self.not_full.notify_one();
        item
    }

    /// Remove the next item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.terminated {
            return None;
        }
        let item = state.store.take();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Block until an item is available and return a copy of it.
    pub fn front(&self) -> Option<T>
    where
        T: Clone,
    {
        let mut state = self.state.lock();
        while state.store.is_empty() && !state.terminated {
            self.not_empty.wait(&mut state);
        }
        if state.terminated {
            return None;
        }
        state.store.peek().cloned()
    }

    pub fn clear(&self) {
        self.state.lock().store = C::default();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().store.len()
    }

    /// True when no item can be popped, including after termination.
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.terminated || state.store.is_empty()
    }

    /// Terminate the queue and wake every blocked caller.
    pub fn destroy(&self) {
        self.state.lock().terminated = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        tracing::trace!("Queue stop signalled");
    }

    /// Re-arm a destroyed queue. Contents are left as they are.
    pub fn initialize(&self) {
        self.state.lock().terminated = false;
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
