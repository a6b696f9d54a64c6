//! Closable blocking queue

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use cubecast_core::CubecastError;

/// Why a non-blocking pop returned nothing
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPopError {
    #[error("queue is empty")]
    Empty,
    #[error("queue is closed")]
    Closed,
}

/// Push rejected because the queue is closed; the item is handed back
#[derive(Debug, PartialEq, Eq)]
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("queue is closed")
    }
}

impl<T: std::fmt::Debug> std::error::Error for PushError<T> {}

impl From<TryPopError> for CubecastError {
    fn from(e: TryPopError) -> Self {
        match e {
            TryPopError::Empty => CubecastError::Allocation("no free buffer".into()),
            TryPopError::Closed => CubecastError::Closed,
        }
    }
}

impl<T> From<PushError<T>> for CubecastError {
    fn from(_: PushError<T>) -> Self {
        CubecastError::Closed
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// BoundedQueue - FIFO with blocking pop and one-way close
///
/// Capacity is advisory: the surrounding protocol never holds more items
/// than it was built with, so pushes are not rejected for being over it.
/// After `close`, queued items stay poppable until drained; then every pop
/// reports closure immediately.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Create a queue holding `items`
    pub fn with_items(capacity: usize, items: impl IntoIterator<Item = T>) -> Self {
        let queue = Self::new(capacity);
        queue.state.lock().items.extend(items);
        queue
    }

    /// Block until an item is available or the queue is closed and drained.
    /// `None` means closed.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Take the front item without blocking
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(item) => Ok(item),
            None if state.closed => Err(TryPopError::Closed),
            None => Err(TryPopError::Empty),
        }
    }

    /// Append an item and wake one waiter
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PushError(item));
        }
        state.items.push_back(item);
        if state.items.len() > self.capacity {
            tracing::debug!(
                len = state.items.len(),
                capacity = self.capacity,
                "queue holds more items than its capacity"
            );
        }
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Close the queue and wake every waiter. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}
