//! Fixed-capacity slot pools
//!
//! A `SlotPool` preallocates `capacity` buffers, each tagged with a `SlotId`
//! and the id of the pool that owns it. Buffers leave the pool as owned
//! `Slot` handles; the only way back is `release`, which takes the handle
//! by value. A slot cannot be duplicated, so at most `capacity` slots exist
//! across the pool and every holder combined.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use cubecast_core::SlotId;

use crate::{BoundedQueue, TryPopError};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of a slot pool, used to reject slots released to the wrong pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolId(pub u32);

impl PoolId {
    fn next() -> Self {
        PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Owned handle to one pooled buffer
#[derive(Debug)]
pub struct Slot<T> {
    id: SlotId,
    pool: PoolId,
    value: T,
}

impl<T> Slot<T> {
    #[inline]
    pub fn id(&self) -> SlotId {
        self.id
    }

    #[inline]
    pub fn pool(&self) -> PoolId {
        self.pool
    }
}

impl<T> Deref for Slot<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Slot<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Slot could not be returned; the handle is given back to the caller
#[derive(Debug)]
pub enum ReleaseError<T> {
    /// Pool is closed; the slot is retired with the pool
    Closed(Slot<T>),
    /// Slot belongs to another pool
    Foreign(Slot<T>),
}

impl<T> std::fmt::Display for ReleaseError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseError::Closed(slot) => write!(f, "pool closed, {:?} retired", slot.id),
            ReleaseError::Foreign(slot) => {
                write!(f, "{:?} belongs to pool {}", slot.id, slot.pool.0)
            }
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for ReleaseError<T> {}

/// SlotPool - arena of preallocated buffers
pub struct SlotPool<T> {
    id: PoolId,
    name: &'static str,
    capacity: usize,
    free: BoundedQueue<Slot<T>>,
}

impl<T> SlotPool<T> {
    /// Preallocate `capacity` slots, building each buffer with `init`
    pub fn new(name: &'static str, capacity: usize, mut init: impl FnMut(SlotId) -> T) -> Self {
        let id = PoolId::next();
        let slots = (0..capacity as u32).map(|i| {
            let slot_id = SlotId(i);
            Slot {
                id: slot_id,
                pool: id,
                value: init(slot_id),
            }
        });
        tracing::debug!(pool = name, capacity, "slot pool allocated");
        Self {
            id,
            name,
            capacity,
            free: BoundedQueue::with_items(capacity, slots),
        }
    }

    /// Block until a slot is free. `None` once the pool is closed and empty.
    pub fn acquire(&self) -> Option<Slot<T>> {
        self.free.pop()
    }

    /// Take a free slot without blocking
    pub fn try_acquire(&self) -> Result<Slot<T>, TryPopError> {
        self.free.try_pop()
    }

    /// Return a slot to the pool
    pub fn release(&self, slot: Slot<T>) -> Result<(), ReleaseError<T>> {
        if slot.pool != self.id {
            tracing::warn!(pool = self.name, slot = ?slot.id, owner = slot.pool.0, "foreign slot released");
            return Err(ReleaseError::Foreign(slot));
        }
        self.free
            .push(slot)
            .map_err(|e| ReleaseError::Closed(e.into_inner()))
    }

    /// Close the pool, waking every blocked `acquire`
    pub fn close(&self) {
        self.free.close();
    }

    pub fn is_closed(&self) -> bool {
        self.free.is_closed()
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently sitting in the pool
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Slots currently held outside the pool
    pub fn outstanding(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

impl<T> std::fmt::Debug for SlotPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPool")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
