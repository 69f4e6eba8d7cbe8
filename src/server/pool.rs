//! Fixed-capacity worker slots.
//!
//! The pool creates all of its slots up front and never resizes. Acquiring
//! is non-blocking: when every slot is busy the caller gets `None` and is
//! expected to reject the connection. A slot comes back when its
//! [`SlotGuard`] is dropped, which happens exactly once on every exit path
//! of the connection that held it, panics included.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;

/// One unit of concurrency, with buffers that survive between connections.
#[derive(Debug)]
pub struct WorkerSlot {
    id: usize,
    served: u64,
    /// Accumulates the request head.
    pub(crate) head: BytesMut,
    /// Socket read buffer.
    pub(crate) scratch: Vec<u8>,
}

impl WorkerSlot {
    fn new(id: usize) -> Self {
        Self {
            id,
            served: 0,
            head: BytesMut::new(),
            scratch: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Connections this slot has finished.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Clears per-connection data but keeps allocations.
    fn reset(&mut self) {
        self.head.clear();
        self.served += 1;
    }
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    idle: Mutex<Vec<WorkerSlot>>,
}

impl Shared {
    fn idle(&self) -> MutexGuard<'_, Vec<WorkerSlot>> {
        // Slot bookkeeping stays valid even if a holder panicked.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).rev().map(WorkerSlot::new).collect();
        Self {
            shared: Arc::new(Shared {
                capacity,
                idle: Mutex::new(slots),
            }),
        }
    }

    /// Reserves a free slot, or returns `None` if all are busy.
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        let slot = self.shared.idle().pop()?;
        tracing::trace!(slot = slot.id, "worker slot acquired");
        Some(SlotGuard {
            slot: Some(slot),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Returns a slot to the pool. Equivalent to dropping the guard.
    pub fn release(&self, guard: SlotGuard) {
        drop(guard);
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn available(&self) -> usize {
        self.shared.idle().len()
    }

    pub fn busy(&self) -> usize {
        self.capacity() - self.available()
    }
}

/// Exclusive ownership of a [`WorkerSlot`] for one connection.
#[derive(Debug)]
pub struct SlotGuard {
    slot: Option<WorkerSlot>,
    shared: Arc<Shared>,
}

impl SlotGuard {
    pub fn id(&self) -> usize {
        self.slot().id
    }

    pub fn slot(&self) -> &WorkerSlot {
        // Only `drop` takes the slot out.
        self.slot.as_ref().unwrap_or_else(|| unreachable!("slot taken before drop"))
    }

    pub(crate) fn slot_mut(&mut self) -> &mut WorkerSlot {
        self.slot.as_mut().unwrap_or_else(|| unreachable!("slot taken before drop"))
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slot.take() {
            slot.reset();
            tracing::trace!(slot = slot.id, served = slot.served, "worker slot released");
            self.shared.idle().push(slot);
        }
    }
}
