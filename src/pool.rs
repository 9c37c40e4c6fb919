//! Bounded connection pool.
//!
//! Slots live in one fixed array. Free slots form a singly linked stack
//! threaded through `next`; active slots form a doubly linked list through
//! `prev`/`next`. Every slot is on exactly one of the two lists, and both
//! operations are O(1) under a single pool-wide lock.

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

pub type SlotId = usize;

/// Returned by `acquire` when every slot is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

impl std::fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection pool exhausted")
    }
}

impl std::error::Error for PoolExhausted {}

#[derive(Debug)]
struct Slot {
    /// Set while active; cancelling it closes the session's transport.
    transport: Option<CancellationToken>,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

#[derive(Debug)]
pub struct SlotList {
    slots: Vec<Slot>,
    free: Option<SlotId>,
    active: Option<SlotId>,
    count: usize,
    closed: bool,
}

impl SlotList {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot {
                transport: None,
                prev: None,
                next: (i + 1 < capacity).then_some(i + 1),
            })
            .collect();
        Self {
            slots,
            free: (capacity > 0).then_some(0),
            active: None,
            count: 0,
            closed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of active slots.
    pub fn active_count(&self) -> usize {
        self.count
    }

    /// Pop the free-list head and push it onto the active list.
    pub fn acquire(&mut self, transport: CancellationToken) -> Result<SlotId, PoolExhausted> {
        if self.closed {
            return Err(PoolExhausted);
        }
        let id = self.free.ok_or(PoolExhausted)?;
        let old_head = self.active;
        let slot = &mut self.slots[id];
        self.free = slot.next;
        slot.transport = Some(transport);
        slot.prev = None;
        slot.next = old_head;
        if let Some(head) = old_head {
            self.slots[head].prev = Some(id);
        }
        self.active = Some(id);
        self.count += 1;
        Ok(id)
    }

    /// Splice `id` out of the active list and push it onto the free list.
    /// Releasing a slot that is not active is a no-op.
    pub fn release(&mut self, id: SlotId) {
        let Some(slot) = self.slots.get_mut(id) else { return };
        if slot.transport.take().is_none() {
            return;
        }
        let (prev, next) = (slot.prev, slot.next);
        if let Some(n) = next {
            self.slots[n].prev = prev;
        }
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.active = next,
        }
        let slot = &mut self.slots[id];
        slot.prev = None;
        slot.next = self.free;
        self.free = Some(id);
        self.count -= 1;
    }

    /// Active slot ids, most recently acquired first.
    pub fn active_ids(&self) -> Vec<SlotId> {
        let mut ids = Vec::with_capacity(self.count);
        let mut cur = self.active;
        while let Some(id) = cur {
            ids.push(id);
            cur = self.slots[id].next;
        }
        ids
    }

    /// Cancel the transport of every active slot and refuse further
    /// acquisitions. Returns how many transports were signalled.
    pub fn close_all(&mut self) -> usize {
        self.closed = true;
        let ids = self.active_ids();
        for &id in &ids {
            if let Some(token) = &self.slots[id].transport {
                token.cancel();
            }
        }
        ids.len()
    }
}

/// `SlotList` behind the pool-wide lock.
#[derive(Debug)]
pub struct ConnectionPool {
    inner: Mutex<SlotList>,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SlotList::new(capacity)),
        }
    }

    pub async fn acquire(&self, transport: CancellationToken) -> Result<SlotId, PoolExhausted> {
        self.inner.lock().await.acquire(transport)
    }

    pub async fn release(&self, id: SlotId) {
        self.inner.lock().await.release(id);
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.active_count()
    }

    /// Hold the pool lock; used by shutdown before it locks the resources.
    pub async fn lock(&self) -> MutexGuard<'_, SlotList> {
        self.inner.lock().await
    }
}
