//! Fixed-size ring of recently enqueued tasks
//!
//! The ring is purely diagnostic. It is consulted when the queue rejects work
//! because it is full, so that the caller can see what filled it up. Entries
//! are kept by value and are never removed when the worker picks a task up,
//! so the ring may contain tasks that have long finished.

/// Slots that fill up to `capacity`, plus a write cursor
///
/// Slots are allocated as entries arrive, so a large capacity costs nothing
/// until the queue actually sees that many tasks.
#[derive(Debug, Clone)]
pub struct RingHistory<T> {
    slots: Vec<T>,
    capacity: usize,

    /// Oldest entry once the ring is full, zero before that
    cursor: usize,
}

impl<T: Clone> RingHistory<T> {
    /// Create a ring holding at most `capacity` entries
    ///
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity: capacity.max(1),
            cursor: 0,
        }
    }

    /// Record an entry, overwriting the oldest one once the ring is full
    pub fn push(&mut self, item: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
            return;
        }

        self.slots[self.cursor] = item;
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Entries in arrival order, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        let (newer, older) = self.slots.split_at(self.cursor);
        older.iter().chain(newer).cloned().collect()
    }

    /// Maximum number of entries kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently kept
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
