use std::collections::hash_map::{Entry, HashMap};
use std::hash::Hash;
use std::mem;

use crate::slot::{LoadFuture, Slot};

/// Requests accumulated by one loader since its batch last closed, one [`Slot`] per distinct key.
///
/// A `PendingBatch` is owned by its loader's lock. Closing it swaps in an empty batch and hands
/// the old one to the executor, after which its key set never changes.
pub(crate) struct PendingBatch<K, T> {
    slots: HashMap<K, Slot<T>>,
}

/// Outcome of adding a request to a [`PendingBatch`].
pub(crate) struct Enqueued<T> {
    pub future: LoadFuture<T>,
    /// The batch was empty before this request, so the loader must register as runnable.
    pub opened: bool,
    /// An equal key was already pending; the caller shares its slot.
    pub deduplicated: bool,
}

impl<K, T> PendingBatch<K, T>
where
    K: Eq + Hash,
    T: 'static + Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self { slots: HashMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns the future for `key`, creating its slot if this batch has not seen it yet.
    pub fn enqueue(&mut self, key: K) -> Enqueued<T> {
        let opened = self.slots.is_empty();
        match self.slots.entry(key) {
            Entry::Occupied(entry) => {
                Enqueued { future: entry.get().future(), opened, deduplicated: true }
            }
            Entry::Vacant(entry) => {
                Enqueued { future: entry.insert(Slot::new()).future(), opened, deduplicated: false }
            }
        }
    }

    /// Closes this batch, leaving an empty one in its place.
    pub fn take(&mut self) -> Self {
        mem::replace(self, Self::new())
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.slots.keys()
    }

    pub fn into_slots(self) -> impl Iterator<Item = (K, Slot<T>)> {
        self.slots.into_iter()
    }
}
