//! # Session Registry
//!
//! An arena of optional slots. A session's id is its slot index: stable for
//! the session's lifetime and handed out again only after the slot has been
//! emptied. The slot array only ever grows (doubling when full), so freeing
//! one id never disturbs another.
//!
//! The registry is not synchronized; its owner serializes mutation.

use stanzarpc::SessionId;

struct Slot<T> {
    name: Option<String>,
    value: T,
}

pub struct SessionRegistry<T> {
    slots: Vec<Option<Slot<T>>>,
    count: usize,
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), count: 0 }
    }

    /// Stores `value`, reusing the lowest free slot. Names are not checked
    /// for uniqueness here.
    pub fn insert(&mut self, name: Option<String>, value: T) -> SessionId {
        self.insert_with(name, |_| value)
    }

    /// Like `insert`, for values that need to know their own id.
    pub fn insert_with(&mut self, name: Option<String>, make: impl FnOnce(SessionId) -> T) -> SessionId {
        let free = self.slots.iter().position(Option::is_none);
        let id = SessionId(free.unwrap_or(self.slots.len()) as u64);
        let slot = Some(Slot { name, value: make(id) });

        let index = match free {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                if self.slots.len() == self.slots.capacity() {
                    let grow = self.slots.capacity().max(1);
                    self.slots.reserve_exact(grow);
                }
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };

        self.count += 1;
        SessionId(index as u64)
    }

    /// Empties a slot. Returns false when `id` is out of range or already empty.
    pub fn remove(&mut self, id: SessionId) -> bool {
        self.take(id).is_some()
    }

    /// Empties a slot and hands back what it held.
    pub fn take(&mut self, id: SessionId) -> Option<T> {
        let slot = self.slots.get_mut(usize::try_from(id.0).ok()?)?.take()?;
        self.count -= 1;
        Some(slot.value)
    }

    /// Empties every slot, returning the values in increasing id order.
    pub fn drain(&mut self) -> Vec<(SessionId, T)> {
        self.count = 0;
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.take().map(|slot| (SessionId(index as u64), slot.value)))
            .collect()
    }

    pub fn get(&self, id: SessionId) -> Option<&T> {
        let slot = self.slots.get(usize::try_from(id.0).ok()?)?.as_ref()?;
        Some(&slot.value)
    }

    pub fn name(&self, id: SessionId) -> Option<&str> {
        let slot = self.slots.get(usize::try_from(id.0).ok()?)?.as_ref()?;
        slot.name.as_deref()
    }

    /// First occupied slot carrying `name`.
    pub fn find_by_name(&self, name: &str) -> Option<SessionId> {
        self.slots.iter().enumerate().find_map(|(index, slot)| match slot {
            Some(slot) if slot.name.as_deref() == Some(name) => Some(SessionId(index as u64)),
            _ => None,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Occupied ids in increasing order.
    pub fn list_ids(&self) -> Vec<SessionId> {
        self.iter().map(|(id, _, _)| id).collect()
    }

    /// Occupied slots in increasing id order.
    pub fn iter(&self) -> impl Iterator<Item = (SessionId, Option<&str>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|slot| (SessionId(index as u64), slot.name.as_deref(), &slot.value))
        })
    }

    /// Number of slots allocated so far.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}
