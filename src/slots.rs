//! Connection Slot Table
//!
//! Fixed-capacity storage for per-connection state. Each live connection owns
//! one slot; the slot index is a small integer that stays stable for the
//! lifetime of the connection and is used to index other per-connection
//! storage (for example discovery results).
//!
//! Lookups by handle only ever see live slots: once a connection is removed
//! its handle no longer resolves, even if the slot is reused by a later
//! connection with a different handle.

use bt_hci::param::ConnHandle;

#[derive(Debug)]
struct Slot<T> {
    handle: ConnHandle,
    value: T,
}

/// Per-connection state table with `N` slots
#[derive(Debug)]
pub struct ConnectionSlots<T, const N: usize> {
    slots: [Option<Slot<T>>; N],
}

impl<T, const N: usize> ConnectionSlots<T, N> {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Store `value` for `handle` and return its slot index.
    ///
    /// An existing entry for the same handle is replaced in place and keeps
    /// its index.
    ///
    /// # Errors
    /// Gives `value` back if every slot is taken.
    pub fn insert(&mut self, handle: ConnHandle, value: T) -> Result<usize, T> {
        if let Some(index) = self.index_of(handle) {
            self.slots[index] = Some(Slot { handle, value });
            return Ok(index);
        }
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(Slot { handle, value });
                Ok(index)
            }
            None => Err(value),
        }
    }

    /// Slot index of a live connection
    #[must_use]
    pub fn index_of(&self, handle: ConnHandle) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.handle == handle))
    }

    /// State of a live connection
    #[must_use]
    pub fn get(&self, handle: ConnHandle) -> Option<&T> {
        self.index_of(handle)
            .and_then(|index| self.slots[index].as_ref())
            .map(|slot| &slot.value)
    }

    /// Mutable state of a live connection
    pub fn get_mut(&mut self, handle: ConnHandle) -> Option<&mut T> {
        self.get_indexed_mut(handle).map(|(_, value)| value)
    }

    /// Mutable state of a live connection together with its slot index
    pub fn get_indexed_mut(&mut self, handle: ConnHandle) -> Option<(usize, &mut T)> {
        let index = self.index_of(handle)?;
        self.slots[index]
            .as_mut()
            .map(|slot| (index, &mut slot.value))
    }

    /// Release the slot of a connection and hand back its state
    pub fn remove(&mut self, handle: ConnHandle) -> Option<T> {
        let index = self.index_of(handle)?;
        self.slots[index].take().map(|slot| slot.value)
    }

    /// Number of live connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether no connection is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every slot is taken
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Iterate over live connections
    pub fn iter(&self) -> impl Iterator<Item = (ConnHandle, &T)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|s| (s.handle, &s.value)))
    }
}

impl<T, const N: usize> Default for ConnectionSlots<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut slots: ConnectionSlots<u32, 2> = ConnectionSlots::new();
        assert!(slots.is_empty());

        let a = slots.insert(ConnHandle::new(0x0040), 1).unwrap();
        let b = slots.insert(ConnHandle::new(0x0041), 2).unwrap();
        assert_ne!(a, b);
        assert!(slots.is_full());

        assert_eq!(slots.get(ConnHandle::new(0x0040)), Some(&1));
        assert_eq!(slots.index_of(ConnHandle::new(0x0041)), Some(b));
        assert_eq!(slots.get(ConnHandle::new(0x0042)), None);
    }

    #[test]
    fn test_full_table_rejects() {
        let mut slots: ConnectionSlots<u32, 1> = ConnectionSlots::new();
        slots.insert(ConnHandle::new(1), 10).unwrap();
        assert_eq!(slots.insert(ConnHandle::new(2), 20), Err(20));
    }

    #[test]
    fn test_reinsert_keeps_index() {
        let mut slots: ConnectionSlots<u32, 3> = ConnectionSlots::new();
        slots.insert(ConnHandle::new(1), 10).unwrap();
        let index = slots.insert(ConnHandle::new(2), 20).unwrap();
        assert_eq!(slots.insert(ConnHandle::new(2), 21), Ok(index));
        assert_eq!(slots.len(), 2);
        assert_eq!(slots.get(ConnHandle::new(2)), Some(&21));
    }

    #[test]
    fn test_removed_handle_is_not_found() {
        let mut slots: ConnectionSlots<u32, 2> = ConnectionSlots::new();
        let index = slots.insert(ConnHandle::new(7), 70).unwrap();
        assert_eq!(slots.remove(ConnHandle::new(7)), Some(70));
        assert_eq!(slots.get(ConnHandle::new(7)), None);
        assert!(slots.get_mut(ConnHandle::new(7)).is_none());

        // The freed slot is reused, but only under the new handle.
        assert_eq!(slots.insert(ConnHandle::new(8), 80), Ok(index));
        assert_eq!(slots.get(ConnHandle::new(7)), None);
        assert_eq!(slots.remove(ConnHandle::new(7)), None);
    }
}
