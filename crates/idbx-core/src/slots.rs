//! Generation-checked slot table.
//!
//! Every opaque handle that crosses the message channel (callback ids, cursor
//! ids, database connection ids) is a `SlotKey`: a slot index plus the
//! generation the slot had when the value was inserted. Freed slots are reused,
//! but their generation is bumped, so a stale key held by a late response can
//! never resolve to the slot's new occupant.

use serde::{Deserialize, Serialize};

/// Index + generation pair. Packs into a single `u64` for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// A slot table with stable, generation-checked keys.
pub struct Slots<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slots<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value` and return its key.
    pub fn insert(&mut self, value: T) -> SlotKey {
        self.len += 1;

        if let Some(index) = self.free_head {
            let entry = &mut self.entries[index as usize];
            let (generation, next_free) = match entry {
                Entry::Vacant {
                    generation,
                    next_free,
                } => (*generation, *next_free),
                Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            *entry = Entry::Occupied { generation, value };
            self.free_head = next_free;
            return SlotKey { index, generation };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });
        SlotKey {
            index,
            generation: 0,
        }
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: SlotKey) -> Option<&T> {
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        match self.entries.get_mut(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Remove and return the value for `key`. Stale keys return `None`.
    pub fn remove(&mut self, key: SlotKey) -> Option<T> {
        if !self.contains(key) {
            return None;
        }
        let vacant = Entry::Vacant {
            generation: key.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let old = std::mem::replace(&mut self.entries[key.index as usize], vacant);
        self.free_head = Some(key.index);
        self.len -= 1;
        match old {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Vacant { .. } => None,
        }
    }

    /// Remove every value, in slot order. Keys handed out before the drain stay stale.
    pub fn drain(&mut self) -> Vec<T> {
        let keys: Vec<SlotKey> = self.iter().map(|(key, _)| key).collect();
        keys.into_iter().filter_map(|key| self.remove(key)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::Occupied { generation, value } => Some((
                    SlotKey {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotKey, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::Occupied { generation, value } => Some((
                    SlotKey {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut slots = Slots::new();
        let a = slots.insert("a");
        let b = slots.insert("b");

        assert_eq!(slots.len(), 2);
        assert_eq!(slots.get(a), Some(&"a"));
        assert_eq!(slots.get(b), Some(&"b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_stale_key_does_not_resolve_after_reuse() {
        let mut slots = Slots::new();
        let old = slots.insert(1);
        assert_eq!(slots.remove(old), Some(1));

        // The slot is reused with a bumped generation
        let new = slots.insert(2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        assert_eq!(slots.get(old), None);
        assert_eq!(slots.remove(old), None);
        assert_eq!(slots.get(new), Some(&2));
    }

    #[test]
    fn test_remove_twice_returns_none() {
        let mut slots = Slots::new();
        let key = slots.insert("x");
        assert!(slots.remove(key).is_some());
        assert!(slots.remove(key).is_none());
        assert!(slots.is_empty());
    }

    #[test]
    fn test_raw_round_trip_keeps_generation() {
        let mut slots = Slots::new();
        let first = slots.insert(());
        slots.remove(first);
        let key = slots.insert(());

        let raw = key.to_raw();
        assert_eq!(SlotKey::from_raw(raw), key);
        assert_ne!(raw, first.to_raw());
    }

    #[test]
    fn test_drain_empties_table() {
        let mut slots = Slots::new();
        let keys: Vec<_> = (0..4).map(|i| slots.insert(i)).collect();
        slots.remove(keys[1]);

        let drained = slots.drain();
        assert_eq!(drained, vec![0, 2, 3]);
        assert!(slots.is_empty());
        assert!(keys.iter().all(|k| slots.get(*k).is_none()));
    }
}
