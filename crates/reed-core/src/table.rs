//! Open-addressing hash table backing the language's `table` value.
//!
//! Collisions resolve by linear probing; deletions leave a tombstone so probe sequences for
//! still-live keys are never broken. The table grows (doubling capacity, rehashing every live
//! entry) once the load factor — live entries plus tombstones, over capacity — would exceed 0.75.

use ahash::AHasher;
use std::hash::{Hash, Hasher};

use crate::intern::StringId;
use crate::value::Value;

const MAX_LOAD_FACTOR: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Tombstone,
    Occupied { key: StringId, value: Value, is_const: bool },
}

/// A `table` value: string keys to arbitrary values, with per-entry const markers for
/// `table.field :: value`-style immutable fields.
#[derive(Debug, Clone)]
pub struct Table {
    slots: Vec<Slot>,
    len: usize,
    tombstones: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: vec![Slot::Empty; INITIAL_CAPACITY], len: 0, tombstones: 0 }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn hash(key: StringId) -> u64 {
        let mut hasher = AHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn probe(&self, key: StringId) -> usize {
        let mask = self.slots.len() - 1;
        let mut index = Self::hash(key) as usize & mask;
        let mut first_tombstone = None;
        loop {
            match &self.slots[index] {
                Slot::Empty => return first_tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied { key: k, .. } if *k == key => return index,
                Slot::Occupied { .. } => {}
            }
            index = (index + 1) & mask;
        }
    }

    fn find_occupied(&self, key: StringId) -> Option<usize> {
        let mask = self.slots.len() - 1;
        let mut index = Self::hash(key) as usize & mask;
        let start = index;
        loop {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied { key: k, .. } if *k == key => return Some(index),
                _ => {}
            }
            index = (index + 1) & mask;
            if index == start {
                return None;
            }
        }
    }

    fn grow(&mut self) {
        let new_cap = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; new_cap]);
        self.len = 0;
        self.tombstones = 0;
        for slot in old {
            if let Slot::Occupied { key, value, is_const } = slot {
                self.insert(key, value, is_const);
            }
        }
    }

    /// Inserts or overwrites `key`. Returns the previous value, if any.
    pub fn insert(&mut self, key: StringId, value: Value, is_const: bool) -> Option<Value> {
        if (self.len + self.tombstones + 1) as f64 > self.slots.len() as f64 * MAX_LOAD_FACTOR {
            self.grow();
        }
        let index = self.probe(key);
        match std::mem::replace(&mut self.slots[index], Slot::Occupied { key, value, is_const }) {
            Slot::Occupied { value: old, .. } => Some(old),
            Slot::Tombstone => {
                self.tombstones -= 1;
                self.len += 1;
                None
            }
            Slot::Empty => {
                self.len += 1;
                None
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: StringId) -> Option<&Value> {
        self.find_occupied(key).map(|i| match &self.slots[i] {
            Slot::Occupied { value, .. } => value,
            _ => unreachable!(),
        })
    }

    #[must_use]
    pub fn is_const(&self, key: StringId) -> bool {
        self.find_occupied(key).is_some_and(|i| matches!(&self.slots[i], Slot::Occupied { is_const: true, .. }))
    }

    #[must_use]
    pub fn contains(&self, key: StringId) -> bool {
        self.find_occupied(key).is_some()
    }

    pub fn remove(&mut self, key: StringId) -> Option<Value> {
        let index = self.find_occupied(key)?;
        let Slot::Occupied { value, .. } = std::mem::replace(&mut self.slots[index], Slot::Tombstone) else {
            unreachable!()
        };
        self.len -= 1;
        self.tombstones += 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StringId, &Value)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { key, value, .. } => Some((*key, value)),
            _ => None,
        })
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.slots.iter_mut().filter_map(|slot| match slot {
            Slot::Occupied { value, .. } => Some(value),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    #[test]
    fn insert_then_get_round_trips() {
        let mut interner = Interner::new();
        let key = interner.intern("x");
        let mut table = Table::new();
        assert_eq!(table.insert(key, Value::Int(1), false), None);
        assert_eq!(table.get(key), Some(&Value::Int(1)));
    }

    #[test]
    fn overwrite_returns_previous_value() {
        let mut interner = Interner::new();
        let key = interner.intern("x");
        let mut table = Table::new();
        table.insert(key, Value::Int(1), false);
        assert_eq!(table.insert(key, Value::Int(2), false), Some(Value::Int(1)));
    }

    #[test]
    fn remove_then_reinsert_reuses_tombstone() {
        let mut interner = Interner::new();
        let key = interner.intern("x");
        let mut table = Table::new();
        table.insert(key, Value::Int(1), false);
        assert_eq!(table.remove(key), Some(Value::Int(1)));
        assert!(!table.contains(key));
        table.insert(key, Value::Int(2), false);
        assert_eq!(table.get(key), Some(&Value::Int(2)));
    }

    #[test]
    fn grows_past_load_factor_without_losing_entries() {
        let mut interner = Interner::new();
        let mut table = Table::new();
        let keys: Vec<_> = (0..100).map(|i| interner.intern(&format!("k{i}"))).collect();
        for (i, &key) in keys.iter().enumerate() {
            table.insert(key, Value::Int(i as i64), false);
        }
        assert_eq!(table.len(), 100);
        for (i, &key) in keys.iter().enumerate() {
            assert_eq!(table.get(key), Some(&Value::Int(i as i64)));
        }
    }

    #[test]
    fn const_flag_is_tracked_per_entry() {
        let mut interner = Interner::new();
        let key = interner.intern("frozen");
        let mut table = Table::new();
        table.insert(key, Value::Int(1), true);
        assert!(table.is_const(key));
    }
}
