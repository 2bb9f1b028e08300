//! In-memory object store
//!
//! Records live in a `BTreeMap` ordered by key, so range scans and cursor
//! steps are plain map range queries.

use std::collections::BTreeMap;
use std::ops::Bound;

use idbx_core::{
    DatabaseError, IdbKey, IdbValue, KeyRange, ObjectStoreMetadata, PutMode, ReturnValue,
};

/// Largest key a key generator will hand out (2^53).
const MAX_GENERATED_KEY: i64 = 1 << 53;

/// One object store's records plus its key generator.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    pub metadata: ObjectStoreMetadata,
    records: BTreeMap<IdbKey, IdbValue>,
    next_key: i64,
}

impl ObjectStore {
    pub fn new(metadata: ObjectStoreMetadata) -> Self {
        Self {
            metadata,
            records: BTreeMap::new(),
            next_key: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store `value`, generating a key when the store has a key generator.
    pub fn put(
        &mut self,
        value: IdbValue,
        key: Option<IdbKey>,
        mode: PutMode,
    ) -> Result<IdbKey, DatabaseError> {
        let key = match key {
            Some(key) => {
                self.bump_generator(&key);
                key
            }
            None if self.metadata.auto_increment => self.generate_key()?,
            None => {
                return Err(DatabaseError::data(
                    "The object store uses out-of-line keys and has no key generator, and no key was provided.",
                ))
            }
        };

        if mode == PutMode::AddOnly && self.records.contains_key(&key) {
            return Err(DatabaseError::constraint(
                "Key already exists in the object store.",
            ));
        }
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    fn generate_key(&mut self) -> Result<IdbKey, DatabaseError> {
        if self.next_key > MAX_GENERATED_KEY {
            return Err(DatabaseError::constraint("The key generator is exhausted."));
        }
        let key = IdbKey::Number(self.next_key as f64);
        self.next_key += 1;
        Ok(key)
    }

    /// Explicit numeric keys push the generator past them.
    fn bump_generator(&mut self, key: &IdbKey) {
        if !self.metadata.auto_increment {
            return;
        }
        if let IdbKey::Number(n) = key {
            let floor = n.floor();
            if floor >= self.next_key as f64 {
                self.next_key = if floor >= MAX_GENERATED_KEY as f64 {
                    MAX_GENERATED_KEY + 1
                } else {
                    floor as i64 + 1
                };
            }
        }
    }

    pub fn get(&self, key: &IdbKey) -> Option<&IdbValue> {
        self.records.get(key)
    }

    /// First record in `range`, in key order.
    pub fn first_in<'a>(&'a self, range: &'a KeyRange) -> Option<(&'a IdbKey, &'a IdbValue)> {
        self.scan(range).next()
    }

    /// Records in `range`, in key order.
    pub fn scan<'a>(
        &'a self,
        range: &'a KeyRange,
    ) -> impl Iterator<Item = (&'a IdbKey, &'a IdbValue)> + 'a {
        self.between(lower_bound(range), upper_bound(range))
            .filter(move |(key, _)| range.contains(key))
    }

    pub fn count(&self, range: &KeyRange) -> usize {
        self.scan(range).count()
    }

    /// Remove every record in `range`. Returns the removed values.
    pub fn delete_range(&mut self, range: &KeyRange) -> Vec<IdbValue> {
        let keys: Vec<IdbKey> = self.scan(range).map(|(key, _)| key.clone()).collect();
        keys.iter()
            .filter_map(|key| self.records.remove(key))
            .collect()
    }

    pub fn clear(&mut self) -> Vec<IdbValue> {
        std::mem::take(&mut self.records).into_values().collect()
    }

    /// The first record strictly after (`forward`) or before `position` that
    /// lies in `range` and is not short of `target`.
    pub fn step(
        &self,
        range: &KeyRange,
        position: Option<&IdbKey>,
        target: Option<&IdbKey>,
        forward: bool,
    ) -> Option<(&IdbKey, &IdbValue)> {
        if forward {
            let start = match (position, target) {
                (_, Some(target)) if position.map_or(true, |p| target > p) => {
                    Bound::Included(target)
                }
                (Some(position), _) => Bound::Excluded(position),
                (None, _) => lower_bound(range),
            };
            self.between(start, upper_bound(range))
                .find(|(key, _)| range.contains(key))
        } else {
            let end = match (position, target) {
                (_, Some(target)) if position.map_or(true, |p| target < p) => {
                    Bound::Included(target)
                }
                (Some(position), _) => Bound::Excluded(position),
                (None, _) => upper_bound(range),
            };
            self.between(lower_bound(range), end)
                .rev()
                .find(|(key, _)| range.contains(key))
        }
    }

    fn between<'s>(
        &'s self,
        lower: Bound<&IdbKey>,
        upper: Bound<&IdbKey>,
    ) -> impl DoubleEndedIterator<Item = (&'s IdbKey, &'s IdbValue)> + 's {
        // BTreeMap::range panics on inverted bounds
        (!is_empty_interval(lower, upper))
            .then(|| self.records.range::<IdbKey, _>((lower, upper)))
            .into_iter()
            .flatten()
    }

    /// The primary key to inject on reads: set only for stores with a key
    /// generator and an in-line key path.
    pub fn return_value(&self, key: &IdbKey, value: &IdbValue) -> ReturnValue {
        let inject = self.metadata.auto_increment && self.metadata.key_path.is_some();
        ReturnValue {
            value: value.clone(),
            primary_key: inject.then(|| key.clone()),
            key_path: if inject {
                self.metadata.key_path.clone()
            } else {
                None
            },
        }
    }
}

fn lower_bound(range: &KeyRange) -> Bound<&IdbKey> {
    match &range.lower {
        Some(key) if range.lower_open => Bound::Excluded(key),
        Some(key) => Bound::Included(key),
        None => Bound::Unbounded,
    }
}

fn upper_bound(range: &KeyRange) -> Bound<&IdbKey> {
    match &range.upper {
        Some(key) if range.upper_open => Bound::Excluded(key),
        Some(key) => Bound::Included(key),
        None => Bound::Unbounded,
    }
}

fn is_empty_interval(lower: Bound<&IdbKey>, upper: Bound<&IdbKey>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (
            Bound::Included(l) | Bound::Excluded(l),
            Bound::Included(u) | Bound::Excluded(u),
        ) => l >= u,
        _ => false,
    }
}
