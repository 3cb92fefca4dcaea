//! Open-addressing hashtable with amortized-rehash insert.
//!
//! Grounded on `original_source/source/core/hashtable.c`: power-of-two
//! capacity, linear probing, rehash triggered by either an occupation
//! ratio or a collision-count threshold, and `KEFIR_ALREADY_EXISTS` on
//! duplicate-key insert.
//!
//! Unlike the source (which threads a generic hash/equal vtable through
//! `kefir_hashtable_ops`), this uses `rustc-hash`'s `FxHasher` for keys
//! directly — the teacher pack reaches for a hashing crate rather than
//! inlining splitmix64, and our callers only ever key by dense ids.

use crate::error::{CoreError, ErrorKind, Result};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

const REHASH_OCCUPATION_THRESHOLD: f64 = 0.6;
const REHASH_COLLISION_THRESHOLD: f64 = 0.1;

#[derive(Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
}

/// A hashtable keyed by hashable/comparable keys with value type `V`.
pub struct HashTable<K, V> {
    slots: Vec<Option<Entry<K, V>>>,
    occupied: usize,
    collisions: usize,
}

impl<K: PartialEq + Hash, V> Default for HashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PartialEq + Hash, V> HashTable<K, V> {
    pub fn new() -> Self {
        HashTable {
            slots: Vec::new(),
            occupied: 0,
            collisions: 0,
        }
    }

    fn hash_of(key: &K) -> u64 {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn needs_rehash(&self) -> bool {
        let cap = self.capacity();
        cap == 0
            || self.occupied as f64 >= REHASH_OCCUPATION_THRESHOLD * cap as f64
            || self.collisions as f64 >= REHASH_COLLISION_THRESHOLD * cap as f64
    }

    fn find_position_for_insert(slots: &[Option<Entry<K, V>>], key: &K) -> Result<(usize, usize)> {
        let capacity = slots.len();
        let hash = Self::hash_of(key);
        let mut index = (hash as usize) & (capacity - 1);
        let mut collisions = 0usize;
        loop {
            match &slots[index] {
                None => return Ok((index, collisions)),
                Some(entry) if entry.key == *key => {
                    return Err(CoreError::new(
                        ErrorKind::AlreadyExists,
                        "key already exists in the hashtable",
                    ));
                }
                Some(_) => {
                    index = (index + 1) & (capacity - 1);
                    collisions += 1;
                    if collisions > capacity {
                        return Err(CoreError::new(
                            ErrorKind::InternalError,
                            "unable to find position for element insertion",
                        ));
                    }
                }
            }
        }
    }

    fn rehash(&mut self) -> Result<()> {
        let new_capacity = if self.capacity() == 0 { 4 } else { self.capacity() * 2 };
        let mut new_slots: Vec<Option<Entry<K, V>>> = Vec::with_capacity(new_capacity);
        new_slots.resize_with(new_capacity, || None);
        let mut new_occupied = 0usize;
        let mut new_collisions = 0usize;
        for entry in self.slots.drain(..).flatten() {
            let (pos, found_collisions) = Self::find_position_for_insert(&new_slots, &entry.key)?;
            new_slots[pos] = Some(entry);
            new_occupied += 1;
            new_collisions += found_collisions;
        }
        self.slots = new_slots;
        self.occupied = new_occupied;
        self.collisions = new_collisions;
        Ok(())
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if self.needs_rehash() {
            self.rehash()?;
        }
        let (pos, collisions) = Self::find_position_for_insert(&self.slots, &key)?;
        self.slots[pos] = Some(Entry { key, value });
        self.occupied += 1;
        self.collisions += collisions;
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        if self.capacity() == 0 {
            return None;
        }
        let base = (Self::hash_of(key) as usize) & (self.capacity() - 1);
        let mut index = base;
        loop {
            match &self.slots[index] {
                None => return None,
                Some(entry) if entry.key == *key => return Some(&entry.value),
                Some(_) => {
                    index = (index + 1) & (self.capacity() - 1);
                    if index == base {
                        return None;
                    }
                }
            }
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if self.capacity() == 0 {
            return None;
        }
        let cap = self.capacity();
        let base = (Self::hash_of(key) as usize) & (cap - 1);
        let mut index = base;
        loop {
            match &self.slots[index] {
                None => return None,
                Some(entry) if entry.key == *key => {
                    return self.slots[index].as_mut().map(|e| &mut e.value)
                }
                Some(_) => {
                    index = (index + 1) & (cap - 1);
                    if index == base {
                        return None;
                    }
                }
            }
        }
    }

    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().filter_map(|s| s.as_ref()).map(|e| (&e.key, &e.value))
    }
}
