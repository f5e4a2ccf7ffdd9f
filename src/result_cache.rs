//! # Result Cache
//! Bounded least-recently-used map for per-song lookup results.
//!
//! `get` counts as a use and moves the key to the most-recent end; `insert`
//! beyond capacity evicts the least-recent key. Values are cloned out so the
//! caller never holds a borrow into the cache.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
};

#[derive(Debug, Clone)]
pub struct ResultCache<K, V> {
    max_items: usize,
    /// key → (value, last-use tick)
    map: HashMap<K, (V, u64)>,
    /// last-use tick → key, oldest first
    order: BTreeMap<u64, K>,
    tick: u64,
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Capacity is at least 1.
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items: max_items.max(1),
            map: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_items
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let tick = self.next_tick();
        let (value, last) = self.map.get_mut(key)?;
        self.order.remove(last);
        *last = tick;
        self.order.insert(tick, key.clone());
        Some(value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        let tick = self.next_tick();
        if let Some((_, old)) = self.map.insert(key.clone(), (value, tick)) {
            self.order.remove(&old);
        }
        self.order.insert(tick, key);

        while self.map.len() > self.max_items {
            match self.order.pop_first() {
                Some((_, oldest)) => {
                    self.map.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
