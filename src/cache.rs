//! Per-instance memo table for lazily computed statistics.
//!
//! Each entry is keyed by a static statistic name and computed at most
//! once between two calls to [`StatCache::invalidate`]. Owners call
//! `invalidate` from every method that changes the working sample.
//!
//! The table uses interior mutability so read accessors can take `&self`;
//! it is deliberately `!Sync`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Default)]
pub struct StatCache {
    entries: RefCell<HashMap<&'static str, Box<dyn Any>>>,
}

impl StatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `name`, computing it with `f` on a miss.
    ///
    /// The borrow is released while `f` runs, so `f` may read other
    /// entries of the same cache.
    pub fn get_or_insert_with<T, F>(&self, name: &'static str, f: F) -> T
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        if let Some(v) = self
            .entries
            .borrow()
            .get(name)
            .and_then(|b| b.downcast_ref::<T>())
        {
            return v.clone();
        }
        let value = f();
        self.entries
            .borrow_mut()
            .insert(name, Box::new(value.clone()));
        value
    }

    pub fn contains(&self, name: &'static str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Drops every entry.
    pub fn invalidate(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl std::fmt::Debug for StatCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.borrow();
        let mut keys: Vec<&&str> = entries.keys().collect();
        keys.sort();
        f.debug_struct("StatCache").field("entries", &keys).finish()
    }
}
