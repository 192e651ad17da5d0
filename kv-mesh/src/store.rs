//! In-memory key-value storage owned by a single node.
//!
//! Entries keep their insertion order. Updating a key rewrites the entry in
//! place, so a snapshot of one node reads the same as a snapshot of any other
//! node that saw the same writes.

use serde::{Deserialize, Serialize};

pub type Key = String;
pub type Value = String;

/// A single key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
}

/// Ordered key-value store backing one node server loop.
///
/// Only the owning loop ever mutates a `Store`; other nodes receive copies
/// through replication or a snapshot reply. Lookups and updates are linear
/// scans, which is fine for the demo-sized data sets this mesh carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    entries: Vec<Entry>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Maps `key` to `value`.
    ///
    /// A new key is appended after every existing key. An existing key keeps
    /// its position and only its value changes.
    pub fn store_item(&mut self, key: Key, value: Value) {
        match self.entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => entry.value = value,
            None => self.entries.push(Entry { key, value }),
        }
    }

    /// Returns the value stored for `key`, or `None` if it was never stored.
    pub fn fetch_item(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Store
where
    K: Into<Key>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = Store::new();
        for (key, value) in iter {
            store.store_item(key.into(), value.into());
        }
        store
    }
}
