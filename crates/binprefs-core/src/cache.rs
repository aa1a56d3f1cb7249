//! In-memory mirror of every persisted record.
//!
//! The cache is not an eviction cache: it holds the encoded record of every
//! key the store knows about and is the only thing reads ever look at. It
//! never performs I/O. Callers serialize access through the store's lock.

use hashbrown::HashMap;

/// Key -> encoded record.
#[derive(Debug, Default)]
pub struct Cache {
    entries: HashMap<String, Vec<u8>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Insert or overwrite a record, returning the previous one.
    pub fn put(&mut self, key: String, record: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.insert(key, record)
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Remove every entry, handing back what was there.
    pub fn drain(&mut self) -> Vec<(String, Vec<u8>)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
