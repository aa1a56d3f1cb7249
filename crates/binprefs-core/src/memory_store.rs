//! In-memory [`FileStore`] for tests and ephemeral stores.
//!
//! Same semantics as the disk store with no persistence. Failures and slow
//! saves can be injected, raw (possibly corrupt) records planted, and the
//! sequence of executed operations inspected.

use std::io;
use std::thread;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::{PrefsError, PrefsResult};
use crate::file_store::FileStore;

/// An operation that reached the store, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Save(String),
    Remove(String),
    Clear,
}

#[derive(Debug, Default)]
struct Faults {
    fail_saves: bool,
    fail_removes: bool,
    save_delay: Duration,
}

/// Thread-safe map-backed store.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
    faults: Mutex<Faults>,
    log: Mutex<Vec<StoreOp>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant a record directly, bypassing the codec.
    pub fn insert_raw(&self, key: &str, bytes: &[u8]) {
        self.records.write().insert(key.to_string(), bytes.to_vec());
    }

    /// Current raw record for `key`, if any.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.records.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Make every subsequent `save` fail with an I/O error.
    pub fn fail_saves(&self, fail: bool) {
        self.faults.lock().fail_saves = fail;
    }

    /// Make every subsequent `remove` and `clear` fail with an I/O error.
    pub fn fail_removes(&self, fail: bool) {
        self.faults.lock().fail_removes = fail;
    }

    /// Sleep this long inside each `save`, widening the durability window.
    pub fn set_save_delay(&self, delay: Duration) {
        self.faults.lock().save_delay = delay;
    }

    /// Operations that completed successfully, oldest first.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.log.lock().clone()
    }

    fn injected(key: &str, op: &str) -> PrefsError {
        PrefsError::io(
            key,
            op,
            io::Error::new(io::ErrorKind::Other, "injected failure"),
        )
    }
}

impl FileStore for MemoryFileStore {
    fn names(&self) -> PrefsResult<Vec<String>> {
        let mut names: Vec<String> = self.records.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn fetch(&self, key: &str) -> PrefsResult<Vec<u8>> {
        self.raw(key).ok_or_else(|| PrefsError::NotFound {
            key: key.to_string(),
        })
    }

    fn save(&self, key: &str, bytes: &[u8]) -> PrefsResult<()> {
        let (fail, delay) = {
            let faults = self.faults.lock();
            (faults.fail_saves, faults.save_delay)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if fail {
            return Err(Self::injected(key, "save"));
        }

        self.records.write().insert(key.to_string(), bytes.to_vec());
        self.log.lock().push(StoreOp::Save(key.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> PrefsResult<()> {
        if self.faults.lock().fail_removes {
            return Err(Self::injected(key, "remove"));
        }
        self.records.write().remove(key);
        self.log.lock().push(StoreOp::Remove(key.to_string()));
        Ok(())
    }

    fn clear(&self) -> PrefsResult<()> {
        if self.faults.lock().fail_removes {
            return Err(Self::injected("<store>", "clear"));
        }
        self.records.write().clear();
        self.log.lock().push(StoreOp::Clear);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_fetch_remove() {
        let store = MemoryFileStore::new();
        store.save("a", b"1").unwrap();
        assert_eq!(store.fetch("a").unwrap(), b"1");
        store.remove("a").unwrap();
        assert!(matches!(store.fetch("a"), Err(PrefsError::NotFound { .. })));
        assert_eq!(
            store.operations(),
            vec![StoreOp::Save("a".into()), StoreOp::Remove("a".into())]
        );
    }

    #[test]
    fn test_injected_save_failure() {
        let store = MemoryFileStore::new();
        store.fail_saves(true);
        assert!(matches!(store.save("a", b"1"), Err(PrefsError::Io { .. })));
        assert!(store.is_empty());
        assert!(store.operations().is_empty());

        store.fail_saves(false);
        store.save("a", b"1").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_names_sorted() {
        let store = MemoryFileStore::new();
        store.insert_raw("zeta", b"z");
        store.insert_raw("alpha", b"a");
        assert_eq!(store.names().unwrap(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
