//! Editor: batched mutations with apply/commit
//!
//! An [`Editor`] collects puts, removes and clears. Nothing is visible to
//! readers until one of the terminal calls consumes it:
//!
//! - [`Editor::apply`]: update the cache, queue the writes, notify, return
//! - [`Editor::commit`]: same, then wait for the file store and report
//!   whether every write of the batch succeeded
//!
//! WRITE ORDERING (under the store's submission lock):
//! 1. mutate the cache under the cache write lock, then release it
//! 2. enqueue the matching file-store operations
//!
//! The submission lock spans both steps, so queue order equals cache order
//! across editors. Step 2 may block on a full queue; readers only ever wait
//! for step 1. Listeners run after both locks are released, still on the
//! calling thread.

use std::collections::BTreeSet;
use std::sync::Arc;

use hashbrown::HashSet;

use crate::codec::{Persistable, Value};
use crate::error::PrefsResult;
use crate::executor::{Ticket, WriteOp};
use crate::file_store::validate_key;
use crate::store::StoreInner;

#[derive(Debug, Clone, PartialEq)]
enum Pending {
    Put(Value),
    Remove,
}

/// A single-use batch of mutations against one store.
pub struct Editor {
    inner: Arc<StoreInner>,
    cleared: bool,
    ops: Vec<(String, Pending)>,
}

/// Batch after validation and encoding, ready to publish.
struct PreparedBatch {
    cleared: bool,
    /// key -> record, or `None` for a removal
    writes: Vec<(String, Option<Vec<u8>>)>,
    rejected: usize,
}

impl Editor {
    pub(crate) fn new(inner: Arc<StoreInner>) -> Self {
        Self { inner, cleared: false, ops: Vec::new() }
    }

    /// Stage a value of any kind. A later operation on the same key replaces
    /// this one.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.stage(key.into(), Pending::Put(value.into()))
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_char(&mut self, key: impl Into<String>, value: char) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_int(&mut self, key: impl Into<String>, value: i32) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_float(&mut self, key: impl Into<String>, value: f32) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_double(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(key, Value::String(value.into()))
    }

    pub fn put_string_set<I, S>(&mut self, key: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        self.put(key, Value::StringSet(set))
    }

    pub fn put_bytes(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.put(key, Value::Bytes(value.into()))
    }

    pub fn put_persistable<T: Persistable>(&mut self, key: impl Into<String>, value: &T) -> &mut Self {
        self.put(key, Value::persistable(value))
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.stage(key.into(), Pending::Remove)
    }

    /// Drop every key in the store, and anything staged so far in this
    /// batch. Operations staged afterwards still apply.
    pub fn clear(&mut self) -> &mut Self {
        self.ops.clear();
        self.cleared = true;
        self
    }

    /// Number of staged key operations (a clear is not counted).
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && !self.cleared
    }

    /// Publish the batch without waiting for the file store.
    ///
    /// Readers see the new values as soon as this returns. Persistence
    /// failures go to the error handler only.
    pub fn apply(self) {
        let _ = self.publish(false);
    }

    /// Publish the batch and wait until every file-store operation of it
    /// has executed.
    ///
    /// Returns false if any key was rejected or any operation failed. The
    /// cache is not rolled back either way.
    pub fn commit(self) -> bool {
        self.publish(true)
    }

    fn stage(&mut self, key: String, op: Pending) -> &mut Self {
        self.ops.retain(|(k, _)| *k != key);
        self.ops.push((key, op));
        self
    }

    /// Validate keys and encode values. Rejected operations are reported and
    /// left out; the rest of the batch proceeds.
    fn prepare(&mut self) -> PreparedBatch {
        let inner = Arc::clone(&self.inner);
        let mut batch = PreparedBatch {
            cleared: self.cleared,
            writes: Vec::with_capacity(self.ops.len()),
            rejected: 0,
        };

        for (key, op) in self.ops.drain(..) {
            let prepared = validate_key(&key, inner.config.max_key_size).and_then(|()| match op {
                Pending::Put(value) => inner.encode_for_write(&value).map(Some),
                Pending::Remove => Ok(None),
            });
            match prepared {
                Ok(record) => batch.writes.push((key, record)),
                Err(e) => {
                    inner.handler.handle(&e, &key);
                    batch.rejected += 1;
                }
            }
        }

        batch
    }

    fn publish(mut self, wait: bool) -> bool {
        let batch = self.prepare();
        let inner = self.inner;
        let mut ok = batch.rejected == 0;

        let (changed, submitted) = {
            let _order = inner.submit_order.lock();
            let mut cache = inner.cache.write();

            // key -> record before this batch, first touch wins
            let mut before: Vec<(String, Option<Vec<u8>>)> = Vec::new();
            let mut seen: HashSet<String> = HashSet::new();
            let mut ops = Vec::with_capacity(batch.writes.len() + 1);

            if batch.cleared {
                for (key, record) in cache.drain() {
                    seen.insert(key.clone());
                    before.push((key, Some(record)));
                }
                ops.push(WriteOp::Clear);
            }

            for (key, record) in batch.writes {
                if seen.insert(key.clone()) {
                    before.push((key.clone(), cache.get(&key).map(<[u8]>::to_vec)));
                }
                match record {
                    Some(record) => {
                        cache.put(key.clone(), record.clone());
                        ops.push(WriteOp::Persist { key, record });
                    }
                    None => {
                        cache.remove(&key);
                        ops.push(WriteOp::Delete { key });
                    }
                }
            }

            let changed: Vec<String> = before
                .into_iter()
                .filter(|(key, old)| old.as_deref() != cache.get(key))
                .map(|(key, _)| key)
                .collect();
            drop(cache);

            let submitted: PrefsResult<Option<Ticket>> = if wait {
                inner.executor.submit_tracked(ops).map(Some)
            } else {
                inner.executor.submit(ops).map(|()| None)
            };
            (changed, submitted)
        };

        inner.events.notify(&changed, inner.handler.as_ref());

        match submitted {
            Ok(Some(ticket)) => ok &= ticket.wait(),
            Ok(None) => {}
            Err(e) => {
                inner.handler.handle(&e, "editor");
                ok = false;
            }
        }
        ok
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("store", &self.inner.config.name)
            .field("cleared", &self.cleared)
            .field("ops", &self.ops.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::file_store::FileStore;
    use crate::handler::NoopErrorHandler;
    use crate::memory_store::MemoryFileStore;
    use crate::store::PrefsStore;

    fn open() -> (PrefsStore, Arc<MemoryFileStore>) {
        let files = Arc::new(MemoryFileStore::new());
        let store = PrefsStore::open(
            Arc::clone(&files) as Arc<dyn FileStore>,
            Config::default(),
            Arc::new(NoopErrorHandler),
        )
        .unwrap();
        (store, files)
    }

    #[test]
    fn test_last_operation_per_key_wins() {
        let (store, _files) = open();
        let mut editor = store.edit();
        editor.put_int("k", 1).put_int("other", 5).put_int("k", 2);
        assert_eq!(editor.len(), 2);
        assert!(editor.commit());
        assert_eq!(store.get_int("k", 0), 2);

        let mut editor = store.edit();
        editor.put_int("k", 3).remove("k");
        assert!(editor.commit());
        assert!(!store.contains("k"));
        assert_eq!(store.get_int("other", 0), 5);
    }

    #[test]
    fn test_clear_drops_earlier_staging_only() {
        let (store, files) = open();
        let mut editor = store.edit();
        editor.put_int("a", 1).put_int("b", 2);
        assert!(editor.commit());

        let mut editor = store.edit();
        editor.put_int("lost", 9).clear().put_int("kept", 3);
        assert!(editor.commit());

        assert_eq!(store.keys(), vec!["kept".to_string()]);
        assert_eq!(files.names().unwrap(), vec!["kept".to_string()]);
    }

    #[test]
    fn test_invalid_key_rejected_rest_applied() {
        let (store, _files) = open();
        let mut editor = store.edit();
        editor.put_int("good", 1).put_int("bad/key", 2).put_int("", 3);
        assert!(!editor.commit());

        assert_eq!(store.get_int("good", 0), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_oversized_value_rejected() {
        let files = Arc::new(MemoryFileStore::new());
        let mut config = Config::default();
        config.max_value_size = 16;
        let store = PrefsStore::open(
            Arc::clone(&files) as Arc<dyn FileStore>,
            config,
            Arc::new(NoopErrorHandler),
        )
        .unwrap();

        let mut editor = store.edit();
        editor.put_string("big", "x".repeat(64)).put_string("small", "ok");
        assert!(!editor.commit());
        assert!(!store.contains("big"));
        assert_eq!(store.get_string("small", ""), "ok");
    }

    #[test]
    fn test_empty_editor() {
        let (store, files) = open();
        let editor = store.edit();
        assert!(editor.is_empty());
        assert!(editor.commit());
        assert!(files.operations().is_empty());
    }
}
