//! PrefsStore, the public facade
//!
//! READ PATH: RwLock<Cache> read guard -> decode record -> typed value.
//! Never touches the file store.
//!
//! WRITE PATH: see [`Editor`]. Cache first, then the write executor.
//!
//! Every public getter is infallible: a missing key yields the caller's
//! default silently, any other failure is reported to the error handler
//! first. Records are kept encoded in the cache, so a corrupt record only
//! surfaces when someone reads that key.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::cache::Cache;
use crate::codec::{CodecRegistry, Kind, Persistable, Value};
use crate::config::Config;
use crate::disk_store::DiskFileStore;
use crate::editor::Editor;
use crate::error::{PrefsError, PrefsResult};
use crate::events::{ChangeListener, EventBridge, ListenerId};
use crate::executor::{WriteExecutor, WriteStats};
use crate::file_store::FileStore;
use crate::handler::{ErrorHandler, LogErrorHandler};

/// State shared by every handle and editor of one store.
pub(crate) struct StoreInner {
    pub(crate) config: Config,
    pub(crate) registry: CodecRegistry,
    pub(crate) cache: RwLock<Cache>,
    /// Held by an editor from cache mutation until its writes are queued
    pub(crate) submit_order: Mutex<()>,
    pub(crate) executor: WriteExecutor,
    pub(crate) events: EventBridge,
    pub(crate) handler: Arc<dyn ErrorHandler>,
}

impl StoreInner {
    /// Encode a value and enforce the record size limit.
    pub(crate) fn encode_for_write(&self, value: &Value) -> PrefsResult<Vec<u8>> {
        let record = self.registry.encode(value)?;
        if record.len() > self.config.max_value_size {
            return Err(PrefsError::Encode {
                kind: value.kind(),
                reason: format!(
                    "record is {} bytes, limit is {}",
                    record.len(),
                    self.config.max_value_size
                ),
            });
        }
        Ok(record)
    }
}

/// Handle to an open preferences store. Cheap to clone; all clones share
/// the same cache, writer thread and listeners.
///
/// The writer thread drains outstanding writes and exits when the last
/// handle (and the last live [`Editor`]) is dropped.
#[derive(Clone)]
pub struct PrefsStore {
    inner: Arc<StoreInner>,
}

impl PrefsStore {
    /// Open a store over `file_store`, loading every readable record.
    ///
    /// Fails only if the configuration is invalid, the key listing cannot
    /// be read, or the writer thread cannot be started. Records that cannot
    /// be fetched or decoded are reported to `handler` and left out.
    pub fn open(
        file_store: Arc<dyn FileStore>,
        config: Config,
        handler: Arc<dyn ErrorHandler>,
    ) -> PrefsResult<Self> {
        config.validate().map_err(PrefsError::Configuration)?;
        let registry = CodecRegistry::from_table(&config.flags)?;

        let cache = load_cache(file_store.as_ref(), &registry, handler.as_ref())?;
        let loaded = cache.len();

        let executor = WriteExecutor::start(
            &config.name,
            Arc::clone(&file_store),
            Arc::clone(&handler),
            config.queue_capacity,
        )?;

        debug!(store = %config.name, keys = loaded, "store opened");

        Ok(Self {
            inner: Arc::new(StoreInner {
                events: EventBridge::new(config.name.clone()),
                config,
                registry,
                cache: RwLock::new(cache),
                submit_order: Mutex::new(()),
                executor,
                handler,
            }),
        })
    }

    /// Open a store backed by one file per key under `dir`, reporting
    /// absorbed errors through `tracing`.
    pub fn open_dir<P: AsRef<Path>>(dir: P, config: Config) -> PrefsResult<Self> {
        let files = DiskFileStore::open(dir, config.sync_policy)?;
        Self::open(Arc::new(files), config, Arc::new(LogErrorHandler))
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // --- Getters ---

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_with(key, Kind::Bool, default, |v| match v {
            Value::Bool(b) => Some(b),
            _ => None,
        })
    }

    pub fn get_char(&self, key: &str, default: char) -> char {
        self.get_with(key, Kind::Char, default, |v| match v {
            Value::Char(c) => Some(c),
            _ => None,
        })
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get_with(key, Kind::Int, default, |v| match v {
            Value::Int(n) => Some(n),
            _ => None,
        })
    }

    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        self.get_with(key, Kind::Long, default, |v| match v {
            Value::Long(n) => Some(n),
            _ => None,
        })
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.get_with(key, Kind::Float, default, |v| match v {
            Value::Float(n) => Some(n),
            _ => None,
        })
    }

    pub fn get_double(&self, key: &str, default: f64) -> f64 {
        self.get_with(key, Kind::Double, default, |v| match v {
            Value::Double(n) => Some(n),
            _ => None,
        })
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get_with(key, Kind::String, default.to_string(), |v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
    }

    pub fn get_string_set(&self, key: &str, default: BTreeSet<String>) -> BTreeSet<String> {
        self.get_with(key, Kind::StringSet, default, |v| match v {
            Value::StringSet(set) => Some(set),
            _ => None,
        })
    }

    pub fn get_bytes(&self, key: &str, default: Vec<u8>) -> Vec<u8> {
        self.get_with(key, Kind::Bytes, default, |v| match v {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        })
    }

    /// Read a caller-defined object. Its own `decode` runs on the stored
    /// payload; a failure there is reported like any other decode error.
    pub fn get_persistable<T: Persistable>(&self, key: &str, default: T) -> T {
        let decoded = self.read(key, Kind::Persistable).and_then(|value| match value {
            Some(Value::Persistable(bytes)) => T::decode(&bytes).map(Some),
            _ => Ok(None),
        });
        match decoded {
            Ok(Some(object)) => object,
            Ok(None) => default,
            Err(e) => {
                self.inner.handler.handle(&e, key);
                default
            }
        }
    }

    /// Every key whose record decodes, with its value.
    ///
    /// Keys with undecodable records are reported and left out.
    pub fn get_all(&self) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        let mut failures = Vec::new();
        {
            let cache = self.inner.cache.read();
            for (key, record) in cache.iter() {
                match self.inner.registry.decode(record) {
                    Ok(value) => {
                        values.insert(key.to_string(), value);
                    }
                    Err(e) => failures.push((key.to_string(), e)),
                }
            }
        }
        for (key, e) in failures {
            self.inner.handler.handle(&e, &key);
        }
        values
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.cache.read().contains(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.cache.read().keys().map(str::to_string).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cache.read().is_empty()
    }

    // --- Mutation ---

    /// Start a batch of changes.
    pub fn edit(&self) -> Editor {
        Editor::new(Arc::clone(&self.inner))
    }

    pub fn register_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.inner.events.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.inner.events.unregister(id)
    }

    /// Block until every write submitted so far has reached the file store.
    pub fn flush(&self) -> PrefsResult<()> {
        self.inner.executor.flush()
    }

    pub fn stats(&self) -> WriteStats {
        self.inner.executor.stats()
    }

    /// Decode `key` as `kind` under the read lock. `Ok(None)` when absent.
    fn read(&self, key: &str, kind: Kind) -> PrefsResult<Option<Value>> {
        let cache = self.inner.cache.read();
        match cache.get(key) {
            Some(record) => self.inner.registry.decode_as(record, kind).map(Some),
            None => Ok(None),
        }
    }

    fn get_with<T>(
        &self,
        key: &str,
        kind: Kind,
        default: T,
        extract: impl FnOnce(Value) -> Option<T>,
    ) -> T {
        match self.read(key, kind) {
            Ok(Some(value)) => extract(value).unwrap_or(default),
            Ok(None) => default,
            Err(e) => {
                self.inner.handler.handle(&e, key);
                default
            }
        }
    }
}

impl std::fmt::Debug for PrefsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefsStore")
            .field("name", &self.inner.config.name)
            .field("keys", &self.len())
            .field("events", &self.inner.events)
            .finish()
    }
}

/// Read every record the file store lists. Only a failed listing is fatal.
fn load_cache(
    files: &dyn FileStore,
    registry: &CodecRegistry,
    handler: &dyn ErrorHandler,
) -> PrefsResult<Cache> {
    let mut cache = Cache::new();
    for key in files.names()? {
        let loaded = files
            .fetch(&key)
            .and_then(|record| registry.decode(&record).map(|_| record));
        match loaded {
            Ok(record) => {
                cache.put(key, record);
            }
            Err(e) => handler.handle(&e, &key),
        }
    }
    Ok(cache)
}
