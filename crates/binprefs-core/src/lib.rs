//! BinPrefs Core: Typed Binary Preferences Store
//!
//! An embedded key-value store for application settings. Every key maps to
//! one typed value kept as a self-describing binary record: a one-byte type
//! flag followed by a fixed-layout, big-endian payload.
//!
//! # Architecture
//!
//! - **Read path**: Decode straight from the in-memory cache; never blocks on disk
//! - **Write path**: Editor batch -> cache -> ordered write queue -> file store
//! - **Writer thread**: One per store, executes writes strictly in submission order
//! - **File store**: One atomically replaced record file per key
//!
//! Errors that cannot be returned to a caller (failed background writes,
//! undecodable records, panicking listeners) go to a pluggable
//! [`ErrorHandler`]; getters fall back to the caller's default.
//!
//! ```no_run
//! use binprefs_core::{Config, PrefsStore};
//!
//! let store = PrefsStore::open_dir("/tmp/settings", Config::default().with_name("app"))?;
//! let mut editor = store.edit();
//! editor.put_int("launch_count", store.get_int("launch_count", 0) + 1);
//! assert!(editor.commit());
//! # Ok::<(), binprefs_core::PrefsError>(())
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod disk_store;
pub mod editor;
pub mod error;
pub mod events;
pub mod executor;
pub mod file_store;
pub mod handler;
pub mod memory_store;
pub mod platform_durability;
pub mod store;

// Re-export key types for convenience
pub use codec::{CodecRegistry, Kind, Persistable, Value};
pub use config::{Config, SyncPolicy};
pub use disk_store::DiskFileStore;
pub use editor::Editor;
pub use error::{ErrorCategory, PrefsError, PrefsResult};
pub use events::{ChangeListener, ListenerId};
pub use executor::{Ticket, WriteOp, WriteStats};
pub use file_store::{validate_key, FileStore};
pub use handler::{ErrorHandler, LogErrorHandler, NoopErrorHandler};
pub use memory_store::{MemoryFileStore, StoreOp};
pub use store::PrefsStore;
