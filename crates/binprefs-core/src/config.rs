//! Configuration for a binprefs store
//!
//! Two presets cover the usual trade-off between fsync cost and the
//! durability window; individual fields can be adjusted afterwards.

use crate::codec::{Kind, DEFAULT_FLAGS};

/// How hard the disk file store works to make a save durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync the temp file before rename and the directory after it
    Durable,
    /// Rename only; the OS decides when data reaches the device
    Buffered,
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Store identity passed to change listeners
    pub name: String,
    /// Maximum queued write operations before submitters block
    pub queue_capacity: usize,
    /// Maximum key length in bytes
    pub max_key_size: usize,
    /// Maximum encoded record size in bytes
    pub max_value_size: usize,
    /// Sync behaviour of the disk file store
    pub sync_policy: SyncPolicy,
    /// Kind -> flag table the codec registry is built from
    pub flags: Vec<(Kind, u8)>,
}

impl Config {
    /// Every acknowledged commit survives power loss.
    pub fn durable() -> Self {
        Self {
            name: "default".to_string(),
            queue_capacity: 1024,
            max_key_size: 128,
            max_value_size: 16 * 1024 * 1024,
            sync_policy: SyncPolicy::Durable,
            flags: DEFAULT_FLAGS.to_vec(),
        }
    }

    /// Cheaper writes; a crash may lose the most recent saves.
    pub fn relaxed() -> Self {
        Self {
            name: "default".to_string(),
            queue_capacity: 4096,
            max_key_size: 128,
            max_value_size: 32 * 1024 * 1024,
            sync_policy: SyncPolicy::Buffered,
            flags: DEFAULT_FLAGS.to_vec(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Validate all configuration parameters
    ///
    /// The flag table is checked separately when the codec registry is built.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name must not be empty".into());
        }
        if self.queue_capacity == 0 || self.queue_capacity > 1 << 20 {
            return Err("queue_capacity must be in [1, 1048576]".into());
        }
        // Leaves room for the ".bpf.tmp" suffix within a 255-byte file name
        if self.max_key_size == 0 || self.max_key_size > 240 {
            return Err("max_key_size must be in [1, 240]".into());
        }
        if self.max_value_size < 16 || self.max_value_size > 128 * 1024 * 1024 {
            return Err("max_value_size must be in [16, 128MB]".into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::durable() }
}
