//! Durable per-key storage interface.
//!
//! The engine only ever talks to persistence through [`FileStore`]. One
//! record per key; keys can be listed without reading any payload.
//!
//! Implementations shipped with this crate:
//! - [`DiskFileStore`](crate::disk_store::DiskFileStore): one file per key
//! - [`MemoryFileStore`](crate::memory_store::MemoryFileStore): test double

use crate::error::{PrefsError, PrefsResult};

/// Durable byte-blob storage keyed by name.
///
/// Implementations are driven from the write executor's worker thread and
/// from the thread that opens the store, hence `Send + Sync`.
pub trait FileStore: Send + Sync {
    /// Names of every persisted record.
    fn names(&self) -> PrefsResult<Vec<String>>;

    /// Read a record. Fails with `NotFound` if the key has none.
    fn fetch(&self, key: &str) -> PrefsResult<Vec<u8>>;

    /// Replace the record for `key`.
    ///
    /// Must be atomic: after a crash either the old or the new record is
    /// visible, never a mix. Once this returns Ok the record survives a crash.
    fn save(&self, key: &str, bytes: &[u8]) -> PrefsResult<()>;

    /// Delete the record for `key`. Deleting a missing record is Ok.
    fn remove(&self, key: &str) -> PrefsResult<()>;

    /// Delete every record.
    fn clear(&self) -> PrefsResult<()>;
}

/// Check that `key` can name a record.
///
/// Keys become file names, so path separators, NUL and the `.`/`..`
/// directory entries are refused along with empty or oversized keys.
///
/// Case is not folded. On a case-insensitive filesystem (the macOS and
/// Windows defaults) `Theme` and `theme` share one record file in a
/// [`DiskFileStore`](crate::disk_store::DiskFileStore): the later save
/// replaces the earlier one, and after reopen only one key is listed.
/// Callers that need both must pick keys that differ beyond case.
pub fn validate_key(key: &str, max_key_size: usize) -> PrefsResult<()> {
    let reason = if key.is_empty() {
        Some("key is empty".to_string())
    } else if key.len() > max_key_size {
        Some(format!("{} bytes exceeds limit of {}", key.len(), max_key_size))
    } else if key == "." || key == ".." {
        Some("reserved directory name".to_string())
    } else if let Some(c) = key.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
        Some(format!("contains forbidden character {:?}", c))
    } else {
        None
    };

    match reason {
        Some(reason) => Err(PrefsError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_ordinary_keys() {
        for key in ["name", "user.theme", "a b c", "überschrift", "x.bpf"] {
            assert!(validate_key(key, 128).is_ok(), "{}", key);
        }
    }

    #[test]
    fn test_rejects_bad_keys() {
        for key in ["", ".", "..", "a/b", "a\\b", "nul\0byte"] {
            assert!(
                matches!(validate_key(key, 128), Err(PrefsError::InvalidKey { .. })),
                "{:?}",
                key
            );
        }
    }

    #[test]
    fn test_max_key_size_boundary() {
        let key = "k".repeat(16);
        assert!(validate_key(&key, 16).is_ok());
        assert!(validate_key(&key, 15).is_err());
    }
}
