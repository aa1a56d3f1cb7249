//! Filesystem [`FileStore`]: one file per key.
//!
//! Each record lives at `<dir>/<key>.bpf`, wrapped in a small frame so a
//! torn or bit-rotted file is caught at fetch time instead of being handed
//! to the codec:
//!
//! ```text
//!   [0..4]   magic:    "BPRF"
//!   [4..8]   length:   u32 LE - payload length
//!   [8..12]  checksum: u32 LE - CRC32C of payload
//!   [12..]   payload:  the encoded record
//! ```
//!
//! Saves use the atomic rename pattern:
//! 1. write `<key>.bpf.tmp`
//! 2. durable_sync the temp file
//! 3. rename over `<key>.bpf`
//! 4. sync the directory
//!
//! A crash before step 3 leaves the old record intact plus an orphaned temp
//! file, which [`DiskFileStore::open`] sweeps away.
//!
//! Keys are used verbatim as file names, so key uniqueness is only as
//! strong as the filesystem's name comparison (see
//! [`validate_key`](crate::file_store::validate_key)).

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::SyncPolicy;
use crate::error::{PrefsError, PrefsResult};
use crate::file_store::FileStore;
use crate::platform_durability::{durable_sync, sync_directory};

/// Extension of published record files
const RECORD_SUFFIX: &str = ".bpf";

/// Extension of in-flight temp files
const TEMP_SUFFIX: &str = ".bpf.tmp";

/// Magic bytes at the start of every record file
const FILE_MAGIC: [u8; 4] = *b"BPRF";

/// Frame header size in bytes
const FRAME_HEADER_SIZE: usize = 12;

/// One-file-per-key store rooted at a directory.
#[derive(Debug)]
pub struct DiskFileStore {
    dir: PathBuf,
    policy: SyncPolicy,
}

impl DiskFileStore {
    /// Open (creating if needed) a store directory.
    ///
    /// Temp files left behind by an interrupted save are deleted.
    pub fn open<P: AsRef<Path>>(dir: P, policy: SyncPolicy) -> PrefsResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            PrefsError::io(dir.display().to_string(), "failed to create store directory", e)
        })?;

        let store = Self { dir, policy };
        let swept = store.sweep_temp_files()?;
        if swept > 0 {
            debug!(dir = %store.dir.display(), swept, "removed interrupted saves");
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, RECORD_SUFFIX))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, TEMP_SUFFIX))
    }

    fn sweep_temp_files(&self) -> PrefsResult<usize> {
        let mut swept = 0;
        for name in self.file_names()? {
            if name.ends_with(TEMP_SUFFIX) {
                let path = self.dir.join(&name);
                match fs::remove_file(&path) {
                    Ok(()) => swept += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
                }
            }
        }
        Ok(swept)
    }

    fn file_names(&self) -> PrefsResult<Vec<String>> {
        let target = self.dir.display().to_string();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| PrefsError::io(target.clone(), "failed to read store directory", e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| PrefsError::io(target.clone(), "failed to read directory entry", e))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn sync_dir(&self, key: &str) -> PrefsResult<()> {
        if self.policy == SyncPolicy::Durable {
            sync_directory(&self.dir)
                .map_err(|e| PrefsError::io(key, "failed to sync store directory", e))?;
        }
        Ok(())
    }

    fn write_temp(&self, key: &str, path: &Path, framed: &[u8]) -> PrefsResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| PrefsError::io(key, "failed to create temp file", e))?;

        file.write_all(framed)
            .map_err(|e| PrefsError::io(key, "failed to write temp file", e))?;

        if self.policy == SyncPolicy::Durable {
            durable_sync(&file).map_err(|e| PrefsError::io(key, "durable_sync failed", e))?;
        }
        Ok(())
    }
}

impl FileStore for DiskFileStore {
    fn names(&self) -> PrefsResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .file_names()?
            .into_iter()
            .filter(|name| !name.ends_with(TEMP_SUFFIX))
            .filter_map(|name| name.strip_suffix(RECORD_SUFFIX).map(str::to_string))
            .filter(|key| !key.is_empty())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn fetch(&self, key: &str) -> PrefsResult<Vec<u8>> {
        let bytes = fs::read(self.record_path(key)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PrefsError::NotFound { key: key.to_string() },
            _ => PrefsError::io(key, "failed to read record", e),
        })?;
        unframe(key, &bytes)
    }

    fn save(&self, key: &str, bytes: &[u8]) -> PrefsResult<()> {
        let framed = frame(key, bytes)?;
        let temp = self.temp_path(key);

        if let Err(e) = self.write_temp(key, &temp, &framed) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }

        fs::rename(&temp, self.record_path(key)).map_err(|e| {
            let _ = fs::remove_file(&temp);
            PrefsError::io(key, "failed to publish record", e)
        })?;

        self.sync_dir(key)
    }

    fn remove(&self, key: &str) -> PrefsResult<()> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => self.sync_dir(key),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PrefsError::io(key, "failed to remove record", e)),
        }
    }

    fn clear(&self) -> PrefsResult<()> {
        for name in self.file_names()? {
            if name.ends_with(RECORD_SUFFIX) || name.ends_with(TEMP_SUFFIX) {
                match fs::remove_file(self.dir.join(&name)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(PrefsError::io(name, "failed to remove record", e)),
                }
            }
        }
        self.sync_dir("<store>")
    }
}

/// Wrap a record payload in the on-disk frame.
fn frame(key: &str, payload: &[u8]) -> PrefsResult<Vec<u8>> {
    let length = u32::try_from(payload.len()).map_err(|_| PrefsError::io(
        key,
        "record too large to frame",
        io::Error::new(io::ErrorKind::InvalidInput, format!("{} bytes", payload.len())),
    ))?;

    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(&FILE_MAGIC);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&crc32c::crc32c(payload).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Verify and strip the on-disk frame.
fn unframe(key: &str, bytes: &[u8]) -> PrefsResult<Vec<u8>> {
    let corrupt = |reason: String| PrefsError::CorruptFile {
        key: key.to_string(),
        reason,
    };

    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(corrupt(format!(
            "{} bytes is shorter than the {}-byte header",
            bytes.len(),
            FRAME_HEADER_SIZE
        )));
    }
    if bytes[0..4] != FILE_MAGIC {
        return Err(corrupt(format!(
            "bad magic {:02x}{:02x}{:02x}{:02x}",
            bytes[0], bytes[1], bytes[2], bytes[3]
        )));
    }

    let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let expected = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let payload = &bytes[FRAME_HEADER_SIZE..];

    if payload.len() != length {
        return Err(corrupt(format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            length
        )));
    }

    let actual = crc32c::crc32c(payload);
    if actual != expected {
        return Err(corrupt(format!(
            "checksum mismatch: expected 0x{:08x}, got 0x{:08x}",
            expected, actual
        )));
    }

    Ok(payload.to_vec())
}
