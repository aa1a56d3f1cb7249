//! Platform-specific sync primitives used by the disk file store.
//!
//! A record is durable once its temp file's data is on stable media and the
//! rename that published it has been recorded in the directory.

use std::fs::File;
use std::io;
use std::path::Path;

/// Flush file data to stable storage.
///
/// - Linux: `fdatasync` (metadata such as mtime is not needed for records)
/// - macOS/iOS: `F_FULLFSYNC`; plain `fsync` stops at the drive's cache
/// - Windows: `FlushFileBuffers`
/// - elsewhere: `File::sync_data`
///
/// Blocks for the duration of the device flush. Never call with the store
/// lock held.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File`, so it is open.
        let rc = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor comes from a live `File`, so it is open.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if rc != -1 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: the handle comes from a live `File`, so it is valid.
        let ok = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        if ok != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
    {
        file.sync_data()
    }
}

/// Persist directory entries (creations, renames, unlinks) in `dir`.
///
/// Windows has no directory handle to flush; NTFS journals renames itself.
pub fn sync_directory(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}
