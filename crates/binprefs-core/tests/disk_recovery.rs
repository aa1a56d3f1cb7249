//! Integration tests: persistence and recovery on the filesystem store.
//!
//! Each test opens a store in a temp directory, closes it, damages or
//! inspects the files, and reopens.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use binprefs_core::{
    Config, DiskFileStore, ErrorCategory, ErrorHandler, PrefsError, PrefsStore, SyncPolicy,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Reports = Arc<Mutex<Vec<(ErrorCategory, String)>>>;

fn open_recording(dir: &Path) -> (PrefsStore, Reports) {
    let reports: Reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let handler: Arc<dyn ErrorHandler> = Arc::new(move |err: &PrefsError, ctx: &str| {
        sink.lock().push((err.category(), ctx.to_string()));
    });
    let files = DiskFileStore::open(dir, SyncPolicy::Durable).unwrap();
    let store = PrefsStore::open(Arc::new(files), Config::default(), handler).unwrap();
    (store, reports)
}

// ---------------------------------------------------------------------------
// Reopen
// ---------------------------------------------------------------------------

#[test]
fn test_values_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = PrefsStore::open_dir(dir.path(), Config::default()).unwrap();
        let mut editor = store.edit();
        editor
            .put_string("user", "ada")
            .put_float("volume", 0.8)
            .put_string_set("recent", ["a.txt", "b.txt"]);
        assert!(editor.commit());
    }

    assert!(dir.path().join("user.bpf").exists());

    let store = PrefsStore::open_dir(dir.path(), Config::default()).unwrap();
    assert_eq!(store.get_string("user", ""), "ada");
    assert_eq!(store.get_float("volume", 0.0), 0.8);
    assert_eq!(store.keys(), vec!["recent", "user", "volume"]);
}

#[test]
fn test_relaxed_preset_persists_after_drop() {
    let dir = TempDir::new().unwrap();
    {
        let store = PrefsStore::open_dir(dir.path(), Config::relaxed()).unwrap();
        let mut editor = store.edit();
        editor.put_int("runs", 3);
        editor.apply();
    }

    let store = PrefsStore::open_dir(dir.path(), Config::relaxed()).unwrap();
    assert_eq!(store.get_int("runs", 0), 3);
}

#[test]
fn test_remove_and_clear_delete_files() {
    let dir = TempDir::new().unwrap();
    let store = PrefsStore::open_dir(dir.path(), Config::default()).unwrap();

    let mut editor = store.edit();
    editor.put_int("a", 1).put_int("b", 2).put_int("c", 3);
    assert!(editor.commit());

    let mut editor = store.edit();
    editor.remove("a");
    assert!(editor.commit());
    assert!(!dir.path().join("a.bpf").exists());
    assert!(dir.path().join("b.bpf").exists());

    let mut editor = store.edit();
    editor.clear();
    assert!(editor.commit());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

// ---------------------------------------------------------------------------
// Damage
// ---------------------------------------------------------------------------

#[test]
fn test_truncated_file_isolated() {
    let dir = TempDir::new().unwrap();
    {
        let (store, _) = open_recording(dir.path());
        let mut editor = store.edit();
        editor.put_string("intact", "yes").put_string("torn", "this will be cut");
        assert!(editor.commit());
    }

    let torn = dir.path().join("torn.bpf");
    let bytes = fs::read(&torn).unwrap();
    fs::write(&torn, &bytes[..bytes.len() - 4]).unwrap();

    let (store, reports) = open_recording(dir.path());
    assert_eq!(store.get_string("intact", ""), "yes");
    assert_eq!(store.get_string("torn", "fallback"), "fallback");
    assert!(!store.get_all().contains_key("torn"));
    assert_eq!(
        *reports.lock(),
        vec![(ErrorCategory::Decode, "torn".to_string())]
    );

    // Writing the key again replaces the damaged file
    let mut editor = store.edit();
    editor.put_string("torn", "repaired");
    assert!(editor.commit());
    drop(store);

    let (store, reports) = open_recording(dir.path());
    assert_eq!(store.get_string("torn", ""), "repaired");
    assert!(reports.lock().is_empty());
}

#[test]
fn test_stale_temp_files_swept() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("half.bpf.tmp"), b"partial write").unwrap();

    let store = PrefsStore::open_dir(dir.path(), Config::default()).unwrap();
    assert!(store.is_empty());
    assert!(!dir.path().join("half.bpf.tmp").exists());
}

#[test]
fn test_foreign_files_ignored() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("README"), b"not a record").unwrap();

    let (store, reports) = open_recording(dir.path());
    assert!(store.is_empty());
    assert!(reports.lock().is_empty());
    assert!(dir.path().join("README").exists());
}
