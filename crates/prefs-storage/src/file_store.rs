use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, RwLock},
    thread::{self, JoinHandle},
};

use prefs_core::storage::{PrefValue, PreferenceStore, StoreError, SyncMode};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

const DOCUMENT_VERSION: u32 = 1;

/// JSON-file-backed preference store implementing the shared `PreferenceStore`
/// contract.
///
/// Reads are served from an in-memory copy that every write updates before
/// returning. `SyncMode::Apply` hands a snapshot to a background writer thread;
/// `SyncMode::Commit` persists on the calling thread. Snapshots are numbered so
/// an older one never replaces a newer file.
pub struct FilePreferenceStore {
    path: PathBuf,
    shared: Arc<Shared>,
    writer: Option<Writer>,
}

struct Shared {
    cache: RwLock<Cache>,
    /// Generation of the snapshot currently on disk. Held while writing.
    persisted: Mutex<u64>,
}

#[derive(Default)]
struct Cache {
    values: BTreeMap<String, PrefValue>,
    generation: u64,
}

struct Snapshot {
    generation: u64,
    values: BTreeMap<String, PrefValue>,
}

struct Writer {
    tx: mpsc::Sender<Snapshot>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    version: u32,
    values: BTreeMap<String, PrefValue>,
}

impl FilePreferenceStore {
    /// Open the store at `path`, loading existing values. A missing or empty
    /// file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = read_document(&path)?;
        debug!(?path, entries = values.len(), "opened preference file");

        let shared = Arc::new(Shared {
            cache: RwLock::new(Cache {
                values,
                generation: 0,
            }),
            persisted: Mutex::new(0),
        });

        let (tx, rx) = mpsc::channel::<Snapshot>();
        let writer_path = path.clone();
        let writer_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("prefs-writer".to_string())
            .spawn(move || {
                for snapshot in rx {
                    if let Err(err) = persist(&writer_path, &writer_shared, snapshot) {
                        warn!(path = ?writer_path, %err, "background preference write failed");
                    }
                }
            })
            .map_err(storage_err)?;

        Ok(Self {
            path,
            shared,
            writer: Some(Writer { tx, handle }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the current in-memory state, waiting for the write to finish.
    pub fn flush(&self) -> Result<(), StoreError> {
        let snapshot = {
            let cache = self.shared.cache.read().map_err(poisoned)?;
            Snapshot {
                generation: cache.generation,
                values: cache.values.clone(),
            }
        };
        persist(&self.path, &self.shared, snapshot)
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn read(&self, key: &str) -> Result<Option<PrefValue>, StoreError> {
        let cache = self.shared.cache.read().map_err(poisoned)?;
        Ok(cache.values.get(key).cloned())
    }

    #[instrument(skip(self, value), fields(kind = value.kind_name()))]
    fn write(&self, key: &str, value: PrefValue, mode: SyncMode) -> Result<(), StoreError> {
        let writer = match mode {
            SyncMode::Apply => Some(self.writer.as_ref().ok_or_else(writer_stopped)?),
            SyncMode::Commit => None,
        };

        // Readers only see the new value once it has been handed off.
        let snapshot = {
            let mut cache = self.shared.cache.write().map_err(poisoned)?;
            let mut values = cache.values.clone();
            values.insert(key.to_string(), value);
            let snapshot = Snapshot {
                generation: cache.generation + 1,
                values: values.clone(),
            };
            let generation = snapshot.generation;

            if let Some(writer) = writer {
                writer.tx.send(snapshot).map_err(|_| writer_stopped())?;
                cache.values = values;
                cache.generation = generation;
                return Ok(());
            }
            cache.values = values;
            cache.generation = generation;
            snapshot
        };

        persist(&self.path, &self.shared, snapshot)
    }
}

impl Drop for FilePreferenceStore {
    fn drop(&mut self) {
        if let Some(Writer { tx, handle }) = self.writer.take() {
            // Closing the channel lets the writer drain queued snapshots and exit.
            drop(tx);
            if handle.join().is_err() {
                warn!(path = ?self.path, "preference writer thread panicked");
            }
        }
    }
}

fn writer_stopped() -> StoreError {
    StoreError::Storage {
        reason: "background writer stopped".to_string(),
    }
}

fn persist(path: &Path, shared: &Shared, snapshot: Snapshot) -> Result<(), StoreError> {
    let mut persisted = shared.persisted.lock().map_err(poisoned)?;
    if snapshot.generation < *persisted {
        debug!(
            generation = snapshot.generation,
            on_disk = *persisted,
            "skipping stale snapshot"
        );
        return Ok(());
    }

    write_document(
        path,
        &StoredDocument {
            version: DOCUMENT_VERSION,
            values: snapshot.values,
        },
    )?;
    *persisted = snapshot.generation;
    Ok(())
}

fn write_document(path: &Path, document: &StoredDocument) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Storage {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec_pretty(document).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_document(path: &Path) -> Result<BTreeMap<String, PrefValue>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(storage_err(err)),
    };
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let document: StoredDocument = serde_json::from_str(&contents).map_err(storage_err)?;
    if document.version != DOCUMENT_VERSION {
        return Err(StoreError::Storage {
            reason: format!("unsupported preference file version {}", document.version),
        });
    }
    Ok(document.values)
}

fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::Storage {
        reason: err.to_string(),
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Storage {
        reason: format!("lock poisoned: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_values_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");

        {
            let store = FilePreferenceStore::open(&path).expect("open");
            store.set_long("long", 6942069).commit().expect("commit");
            store.set_int("int", 451).commit().expect("commit");
            store.set_bool("bool", true).commit().expect("commit");
            store.set_string("string", "hello").commit().expect("commit");
        }

        let store = FilePreferenceStore::open(&path).expect("reopen");
        assert_eq!(store.get_long("long", 0).unwrap(), 6942069);
        assert_eq!(store.get_int("int", 0).unwrap(), 451);
        assert!(store.get_bool("bool", false).unwrap());
        assert_eq!(store.get_string("string", "").unwrap(), "hello");
    }

    #[test]
    fn commit_is_on_disk_before_returning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        let store = FilePreferenceStore::open(&path).expect("open");

        store.set_string("k", "durable").commit().expect("commit");

        let on_disk = fs::read_to_string(&path).expect("read file");
        assert!(on_disk.contains("durable"));
    }

    #[test]
    fn applied_values_are_visible_immediately_and_durable_after_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("prefs.json");

        {
            let store = FilePreferenceStore::open(&path).expect("open");
            store.set_string("k", "first").apply().expect("apply");
            store.set_string("k", "second").apply().expect("apply");
            assert_eq!(store.get_string("k", "").unwrap(), "second");
        }

        let store = FilePreferenceStore::open(&path).expect("reopen");
        assert_eq!(store.get_string("k", "").unwrap(), "second");
    }

    #[test]
    fn failed_apply_leaves_value_invisible() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        let mut store = FilePreferenceStore::open(&path).expect("open");
        store.set_string("k", "kept").commit().expect("commit");

        if let Some(Writer { tx, handle }) = store.writer.take() {
            drop(tx);
            handle.join().expect("writer exits");
        }

        let err = store
            .set_string("k", "lost")
            .apply()
            .expect_err("writer is gone");
        assert!(matches!(err, StoreError::Storage { .. }));
        assert_eq!(store.get_string("k", "").unwrap(), "kept");
        assert!(!store.contains("other").unwrap());

        store.set_string("k", "durable").commit().expect("commit still works");
        assert_eq!(store.get_string("k", "").unwrap(), "durable");
    }

    #[test]
    fn stale_snapshot_does_not_replace_newer_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        let store = FilePreferenceStore::open(&path).expect("open");

        store.set_string("k", "newer").commit().expect("commit");
        let mut stale = BTreeMap::new();
        stale.insert("k".to_string(), PrefValue::String("older".into()));
        persist(
            &path,
            &store.shared,
            Snapshot {
                generation: 0,
                values: stale,
            },
        )
        .expect("persist");

        let on_disk = fs::read_to_string(&path).expect("read file");
        assert!(on_disk.contains("newer"));
        assert!(!on_disk.contains("older"));
    }

    #[test]
    fn empty_file_opens_as_empty_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        fs::write(&path, "  \n").expect("write");

        let store = FilePreferenceStore::open(&path).expect("open");
        assert!(!store.contains("anything").unwrap());
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{not json").expect("write");

        let err = FilePreferenceStore::open(&path)
            .err()
            .expect("should fail to open");
        assert!(matches!(err, StoreError::Storage { .. }));
    }

    #[test]
    fn flush_writes_current_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        let store = FilePreferenceStore::open(&path).expect("open");
        store.set_int("n", 3).apply().expect("apply");
        store.flush().expect("flush");

        let document: StoredDocument =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(document.values.get("n"), Some(&PrefValue::Int(3)));
    }
}
