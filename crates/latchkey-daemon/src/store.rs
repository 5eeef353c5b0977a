//! Config & record store
//!
//! Two JSON files under the data directory:
//!
//! - `settings.json`: one object keyed by setting name
//! - `capture_records.json`: the capture log, newest first
//!
//! Every mutation rewrites its file through a temp file and a rename, so a
//! failed write leaves the previously persisted state intact. In-memory state
//! only changes after the write succeeds. Image files referenced by records
//! are never touched here.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use latchkey_core::{
    CaptureRecord, Identity, IntruderDetectionConfig, LockConfig, LockSet, RecordLog, Secret,
    MAX_RECORDS,
};

use crate::error::{DaemonError, Result};

const SETTINGS_FILE: &str = "settings.json";
const RECORDS_FILE: &str = "capture_records.json";

/// A typed value in the key/value table
pub trait Setting: Serialize + DeserializeOwned + Default {
    /// Key under which the value is stored
    const KEY: &'static str;
}

impl Setting for LockConfig {
    const KEY: &'static str = "lock_config";
}

impl Setting for LockSet {
    const KEY: &'static str = "lock_set";
}

impl Setting for Secret {
    const KEY: &'static str = "secret";
}

impl Setting for IntruderDetectionConfig {
    const KEY: &'static str = "intruder_detection";
}

/// Durable settings plus the retention-capped capture log
pub struct StateStore {
    /// Base path for storage
    dir: PathBuf,

    /// Settings table, keyed by `Setting::KEY`
    settings: RwLock<Map<String, Value>>,

    /// Capture records
    records: Mutex<RecordLog>,
}

impl StateStore {
    /// Open the store under `dir`, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_limit(dir, MAX_RECORDS)
    }

    /// Open with a custom retention limit
    pub fn open_with_limit(dir: impl Into<PathBuf>, limit: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let settings = match read_json::<Map<String, Value>>(&dir.join(SETTINGS_FILE))? {
            Some(map) => map,
            None => Map::new(),
        };

        let rows = read_json::<Vec<CaptureRecord>>(&dir.join(RECORDS_FILE))?.unwrap_or_default();
        let loaded = rows.len();
        let records = RecordLog::from_records(rows, limit);
        if records.len() < loaded {
            info!(
                "Trimmed {} capture records beyond the retention limit",
                loaded - records.len()
            );
        }

        debug!("Opened state store at {:?}", dir);

        Ok(Self {
            dir,
            settings: RwLock::new(settings),
            records: Mutex::new(records),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Read a setting, falling back to its default when never written
    pub fn get<S: Setting>(&self) -> Result<S> {
        let settings = self
            .settings
            .read()
            .map_err(|_| DaemonError::Store("settings lock poisoned".to_string()))?;
        match settings.get(S::KEY) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(S::default()),
        }
    }

    /// Write a setting; last write wins
    pub fn set<S: Setting>(&self, value: &S) -> Result<()> {
        let mut settings = self
            .settings
            .write()
            .map_err(|_| DaemonError::Store("settings lock poisoned".to_string()))?;

        let mut next = settings.clone();
        next.insert(S::KEY.to_string(), serde_json::to_value(value)?);
        write_json_atomic(&self.dir.join(SETTINGS_FILE), &next)?;
        *settings = next;

        debug!("Stored setting {}", S::KEY);
        Ok(())
    }

    /// Read-modify-write a setting under one lock; returns the new value
    pub fn update<S, F, R>(&self, f: F) -> Result<R>
    where
        S: Setting,
        F: FnOnce(&mut S) -> R,
    {
        let mut settings = self
            .settings
            .write()
            .map_err(|_| DaemonError::Store("settings lock poisoned".to_string()))?;

        let mut value: S = match settings.get(S::KEY) {
            Some(raw) => serde_json::from_value(raw.clone())?,
            None => S::default(),
        };
        let result = f(&mut value);

        let mut next = settings.clone();
        next.insert(S::KEY.to_string(), serde_json::to_value(&value)?);
        write_json_atomic(&self.dir.join(SETTINGS_FILE), &next)?;
        *settings = next;

        debug!("Updated setting {}", S::KEY);
        Ok(result)
    }

    // ========================================================================
    // Capture records
    // ========================================================================

    fn records(&self) -> Result<MutexGuard<'_, RecordLog>> {
        self.records
            .lock()
            .map_err(|_| DaemonError::Store("record lock poisoned".to_string()))
    }

    /// Apply `f` to a copy of the log, persist it, then publish it
    fn mutate_records<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut RecordLog) -> R,
    {
        let mut records = self.records()?;
        let mut next = records.clone();
        let result = f(&mut next);
        write_json_atomic(&self.dir.join(RECORDS_FILE), next.list())?;
        *records = next;
        Ok(result)
    }

    /// Insert a record, evicting the oldest rows beyond the limit.
    ///
    /// Returns the evicted rows so the caller can dispose of their images.
    pub fn append(&self, record: CaptureRecord) -> Result<Vec<CaptureRecord>> {
        self.mutate_records(|log| log.append(record))
    }

    /// Build a record with a fresh id and append it
    pub fn record_capture(
        &self,
        subject: Identity,
        image_path: Option<String>,
        attempt_count: u32,
        timestamp: u64,
    ) -> Result<(CaptureRecord, Vec<CaptureRecord>)> {
        self.mutate_records(|log| log.record(subject, image_path, attempt_count, timestamp))
    }

    /// All records, newest first
    pub fn list(&self) -> Result<Vec<CaptureRecord>> {
        Ok(self.records()?.list().to_vec())
    }

    /// Records for one subject, newest first
    pub fn list_for(&self, identity_id: &str) -> Result<Vec<CaptureRecord>> {
        Ok(self.records()?.for_subject(identity_id))
    }

    /// Records captured within `[start_ms, end_ms]`, newest first
    pub fn list_between(&self, start_ms: u64, end_ms: u64) -> Result<Vec<CaptureRecord>> {
        Ok(self.records()?.between(start_ms, end_ms))
    }

    /// Delete one row; its image file is left in place
    pub fn delete(&self, id: u64) -> Result<Option<CaptureRecord>> {
        if self.records()?.get(id).is_none() {
            return Ok(None);
        }
        self.mutate_records(|log| log.remove(id))
    }

    /// Delete every row; image files are left in place
    pub fn delete_all(&self) -> Result<Vec<CaptureRecord>> {
        self.mutate_records(|log| log.clear())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.records()?.len())
    }
}

/// Read and parse a JSON file; a missing file is `None`
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_str(&content)
        .map_err(|e| DaemonError::Store(format!("Corrupt {:?}: {}", path, e)))?;
    Ok(Some(value))
}

/// Write JSON to a temp file and rename it over `path`
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, &content)?;

    // Read/write for owner only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: u64, ts: u64) -> CaptureRecord {
        CaptureRecord {
            id,
            image_path: Some(format!("/photos/{}.jpg", id)),
            subject: Identity::new("com.example.mail", "Mail"),
            timestamp: ts,
            attempt_count: 3,
        }
    }

    #[test]
    fn test_settings_default_when_unset() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();

        assert_eq!(store.get::<LockConfig>().unwrap(), LockConfig::default());
        assert!(store.get::<LockSet>().unwrap().is_empty());
        assert!(!store.get::<Secret>().unwrap().is_set);
        assert_eq!(
            store.get::<IntruderDetectionConfig>().unwrap(),
            IntruderDetectionConfig::default()
        );
    }

    #[test]
    fn test_settings_round_trip_across_reopen() {
        let temp_dir = TempDir::new().unwrap();

        let config = LockConfig {
            enabled: false,
            background_timeout_ms: 45_000,
        };
        let lock_set: LockSet = vec!["com.a".to_string(), "com.b".to_string()]
            .into_iter()
            .collect();
        let secret = Secret::from_hash("$argon2id$v=19$m=64,t=1,p=1$c2FsdA$aGFzaA".to_string());
        let intruder = IntruderDetectionConfig::new(true, 2).unwrap();

        {
            let store = StateStore::open(temp_dir.path()).unwrap();
            store.set(&config).unwrap();
            store.set(&lock_set).unwrap();
            store.set(&secret).unwrap();
            store.set(&intruder).unwrap();
        }

        let store = StateStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get::<LockConfig>().unwrap(), config);
        assert_eq!(store.get::<LockSet>().unwrap(), lock_set);
        assert_eq!(store.get::<Secret>().unwrap(), secret);
        assert_eq!(store.get::<IntruderDetectionConfig>().unwrap(), intruder);
    }

    #[test]
    fn test_update_returns_closure_result() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();

        let added = store.update::<LockSet, _, _>(|set| set.insert("com.a")).unwrap();
        assert!(added);
        let added = store.update::<LockSet, _, _>(|set| set.insert("com.a")).unwrap();
        assert!(!added);
        assert!(store.get::<LockSet>().unwrap().contains("com.a"));
    }

    #[test]
    fn test_append_evicts_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = StateStore::open_with_limit(temp_dir.path(), 2).unwrap();
            assert!(store.append(record(1, 100)).unwrap().is_empty());
            assert!(store.append(record(2, 200)).unwrap().is_empty());
            let evicted = store.append(record(3, 300)).unwrap();
            assert_eq!(evicted.len(), 1);
            assert_eq!(evicted[0].id, 1);
        }

        let store = StateStore::open_with_limit(temp_dir.path(), 2).unwrap();
        let ids: Vec<u64> = store.list().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_delete_leaves_image_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();

        let image = temp_dir.path().join("1.jpg");
        std::fs::write(&image, b"jpeg").unwrap();
        let mut row = record(1, 100);
        row.image_path = Some(image.to_string_lossy().into_owned());
        store.append(row).unwrap();

        let deleted = store.delete(1).unwrap().unwrap();
        assert_eq!(deleted.id, 1);
        assert!(store.delete(1).unwrap().is_none());
        assert!(image.exists());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_all_and_queries() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();

        store.append(record(1, 100)).unwrap();
        let mut other = record(2, 200);
        other.subject = Identity::unlabeled("com.example.chat");
        store.append(other).unwrap();

        assert_eq!(store.list_for("com.example.chat").unwrap().len(), 1);
        assert_eq!(store.list_between(50, 150).unwrap()[0].id, 1);
        assert_eq!(store.delete_all().unwrap().len(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_record_capture_assigns_unique_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();

        let subject = Identity::unlabeled("com.a");
        let (a, _) = store.record_capture(subject.clone(), None, 2, 5_000).unwrap();
        let (b, _) = store.record_capture(subject, None, 3, 5_000).unwrap();
        assert_ne!(a.id, b.id);
        assert!(b.id > a.id);
    }

    #[test]
    fn test_corrupt_settings_is_store_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(SETTINGS_FILE), "{not json").unwrap();
        assert!(matches!(
            StateStore::open(temp_dir.path()),
            Err(DaemonError::Store(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(temp_dir.path()).unwrap();
        store.set(&LockConfig::default()).unwrap();

        let mode = std::fs::metadata(temp_dir.path().join(SETTINGS_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
