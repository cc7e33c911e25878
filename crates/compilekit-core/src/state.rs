//! Small persisted key/value store for cached versions, locks and status flags.
//!
//! Entries may carry an expiry; expired entries read as absent.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CompileKitError, Result};

/// Cached `tailwindcli --version` result
pub const STANDALONE_VERSION_KEY: &str = "standalone_cli_version";
/// Cached version of the installed `tailwindcss` npm package
pub const NODE_VERSION_KEY: &str = "tailwindcss_cli_version";

/// Per-actor debounce lock key
pub fn compile_lock_key(actor: &str) -> String {
    format!("compile_lock_{actor}")
}

/// Per-actor compilation status key
pub fn compilation_status_key(actor: &str) -> String {
    format!("compilation_status_{actor}")
}

/// Key/value storage with optional time-to-live
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        let expires_at = ttl
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|d| Utc::now() + d);
        Entry {
            value: value.to_string(),
            expires_at,
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(Utc::now()) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.lock().insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// JSON file backed store
///
/// The file is re-read on every access so separate processes see each
/// other's writes; a mutex serializes access within this process.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStateStore {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, Entry>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(CompileKitError::Io(format!(
                "Failed to read state file {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Replace the state file atomically: write a sibling temp file, then rename.
    fn write_all(&self, entries: &HashMap<String, Entry>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let raw = serde_json::to_string_pretty(entries)?;
        let write_err = |e: std::io::Error| {
            CompileKitError::Io(format!(
                "Failed to write state file {}: {e}",
                self.path.display()
            ))
        };
        let mut temp = tempfile::Builder::new()
            .prefix(".compilekit-state-")
            .tempfile_in(dir)
            .map_err(write_err)?;
        temp.write_all(raw.as_bytes()).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> Result<T> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.read_all()?;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let pruned = entries.len() != before;

        let snapshot = entries.clone();
        let out = f(&mut entries);
        if pruned || snapshot != entries {
            self.write_all(&entries)?;
        }
        Ok(out)
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.modify(|entries| entries.get(key).map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        debug!("State set {} (ttl {:?})", key, ttl);
        self.modify(|entries| {
            entries.insert(key.to_string(), Entry::new(value, ttl));
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_basic() {
        let store = MemoryStateStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v", None).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_memory_store_expiry() {
        let store = MemoryStateStore::new();
        store.set("lock", "1", Some(Duration::from_millis(20))).unwrap();
        assert!(store.get("lock").unwrap().is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(store.get("lock").unwrap().is_none());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/state.json");

        FileStateStore::new(&path)
            .set(STANDALONE_VERSION_KEY, "v4.1.0", None)
            .unwrap();

        let reopened = FileStateStore::new(&path);
        assert_eq!(
            reopened.get(STANDALONE_VERSION_KEY).unwrap().as_deref(),
            Some("v4.1.0")
        );
    }

    #[test]
    fn test_file_store_prunes_expired() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));

        store.set("short", "1", Some(Duration::from_millis(10))).unwrap();
        store.set("long", "2", None).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.get("short").unwrap(), None);
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("short"));
        assert!(raw.contains("long"));
    }

    #[test]
    fn test_file_store_rewrite_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));

        store.set("a", "1", None).unwrap();
        store.set("b", "2", None).unwrap();
        store.delete("a").unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json"]);
        let parsed: HashMap<String, serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_file_store_missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get("anything").unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_keys_are_actor_scoped() {
        assert_eq!(compile_lock_key("7"), "compile_lock_7");
        assert_eq!(compilation_status_key("7"), "compilation_status_7");
    }
}
