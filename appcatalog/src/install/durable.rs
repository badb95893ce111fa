//! Durable string map backing pending installs.
//!
//! Entries must survive a process restart, so every change is written
//! through before the call returns.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::error::{InstallError, InstallResult};
use crate::catalog::write_json_atomic;

/// Persistent string-to-string map.
pub trait DurableMap: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn put(&self, key: &str, value: &str) -> InstallResult<()>;

    /// Remove a key, returning its previous value.
    fn remove(&self, key: &str) -> InstallResult<Option<String>>;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Every entry, ordered by key.
    fn entries(&self) -> Vec<(String, String)>;
}

/// [`DurableMap`] stored as a JSON object, replaced atomically on change.
#[derive(Debug)]
pub struct JsonFileMap {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileMap {
    /// Open the map at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> InstallResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| InstallError::ReadFailed {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str(&content).map_err(|e| InstallError::CorruptStore {
                path: path.clone(),
                reason: e.to_string(),
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Map that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> InstallResult<()> {
        match &self.path {
            Some(path) => write_json_atomic(path, entries).map_err(|e| InstallError::WriteFailed {
                path: path.clone(),
                source: e,
            }),
            None => Ok(()),
        }
    }
}

impl DurableMap for JsonFileMap {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) -> InstallResult<()> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.write(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> InstallResult<Option<String>> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            return Ok(None);
        }
        let mut next = entries.clone();
        let previous = next.remove(key);
        self.write(&next)?;
        *entries = next;
        Ok(previous)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
