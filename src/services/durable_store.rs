//! Durable key/value store backing media draft mirrors.
//!
//! Keys are namespaced per form session (`{session}/{name}`) so that closing a
//! session drops every draft it owned with one `clear_namespace` call.
//! Writes are synchronous: once `set` returns the value survives a restart.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// Synchronous key/value contract used by the media draft mirror.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> AppResult<()>;

    fn remove(&self, key: &str);

    /// Remove every key under `{prefix}/`.
    fn clear_namespace(&self, prefix: &str);

    /// Distinct first key segments, i.e. the form sessions holding drafts.
    fn namespaces(&self) -> Vec<String>;
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryDurableStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(entries) => entries.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl DurableStore for MemoryDurableStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Storage("Draft store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    fn clear_namespace(&self, prefix: &str) {
        let namespace = format!("{}/", prefix);
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|key, _| !key.starts_with(&namespace));
        }
    }

    fn namespaces(&self) -> Vec<String> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        entries
            .keys()
            .filter_map(|key| key.split_once('/').map(|(ns, _)| ns.to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// One file per key under a root directory.
///
/// Each key segment is percent-encoded into a path component, so keys can
/// never escape the root. Values are written to a temp file and renamed into
/// place, which keeps a crash from leaving a torn value behind.
pub struct FileDurableStore {
    root: PathBuf,
}

impl FileDurableStore {
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            AppError::Storage(format!(
                "Failed to create draft directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).replace('.', "%2E"))
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

impl DurableStore for FileDurableStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read draft key {}: {}", key, e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Storage(format!("Failed to create draft directory: {}", e))
            })?;
        }

        let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            AppError::Storage(format!("Failed to persist draft key {}: {}", key, e))
        })?;

        debug!("Persisted draft key {} ({} bytes)", key, value.len());
        Ok(())
    }

    fn remove(&self, key: &str) {
        let path = self.path_for(key);
        if let Err(e) = fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove draft key {}: {}", key, e);
        }
    }

    fn clear_namespace(&self, prefix: &str) {
        let dir = self.path_for(prefix);
        if let Err(e) = fs::remove_dir_all(&dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to clear draft namespace {}: {}", prefix, e);
        }
    }

    fn namespaces(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list draft directory {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };
        let mut namespaces: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| {
                let encoded = entry.file_name().into_string().ok()?;
                urlencoding::decode(&encoded).ok().map(|s| s.into_owned())
            })
            .collect();
        namespaces.sort();
        namespaces
    }
}
