//! Draft media list mirrored into a durable store.
//!
//! Every mutation is written through to the store before it returns, so a
//! draft survives the form (or the whole server) going away mid-edit. The
//! mirror always holds exactly the current list.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{MediaFile, OrderSector, merge_by_path};

use super::durable_store::DurableStore;

/// Identifies one media draft: a form session editing one order (or a new one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftKey {
    pub session: String,
    pub sector: OrderSector,
    pub order_id: Option<Uuid>,
}

impl DraftKey {
    pub fn new(session: &str, sector: OrderSector, order_id: Option<Uuid>) -> AppResult<Self> {
        validate_session_id(session)?;
        Ok(Self {
            session: session.to_string(),
            sector,
            order_id,
        })
    }

    /// `{session}/media_files_{sector}_{order id | new}`
    pub fn storage_key(&self) -> String {
        let order = self
            .order_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "new".to_string());
        format!("{}/media_files_{}_{}", self.session, self.sector, order)
    }

    /// Storage prefix new uploads for this draft go to.
    pub fn upload_prefix(&self) -> String {
        match self.order_id {
            Some(id) => self.sector.order_prefix(id),
            None => self.sector.temp_prefix().to_string(),
        }
    }

    fn loaded_key(&self) -> String {
        format!("{}:loaded", self.storage_key())
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.storage_key())
    }
}

/// Key holding the last time (unix millis) any draft of `session` was opened.
pub fn session_activity_key(session: &str) -> String {
    format!("{}/last_active", session)
}

/// When a session last touched any of its drafts. `None` for sessions
/// written before activity was tracked, or with an unreadable marker.
pub fn session_last_active(store: &dyn DurableStore, session: &str) -> Option<i64> {
    store.get(&session_activity_key(session))?.parse().ok()
}

/// Storage paths still under a temp prefix in the new-order drafts of
/// `session`. Nothing saved refers to these.
pub fn session_temp_uploads(store: &dyn DurableStore, session: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for sector in [OrderSector::Phone, OrderSector::Computer] {
        let key = DraftKey {
            session: session.to_string(),
            sector,
            order_id: None,
        };
        let temp = format!("{}/", sector.temp_prefix());
        paths.extend(
            read_mirror(store, &key)
                .into_iter()
                .filter(|f| f.path.starts_with(&temp))
                .map(|f| f.path),
        );
    }
    paths
}

/// Session ids are client-chosen; keep them to a safe charset.
pub fn validate_session_id(session: &str) -> AppResult<()> {
    let valid = !session.is_empty()
        && session.len() <= 128
        && session
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(
            "Session id must be 1-128 characters of [A-Za-z0-9_-]".to_string(),
        ))
    }
}

/// The media list of one draft, mirrored into a [`DurableStore`].
pub struct PersistedMediaSet {
    store: Arc<dyn DurableStore>,
    key: DraftKey,
    files: Vec<MediaFile>,
    loaded_from_db: bool,
}

impl PersistedMediaSet {
    /// Open a draft, restoring whatever the mirror holds, and mark it active.
    pub fn open(store: Arc<dyn DurableStore>, key: DraftKey) -> AppResult<Self> {
        let files = read_mirror(store.as_ref(), &key);
        let loaded_from_db = store.get(&key.loaded_key()).is_some();
        store.set(
            &session_activity_key(&key.session),
            &Utc::now().timestamp_millis().to_string(),
        )?;
        store.set(&key.active_key(), "1")?;

        debug!(
            "Opened media draft {} ({} files, loaded_from_db={})",
            key.storage_key(),
            files.len(),
            loaded_from_db
        );

        Ok(Self {
            store,
            key,
            files,
            loaded_from_db,
        })
    }

    /// Whether a draft is still open. Uploads finishing after the draft was
    /// cleared must not be applied.
    pub fn is_active(store: &dyn DurableStore, key: &DraftKey) -> bool {
        store.get(&key.active_key()).is_some()
    }

    pub fn key(&self) -> &DraftKey {
        &self.key
    }

    pub fn files(&self) -> &[MediaFile] {
        &self.files
    }

    pub fn into_files(self) -> Vec<MediaFile> {
        self.files
    }

    pub fn loaded_from_db(&self) -> bool {
        self.loaded_from_db
    }

    /// Adopt the authoritative list, keeping locally added files the server
    /// does not know about yet.
    pub fn set_from_db(&mut self, server_files: Vec<MediaFile>) -> AppResult<()> {
        let local = read_mirror(self.store.as_ref(), &self.key);
        let mut merged = server_files;
        merge_by_path(&mut merged, local);

        self.write(merged)?;
        self.store.set(&self.key.loaded_key(), "1")?;
        self.loaded_from_db = true;
        Ok(())
    }

    /// Append files, deduplicated by path.
    pub fn add(&mut self, files: Vec<MediaFile>) -> AppResult<()> {
        // Re-read so writes from a concurrent request on the same draft survive.
        let mut current = read_mirror(self.store.as_ref(), &self.key);
        merge_by_path(&mut current, files);
        self.write(current)
    }

    /// Drop the file at `path`. Returns whether it was present.
    pub fn remove(&mut self, path: &str) -> AppResult<bool> {
        let mut current = read_mirror(self.store.as_ref(), &self.key);
        let before = current.len();
        current.retain(|f| f.path != path);
        let removed = current.len() != before;
        self.write(current)?;
        Ok(removed)
    }

    /// Replace URLs for matching paths, leaving membership untouched.
    pub fn update_urls(&mut self, refreshed: &[MediaFile]) -> AppResult<()> {
        let mut current = read_mirror(self.store.as_ref(), &self.key);
        for file in current.iter_mut() {
            if let Some(fresh) = refreshed.iter().find(|f| f.path == file.path) {
                file.url = fresh.url.clone();
            }
        }
        self.write(current)
    }

    /// Forget the draft entirely. Called after a confirmed save.
    pub fn clear(self) {
        clear_draft(self.store.as_ref(), &self.key);
    }

    fn write(&mut self, files: Vec<MediaFile>) -> AppResult<()> {
        let json = serde_json::to_string(&files)
            .map_err(|e| AppError::Storage(format!("Failed to encode media draft: {}", e)))?;
        self.store.set(&self.key.storage_key(), &json)?;
        self.files = files;
        Ok(())
    }
}

/// Remove a draft's mirror, loaded flag and active marker.
pub fn clear_draft(store: &dyn DurableStore, key: &DraftKey) {
    store.remove(&key.storage_key());
    store.remove(&key.loaded_key());
    store.remove(&key.active_key());
    debug!("Cleared media draft {}", key.storage_key());
}

fn read_mirror(store: &dyn DurableStore, key: &DraftKey) -> Vec<MediaFile> {
    let Some(raw) = store.get(&key.storage_key()) else {
        return Vec::new();
    };
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => MediaFile::list_from_json(Some(&value)),
        Err(e) => {
            warn!(
                "Discarding unreadable media draft {}: {}",
                key.storage_key(),
                e
            );
            Vec::new()
        }
    }
}
