//! Orchestrates normalization, blob storage and draft mirroring for order media.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{MediaFile, OrderSector};

use super::durable_store::DurableStore;
use super::media::{self, HeicTranscoder, ProcessedFile, RawFile};
use super::media_set::{
    DraftKey, PersistedMediaSet, clear_draft, session_last_active, session_temp_uploads,
};
use super::storage::BlobStore;

/// A file from a batch that could not be stored.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FileFailure {
    pub name: String,
    pub message: String,
}

/// Result of processing one batch of uploads.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchReport {
    /// Files stored by this batch.
    pub uploaded: Vec<MediaFile>,
    pub failed: Vec<FileFailure>,
    /// The draft's full list after the batch.
    pub files: Vec<MediaFile>,
}

/// Media handling for service order drafts.
pub struct MediaPipeline {
    blobs: Arc<dyn BlobStore>,
    drafts: Arc<dyn DurableStore>,
    heic: Arc<dyn HeicTranscoder>,
    signed_url_ttl: Duration,
}

impl MediaPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        drafts: Arc<dyn DurableStore>,
        heic: Arc<dyn HeicTranscoder>,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            blobs,
            drafts,
            heic,
            signed_url_ttl,
        }
    }

    pub fn drafts(&self) -> &Arc<dyn DurableStore> {
        &self.drafts
    }

    /// Open a draft, loading the server list once for existing orders.
    ///
    /// Files restored from the mirror may carry expired URLs, so they are
    /// re-signed before being returned.
    pub async fn load_draft(
        &self,
        key: DraftKey,
        server_files: Option<Vec<MediaFile>>,
    ) -> AppResult<Vec<MediaFile>> {
        let mut set = PersistedMediaSet::open(self.drafts.clone(), key)?;
        let restored_from_mirror = !set.files().is_empty();

        if let Some(server_files) = server_files
            && !set.loaded_from_db()
        {
            set.set_from_db(server_files)?;
        }

        if restored_from_mirror || set.loaded_from_db() {
            let refreshed = self.refresh_signed_urls(set.files().to_vec()).await;
            set.update_urls(&refreshed)?;
        }

        Ok(set.into_files())
    }

    /// Current draft contents without touching the server.
    pub fn draft_files(&self, key: DraftKey) -> AppResult<Vec<MediaFile>> {
        Ok(PersistedMediaSet::open(self.drafts.clone(), key)?.into_files())
    }

    /// Draft contents and whether the saved list was ever merged into them.
    pub fn draft_snapshot(&self, key: DraftKey) -> AppResult<(Vec<MediaFile>, bool)> {
        let set = PersistedMediaSet::open(self.drafts.clone(), key)?;
        let loaded = set.loaded_from_db();
        Ok((set.into_files(), loaded))
    }

    /// Normalize a file on a blocking thread.
    pub async fn normalize(&self, raw: RawFile) -> AppResult<ProcessedFile> {
        let heic = self.heic.clone();
        let name = raw.name.clone();
        let processed = tokio::task::spawn_blocking(move || media::normalize(raw, heic.as_ref()))
            .await
            .map_err(|e| AppError::Storage(format!("Normalization of {} panicked: {}", name, e)))??;
        Ok(processed)
    }

    /// Store a processed file under `prefix` and sign it.
    ///
    /// Uploads never overwrite: a name collision fails instead of replacing
    /// an existing object.
    pub async fn upload(&self, file: ProcessedFile, prefix: &str) -> AppResult<MediaFile> {
        let path = format!(
            "{}/{}",
            prefix.trim_end_matches('/'),
            unique_file_name(&file.extension)
        );

        self.blobs
            .upload(&path, file.data, &file.content_type, false)
            .await
            .map_err(|e| match e {
                AppError::PayloadTooLarge(_) => AppError::PayloadTooLarge(format!(
                    "{} exceeds the storage size limit",
                    file.name
                )),
                AppError::Storage(msg) => {
                    AppError::Storage(format!("Failed to upload {}: {}", file.name, msg))
                }
                other => other,
            })?;

        let url = self
            .blobs
            .create_signed_url(&path, self.signed_url_ttl)
            .await?;

        Ok(MediaFile {
            url,
            path,
            kind: file.kind,
            name: file.name,
        })
    }

    /// Normalize and upload one file into the draft's storage prefix.
    pub async fn process_file(&self, raw: RawFile, prefix: &str) -> AppResult<MediaFile> {
        let processed = self.normalize(raw).await?;
        self.upload(processed, prefix).await
    }

    /// Start an upload batch into a draft.
    pub fn begin_batch(&self, key: DraftKey) -> AppResult<DraftBatch<'_>> {
        Ok(DraftBatch {
            prefix: key.upload_prefix(),
            set: PersistedMediaSet::open(self.drafts.clone(), key)?,
            pipeline: self,
            uploaded: Vec::new(),
            failed: Vec::new(),
        })
    }

    /// Process already-read files as one batch.
    pub async fn process_batch(&self, key: DraftKey, files: Vec<RawFile>) -> AppResult<BatchReport> {
        let mut batch = self.begin_batch(key)?;
        for raw in files {
            batch.push(raw).await?;
        }
        Ok(batch.finish())
    }

    /// Delete the blob first, then drop it from the draft. If the blob
    /// cannot be deleted the list is left as it was.
    pub async fn remove_file(&self, key: DraftKey, path: &str) -> AppResult<Vec<MediaFile>> {
        let mut set = PersistedMediaSet::open(self.drafts.clone(), key)?;
        if !set.files().iter().any(|f| f.path == path) {
            return Err(AppError::NotFound(format!("Media file {}", path)));
        }

        self.blobs.remove(&[path.to_string()]).await?;
        set.remove(path)?;
        info!("Removed media file {}", path);

        Ok(set.into_files())
    }

    /// Re-sign every file. Files that fail to sign keep their old URL.
    pub async fn refresh_signed_urls(&self, files: Vec<MediaFile>) -> Vec<MediaFile> {
        let mut refreshed = Vec::with_capacity(files.len());
        for mut file in files {
            match self
                .blobs
                .create_signed_url(&file.path, self.signed_url_ttl)
                .await
            {
                Ok(url) => file.url = url,
                Err(e) => warn!("Keeping stale URL for {}: {}", file.path, e),
            }
            refreshed.push(file);
        }
        refreshed
    }

    /// Move temp uploads under the new order's prefix.
    ///
    /// Files that fail to move stay at their temp path and are logged for
    /// reconciliation; this never fails the save.
    pub async fn relocate_on_first_save(
        &self,
        files: Vec<MediaFile>,
        sector: OrderSector,
        order_id: Uuid,
    ) -> Vec<MediaFile> {
        let temp_prefix = format!("{}/", sector.temp_prefix());
        let order_prefix = sector.order_prefix(order_id);
        let mut relocated = Vec::with_capacity(files.len());

        for mut file in files {
            if !file.path.starts_with(&temp_prefix) {
                relocated.push(file);
                continue;
            }

            let new_path = format!("{}/{}", order_prefix, file.file_name());
            if let Err(e) = self.blobs.move_object(&file.path, &new_path).await {
                error!(
                    "Failed to relocate {} for order {}: {}; keeping temp path",
                    file.path, order_id, e
                );
                relocated.push(file);
                continue;
            }

            match self
                .blobs
                .create_signed_url(&new_path, self.signed_url_ttl)
                .await
            {
                Ok(url) => file.url = url,
                Err(e) => warn!("Relocated {} but could not sign it: {}", new_path, e),
            }
            file.path = new_path;
            relocated.push(file);
        }

        relocated
    }

    /// Rebuild an order's media list from storage when its column was lost.
    ///
    /// Classification here is by extension only.
    pub async fn list_order_files(
        &self,
        sector: OrderSector,
        order_id: Uuid,
    ) -> AppResult<Vec<MediaFile>> {
        let entries = self.blobs.list(&sector.order_prefix(order_id)).await?;
        let mut files = Vec::with_capacity(entries.len());

        for entry in entries {
            let url = match self
                .blobs
                .create_signed_url(&entry.path, self.signed_url_ttl)
                .await
            {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping unsignable object {}: {}", entry.path, e);
                    continue;
                }
            };
            files.push(MediaFile {
                url,
                kind: media::kind_from_extension(&entry.name),
                name: entry.name,
                path: entry.path,
            });
        }

        if !files.is_empty() {
            info!(
                "Recovered {} media files for order {} from storage",
                files.len(),
                order_id
            );
        }
        Ok(files)
    }

    /// Forget a draft after its order was saved.
    pub fn clear_draft(&self, key: &DraftKey) {
        clear_draft(self.drafts.as_ref(), key);
    }

    /// Forget every draft of a form session and delete the temp uploads
    /// its unsaved new orders held.
    pub async fn close_session(&self, session: &str) {
        let removed = self.discard_session(session).await;
        info!(
            "Closed media session {} ({} temp uploads removed)",
            session, removed
        );
    }

    /// Discard every session whose drafts were last opened more than
    /// `max_idle` ago. Returns how many sessions were dropped.
    pub async fn expire_idle_sessions(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now()
            .timestamp_millis()
            .saturating_sub(i64::try_from(max_idle.as_millis()).unwrap_or(i64::MAX));
        let mut expired = 0;

        for session in self.drafts.namespaces() {
            let idle = match session_last_active(self.drafts.as_ref(), &session) {
                Some(at) => at < cutoff,
                None => true,
            };
            if !idle {
                continue;
            }
            let removed = self.discard_session(&session).await;
            debug!(
                "Expired idle media session {} ({} temp uploads removed)",
                session, removed
            );
            expired += 1;
        }

        if expired > 0 {
            info!("Expired {} idle media sessions", expired);
        }
        expired
    }

    /// Delete the session's temp uploads, then its drafts. Blobs that
    /// fail to delete are logged and left behind.
    async fn discard_session(&self, session: &str) -> usize {
        let temp = session_temp_uploads(self.drafts.as_ref(), session);
        let mut removed = 0;
        if !temp.is_empty() {
            match self.blobs.remove(&temp).await {
                Ok(()) => removed = temp.len(),
                Err(e) => warn!(
                    "Failed to remove temp uploads of session {}: {}",
                    session, e
                ),
            }
        }
        self.drafts.clear_namespace(session);
        removed
    }
}

/// Uploads into one draft, one file at a time.
///
/// Each pushed file is normalized, stored and mirrored before `push`
/// returns. Per-file failures are collected and do not stop the batch;
/// only a failed mirror write does.
pub struct DraftBatch<'a> {
    pipeline: &'a MediaPipeline,
    prefix: String,
    set: PersistedMediaSet,
    uploaded: Vec<MediaFile>,
    failed: Vec<FileFailure>,
}

impl DraftBatch<'_> {
    pub async fn push(&mut self, raw: RawFile) -> AppResult<()> {
        let name = raw.name.clone();
        let file = match self.pipeline.process_file(raw, &self.prefix).await {
            Ok(file) => file,
            Err(e) => {
                warn!("Media upload failed for {}: {}", name, e);
                self.reject(name, e.to_string());
                return Ok(());
            }
        };

        if !PersistedMediaSet::is_active(self.pipeline.drafts.as_ref(), self.set.key()) {
            warn!(
                "Draft {} closed while {} was uploading; removing orphan {}",
                self.set.key().storage_key(),
                name,
                file.path
            );
            if let Err(e) = self
                .pipeline
                .blobs
                .remove(std::slice::from_ref(&file.path))
                .await
            {
                error!("Failed to remove orphaned upload {}: {}", file.path, e);
            }
            self.reject(name, "Draft was closed before the upload finished".to_string());
            return Ok(());
        }

        self.set.add(vec![file.clone()])?;
        self.uploaded.push(file);
        Ok(())
    }

    /// Record a file that was refused before processing.
    pub fn reject(&mut self, name: String, message: String) {
        self.failed.push(FileFailure { name, message });
    }

    pub fn finish(self) -> BatchReport {
        info!(
            "Media batch for {}: {} uploaded, {} failed",
            self.set.key().storage_key(),
            self.uploaded.len(),
            self.failed.len()
        );
        BatchReport {
            uploaded: self.uploaded,
            failed: self.failed,
            files: self.set.into_files(),
        }
    }
}

/// `{unix millis}_{10 random alphanumerics}.{ext}`
fn unique_file_name(extension: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!(
        "{}_{}.{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase(),
        extension
    )
}
