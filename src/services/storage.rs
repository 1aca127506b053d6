//! Blob storage for service order media.
//!
//! `S3Storage` talks to AWS S3 or MinIO; `MemoryBlobStore` keeps objects in
//! process for development and tests. Both implement [`BlobStore`].

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::config::StorageSettings;
use crate::error::{AppError, AppResult};

/// A stored object returned by [`BlobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// Final path segment.
    pub name: String,
    pub path: String,
    pub size: u64,
}

/// Path-addressed object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` at `path`. With `overwrite == false` an existing object
    /// makes the call fail with `AppError::Conflict`.
    async fn upload(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
        overwrite: bool,
    ) -> AppResult<()>;

    /// Time-limited GET URL for `path`.
    async fn create_signed_url(&self, path: &str, ttl: Duration) -> AppResult<String>;

    async fn move_object(&self, from: &str, to: &str) -> AppResult<()>;

    async fn remove(&self, paths: &[String]) -> AppResult<()>;

    /// Objects directly under `prefix`.
    async fn list(&self, prefix: &str) -> AppResult<Vec<BlobEntry>>;
}

fn entry_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// S3 storage client wrapper.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3 storage client from configuration.
    pub async fn new(config: &StorageSettings) -> AppResult<Self> {
        let credentials =
            Credentials::new(&config.access_key, &config.secret_key, None, None, "rds");

        let region = Region::new(config.region.clone());

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(region)
            .credentials_provider(credentials)
            .force_path_style(true); // Required for MinIO

        if let Some(ref endpoint) = config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let storage = Self {
            client,
            bucket: config.bucket.clone(),
        };

        storage.ensure_bucket_exists().await?;

        info!("S3 storage initialized: bucket={}", config.bucket);

        Ok(storage)
    }

    /// Ensure the bucket exists, creating it if necessary.
    async fn ensure_bucket_exists(&self) -> AppResult<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("S3 bucket '{}' exists", self.bucket);
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    info!("Creating S3 bucket '{}'", self.bucket);
                    self.client
                        .create_bucket()
                        .bucket(&self.bucket)
                        .send()
                        .await
                        .map_err(|e| {
                            AppError::Storage(format!("Failed to create bucket: {}", e))
                        })?;
                    info!("S3 bucket '{}' created", self.bucket);
                    Ok(())
                } else {
                    Err(AppError::Storage(format!(
                        "Failed to access bucket '{}': {}",
                        self.bucket, service_error
                    )))
                }
            }
        }
    }

    fn copy_source(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, urlencoding::encode(key))
    }
}

/// Map an S3 error code onto the error the media pipeline reports.
fn classify_s3_error(code: Option<&str>, path: &str, fallback: String) -> AppError {
    match code {
        Some("EntityTooLarge") | Some("MaxMessageLengthExceeded") => {
            AppError::PayloadTooLarge(format!("{} exceeds the storage size limit", path))
        }
        Some("PreconditionFailed") | Some("ConditionalRequestConflict") => {
            AppError::Conflict(format!("An object already exists at {}", path))
        }
        _ => AppError::Storage(fallback),
    }
}

#[async_trait]
impl BlobStore for S3Storage {
    async fn upload(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
        overwrite: bool,
    ) -> AppResult<()> {
        let size = data.len();
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(data));

        if !overwrite {
            request = request.if_none_match("*");
        }

        request.send().await.map_err(|e| {
            let code = e.code().map(str::to_string);
            classify_s3_error(
                code.as_deref(),
                path,
                format!("Failed to upload {} to S3: {}", path, e.into_service_error()),
            )
        })?;

        debug!("Uploaded {} ({} bytes, {})", path, size, content_type);
        Ok(())
    }

    async fn create_signed_url(&self, path: &str, ttl: Duration) -> AppResult<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| AppError::Storage(format!("Invalid signed URL lifetime: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to sign {}: {}", path, e)))?;

        Ok(request.uri().to_string())
    }

    async fn move_object(&self, from: &str, to: &str) -> AppResult<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(from))
            .key(to)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.code() == Some("NoSuchKey") {
                    AppError::NotFound(format!("Object {}", from))
                } else {
                    AppError::Storage(format!(
                        "Failed to copy {} to {}: {}",
                        from, to, service_error
                    ))
                }
            })?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(from)
            .send()
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "Copied {} to {} but failed to delete source: {}",
                    from,
                    to,
                    e.into_service_error()
                ))
            })?;

        debug!("Moved {} -> {}", from, to);
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> AppResult<()> {
        for path in paths {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(path)
                .send()
                .await
                .map_err(|e| {
                    AppError::Storage(format!(
                        "Failed to delete {}: {}",
                        path,
                        e.into_service_error()
                    ))
                })?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<BlobEntry>> {
        let prefix = normalize_prefix(prefix);
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/");

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let result = request.send().await.map_err(|e| {
                AppError::Storage(format!(
                    "Failed to list {}: {}",
                    prefix,
                    e.into_service_error()
                ))
            })?;

            for object in result.contents() {
                if let Some(key) = object.key() {
                    entries.push(BlobEntry {
                        name: entry_name(key),
                        path: key.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                    });
                }
            }

            if result.is_truncated().unwrap_or(false) {
                continuation_token = result.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(entries)
    }
}

/// In-process object store.
///
/// Signed URLs carry a sequence number so every call yields a distinct URL.
/// `fail_path` makes every operation touching that path fail, for exercising
/// partial-failure handling.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    failing: Mutex<HashSet<String>>,
    max_object_size: Option<usize>,
    signatures: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject uploads larger than `bytes`, like a provider size limit.
    pub fn with_max_object_size(mut self, bytes: usize) -> Self {
        self.max_object_size = Some(bytes);
        self
    }

    pub fn fail_path(&self, path: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(path.to_string());
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(path))
            .unwrap_or(false)
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects.lock().ok()?.get(path).map(|(_, ct)| ct.clone())
    }

    fn check(&self, path: &str) -> AppResult<()> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| AppError::Storage("Blob store lock poisoned".to_string()))?;
        if failing.contains(path) {
            return Err(AppError::Storage(format!("Injected failure for {}", path)));
        }
        Ok(())
    }

    fn objects(
        &self,
    ) -> AppResult<std::sync::MutexGuard<'_, BTreeMap<String, (Vec<u8>, String)>>> {
        self.objects
            .lock()
            .map_err(|_| AppError::Storage("Blob store lock poisoned".to_string()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
        overwrite: bool,
    ) -> AppResult<()> {
        self.check(path)?;
        if let Some(max) = self.max_object_size
            && data.len() > max
        {
            return Err(classify_s3_error(
                Some("EntityTooLarge"),
                path,
                String::new(),
            ));
        }

        let mut objects = self.objects()?;
        if !overwrite && objects.contains_key(path) {
            return Err(AppError::Conflict(format!(
                "An object already exists at {}",
                path
            )));
        }
        objects.insert(path.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    async fn create_signed_url(&self, path: &str, ttl: Duration) -> AppResult<String> {
        self.check(path)?;
        if !self.objects()?.contains_key(path) {
            return Err(AppError::NotFound(format!("Object {}", path)));
        }
        let signature = self.signatures.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!(
            "memory://media/{}?expires_in={}&sig={}",
            path,
            ttl.as_secs(),
            signature
        ))
    }

    async fn move_object(&self, from: &str, to: &str) -> AppResult<()> {
        self.check(from)?;
        self.check(to)?;
        let mut objects = self.objects()?;
        let object = objects
            .remove(from)
            .ok_or_else(|| AppError::NotFound(format!("Object {}", from)))?;
        objects.insert(to.to_string(), object);
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> AppResult<()> {
        for path in paths {
            self.check(path)?;
        }
        let mut objects = self.objects()?;
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<BlobEntry>> {
        let prefix = normalize_prefix(prefix);
        let objects = self.objects()?;
        Ok(objects
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|(path, (data, _))| BlobEntry {
                name: entry_name(path),
                path: path.clone(),
                size: data.len() as u64,
            })
            .collect())
    }
}
