//! Media attachment models (stored as JSONB on the service order).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

/// Kind of attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// A photo or video attached to a service order.
///
/// `path` is the durable identity of the object. `url` is a signed URL that
/// expires and must be re-derived from `path` before it is shown again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MediaFile {
    pub url: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub name: String,
}

impl MediaFile {
    /// Decode the `media_files` column, skipping entries that do not parse.
    pub fn list_from_json(value: Option<&JsonValue>) -> Vec<MediaFile> {
        let Some(JsonValue::Array(items)) = value else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| match serde_json::from_value::<MediaFile>(item.clone()) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!("Skipping malformed media_files entry: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Encode a list for the `media_files` column.
    pub fn list_to_json(files: &[MediaFile]) -> JsonValue {
        serde_json::to_value(files).unwrap_or_else(|_| JsonValue::Array(Vec::new()))
    }

    /// Final path segment (the stored file name).
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Append `extra` to `base`, skipping any entry whose path is already present.
pub fn merge_by_path(base: &mut Vec<MediaFile>, extra: impl IntoIterator<Item = MediaFile>) {
    for file in extra {
        if !base.iter().any(|f| f.path == file.path) {
            base.push(file);
        }
    }
}
