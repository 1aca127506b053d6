//! Media normalization: classify, transcode, resize and re-encode uploads.
//!
//! Images (including HEIC/HEIF after transcoding) are bounded to 2560px on
//! both axes and re-encoded as JPEG at quality 92. Videos are never
//! re-encoded; they are size-checked and get a usable MIME type.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::models::MediaKind;

/// Longest allowed edge of a stored image.
pub const MAX_IMAGE_DIMENSION: u32 = 2560;

/// JPEG quality used for every stored image.
pub const JPEG_QUALITY: u8 = 92;

/// Largest accepted video.
pub const MAX_VIDEO_MB: u64 = 5000;
pub const MAX_VIDEO_BYTES: u64 = MAX_VIDEO_MB * 1024 * 1024;

const GENERIC_MIME_TYPES: &[&str] = &["", "application/octet-stream", "binary/octet-stream"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"];
const HEIC_EXTENSIONS: &[&str] = &["heic", "heif"];
const HEIC_MIME_TYPES: &[&str] = &[
    "image/heic",
    "image/heif",
    "image/heic-sequence",
    "image/heif-sequence",
];
const VIDEO_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("3gp", "video/3gpp"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
    ("m4v", "video/x-m4v"),
];

/// Per-file normalization failures. Every variant names the file.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{name}: unsupported file type (accepted: images, HEIC/HEIF photos, videos)")]
    Unsupported { name: String },

    #[error("{name}: video is larger than the {limit_mb} MB limit")]
    VideoTooLarge { name: String, limit_mb: u64 },

    #[error("{name}: HEIC conversion failed: {reason}")]
    HeicTranscode { name: String, reason: String },

    #[error("{name}: could not decode image: {reason}")]
    Decode { name: String, reason: String },

    #[error("{name}: could not encode image: {reason}")]
    Encode { name: String, reason: String },
}

/// An uploaded file before normalization.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
    /// Size as reported by the client; equals `data.len()` unless overridden.
    pub size: u64,
}

impl RawFile {
    pub fn new(name: impl Into<String>, content_type: Option<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            name: name.into(),
            content_type,
            data,
            size,
        }
    }
}

/// A normalized file ready for upload.
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub name: String,
    pub content_type: String,
    /// Extension used for the stored object, without the dot.
    pub extension: String,
    pub kind: MediaKind,
    pub data: Vec<u8>,
}

/// How a raw file will be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Heic,
    Image,
    Video,
}

/// Coarse progress milestones reported while normalizing an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeStage {
    DecodeStarted,
    Decoded,
    Resizing,
    Encoding,
    Done,
}

impl NormalizeStage {
    pub fn percent(&self) -> u8 {
        match self {
            Self::DecodeStarted => 10,
            Self::Decoded => 40,
            Self::Resizing => 60,
            Self::Encoding => 80,
            Self::Done => 100,
        }
    }
}

/// Whether this build can decode HEIC/HEIF uploads.
pub const HEIC_SUPPORTED: bool = cfg!(feature = "heic");

/// Decodes HEIC/HEIF containers.
pub trait HeicTranscoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, String>;
}

/// Used when the server is built without HEIC support.
pub struct UnavailableHeicTranscoder;

impl HeicTranscoder for UnavailableHeicTranscoder {
    fn decode(&self, _data: &[u8]) -> Result<DynamicImage, String> {
        Err("HEIC support is not enabled on this server".to_string())
    }
}

#[cfg(feature = "heic")]
pub use libheif::LibheifTranscoder;

#[cfg(feature = "heic")]
mod libheif {
    use image::{DynamicImage, RgbImage};
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    use super::HeicTranscoder;

    /// HEIC decoding through the system libheif.
    pub struct LibheifTranscoder;

    impl HeicTranscoder for LibheifTranscoder {
        fn decode(&self, data: &[u8]) -> Result<DynamicImage, String> {
            let lib_heif = LibHeif::new();
            let ctx = HeifContext::read_from_bytes(data).map_err(|e| e.to_string())?;
            let handle = ctx.primary_image_handle().map_err(|e| e.to_string())?;
            let image = lib_heif
                .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
                .map_err(|e| e.to_string())?;

            let planes = image.planes();
            let plane = planes
                .interleaved
                .ok_or_else(|| "decoded image has no interleaved plane".to_string())?;

            let (width, height) = (plane.width, plane.height);
            let row_bytes = width as usize * 3;
            let mut pixels = Vec::with_capacity(row_bytes * height as usize);
            for row in plane.data.chunks(plane.stride).take(height as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }

            RgbImage::from_raw(width, height, pixels)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| "decoded buffer does not match image size".to_string())
        }
    }

}

/// Transcoder matching the compiled feature set.
pub fn default_transcoder() -> std::sync::Arc<dyn HeicTranscoder> {
    #[cfg(feature = "heic")]
    {
        std::sync::Arc::new(LibheifTranscoder)
    }
    #[cfg(not(feature = "heic"))]
    {
        std::sync::Arc::new(UnavailableHeicTranscoder)
    }
}

/// Lowercased extension of `name`, if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

pub fn is_generic_mime(content_type: Option<&str>) -> bool {
    let mime = content_type.unwrap_or("").trim().to_lowercase();
    GENERIC_MIME_TYPES.contains(&mime.as_str())
}

/// MIME type for a known video extension.
pub fn video_mime_for_extension(ext: &str) -> Option<&'static str> {
    VIDEO_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

fn video_extension_for_mime(mime: &str) -> Option<&'static str> {
    VIDEO_TYPES.iter().find(|(_, m)| *m == mime).map(|(e, _)| *e)
}

/// Media kind guessed from the extension alone.
pub fn kind_from_extension(name: &str) -> MediaKind {
    match extension_of(name) {
        Some(ext) if video_mime_for_extension(&ext).is_some() => MediaKind::Video,
        _ => MediaKind::Image,
    }
}

/// Classify by MIME type first, then by extension.
pub fn classify(name: &str, content_type: Option<&str>) -> Option<MediaClass> {
    let mime = content_type.unwrap_or("").trim().to_lowercase();

    if HEIC_MIME_TYPES.contains(&mime.as_str()) {
        return Some(MediaClass::Heic);
    }

    let ext = extension_of(name);
    let ext = ext.as_deref();

    if mime.starts_with("image/") {
        // Some browsers label HEIC captures as image/jpeg; trust the container name.
        if ext.is_some_and(|e| HEIC_EXTENSIONS.contains(&e)) {
            return Some(MediaClass::Heic);
        }
        return Some(MediaClass::Image);
    }
    if mime.starts_with("video/") {
        return Some(MediaClass::Video);
    }

    match ext {
        Some(e) if HEIC_EXTENSIONS.contains(&e) => Some(MediaClass::Heic),
        Some(e) if IMAGE_EXTENSIONS.contains(&e) => Some(MediaClass::Image),
        Some(e) if video_mime_for_extension(e).is_some() => Some(MediaClass::Video),
        _ => None,
    }
}

/// Aspect-preserving size that fits within `max` on both axes.
pub fn target_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = f64::from(max) / f64::from(width.max(height));
    let scaled = |v: u32| ((f64::from(v) * scale).round() as u32).clamp(1, max);
    (scaled(width), scaled(height))
}

fn with_extension(name: &str, ext: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("file");
    format!("{}.{}", stem, ext)
}

/// Normalize a file without progress reporting.
pub fn normalize(raw: RawFile, heic: &dyn HeicTranscoder) -> Result<ProcessedFile, MediaError> {
    normalize_with_progress(raw, heic, &mut |_| {})
}

/// Normalize a file, reporting image milestones to `progress`.
///
/// CPU bound; async callers should run it on a blocking thread.
pub fn normalize_with_progress(
    raw: RawFile,
    heic: &dyn HeicTranscoder,
    progress: &mut dyn FnMut(NormalizeStage),
) -> Result<ProcessedFile, MediaError> {
    let class = classify(&raw.name, raw.content_type.as_deref()).ok_or_else(|| {
        MediaError::Unsupported {
            name: raw.name.clone(),
        }
    })?;

    match class {
        MediaClass::Video => prepare_video(raw),
        MediaClass::Image | MediaClass::Heic => {
            progress(NormalizeStage::DecodeStarted);
            let decoded = if class == MediaClass::Heic {
                heic.decode(&raw.data)
                    .map_err(|reason| MediaError::HeicTranscode {
                        name: raw.name.clone(),
                        reason,
                    })?
            } else {
                decode_image(&raw.name, &raw.data)?
            };
            progress(NormalizeStage::Decoded);
            let processed = compress_image(&raw.name, decoded, progress)?;
            progress(NormalizeStage::Done);
            Ok(processed)
        }
    }
}

fn decode_image(name: &str, data: &[u8]) -> Result<DynamicImage, MediaError> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| MediaError::Decode {
            name: name.to_string(),
            reason: e.to_string(),
        })?
        .decode()
        .map_err(|e| MediaError::Decode {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

fn compress_image(
    name: &str,
    image: DynamicImage,
    progress: &mut dyn FnMut(NormalizeStage),
) -> Result<ProcessedFile, MediaError> {
    progress(NormalizeStage::Resizing);
    let (width, height) = target_dimensions(image.width(), image.height(), MAX_IMAGE_DIMENSION);
    let image = if (width, height) == (image.width(), image.height()) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Lanczos3)
    };

    progress(NormalizeStage::Encoding);
    let mut data = Vec::new();
    image
        .to_rgb8()
        .write_with_encoder(JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY))
        .map_err(|e| MediaError::Encode {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    Ok(ProcessedFile {
        name: with_extension(name, "jpg"),
        content_type: "image/jpeg".to_string(),
        extension: "jpg".to_string(),
        kind: MediaKind::Image,
        data,
    })
}

/// Validate a video and fix up its MIME type. Content is passed through.
pub fn prepare_video(raw: RawFile) -> Result<ProcessedFile, MediaError> {
    if raw.size > MAX_VIDEO_BYTES {
        return Err(MediaError::VideoTooLarge {
            name: raw.name,
            limit_mb: MAX_VIDEO_MB,
        });
    }

    let ext = extension_of(&raw.name);
    let declared = raw
        .content_type
        .as_deref()
        .map(|ct| ct.trim().to_lowercase())
        .filter(|ct| !is_generic_mime(Some(ct)));

    let content_type = match (declared, ext.as_deref().and_then(video_mime_for_extension)) {
        (Some(declared), _) => declared,
        (None, Some(inferred)) => inferred.to_string(),
        (None, None) => {
            return Err(MediaError::Unsupported { name: raw.name });
        }
    };

    let extension = ext
        .filter(|e| video_mime_for_extension(e).is_some())
        .or_else(|| video_extension_for_mime(&content_type).map(str::to_string))
        .unwrap_or_else(|| "mp4".to_string());

    Ok(ProcessedFile {
        name: raw.name,
        content_type,
        extension,
        kind: MediaKind::Video,
        data: raw.data,
    })
}
