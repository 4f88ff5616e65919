//! Media storage collaborator.
//!
//! The chat core treats media handling as an external service: it hands over
//! raw bytes plus a mimetype and gets back a URL and a media kind. The default
//! implementation writes files under `{data_dir}/media` and serves them from a
//! configurable URL prefix. Transcoding, CDNs and cleanup are not this
//! server's problem.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::MediaConfig;
use crate::error::ApiError;

/// Mimetypes accepted as pictures.
pub const ALLOWED_PICTURE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Mimetypes accepted as videos.
pub const ALLOWED_VIDEO_TYPES: &[&str] = &["video/mp4", "video/webm", "video/quicktime"];

/// What a stored file is, as reported back to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
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

/// Classify a mimetype against the allow-lists.
pub fn media_kind_for_mime(mime_type: &str) -> Option<MediaKind> {
    if ALLOWED_PICTURE_TYPES.contains(&mime_type) {
        Some(MediaKind::Image)
    } else if ALLOWED_VIDEO_TYPES.contains(&mime_type) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Media attachment as carried on the wire (socket events and JSON bodies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded file bytes
    pub data: String,
    pub mime_type: String,
}

/// Decoded and validated media, ready for upload.
#[derive(Debug)]
pub struct ValidatedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub kind: MediaKind,
}

/// Decode and validate a media payload: base64, mimetype allow-list, size cap.
/// All failures here are validation errors — nothing has been uploaded yet.
pub fn validate_media(payload: &MediaPayload, max_upload_size_mb: u32) -> Result<ValidatedMedia, ApiError> {
    let kind = media_kind_for_mime(&payload.mime_type)
        .ok_or_else(|| ApiError::Validation("Unsupported media type".to_string()))?;

    let bytes = STANDARD
        .decode(&payload.data)
        .map_err(|_| ApiError::Validation("Media data is not valid base64".to_string()))?;

    let max_bytes = max_upload_size_mb as usize * 1024 * 1024;
    if bytes.len() > max_bytes {
        return Err(ApiError::Validation(format!(
            "Media exceeds maximum size of {} MB",
            max_upload_size_mb
        )));
    }

    Ok(ValidatedMedia {
        bytes,
        mime_type: payload.mime_type.clone(),
        kind,
    })
}

/// Transport/quota failure from the media store. When this is returned,
/// nothing has been persisted on the message/status side.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UploadError(pub String);

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        ApiError::Upload(e.0)
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub url: String,
    pub kind: MediaKind,
}

/// External media storage. Implementations must be callable from
/// spawn_blocking contexts (the default one does blocking file I/O).
pub trait MediaStore: Send + Sync {
    /// Store `media` under the deterministic key `<kind>_<owner_id>_<entity_id>`.
    fn upload(
        &self,
        media: &ValidatedMedia,
        kind: &str,
        owner_id: &str,
        entity_id: &str,
    ) -> Result<UploadedMedia, UploadError>;
}

/// Disk-backed media store: one file per upload under `{data_dir}/media`.
pub struct LocalMediaStore {
    media_dir: PathBuf,
    base_url: String,
}

impl LocalMediaStore {
    pub fn new(data_dir: &str, config: &MediaConfig) -> Self {
        Self {
            media_dir: Path::new(data_dir).join("media"),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn file_name(kind: &str, owner_id: &str, entity_id: &str, mime_type: &str) -> String {
        let ext = match mime_type {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "video/mp4" => "mp4",
            "video/webm" => "webm",
            "video/quicktime" => "mov",
            _ => "bin",
        };
        format!("{}_{}_{}.{}", kind, owner_id, entity_id, ext)
    }
}

impl MediaStore for LocalMediaStore {
    fn upload(
        &self,
        media: &ValidatedMedia,
        kind: &str,
        owner_id: &str,
        entity_id: &str,
    ) -> Result<UploadedMedia, UploadError> {
        std::fs::create_dir_all(&self.media_dir)
            .map_err(|e| UploadError(format!("create media directory: {}", e)))?;

        let name = Self::file_name(kind, owner_id, entity_id, &media.mime_type);
        let path = self.media_dir.join(&name);
        std::fs::write(&path, &media.bytes)
            .map_err(|e| UploadError(format!("write media file: {}", e)))?;

        tracing::debug!("Stored media {} ({} bytes)", name, media.bytes.len());

        Ok(UploadedMedia {
            url: format!("{}/{}", self.base_url, name),
            kind: media.kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(mime: &str, bytes: &[u8]) -> MediaPayload {
        MediaPayload {
            data: STANDARD.encode(bytes),
            mime_type: mime.to_string(),
        }
    }

    #[test]
    fn classifies_allowed_mimetypes() {
        assert_eq!(media_kind_for_mime("image/png"), Some(MediaKind::Image));
        assert_eq!(media_kind_for_mime("video/mp4"), Some(MediaKind::Video));
        assert_eq!(media_kind_for_mime("application/pdf"), None);
    }

    #[test]
    fn rejects_unsupported_type() {
        let err = validate_media(&payload("text/plain", b"hello"), 25).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn rejects_oversized_media() {
        let big = vec![0u8; 2 * 1024 * 1024];
        let err = validate_media(&payload("image/png", &big), 1).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn rejects_bad_base64() {
        let p = MediaPayload {
            data: "!!not-base64!!".to_string(),
            mime_type: "image/png".to_string(),
        };
        assert!(matches!(
            validate_media(&p, 25),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn local_store_writes_deterministic_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(dir.path().to_str().unwrap(), &MediaConfig::default());
        let media = validate_media(&payload("image/png", b"pixels"), 25).unwrap();

        let uploaded = store.upload(&media, "message", "user-a", "msg-1").unwrap();
        assert_eq!(uploaded.url, "/media/message_user-a_msg-1.png");
        assert_eq!(uploaded.kind, MediaKind::Image);
        assert!(dir.path().join("media/message_user-a_msg-1.png").exists());
    }
}
