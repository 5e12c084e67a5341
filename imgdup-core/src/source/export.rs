//! Offline export message source.
//!
//! Reads a desktop-client channel export: a directory holding `result.json`
//! plus the exported media files it references by relative path. Useful for
//! scanning archives without any network access.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{ChannelInfo, Media, MediaKind, Message, MessageSource, SizeVariant, SourceKind};
use crate::error::{ImgdupError, Result};

/// Name of the export manifest inside the export directory.
pub const EXPORT_MANIFEST: &str = "result.json";

/// Prefix the client adds to bare channel ids.
const CHANNEL_ID_PREFIX: &str = "-100";

#[derive(Debug, Deserialize)]
struct ExportManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    chat_type: Option<String>,
    id: i64,
    #[serde(default)]
    messages: Vec<ExportMessage>,
}

#[derive(Debug, Deserialize)]
struct ExportMessage {
    id: i64,
    #[serde(default, rename = "type")]
    message_type: Option<String>,
    #[serde(default)]
    date_unixtime: Option<String>,
    #[serde(default)]
    from_id: Option<String>,
    #[serde(default)]
    photo: Option<String>,
    #[serde(default)]
    photo_file_size: Option<u64>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

impl ExportMessage {
    fn into_message(self, chat_id: &str) -> Message {
        let timestamp = self.date_unixtime.as_deref().and_then(|t| t.parse().ok());
        let sizes = match (self.width, self.height) {
            (Some(width), Some(height)) => vec![SizeVariant {
                width,
                height,
                byte_size: self.photo_file_size.or(self.file_size).unwrap_or(0),
            }],
            _ => Vec::new(),
        };

        let media = if let Some(path) = self.photo {
            Some(Media {
                kind: MediaKind::Photo,
                mime_type: Some("image/jpeg".to_string()),
                byte_size: self.photo_file_size.unwrap_or(0),
                file_id: Some(path.clone()),
                download_ref: Some(path),
                sizes,
            })
        } else if let Some(path) = self.file {
            let kind = match self.media_type.as_deref() {
                Some("video_file") | Some("animation") | Some("video_message") => MediaKind::Video,
                _ => MediaKind::Document,
            };
            Some(Media {
                kind,
                mime_type: self.mime_type,
                byte_size: self.file_size.unwrap_or(0),
                file_id: Some(path.clone()),
                download_ref: Some(path),
                sizes,
            })
        } else {
            None
        };

        Message {
            id: self.id,
            timestamp,
            chat_id: chat_id.to_string(),
            author_id: self.from_id,
            media,
        }
    }
}

/// Message source over an exported channel archive.
pub struct ExportSource {
    root: PathBuf,
    info: ChannelInfo,
    /// Newest first.
    messages: Vec<Message>,
}

impl ExportSource {
    /// Load the export manifest from `root`.
    #[instrument(level = "info", skip(root), fields(root = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = root.join(EXPORT_MANIFEST);
        let raw = tokio::fs::read(&manifest_path).await.map_err(|e| {
            ImgdupError::SourceUnavailable(format!(
                "Failed to read export manifest {}: {e}",
                manifest_path.display()
            ))
        })?;
        let manifest: ExportManifest = serde_json::from_slice(&raw)?;
        let source = Self::from_manifest(root, manifest);
        info!(messages = source.messages.len(), "Export loaded");
        Ok(source)
    }

    fn from_manifest(root: PathBuf, manifest: ExportManifest) -> Self {
        let is_channel = manifest
            .chat_type
            .as_deref()
            .is_some_and(|t| t.ends_with("channel") || t.ends_with("supergroup"));
        let chat_id = if is_channel {
            format!("{CHANNEL_ID_PREFIX}{}", manifest.id)
        } else {
            manifest.id.to_string()
        };

        let mut messages: Vec<Message> = manifest
            .messages
            .into_iter()
            .filter(|m| m.message_type.as_deref().unwrap_or("message") == "message")
            .map(|m| m.into_message(&chat_id))
            .collect();
        messages.sort_by(|a, b| b.id.cmp(&a.id));

        Self {
            root,
            info: ChannelInfo {
                id: chat_id,
                title: manifest.name,
                username: None,
            },
            messages,
        }
    }
}

#[async_trait]
impl MessageSource for ExportSource {
    async fn fetch_batch(
        &self,
        channel: &str,
        limit: usize,
        offset_cursor: Option<i64>,
    ) -> Result<Vec<Message>> {
        if channel != self.info.id && channel.trim_start_matches('@') != self.info.id {
            debug!(channel, export = %self.info.id, "Channel differs from export, serving export anyway");
        }

        Ok(self
            .messages
            .iter()
            .filter(|m| offset_cursor.map_or(true, |cursor| m.id < cursor))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn is_admin(&self, _channel: &str) -> Result<bool> {
        Ok(false)
    }

    async fn download_bytes(&self, message: &Message) -> Result<Option<Vec<u8>>> {
        let Some(relative) = message.media.as_ref().and_then(|m| m.download_ref.as_deref()) else {
            return Ok(None);
        };

        let path = self.root.join(relative);
        if !path.starts_with(&self.root) || relative.contains("..") {
            warn!(path = %relative, "Refusing media path outside export root");
            return Ok(None);
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Exported media file missing");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn channel_info(&self, _channel: &str) -> Result<ChannelInfo> {
        Ok(self.info.clone())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Export
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "name": "Photo Dump",
        "type": "public_channel",
        "id": 1234567890,
        "messages": [
            {"id": 1, "type": "service", "date_unixtime": "1700000000"},
            {"id": 2, "type": "message", "date_unixtime": "1700000100",
             "photo": "photos/photo_2.jpg", "photo_file_size": 2048, "width": 640, "height": 480},
            {"id": 3, "type": "message", "date_unixtime": "1700000200", "text": "hello"},
            {"id": 4, "type": "message", "date_unixtime": "1700000300",
             "file": "files/scan.png", "mime_type": "image/png", "file_size": 4096},
            {"id": 5, "type": "message", "date_unixtime": "1700000400",
             "file": "video_files/clip.mp4", "media_type": "video_file", "mime_type": "video/mp4"}
        ]
    }"#;

    async fn write_export(dir: &Path) {
        tokio::fs::write(dir.join(EXPORT_MANIFEST), MANIFEST).await.unwrap();
        tokio::fs::create_dir_all(dir.join("photos")).await.unwrap();
        tokio::fs::write(dir.join("photos/photo_2.jpg"), b"jpeg-bytes")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_export() {
        let dir = tempfile::tempdir().unwrap();
        write_export(dir.path()).await;

        let source = ExportSource::open(dir.path()).await.unwrap();
        let info = source.channel_info("ignored").await.unwrap();
        assert_eq!(info.id, "-1001234567890");
        assert_eq!(info.title.as_deref(), Some("Photo Dump"));

        let batch = source.fetch_batch(&info.id, 10, None).await.unwrap();
        let ids: Vec<i64> = batch.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 4, 3, 2]);
        assert!(!batch[0].is_photo());
        assert!(batch[1].is_photo());
        assert!(!batch[2].is_photo());
        assert!(batch[3].is_photo());
    }

    #[tokio::test]
    async fn test_pagination_cursor() {
        let dir = tempfile::tempdir().unwrap();
        write_export(dir.path()).await;
        let source = ExportSource::open(dir.path()).await.unwrap();

        let first = source.fetch_batch("x", 2, None).await.unwrap();
        assert_eq!(first.iter().map(|m| m.id).collect::<Vec<_>>(), vec![5, 4]);

        let second = source.fetch_batch("x", 2, Some(4)).await.unwrap();
        assert_eq!(second.iter().map(|m| m.id).collect::<Vec<_>>(), vec![3, 2]);

        let third = source.fetch_batch("x", 2, Some(2)).await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn test_download_bytes() {
        let dir = tempfile::tempdir().unwrap();
        write_export(dir.path()).await;
        let source = ExportSource::open(dir.path()).await.unwrap();
        let batch = source.fetch_batch("x", 10, None).await.unwrap();

        let photo = batch.iter().find(|m| m.id == 2).unwrap();
        assert_eq!(
            source.download_bytes(photo).await.unwrap().as_deref(),
            Some(&b"jpeg-bytes"[..])
        );

        // Referenced but not present on disk.
        let scan = batch.iter().find(|m| m.id == 4).unwrap();
        assert!(source.download_bytes(scan).await.unwrap().is_none());

        let text = batch.iter().find(|m| m.id == 3).unwrap();
        assert!(source.download_bytes(text).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExportSource::open(dir.path()).await.err().unwrap();
        assert!(matches!(err, ImgdupError::SourceUnavailable(_)));
    }
}
