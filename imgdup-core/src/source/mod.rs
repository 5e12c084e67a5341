//! Message sources.
//!
//! Every collaborator that can list a channel's messages implements
//! [`MessageSource`] and translates its native message shape into the
//! canonical [`Message`] / [`Media`] types at the boundary, so the scanner
//! never branches on collaborator-specific structure.
//!
//! ## Adapters
//!
//! - **Bot API** - lower-privilege interface; cheap metadata, admin checks
//! - **History API** - richer history retrieval through an authenticated gateway
//! - **Export** - offline JSON export directory on disk
//! - **Mock** - deterministic in-memory source for testing
//!
//! ## Quick Start
//!
//! ```no_run
//! use imgdup_core::source::{MessageSource, MockSource};
//!
//! # async fn example() -> imgdup_core::Result<()> {
//! let source = MockSource::new("@mychannel");
//! let newest = source.fetch_batch("@mychannel", 100, None).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "network")]
mod bot_api;
mod export;
#[cfg(feature = "network")]
mod history;
#[cfg(feature = "network")]
mod http_client;
mod mock;
mod resolver;

#[cfg(feature = "network")]
pub use bot_api::{BotApiConfig, BotApiSource};
pub use export::ExportSource;
#[cfg(feature = "network")]
pub use history::{HistoryApiConfig, HistoryApiSource};
pub use mock::MockSource;
pub use resolver::{resolve_method, shared, Resolution, ResolvedSource};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Shared handle to a message source.
pub type SharedSource = Arc<dyn MessageSource>;

/// Trait for channel message sources.
///
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch up to `limit` messages strictly older than `offset_cursor`.
    ///
    /// With no cursor the newest messages are returned. Batches are ordered
    /// newest first, so the last element's id is the next cursor. An empty
    /// batch means the history is exhausted.
    async fn fetch_batch(
        &self,
        channel: &str,
        limit: usize,
        offset_cursor: Option<i64>,
    ) -> Result<Vec<Message>>;

    /// Whether this source holds administrative access to `channel`.
    async fn is_admin(&self, channel: &str) -> Result<bool>;

    /// Download the bytes of a message's media, `None` when nothing is attached.
    async fn download_bytes(&self, message: &Message) -> Result<Option<Vec<u8>>>;

    /// Descriptive channel information for reports.
    async fn channel_info(&self, channel: &str) -> Result<ChannelInfo> {
        Ok(ChannelInfo::from_identity(channel))
    }

    /// Which access strategy this source implements.
    fn kind(&self) -> SourceKind;
}

/// Identifies the access strategy behind a source, used in provenance tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Bot,
    History,
    Export,
    Mock,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::History => "history",
            Self::Export => "export",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical message as seen by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// Origin timestamp, seconds since epoch; `None` for malformed input.
    pub timestamp: Option<i64>,
    pub chat_id: String,
    pub author_id: Option<String>,
    pub media: Option<Media>,
}

impl Message {
    /// Text-only message.
    pub fn text(id: i64, timestamp: i64, chat_id: impl Into<String>) -> Self {
        Self {
            id,
            timestamp: Some(timestamp),
            chat_id: chat_id.into(),
            author_id: None,
            media: None,
        }
    }

    /// Message carrying a photo.
    pub fn photo(id: i64, timestamp: i64, chat_id: impl Into<String>, media: Media) -> Self {
        Self {
            media: Some(media),
            ..Self::text(id, timestamp, chat_id)
        }
    }

    /// Photo-bearing: a photo, or a document whose MIME type is an image.
    pub fn is_photo(&self) -> bool {
        self.media.as_ref().is_some_and(Media::is_image)
    }
}

/// Kind of attached media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Document,
    Video,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
            Self::Video => "video",
            Self::Other => "other",
        }
    }
}

/// Media descriptor attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    pub mime_type: Option<String>,
    pub byte_size: u64,
    /// Unique object identifier assigned by the source, stable across fetches.
    pub file_id: Option<String>,
    /// Source-specific handle used to fetch the bytes.
    pub download_ref: Option<String>,
    pub sizes: Vec<SizeVariant>,
}

impl Media {
    /// Photo descriptor with a single size variant.
    pub fn photo(file_id: impl Into<String>, byte_size: u64, width: u32, height: u32) -> Self {
        let file_id = file_id.into();
        Self {
            kind: MediaKind::Photo,
            mime_type: Some("image/jpeg".to_string()),
            byte_size,
            download_ref: Some(file_id.clone()),
            file_id: Some(file_id),
            sizes: vec![SizeVariant {
                width,
                height,
                byte_size,
            }],
        }
    }

    pub fn is_image(&self) -> bool {
        match self.kind {
            MediaKind::Photo => true,
            MediaKind::Document => self
                .mime_type
                .as_deref()
                .is_some_and(|m| m.starts_with("image/")),
            MediaKind::Video | MediaKind::Other => false,
        }
    }

    /// Size variant with the most pixels.
    pub fn largest_variant(&self) -> Option<&SizeVariant> {
        self.sizes
            .iter()
            .max_by_key(|v| u64::from(v.width) * u64::from(v.height))
    }
}

/// One resolution of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeVariant {
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
}

/// Channel description included in reports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl ChannelInfo {
    /// Best-effort info from a bare identity: `@name` or `name` becomes the
    /// username, numeric identities stay ids.
    pub fn from_identity(channel: &str) -> Self {
        let trimmed = channel.trim_start_matches('@');
        let is_numeric = trimmed.trim_start_matches('-').chars().all(|c| c.is_ascii_digit());
        Self {
            id: trimmed.to_string(),
            title: None,
            username: (!is_numeric && !trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }
}
