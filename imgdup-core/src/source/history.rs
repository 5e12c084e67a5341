//! History API message source.
//!
//! Richer history retrieval through an authenticated user-session gateway.
//! Unlike the Bot API it can page through the whole channel history with an
//! `offset_id` cursor, and it can download full-resolution media. It needs
//! gateway credentials, so method resolution only selects it when
//! [`HistoryApiConfig`] is available.
//!
//! Gateway endpoints:
//!
//! - `GET /channels/{channel}/messages?limit=N&offset_id=ID`
//! - `GET /channels/{channel}/admin`
//! - `GET /channels/{channel}`
//! - `GET /media/{chat_id}/{message_id}`

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::http_client::{SourceHttpClient, SourceHttpConfig};
use super::{ChannelInfo, Media, MediaKind, Message, MessageSource, SizeVariant, SourceKind};
use crate::error::{ImgdupError, Result};

/// Default timeout for gateway requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of retry attempts.
const MAX_RETRIES: u32 = 3;

/// Configuration for the History API client.
#[derive(Clone)]
pub struct HistoryApiConfig {
    /// Gateway base URL.
    pub api_url: String,
    /// Session token for bearer authentication.
    pub token: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum retry attempts for transient errors.
    pub max_retries: u32,
}

impl std::fmt::Debug for HistoryApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryApiConfig")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl HistoryApiConfig {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Required: `IMGDUP_HISTORY_URL`, `IMGDUP_HISTORY_TOKEN`
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("IMGDUP_HISTORY_URL").map_err(|_| {
            ImgdupError::InvalidConfig("IMGDUP_HISTORY_URL environment variable not set".into())
        })?;
        let token = std::env::var("IMGDUP_HISTORY_TOKEN").map_err(|_| {
            ImgdupError::InvalidConfig("IMGDUP_HISTORY_TOKEN environment variable not set".into())
        })?;
        Ok(Self::new(api_url, token))
    }
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    id: i64,
    /// ISO-8601 timestamp as emitted by the gateway.
    #[serde(default)]
    date: Option<String>,
    peer_id: serde_json::Value,
    #[serde(default)]
    from_id: Option<serde_json::Value>,
    #[serde(default)]
    media: Option<HistoryMedia>,
}

#[derive(Debug, Deserialize)]
struct HistoryMedia {
    #[serde(rename = "type")]
    media_type: String,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    sizes: Vec<HistorySize>,
}

#[derive(Debug, Deserialize)]
struct HistorySize {
    w: u32,
    h: u32,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AdminResponse {
    is_admin: bool,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    id: serde_json::Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// Render a JSON scalar id (number or string) as a string.
fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

impl HistoryMessage {
    fn into_message(self) -> Message {
        let chat_id = id_string(&self.peer_id).unwrap_or_default();
        let timestamp = self
            .date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|dt| dt.timestamp());

        let media = self.media.map(|m| {
            let kind = match m.media_type.as_str() {
                "photo" => MediaKind::Photo,
                "document" => MediaKind::Document,
                "video" => MediaKind::Video,
                _ => MediaKind::Other,
            };
            let sizes: Vec<SizeVariant> = m
                .sizes
                .iter()
                .map(|s| SizeVariant {
                    width: s.w,
                    height: s.h,
                    byte_size: s.size.unwrap_or(0),
                })
                .collect();
            let byte_size = m
                .size
                .or_else(|| sizes.iter().map(|s| s.byte_size).max())
                .unwrap_or(0);
            let file_id = m.id.as_ref().and_then(id_string);
            Media {
                kind,
                mime_type: m.mime_type.or_else(|| {
                    (kind == MediaKind::Photo).then(|| "image/jpeg".to_string())
                }),
                byte_size,
                download_ref: Some(format!("{}/{}", chat_id, self.id)),
                file_id,
                sizes,
            }
        });

        Message {
            id: self.id,
            timestamp,
            author_id: self.from_id.as_ref().and_then(id_string),
            chat_id,
            media,
        }
    }
}

/// History gateway client.
pub struct HistoryApiSource {
    http: SourceHttpClient,
    config: HistoryApiConfig,
}

impl HistoryApiSource {
    /// Create a new History API client.
    #[instrument(level = "debug", skip_all, fields(api_url = %config.api_url))]
    pub fn new(config: HistoryApiConfig) -> Result<Self> {
        debug!("Creating History API client");
        let http = SourceHttpClient::new(SourceHttpConfig {
            timeout: config.timeout,
            max_retries: config.max_retries,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            ..Default::default()
        })?;
        info!("History API client created");
        Ok(Self { http, config })
    }

    fn channel_url(&self, channel: &str) -> String {
        format!("{}/channels/{}", self.config.api_url, channel)
    }
}

#[async_trait]
impl MessageSource for HistoryApiSource {
    #[instrument(level = "info", skip(self), fields(source = "history"))]
    async fn fetch_batch(
        &self,
        channel: &str,
        limit: usize,
        offset_cursor: Option<i64>,
    ) -> Result<Vec<Message>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = offset_cursor {
            query.push(("offset_id", cursor.to_string()));
        }

        let page: HistoryPage = self
            .http
            .get_json(
                &format!("{}/messages", self.channel_url(channel)),
                Some(&self.config.token),
                &query,
                "History API",
            )
            .await?;

        let messages: Vec<Message> = page
            .messages
            .into_iter()
            .map(HistoryMessage::into_message)
            .collect();
        debug!(count = messages.len(), "Fetched history page");
        Ok(messages)
    }

    #[instrument(level = "debug", skip(self), fields(source = "history"))]
    async fn is_admin(&self, channel: &str) -> Result<bool> {
        let admin: AdminResponse = self
            .http
            .get_json(
                &format!("{}/admin", self.channel_url(channel)),
                Some(&self.config.token),
                &[],
                "History API",
            )
            .await?;
        Ok(admin.is_admin)
    }

    #[instrument(level = "debug", skip_all, fields(source = "history", message_id = message.id))]
    async fn download_bytes(&self, message: &Message) -> Result<Option<Vec<u8>>> {
        let Some(media_ref) = message.media.as_ref().and_then(|m| m.download_ref.as_deref())
        else {
            return Ok(None);
        };

        let url = format!("{}/media/{}", self.config.api_url, media_ref);
        self.http
            .get_bytes(&url, Some(&self.config.token), "History API")
            .await
            .map(Some)
    }

    async fn channel_info(&self, channel: &str) -> Result<ChannelInfo> {
        let info: ChannelResponse = self
            .http
            .get_json(
                &self.channel_url(channel),
                Some(&self.config.token),
                &[],
                "History API",
            )
            .await?;
        Ok(ChannelInfo {
            id: id_string(&info.id).unwrap_or_else(|| channel.to_string()),
            title: info.title,
            username: info.username,
        })
    }

    fn kind(&self) -> SourceKind {
        SourceKind::History
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "messages": [
            {"id": 120, "date": "2024-03-01T10:00:00+00:00", "peer_id": -1001234567890,
             "from_id": 555,
             "media": {"type": "photo", "id": 9001,
                       "sizes": [{"w": 320, "h": 240, "size": 9000}, {"w": 1280, "h": 960, "size": 120000}]}},
            {"id": 119, "date": "2024-03-01T09:00:00+00:00", "peer_id": -1001234567890},
            {"id": 118, "date": "not a date", "peer_id": "-1001234567890",
             "media": {"type": "document", "id": "d-7", "mime_type": "image/webp", "size": 4000}}
        ]
    }"#;

    #[test]
    fn test_default_config() {
        let config = HistoryApiConfig::new("https://gateway.example/", "tok");
        assert_eq!(config.api_url, "https://gateway.example");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.max_retries, MAX_RETRIES);
        assert!(!format!("{config:?}").contains("tok\""));
    }

    #[test]
    fn test_parse_page() {
        let page: HistoryPage = serde_json::from_str(PAGE).unwrap();
        let messages: Vec<Message> = page
            .messages
            .into_iter()
            .map(HistoryMessage::into_message)
            .collect();

        assert_eq!(messages.len(), 3);

        let photo = &messages[0];
        assert!(photo.is_photo());
        assert_eq!(photo.timestamp, Some(1709287200));
        assert_eq!(photo.author_id.as_deref(), Some("555"));
        let media = photo.media.as_ref().unwrap();
        assert_eq!(media.file_id.as_deref(), Some("9001"));
        assert_eq!(media.byte_size, 120000);
        assert_eq!(media.download_ref.as_deref(), Some("-1001234567890/120"));

        assert!(!messages[1].is_photo());

        let doc = &messages[2];
        assert!(doc.is_photo());
        assert_eq!(doc.timestamp, None);
        assert_eq!(doc.chat_id, "-1001234567890");
    }

    #[test]
    fn test_source_kind() {
        let source =
            HistoryApiSource::new(HistoryApiConfig::new("https://gateway.example", "t")).unwrap();
        assert_eq!(source.kind(), SourceKind::History);
    }
}
