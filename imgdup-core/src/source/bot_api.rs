//! Telegram Bot API message source.
//!
//! The lower-privilege interface. A bot only sees channel posts delivered to
//! it as updates, so history coverage is limited to what `getUpdates` still
//! holds; in exchange it is cheap and exposes photo metadata (sizes, byte
//! counts) without downloading anything. Admin status is checked with
//! `getChatMember` for the bot's own user id.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::http_client::{SourceHttpClient, SourceHttpConfig};
use super::{ChannelInfo, Media, MediaKind, Message, MessageSource, SizeVariant, SourceKind};
use crate::error::{ImgdupError, Result};

/// Default Bot API endpoint.
const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Configuration for the Bot API client.
#[derive(Clone)]
pub struct BotApiConfig {
    /// API base URL (without the `/bot<token>` suffix).
    pub api_url: String,
    /// Bot token issued by BotFather.
    pub token: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum retry attempts for transient errors.
    pub max_retries: u32,
}

impl std::fmt::Debug for BotApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApiConfig")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl BotApiConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Required: `IMGDUP_BOT_TOKEN`
    /// Optional: `IMGDUP_BOT_API_URL` (defaults to api.telegram.org)
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("IMGDUP_BOT_TOKEN").map_err(|_| {
            ImgdupError::InvalidConfig("IMGDUP_BOT_TOKEN environment variable not set".into())
        })?;

        let mut config = Self::new(token);
        if let Ok(url) = std::env::var("IMGDUP_BOT_API_URL") {
            config.api_url = url;
        }
        Ok(config)
    }
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

impl<T> Envelope<T> {
    fn into_result(self, method: &str) -> Result<T> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(ImgdupError::SourceUnavailable(format!(
                "Bot API {method} failed: {}",
                self.description.unwrap_or_else(|| "no description".into())
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BotUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct BotChatMember {
    status: String,
}

#[derive(Debug, Deserialize)]
struct BotChat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotUpdate {
    #[serde(default)]
    channel_post: Option<BotMessage>,
}

#[derive(Debug, Deserialize)]
struct BotMessage {
    message_id: i64,
    #[serde(default)]
    date: Option<i64>,
    chat: BotChat,
    #[serde(default)]
    from: Option<BotUser>,
    #[serde(default)]
    sender_chat: Option<BotChat>,
    #[serde(default)]
    photo: Option<Vec<BotPhotoSize>>,
    #[serde(default)]
    document: Option<BotDocument>,
}

#[derive(Debug, Deserialize)]
struct BotPhotoSize {
    file_id: String,
    file_unique_id: String,
    width: u32,
    height: u32,
    #[serde(default)]
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BotDocument {
    file_id: String,
    file_unique_id: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BotFile {
    #[serde(default)]
    file_path: Option<String>,
}

impl BotChat {
    fn matches(&self, channel: &str) -> bool {
        let wanted = channel.trim_start_matches('@');
        self.id.to_string() == wanted
            || self
                .username
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(wanted))
    }
}

impl BotMessage {
    fn into_message(self) -> Message {
        let author_id = self
            .from
            .map(|u| u.id.to_string())
            .or_else(|| self.sender_chat.map(|c| c.id.to_string()));

        let media = match (self.photo, self.document) {
            (Some(sizes), _) if !sizes.is_empty() => Some(photo_media(sizes)),
            (_, Some(doc)) => Some(Media {
                kind: MediaKind::Document,
                mime_type: doc.mime_type,
                byte_size: doc.file_size.unwrap_or(0),
                file_id: Some(doc.file_unique_id),
                download_ref: Some(doc.file_id),
                sizes: Vec::new(),
            }),
            _ => None,
        };

        Message {
            id: self.message_id,
            timestamp: self.date,
            chat_id: self.chat.id.to_string(),
            author_id,
            media,
        }
    }
}

fn photo_media(sizes: Vec<BotPhotoSize>) -> Media {
    let variants: Vec<SizeVariant> = sizes
        .iter()
        .map(|s| SizeVariant {
            width: s.width,
            height: s.height,
            byte_size: s.file_size.unwrap_or(0),
        })
        .collect();

    let largest = sizes
        .into_iter()
        .max_by_key(|s| u64::from(s.width) * u64::from(s.height));
    let (file_id, download_ref, byte_size) = match largest {
        Some(s) => (
            Some(s.file_unique_id),
            Some(s.file_id),
            s.file_size.unwrap_or(0),
        ),
        None => (None, None, 0),
    };

    Media {
        kind: MediaKind::Photo,
        mime_type: Some("image/jpeg".to_string()),
        byte_size,
        file_id,
        download_ref,
        sizes: variants,
    }
}

/// Telegram Bot API client.
pub struct BotApiSource {
    http: SourceHttpClient,
    config: BotApiConfig,
    bot_id: OnceCell<i64>,
}

impl BotApiSource {
    /// Create a new Bot API client.
    #[instrument(level = "debug", skip_all, fields(api_url = %config.api_url))]
    pub fn new(config: BotApiConfig) -> Result<Self> {
        debug!("Creating Bot API client");
        let http = SourceHttpClient::new(SourceHttpConfig {
            timeout: config.timeout,
            max_retries: config.max_retries,
            ..Default::default()
        })?;
        info!("Bot API client created");
        Ok(Self {
            http,
            config,
            bot_id: OnceCell::new(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.api_url, self.config.token, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let envelope: Envelope<T> = self
            .http
            .get_json(&self.method_url(method), None, query, "Bot API")
            .await?;
        envelope.into_result(method)
    }

    async fn bot_id(&self) -> Result<i64> {
        self.bot_id
            .get_or_try_init(|| async {
                let me: BotUser = self.call("getMe", &[]).await?;
                Ok::<_, ImgdupError>(me.id)
            })
            .await
            .copied()
    }
}

#[async_trait]
impl MessageSource for BotApiSource {
    #[instrument(level = "info", skip(self), fields(source = "bot"))]
    async fn fetch_batch(
        &self,
        channel: &str,
        limit: usize,
        offset_cursor: Option<i64>,
    ) -> Result<Vec<Message>> {
        let updates: Vec<BotUpdate> = self
            .call(
                "getUpdates",
                &[("allowed_updates", r#"["channel_post"]"#.to_string())],
            )
            .await?;

        let mut messages: Vec<Message> = updates
            .into_iter()
            .filter_map(|u| u.channel_post)
            .filter(|m| m.chat.matches(channel))
            .filter(|m| offset_cursor.map_or(true, |cursor| m.message_id < cursor))
            .map(BotMessage::into_message)
            .collect();

        messages.sort_by(|a, b| b.id.cmp(&a.id));
        messages.truncate(limit);
        debug!(count = messages.len(), "Fetched channel posts");
        Ok(messages)
    }

    #[instrument(level = "debug", skip(self), fields(source = "bot"))]
    async fn is_admin(&self, channel: &str) -> Result<bool> {
        let bot_id = self.bot_id().await?;
        let member: BotChatMember = self
            .call(
                "getChatMember",
                &[
                    ("chat_id", channel.to_string()),
                    ("user_id", bot_id.to_string()),
                ],
            )
            .await?;
        Ok(matches!(member.status.as_str(), "administrator" | "creator"))
    }

    #[instrument(level = "debug", skip_all, fields(source = "bot", message_id = message.id))]
    async fn download_bytes(&self, message: &Message) -> Result<Option<Vec<u8>>> {
        let Some(file_ref) = message.media.as_ref().and_then(|m| m.download_ref.clone()) else {
            return Ok(None);
        };

        let file: BotFile = self.call("getFile", &[("file_id", file_ref)]).await?;
        let Some(path) = file.file_path else {
            return Ok(None);
        };

        let url = format!(
            "{}/file/bot{}/{}",
            self.config.api_url, self.config.token, path
        );
        self.http.get_bytes(&url, None, "Bot API").await.map(Some)
    }

    async fn channel_info(&self, channel: &str) -> Result<ChannelInfo> {
        let chat: BotChat = self
            .call("getChat", &[("chat_id", channel.to_string())])
            .await?;
        Ok(ChannelInfo {
            id: chat.id.to_string(),
            title: chat.title,
            username: chat.username,
        })
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Bot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPDATES: &str = r#"{
        "ok": true,
        "result": [
            {"update_id": 1, "channel_post": {
                "message_id": 41, "date": 1700000000,
                "chat": {"id": -1001234567890, "username": "mychannel", "title": "My Channel"},
                "photo": [
                    {"file_id": "small", "file_unique_id": "u-small", "width": 90, "height": 90, "file_size": 1200},
                    {"file_id": "big", "file_unique_id": "u-big", "width": 1280, "height": 960, "file_size": 88000}
                ]
            }},
            {"update_id": 2, "channel_post": {
                "message_id": 42, "date": 1700000100,
                "chat": {"id": -1001234567890, "username": "mychannel"},
                "document": {"file_id": "doc", "file_unique_id": "u-doc", "mime_type": "image/png", "file_size": 5000}
            }},
            {"update_id": 3, "message": {"message_id": 7}}
        ]
    }"#;

    #[test]
    fn test_config_debug_redacts_token() {
        let config = BotApiConfig::new("123:secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_parse_updates_into_messages() {
        let envelope: Envelope<Vec<BotUpdate>> = serde_json::from_str(UPDATES).unwrap();
        let posts: Vec<Message> = envelope
            .into_result("getUpdates")
            .unwrap()
            .into_iter()
            .filter_map(|u| u.channel_post)
            .map(BotMessage::into_message)
            .collect();

        assert_eq!(posts.len(), 2);

        let photo = &posts[0];
        assert!(photo.is_photo());
        let media = photo.media.as_ref().unwrap();
        assert_eq!(media.file_id.as_deref(), Some("u-big"));
        assert_eq!(media.download_ref.as_deref(), Some("big"));
        assert_eq!(media.byte_size, 88000);
        assert_eq!(media.sizes.len(), 2);
        assert_eq!(photo.chat_id, "-1001234567890");

        let doc = &posts[1];
        assert!(doc.is_photo());
        assert_eq!(doc.media.as_ref().unwrap().kind, MediaKind::Document);
    }

    #[test]
    fn test_chat_matching() {
        let chat = BotChat {
            id: -1001234567890,
            title: None,
            username: Some("MyChannel".into()),
        };
        assert!(chat.matches("@mychannel"));
        assert!(chat.matches("-1001234567890"));
        assert!(!chat.matches("@other"));
    }

    #[test]
    fn test_error_envelope() {
        let envelope: Envelope<BotUser> =
            serde_json::from_str(r#"{"ok": false, "description": "Unauthorized"}"#).unwrap();
        let err = envelope.into_result("getMe").unwrap_err();
        assert!(err.to_string().contains("Unauthorized"));
    }

    #[test]
    fn test_source_kind() {
        let source = BotApiSource::new(BotApiConfig::new("token")).unwrap();
        assert_eq!(source.kind(), SourceKind::Bot);
    }
}
