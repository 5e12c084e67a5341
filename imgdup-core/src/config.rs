//! Scan configuration.
//!
//! A [`ScanConfig`] is an immutable value threaded through every call that
//! needs it. Adjusting an option produces a new value via the `with_*`
//! methods; nothing is rewritten in place behind a shared reference.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ImgdupError, Result};
use crate::signature::HashMethod;

/// How photo-bearing messages are turned into signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IngestionMode {
    /// Download the image bytes and compute a perceptual hash.
    #[default]
    WithDownload,
    /// Derive a structural signature from media metadata only.
    Lightweight,
}

impl IngestionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WithDownload => "download",
            Self::Lightweight => "lightweight",
        }
    }
}

impl FromStr for IngestionMode {
    type Err = ImgdupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "withdownload" | "with-download" | "download" => Ok(Self::WithDownload),
            "lightweight" | "metadata" => Ok(Self::Lightweight),
            other => Err(ImgdupError::InvalidConfig(format!(
                "unknown ingestion mode: {other}"
            ))),
        }
    }
}

/// Which message source strategy a scan uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMethod {
    /// Resolve between the bot and history interfaces at scan start.
    #[default]
    Auto,
    Bot,
    History,
    Export,
}

impl FromStr for SourceMethod {
    type Err = ImgdupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "bot" => Ok(Self::Bot),
            "history" => Ok(Self::History),
            "export" => Ok(Self::Export),
            other => Err(ImgdupError::InvalidConfig(format!(
                "unknown source method: {other}"
            ))),
        }
    }
}

/// Options recognised by the scanner, the signature engine and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    /// Perceptual hash algorithm (default: phash)
    pub hash_method: HashMethod,
    /// Hash grid edge length; a size of 8 yields a 64-bit signature (default: 8)
    pub hash_size: u32,
    /// Maximum normalized dissimilarity still counted as a duplicate (default: 10)
    pub similarity_threshold_percent: u32,
    /// Messages requested per batch (default: 100)
    pub batch_size: usize,
    /// Pause between successive batch fetches (default: 1.0)
    pub cooldown_seconds: f64,
    /// Records kept in the in-memory working set (default: 10000)
    pub max_working_set_size: usize,
    /// Stop after this many messages, 0 for no limit (default: 0)
    pub max_messages: usize,
    /// Download-and-hash or metadata-only ingestion (default: withDownload)
    pub ingestion_mode: IngestionMode,
    /// Message source strategy (default: auto)
    pub source_method: SourceMethod,
    /// Base URL used to derive deep links to messages (default: https://t.me)
    pub link_base_url: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            hash_method: HashMethod::Phash,
            hash_size: 8,
            similarity_threshold_percent: 10,
            batch_size: 100,
            cooldown_seconds: 1.0,
            max_working_set_size: 10_000,
            max_messages: 0,
            ingestion_mode: IngestionMode::WithDownload,
            source_method: SourceMethod::Auto,
            link_base_url: "https://t.me".to_string(),
        }
    }
}

impl ScanConfig {
    /// Load configuration from `IMGDUP_*` environment variables over the defaults.
    ///
    /// Values that fail to parse fall back to the default for that option.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let hash_method = env_parse("IMGDUP_HASH_METHOD").unwrap_or(defaults.hash_method);
        let hash_size = env_parse("IMGDUP_HASH_SIZE").unwrap_or(defaults.hash_size);
        let similarity_threshold_percent =
            env_parse("IMGDUP_THRESHOLD").unwrap_or(defaults.similarity_threshold_percent);
        let batch_size = env_parse("IMGDUP_BATCH_SIZE").unwrap_or(defaults.batch_size);
        let cooldown_seconds =
            env_parse("IMGDUP_COOLDOWN_SECONDS").unwrap_or(defaults.cooldown_seconds);
        let max_working_set_size =
            env_parse("IMGDUP_MAX_WORKING_SET").unwrap_or(defaults.max_working_set_size);
        let max_messages = env_parse("IMGDUP_MAX_MESSAGES").unwrap_or(defaults.max_messages);
        let ingestion_mode =
            env_parse("IMGDUP_INGESTION_MODE").unwrap_or(defaults.ingestion_mode);
        let source_method = env_parse("IMGDUP_SOURCE_METHOD").unwrap_or(defaults.source_method);
        let link_base_url =
            std::env::var("IMGDUP_LINK_BASE_URL").unwrap_or(defaults.link_base_url);

        Self {
            hash_method,
            hash_size,
            similarity_threshold_percent,
            batch_size,
            cooldown_seconds,
            max_working_set_size,
            max_messages,
            ingestion_mode,
            source_method,
            link_base_url,
        }
    }

    /// Reject option combinations the scanner cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.similarity_threshold_percent > 100 {
            return Err(ImgdupError::InvalidConfig(format!(
                "similarity threshold must be 0-100, got {}",
                self.similarity_threshold_percent
            )));
        }
        if self.hash_size == 0 {
            return Err(ImgdupError::InvalidConfig("hash size must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(ImgdupError::InvalidConfig("batch size must be positive".into()));
        }
        if self.max_working_set_size == 0 {
            return Err(ImgdupError::InvalidConfig(
                "working set size must be positive".into(),
            ));
        }
        if !self.cooldown_seconds.is_finite() || self.cooldown_seconds < 0.0 {
            return Err(ImgdupError::InvalidConfig(format!(
                "cooldown must be a non-negative number of seconds, got {}",
                self.cooldown_seconds
            )));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_seconds.max(0.0))
    }

    /// Message cap, `None` when unlimited.
    pub fn message_limit(&self) -> Option<usize> {
        (self.max_messages > 0).then_some(self.max_messages)
    }

    pub fn with_hash_method(self, hash_method: HashMethod) -> Self {
        Self {
            hash_method,
            ..self
        }
    }

    pub fn with_hash_size(self, hash_size: u32) -> Self {
        Self { hash_size, ..self }
    }

    pub fn with_threshold(self, similarity_threshold_percent: u32) -> Self {
        Self {
            similarity_threshold_percent,
            ..self
        }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn with_cooldown_seconds(self, cooldown_seconds: f64) -> Self {
        Self {
            cooldown_seconds,
            ..self
        }
    }

    pub fn with_max_working_set_size(self, max_working_set_size: usize) -> Self {
        Self {
            max_working_set_size,
            ..self
        }
    }

    pub fn with_max_messages(self, max_messages: usize) -> Self {
        Self {
            max_messages,
            ..self
        }
    }

    pub fn with_ingestion_mode(self, ingestion_mode: IngestionMode) -> Self {
        Self {
            ingestion_mode,
            ..self
        }
    }

    pub fn with_source_method(self, source_method: SourceMethod) -> Self {
        Self {
            source_method,
            ..self
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.hash_method, HashMethod::Phash);
        assert_eq!(config.hash_size, 8);
        assert_eq!(config.similarity_threshold_percent, 10);
        assert_eq!(config.ingestion_mode, IngestionMode::WithDownload);
        assert_eq!(config.source_method, SourceMethod::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_methods_return_new_values() {
        let base = ScanConfig::default();
        let tuned = base.clone().with_threshold(25).with_batch_size(10);

        assert_eq!(base.similarity_threshold_percent, 10);
        assert_eq!(tuned.similarity_threshold_percent, 25);
        assert_eq!(tuned.batch_size, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ScanConfig::default().with_threshold(101).validate().is_err());
        assert!(ScanConfig::default().with_batch_size(0).validate().is_err());
        assert!(ScanConfig::default().with_hash_size(0).validate().is_err());
        assert!(ScanConfig::default()
            .with_max_working_set_size(0)
            .validate()
            .is_err());
        assert!(ScanConfig::default()
            .with_cooldown_seconds(-1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_message_limit() {
        assert_eq!(ScanConfig::default().message_limit(), None);
        assert_eq!(
            ScanConfig::default().with_max_messages(50).message_limit(),
            Some(50)
        );
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!(
            "withDownload".parse::<IngestionMode>().unwrap(),
            IngestionMode::WithDownload
        );
        assert_eq!(
            "lightweight".parse::<IngestionMode>().unwrap(),
            IngestionMode::Lightweight
        );
        assert!("sometimes".parse::<IngestionMode>().is_err());
        assert_eq!("export".parse::<SourceMethod>().unwrap(), SourceMethod::Export);
        assert!("carrier-pigeon".parse::<SourceMethod>().is_err());
    }

    #[test]
    fn test_config_deserializes_partial_json() {
        let config: ScanConfig =
            serde_json::from_str(r#"{"hashMethod":"dhash","similarityThresholdPercent":25}"#)
                .unwrap();
        assert_eq!(config.hash_method, HashMethod::Dhash);
        assert_eq!(config.similarity_threshold_percent, 25);
        assert_eq!(config.batch_size, 100);
    }
}
