use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImgdupError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Image store used before load()")]
    NotLoaded,

    #[error("Signature computation failed: {0}")]
    SignatureComputation(String),

    #[error("Signature length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "network")]
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<sqlx::Error> for ImgdupError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for ImgdupError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Migration(e.to_string())
    }
}

impl From<serde_json::Error> for ImgdupError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImgdupError>;
