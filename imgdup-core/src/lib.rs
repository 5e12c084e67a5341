//! imgdup core - near-duplicate image detection over channel history
//!
//! This crate scans a channel's messages, fingerprints every attached image
//! and reports groups of near-duplicates.
//!
//! # Components
//!
//! - [`signature`] - perceptual signatures, distance and greedy grouping
//! - [`store`] - SQLite-backed record store with a bounded working set
//! - [`source`] - the [`MessageSource`] contract and its adapters
//! - [`scanner`] - the batched, rate-limited scan loop
//! - [`report`] - duplicate report builder and sinks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use imgdup_core::{
//!     ImageStore, IngestionMode, MemorySink, MockSource, ResolvedSource, ScanConfig, Scanner,
//!     StoreConfig,
//! };
//!
//! # async fn example() -> imgdup_core::Result<()> {
//! let config = ScanConfig::default().with_cooldown_seconds(0.0);
//! let store = Arc::new(ImageStore::new(StoreConfig::in_memory(config.max_working_set_size)));
//! store.load().await?;
//!
//! let scanner = Scanner::new(store, config)?;
//! let source = Arc::new(MockSource::new("@mychannel"));
//! let resolved = ResolvedSource::explicit(source, IngestionMode::Lightweight);
//!
//! let summary = scanner.scan("@mychannel", &resolved, &MemorySink::new()).await?;
//! println!("{} duplicates", summary.stats.duplicates_found);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod report;
pub mod scanner;
pub mod signature;
pub mod source;
pub mod store;

// Re-export main types for convenience
pub use config::{IngestionMode, ScanConfig, SourceMethod};
pub use error::{ImgdupError, Result};
pub use report::{
    build_report, message_link, DuplicateReport, JsonFileSink, MemorySink, ReportContext,
    ReportEntry, ReportGroup, ReportSink, ReportStats,
};
pub use scanner::{record_identity, ScanState, ScanStats, ScanStatus, ScanSummary, Scanner};
pub use signature::{
    are_similar, compute_signature, distance, group_by_similarity, similarity_percent,
    structural_signature, HashMethod, Signed,
};
pub use source::{
    resolve_method, shared, ChannelInfo, ExportSource, Media, MediaKind, Message, MessageSource,
    MockSource, Resolution, ResolvedSource, SharedSource, SizeVariant, SourceKind,
};
pub use store::{ImageRecord, ImageStore, StoreConfig};

// Network-dependent exports
#[cfg(feature = "network")]
pub use source::{BotApiConfig, BotApiSource, HistoryApiConfig, HistoryApiSource};
