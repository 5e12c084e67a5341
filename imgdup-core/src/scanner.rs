//! Scan orchestration.
//!
//! A [`Scanner`] walks a channel's history from the newest message backwards
//! in batches, turns every photo-bearing message into an [`ImageRecord`] and
//! admits it to the store. Once the history is exhausted (or the message cap
//! is hit) it groups the stored signatures and hands the report to a sink.
//!
//! Only one scan runs per scanner at a time. A second call while a scan is in
//! progress returns immediately with [`ScanStatus::Busy`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{IngestionMode, ScanConfig};
use crate::error::{ImgdupError, Result};
use crate::report::{build_report, message_link, ReportContext, ReportSink};
use crate::signature::{compute_signature, structural_signature};
use crate::source::{ChannelInfo, Message, Resolution, ResolvedSource};
use crate::store::{ImageRecord, ImageStore};

/// Outcome of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum ScanStatus {
    Completed,
    /// Another scan was already running; nothing was done.
    Busy,
    /// The scan stopped early. Records committed before the failure remain.
    Failed(String),
}

/// Running counters of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub total_messages: u64,
    pub processed_images: u64,
    pub duplicates_found: u64,
    pub errors: u64,
}

/// Transient state of one scan invocation.
#[derive(Debug, Clone)]
pub struct ScanState {
    pub channel: String,
    /// Id of the oldest message seen so far; `None` starts from the newest.
    pub offset_cursor: Option<i64>,
    pub batch_size: usize,
    pub cooldown_seconds: f64,
    pub stats: ScanStats,
}

impl ScanState {
    fn new(channel: &str, config: &ScanConfig) -> Self {
        Self {
            channel: channel.to_string(),
            offset_cursor: None,
            batch_size: config.batch_size,
            cooldown_seconds: config.cooldown_seconds,
            stats: ScanStats::default(),
        }
    }
}

/// What a scan returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    #[serde(flatten)]
    pub status: ScanStatus,
    pub stats: ScanStats,
    pub resolution: Option<Resolution>,
    pub provenance: Option<String>,
    pub duplicate_groups: u64,
    pub report_location: Option<String>,
}

impl ScanSummary {
    fn busy() -> Self {
        Self {
            status: ScanStatus::Busy,
            stats: ScanStats::default(),
            resolution: None,
            provenance: None,
            duplicate_groups: 0,
            report_location: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ScanStatus::Completed
    }
}

/// Resets the busy flag however the scan ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives scans against one store.
pub struct Scanner {
    store: Arc<ImageStore>,
    config: ScanConfig,
    scanning: AtomicBool,
}

impl Scanner {
    /// Create a scanner; fails with `InvalidConfig` for unusable options.
    pub fn new(store: Arc<ImageStore>, config: ScanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            scanning: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ImageStore> {
        &self.store
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Scan `channel` through `resolved` and write the report to `sink`.
    ///
    /// Returns `Err(NotLoaded)` when the store has not been loaded. Every
    /// other outcome, including source failures, is reported through
    /// [`ScanSummary::status`].
    #[instrument(level = "info", skip(self, resolved, sink), fields(provenance = %resolved.provenance()))]
    pub async fn scan(
        &self,
        channel: &str,
        resolved: &ResolvedSource,
        sink: &dyn ReportSink,
    ) -> Result<ScanSummary> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(channel, "Scan already running");
            return Ok(ScanSummary::busy());
        }
        let _guard = ScanGuard(&self.scanning);

        if !self.store.is_loaded().await {
            return Err(ImgdupError::NotLoaded);
        }

        Ok(self.run(channel, resolved, sink).await)
    }

    async fn run(&self, channel: &str, resolved: &ResolvedSource, sink: &dyn ReportSink) -> ScanSummary {
        let started = Instant::now();
        let provenance = resolved.provenance();
        let source = resolved.source.as_ref();
        let limit = self.config.message_limit();

        let channel_info = match source.channel_info(channel).await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Channel info unavailable, using identity");
                ChannelInfo::from_identity(channel)
            }
        };

        let mut state = ScanState::new(channel, &self.config);
        let mut seen: HashSet<i64> = HashSet::new();
        let mut batches = 0usize;
        let mut aborted: Option<String> = None;

        info!(
            channel,
            batch_size = state.batch_size,
            cooldown_seconds = state.cooldown_seconds,
            ingestion_mode = resolved.ingestion_mode.as_str(),
            "Scan started"
        );

        'batches: loop {
            let fetched = state.stats.total_messages as usize;
            let request = match limit {
                Some(max) if fetched >= max => break,
                Some(max) => state.batch_size.min(max - fetched),
                None => state.batch_size,
            };

            if batches > 0 {
                tokio::time::sleep(self.config.cooldown()).await;
            }

            let batch = match source
                .fetch_batch(channel, request, state.offset_cursor)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, cursor = ?state.offset_cursor, "Batch fetch failed, aborting scan");
                    aborted = Some(e.to_string());
                    break;
                }
            };
            batches += 1;

            let Some(oldest) = batch.iter().map(|m| m.id).min() else {
                debug!(batches, "Empty batch, history exhausted");
                break;
            };
            if state.offset_cursor.is_some_and(|cursor| oldest >= cursor) {
                warn!(oldest, "Source ignored the cursor, stopping");
                break;
            }
            state.offset_cursor = Some(oldest);
            debug!(count = batch.len(), cursor = oldest, "Processing batch");

            for message in &batch {
                if !seen.insert(message.id) {
                    continue;
                }
                state.stats.total_messages += 1;

                if message.is_photo() {
                    state.stats.processed_images += 1;
                    match self.ingest(message, resolved, &provenance, &channel_info).await {
                        Ok(true) => {}
                        Ok(false) => debug!(message_id = message.id, "Already stored"),
                        Err(e) => {
                            state.stats.errors += 1;
                            warn!(message_id = message.id, error = %e, "Failed to process message");
                        }
                    }
                }

                if limit.is_some_and(|max| state.stats.total_messages as usize >= max) {
                    debug!("Message limit reached");
                    break 'batches;
                }
            }
        }

        if let Err(e) = self.store.flush().await {
            warn!(error = %e, "Store flush failed");
        }

        let mut summary = ScanSummary {
            status: ScanStatus::Completed,
            stats: state.stats,
            resolution: resolved.resolution,
            provenance: Some(provenance.clone()),
            duplicate_groups: 0,
            report_location: None,
        };

        if let Some(reason) = aborted {
            summary.status = ScanStatus::Failed(reason);
            info!(stats = ?summary.stats, "Scan aborted");
            return summary;
        }

        match self.finish(&provenance, &channel_info, &state, sink).await {
            Ok((groups, duplicates, location)) => {
                summary.duplicate_groups = groups;
                summary.stats.duplicates_found = duplicates;
                summary.report_location = location;
            }
            Err(e) => {
                warn!(error = %e, "Report generation failed");
                summary.status = ScanStatus::Failed(e.to_string());
            }
        }

        info!(
            total_messages = summary.stats.total_messages,
            processed_images = summary.stats.processed_images,
            duplicates_found = summary.stats.duplicates_found,
            errors = summary.stats.errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan finished"
        );
        summary
    }

    async fn finish(
        &self,
        provenance: &str,
        channel_info: &ChannelInfo,
        state: &ScanState,
        sink: &dyn ReportSink,
    ) -> Result<(u64, u64, Option<String>)> {
        let records = self.store.get_all_by_provenance(provenance).await?;
        let report = build_report(
            &records,
            &ReportContext {
                channel: channel_info,
                total_messages: state.stats.total_messages,
                processed_images: state.stats.processed_images,
                threshold_percent: self.config.similarity_threshold_percent,
                link_base_url: &self.config.link_base_url,
            },
        );
        let location = sink.write(&report).await?;
        Ok((
            report.stats.duplicate_groups,
            report.stats.total_duplicates,
            location,
        ))
    }

    /// Turn one photo message into a stored record. `Ok(false)` means the
    /// identity was already stored.
    async fn ingest(
        &self,
        message: &Message,
        resolved: &ResolvedSource,
        provenance: &str,
        channel_info: &ChannelInfo,
    ) -> Result<bool> {
        let media = message
            .media
            .as_ref()
            .ok_or_else(|| ImgdupError::SignatureComputation("message has no media".into()))?;

        let identity = record_identity(message);
        if self.store.contains(&identity).await? {
            return Ok(false);
        }

        let signature = match resolved.ingestion_mode {
            IngestionMode::Lightweight => structural_signature(media, self.config.hash_size),
            IngestionMode::WithDownload => {
                let bytes = resolved
                    .source
                    .download_bytes(message)
                    .await?
                    .ok_or_else(|| {
                        ImgdupError::SignatureComputation(format!(
                            "no bytes for message {}",
                            message.id
                        ))
                    })?;
                let (hash_size, method) = (self.config.hash_size, self.config.hash_method);
                tokio::task::spawn_blocking(move || compute_signature(&bytes, hash_size, method))
                    .await
                    .map_err(|e| {
                        ImgdupError::SignatureComputation(format!("hashing task failed: {e}"))
                    })??
            }
        };

        let similar = self
            .store
            .find_within(&signature, self.config.similarity_threshold_percent)
            .await?;
        if !similar.is_empty() {
            debug!(
                message_id = message.id,
                matches = similar.len(),
                "Near-duplicate of a recent image"
            );
        }

        let (width, height) = media
            .largest_variant()
            .map(|v| (i64::from(v.width), i64::from(v.height)))
            .unwrap_or((0, 0));

        let record = ImageRecord {
            identity,
            signature,
            source_message_id: message.id,
            source_chat_id: message.chat_id.clone(),
            author_id: message.author_id.clone(),
            byte_size: i64::try_from(media.byte_size).unwrap_or(i64::MAX),
            width,
            height,
            captured_at: message.timestamp,
            added_at: crate::store::now_timestamp(),
            provenance: provenance.to_string(),
            external_link: Some(message_link(
                &self.config.link_base_url,
                &message.chat_id,
                channel_info.username.as_deref(),
                message.id,
            )),
        };

        self.store.add(record).await
    }
}

/// Store key for a message's image: the source's unique file id when it has
/// one, otherwise the chat and message ids.
pub fn record_identity(message: &Message) -> String {
    message
        .media
        .as_ref()
        .and_then(|m| m.file_id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("{}:{}", message.chat_id, message.id))
}
