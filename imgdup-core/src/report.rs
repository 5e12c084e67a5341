//! Duplicate report builder and sinks.
//!
//! The report is a read-only view over the durable records: it groups them
//! by signature similarity and writes the result through a [`ReportSink`].

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::signature::group_by_similarity;
use crate::source::ChannelInfo;
use crate::store::ImageRecord;

/// Chat-id prefix marking a private-channel numeric identity.
pub const PRIVATE_CHANNEL_PREFIX: &str = "-100";

/// Full report artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub scan_date: String,
    pub channel_info: ChannelInfo,
    pub stats: ReportStats,
    pub duplicate_groups: Vec<ReportGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub total_messages: u64,
    pub processed_images: u64,
    pub duplicate_groups: u64,
    pub total_duplicates: u64,
}

/// One group of near-duplicate images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportGroup {
    pub signature: String,
    pub count: usize,
    pub original: ReportEntry,
    pub duplicates: Vec<ReportEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub message_id: i64,
    pub date: String,
    pub link: String,
}

/// Inputs to [`build_report`] besides the records themselves.
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub channel: &'a ChannelInfo,
    pub total_messages: u64,
    pub processed_images: u64,
    pub threshold_percent: u32,
    pub link_base_url: &'a str,
}

/// Deep link to a message.
///
/// Private-channel identities (`-100<id>`) link to `<base>/c/<id>/<message>`,
/// everything else to `<base>/<username-or-id>/<message>`.
pub fn message_link(base: &str, chat_id: &str, username: Option<&str>, message_id: i64) -> String {
    let base = base.trim_end_matches('/');
    match chat_id.strip_prefix(PRIVATE_CHANNEL_PREFIX) {
        Some(internal) if !internal.is_empty() && internal.chars().all(|c| c.is_ascii_digit()) => {
            format!("{base}/c/{internal}/{message_id}")
        }
        _ => {
            let handle = username.unwrap_or(chat_id).trim_start_matches('@');
            format!("{base}/{handle}/{message_id}")
        }
    }
}

fn format_date(captured_at: i64) -> String {
    DateTime::<Utc>::from_timestamp(captured_at, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn entry(record: &ImageRecord, ctx: &ReportContext<'_>) -> ReportEntry {
    let link = record.external_link.clone().unwrap_or_else(|| {
        message_link(
            ctx.link_base_url,
            &record.source_chat_id,
            ctx.channel.username.as_deref(),
            record.source_message_id,
        )
    });
    ReportEntry {
        message_id: record.source_message_id,
        date: record.captured_at.map(format_date).unwrap_or_default(),
        link,
    }
}

/// Group `records` (in ingestion order) into a duplicate report.
///
/// Records without a capture time are left out. Members of each group are
/// ordered by capture time, the earliest being the original, and groups are
/// ordered by size, largest first.
pub fn build_report(records: &[ImageRecord], ctx: &ReportContext<'_>) -> DuplicateReport {
    let dated: Vec<&ImageRecord> = records.iter().filter(|r| r.captured_at.is_some()).collect();
    let excluded = records.len() - dated.len();
    if excluded > 0 {
        debug!(excluded, "Records without capture time left out of grouping");
    }

    let mut groups: Vec<ReportGroup> = group_by_similarity(&dated, ctx.threshold_percent)
        .into_iter()
        .map(|members| {
            let signature = members[0].signature.clone();
            let mut members: Vec<&ImageRecord> = members.into_iter().copied().collect();
            members.sort_by_key(|r| (r.captured_at, r.source_message_id));

            let count = members.len();
            let original = entry(members[0], ctx);
            let duplicates = members[1..].iter().map(|r| entry(r, ctx)).collect();
            ReportGroup {
                signature,
                count,
                original,
                duplicates,
            }
        })
        .collect();
    groups.sort_by(|a, b| b.count.cmp(&a.count));

    let total_duplicates = groups.iter().map(|g| (g.count - 1) as u64).sum();
    DuplicateReport {
        scan_date: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        channel_info: ctx.channel.clone(),
        stats: ReportStats {
            total_messages: ctx.total_messages,
            processed_images: ctx.processed_images,
            duplicate_groups: groups.len() as u64,
            total_duplicates,
        },
        duplicate_groups: groups,
    }
}

/// Destination for finished reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist the report, returning where it went if that has a name.
    async fn write(&self, report: &DuplicateReport) -> Result<Option<String>>;
}

/// Writes each report as pretty JSON into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `duplicates_<channel>_<YYYYmmdd_HHMMSS>.json`
    pub fn file_name(channel: &ChannelInfo, at: DateTime<Utc>) -> String {
        let label: String = channel
            .username
            .as_deref()
            .unwrap_or(&channel.id)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("duplicates_{label}_{}.json", at.format("%Y%m%d_%H%M%S"))
    }
}

#[async_trait]
impl ReportSink for JsonFileSink {
    async fn write(&self, report: &DuplicateReport) -> Result<Option<String>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(Self::file_name(&report.channel_info, Utc::now()));
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, json).await?;
        info!(path = %path.display(), groups = report.duplicate_groups.len(), "Report written");
        Ok(Some(path.display().to_string()))
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<DuplicateReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<DuplicateReport> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<DuplicateReport> {
        self.reports.lock().ok().and_then(|r| r.last().cloned())
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn write(&self, report: &DuplicateReport) -> Result<Option<String>> {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, signature: &str, captured_at: Option<i64>) -> ImageRecord {
        let mut r = ImageRecord::new(format!("file-{id}"), signature);
        r.source_message_id = id;
        r.source_chat_id = "-1001234567890".into();
        r.captured_at = captured_at;
        r
    }

    fn channel() -> ChannelInfo {
        ChannelInfo {
            id: "-1001234567890".into(),
            title: Some("Photos".into()),
            username: None,
        }
    }

    fn ctx(channel: &ChannelInfo) -> ReportContext<'_> {
        ReportContext {
            channel,
            total_messages: 10,
            processed_images: 6,
            threshold_percent: 10,
            link_base_url: "https://t.me",
        }
    }

    #[test]
    fn test_private_channel_link() {
        let link = message_link("https://t.me", "-1001234567890", None, 55);
        assert!(link.ends_with("/c/1234567890/55"));
    }

    #[test]
    fn test_public_channel_link() {
        let link = message_link("https://t.me/", "mychannel", None, 10);
        assert_eq!(link, "https://t.me/mychannel/10");

        let by_username = message_link("https://t.me", "4242", Some("@mychannel"), 10);
        assert!(by_username.ends_with("/mychannel/10"));
    }

    #[test]
    fn test_groups_sorted_and_originals_earliest() {
        let records = vec![
            record(3, "aaaa", Some(300)),
            record(1, "aaaa", Some(100)),
            record(4, "ffff", Some(400)),
            record(2, "bbbb", Some(200)),
            record(5, "bbbb", Some(500)),
            record(6, "bbbb", Some(50)),
        ];
        let channel = channel();
        let report = build_report(&records, &ctx(&channel));

        assert_eq!(report.stats.duplicate_groups, 2);
        assert_eq!(report.stats.total_duplicates, 3);
        assert_eq!(report.stats.total_messages, 10);

        let largest = &report.duplicate_groups[0];
        assert_eq!(largest.count, 3);
        assert_eq!(largest.signature, "bbbb");
        assert_eq!(largest.original.message_id, 6);
        let dup_ids: Vec<i64> = largest.duplicates.iter().map(|e| e.message_id).collect();
        assert_eq!(dup_ids, vec![2, 5]);

        let pair = &report.duplicate_groups[1];
        assert_eq!(pair.original.message_id, 1);
        assert_eq!(pair.original.date, "1970-01-01T00:01:40Z");
        assert!(pair.original.link.ends_with("/c/1234567890/1"));
    }

    #[test]
    fn test_undated_records_excluded() {
        let records = vec![record(1, "aaaa", Some(100)), record(2, "aaaa", None)];
        let channel = channel();
        let report = build_report(&records, &ctx(&channel));
        assert!(report.duplicate_groups.is_empty());
        assert_eq!(report.stats.total_duplicates, 0);
    }

    #[test]
    fn test_stored_link_preferred() {
        let mut first = record(1, "aaaa", Some(100));
        first.external_link = Some("https://mirror.example/1".into());
        let records = vec![first, record(2, "aaaa", Some(200))];
        let channel = channel();
        let report = build_report(&records, &ctx(&channel));
        assert_eq!(
            report.duplicate_groups[0].original.link,
            "https://mirror.example/1"
        );
    }

    #[test]
    fn test_serialized_keys() {
        let records = vec![record(1, "aaaa", Some(100)), record(2, "aaaa", Some(200))];
        let channel = channel();
        let json = serde_json::to_value(build_report(&records, &ctx(&channel))).unwrap();

        assert!(json.get("scanDate").is_some());
        assert_eq!(json["channelInfo"]["title"], "Photos");
        assert_eq!(json["stats"]["processedImages"], 6);
        assert_eq!(json["stats"]["duplicateGroups"], 1);
        assert_eq!(json["duplicateGroups"][0]["count"], 2);
        assert_eq!(json["duplicateGroups"][0]["original"]["messageId"], 1);
        assert_eq!(json["duplicateGroups"][0]["duplicates"][0]["messageId"], 2);
    }

    #[test]
    fn test_file_name() {
        let at = DateTime::<Utc>::from_timestamp(1_709_287_200, 0).unwrap();
        let mut channel = channel();
        assert_eq!(
            JsonFileSink::file_name(&channel, at),
            "duplicates_-1001234567890_20240301_100000.json"
        );
        channel.username = Some("my.channel".into());
        assert_eq!(
            JsonFileSink::file_name(&channel, at),
            "duplicates_my_channel_20240301_100000.json"
        );
    }

    #[tokio::test]
    async fn test_json_file_sink_writes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("reports"));
        let channel = channel();
        let report = build_report(&[], &ctx(&channel));

        let location = sink.write(&report).await.unwrap().unwrap();
        let written: DuplicateReport =
            serde_json::from_slice(&std::fs::read(&location).unwrap()).unwrap();
        assert_eq!(written.channel_info, channel);
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = MemorySink::new();
        let channel = channel();
        assert!(sink.write(&build_report(&[], &ctx(&channel))).await.unwrap().is_none());
        assert_eq!(sink.reports().len(), 1);
        assert!(sink.last().is_some());
    }
}
