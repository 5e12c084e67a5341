//! Mock message source for testing.
//!
//! Serves a fixed, in-memory channel history with the same cursor semantics
//! as the network adapters. Failures and latency can be injected to exercise
//! the scanner's abort and busy paths.
//! WARNING: Do not use in production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{ChannelInfo, Media, Message, MessageSource, SourceKind};
use crate::error::{ImgdupError, Result};

/// In-memory message source.
pub struct MockSource {
    info: ChannelInfo,
    /// Newest first.
    messages: Vec<Message>,
    bytes: HashMap<i64, Vec<u8>>,
    admin: bool,
    fail_on_fetch: Option<usize>,
    fail_downloads: bool,
    fetch_delay: Option<Duration>,
    fetches: AtomicUsize,
    cursors: Mutex<Vec<Option<i64>>>,
    fetch_times: Mutex<Vec<Instant>>,
}

impl MockSource {
    pub fn new(channel: &str) -> Self {
        Self {
            info: ChannelInfo::from_identity(channel),
            messages: Vec::new(),
            bytes: HashMap::new(),
            admin: false,
            fail_on_fetch: None,
            fail_downloads: false,
            fetch_delay: None,
            fetches: AtomicUsize::new(0),
            cursors: Mutex::new(Vec::new()),
            fetch_times: Mutex::new(Vec::new()),
        }
    }

    /// Add messages in any order; they are served newest first.
    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self.messages.sort_by(|a, b| b.id.cmp(&a.id));
        self
    }

    /// Photo message whose download yields `bytes`.
    pub fn with_photo(self, id: i64, timestamp: i64, bytes: Vec<u8>) -> Self {
        let chat_id = self.info.id.clone();
        let media = Media::photo(format!("file-{id}"), bytes.len() as u64, 0, 0);
        let mut source = self.with_messages([Message::photo(id, timestamp, chat_id, media)]);
        source.bytes.insert(id, bytes);
        source
    }

    pub fn with_bytes(mut self, message_id: i64, bytes: Vec<u8>) -> Self {
        self.bytes.insert(message_id, bytes);
        self
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Fail the `n`-th call to `fetch_batch` (1-based) and every call after it.
    pub fn fail_on_fetch(mut self, n: usize) -> Self {
        self.fail_on_fetch = Some(n);
        self
    }

    /// Make every download fail.
    pub fn fail_downloads(mut self) -> Self {
        self.fail_downloads = true;
        self
    }

    /// Sleep before answering each fetch.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Number of `fetch_batch` calls served so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Cursors passed to `fetch_batch`, in call order.
    pub fn cursors(&self) -> Vec<Option<i64>> {
        self.cursors
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Clock readings taken as each `fetch_batch` call arrived.
    pub fn fetch_times(&self) -> Vec<Instant> {
        self.fetch_times
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageSource for MockSource {
    async fn fetch_batch(
        &self,
        _channel: &str,
        limit: usize,
        offset_cursor: Option<i64>,
    ) -> Result<Vec<Message>> {
        let call = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.push(offset_cursor);
        }
        if let Ok(mut times) = self.fetch_times.lock() {
            times.push(Instant::now());
        }

        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_on_fetch.is_some_and(|n| call >= n) {
            return Err(ImgdupError::SourceUnavailable(format!(
                "mock fetch {call} failed"
            )));
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
        Ok(self.admin)
    }

    async fn download_bytes(&self, message: &Message) -> Result<Option<Vec<u8>>> {
        if self.fail_downloads {
            return Err(ImgdupError::SourceUnavailable(format!(
                "mock download of message {} failed",
                message.id
            )));
        }
        Ok(self.bytes.get(&message.id).cloned())
    }

    async fn channel_info(&self, _channel: &str) -> Result<ChannelInfo> {
        Ok(self.info.clone())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> MockSource {
        MockSource::new("@mock").with_messages((1..=5).map(|id| Message::text(id, id * 10, "mock")))
    }

    #[tokio::test]
    async fn test_newest_first_with_cursor() {
        let source = history();

        let first = source.fetch_batch("@mock", 2, None).await.unwrap();
        assert_eq!(first.iter().map(|m| m.id).collect::<Vec<_>>(), vec![5, 4]);

        let second = source.fetch_batch("@mock", 2, Some(4)).await.unwrap();
        assert_eq!(second.iter().map(|m| m.id).collect::<Vec<_>>(), vec![3, 2]);

        let last = source.fetch_batch("@mock", 2, Some(1)).await.unwrap();
        assert!(last.is_empty());

        assert_eq!(source.fetch_count(), 3);
        assert_eq!(source.cursors(), vec![None, Some(4), Some(1)]);
    }

    #[tokio::test]
    async fn test_fail_on_fetch() {
        let source = history().fail_on_fetch(2);
        assert!(source.fetch_batch("@mock", 2, None).await.is_ok());
        let err = source.fetch_batch("@mock", 2, Some(4)).await.unwrap_err();
        assert!(matches!(err, ImgdupError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_photo_bytes() {
        let source = MockSource::new("@mock").with_photo(7, 70, vec![1, 2, 3]);
        let batch = source.fetch_batch("@mock", 10, None).await.unwrap();
        assert!(batch[0].is_photo());
        assert_eq!(
            source.download_bytes(&batch[0]).await.unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_admin_flag_and_kind() {
        let source = MockSource::new("@mock").with_admin(true);
        assert!(source.is_admin("@mock").await.unwrap());
        assert_eq!(source.kind(), SourceKind::Mock);
        assert_eq!(
            source.channel_info("@mock").await.unwrap().username.as_deref(),
            Some("mock")
        );
    }
}
