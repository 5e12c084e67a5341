//! Bounded in-memory working set.

use std::collections::VecDeque;

use super::ImageRecord;

/// Records ordered by `added_at`, oldest at the front, capped at `capacity`.
#[derive(Debug)]
pub(crate) struct WorkingSet {
    records: VecDeque<ImageRecord>,
    capacity: usize,
}

impl WorkingSet {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
        }
    }

    /// Admit a record, then evict the oldest entries beyond capacity.
    ///
    /// Returns the number of records evicted.
    pub(crate) fn admit(&mut self, record: ImageRecord) -> usize {
        // RFC 3339 UTC timestamps with fixed precision sort lexicographically.
        let pos = self
            .records
            .partition_point(|r| r.added_at <= record.added_at);
        self.records.insert(pos, record);

        let mut evicted = 0;
        while self.records.len() > self.capacity {
            self.records.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub(crate) fn remove(&mut self, identity: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.identity != identity);
        self.records.len() != before
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }
}
