//! Retention-capped capture record log
//!
//! Records are kept ordered by timestamp, newest first. Appending beyond the
//! limit evicts the oldest rows. Image files referenced by evicted or deleted
//! rows are left alone; whoever removes a row decides what happens to its file.

use crate::types::{CaptureRecord, Identity};

/// Maximum number of capture records retained
pub const MAX_RECORDS: usize = 100;

/// Ordered, bounded collection of capture records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLog {
    records: Vec<CaptureRecord>,
    limit: usize,
}

impl Default for RecordLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordLog {
    pub fn new() -> Self {
        Self::with_limit(MAX_RECORDS)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            records: Vec::new(),
            limit,
        }
    }

    /// Rebuild a log from persisted rows, enforcing order and the limit
    pub fn from_records(mut records: Vec<CaptureRecord>, limit: usize) -> Self {
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Self { records, limit }
    }

    /// Insert a record and evict overflow; returns the evicted rows.
    ///
    /// A record with an existing id replaces that row.
    pub fn append(&mut self, record: CaptureRecord) -> Vec<CaptureRecord> {
        self.records.retain(|r| r.id != record.id);
        let position = self
            .records
            .partition_point(|r| r.timestamp >= record.timestamp);
        self.records.insert(position, record);

        if self.records.len() > self.limit {
            self.records.split_off(self.limit)
        } else {
            Vec::new()
        }
    }

    /// All records, newest first
    pub fn list(&self) -> &[CaptureRecord] {
        &self.records
    }

    /// Records whose subject is `identity_id`, newest first
    pub fn for_subject(&self, identity_id: &str) -> Vec<CaptureRecord> {
        self.records
            .iter()
            .filter(|r| r.subject.id == identity_id)
            .cloned()
            .collect()
    }

    /// Records with `start_ms <= timestamp <= end_ms`, newest first
    pub fn between(&self, start_ms: u64, end_ms: u64) -> Vec<CaptureRecord> {
        self.records
            .iter()
            .filter(|r| r.timestamp >= start_ms && r.timestamp <= end_ms)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<&CaptureRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Remove one row
    pub fn remove(&mut self, id: u64) -> Option<CaptureRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    /// Remove every row
    pub fn clear(&mut self) -> Vec<CaptureRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Next record id: the capture time in milliseconds, bumped past any
    /// existing id so ids stay unique and increasing
    pub fn next_id(&self, now_ms: u64) -> u64 {
        let max_id = self.records.iter().map(|r| r.id).max().unwrap_or(0);
        now_ms.max(max_id.saturating_add(1))
    }

    /// Build and append a record for a capture taken at `now_ms`
    pub fn record(
        &mut self,
        subject: Identity,
        image_path: Option<String>,
        attempt_count: u32,
        now_ms: u64,
    ) -> (CaptureRecord, Vec<CaptureRecord>) {
        let record = CaptureRecord {
            id: self.next_id(now_ms),
            image_path,
            subject,
            timestamp: now_ms,
            attempt_count,
        };
        let evicted = self.append(record.clone());
        (record, evicted)
    }

    pub fn into_records(self) -> Vec<CaptureRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, ts: u64, subject: &str) -> CaptureRecord {
        CaptureRecord {
            id,
            image_path: None,
            subject: Identity::unlabeled(subject),
            timestamp: ts,
            attempt_count: 1,
        }
    }

    #[test]
    fn test_list_newest_first() {
        let mut log = RecordLog::new();
        log.append(record(1, 10, "com.a"));
        log.append(record(2, 30, "com.a"));
        log.append(record(3, 20, "com.b"));
        let timestamps: Vec<u64> = log.list().iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![30, 20, 10]);
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let mut log = RecordLog::with_limit(2);
        assert!(log.append(record(1, 10, "com.a")).is_empty());
        assert!(log.append(record(2, 20, "com.a")).is_empty());
        let evicted = log.append(record(3, 30, "com.a"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, 1);
        assert_eq!(log.len(), 2);

        // An older record than everything retained is evicted immediately
        let evicted = log.append(record(4, 5, "com.a"));
        assert_eq!(evicted[0].id, 4);
    }

    #[test]
    fn test_duplicate_id_replaces() {
        let mut log = RecordLog::new();
        log.append(record(1, 10, "com.a"));
        log.append(record(1, 15, "com.b"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.get(1).unwrap().subject.id, "com.b");
    }

    #[test]
    fn test_queries() {
        let mut log = RecordLog::new();
        log.append(record(1, 10, "com.a"));
        log.append(record(2, 20, "com.b"));
        log.append(record(3, 30, "com.a"));

        let for_a: Vec<u64> = log.for_subject("com.a").iter().map(|r| r.id).collect();
        assert_eq!(for_a, vec![3, 1]);

        let window: Vec<u64> = log.between(15, 30).iter().map(|r| r.id).collect();
        assert_eq!(window, vec![3, 2]);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut log = RecordLog::new();
        log.append(record(1, 10, "com.a"));
        log.append(record(2, 20, "com.a"));
        assert_eq!(log.remove(1).unwrap().id, 1);
        assert!(log.remove(1).is_none());
        assert_eq!(log.clear().len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_next_id_monotonic() {
        let mut log = RecordLog::new();
        let (first, _) = log.record(Identity::unlabeled("com.a"), None, 1, 1_000);
        let (second, _) = log.record(Identity::unlabeled("com.a"), None, 2, 1_000);
        let (third, _) = log.record(Identity::unlabeled("com.a"), None, 3, 900);
        assert_eq!(first.id, 1_000);
        assert_eq!(second.id, 1_001);
        assert_eq!(third.id, 1_002);
    }

    #[test]
    fn test_from_records_enforces_limit() {
        let rows = (0..5).map(|i| record(i, i * 10, "com.a")).collect();
        let log = RecordLog::from_records(rows, 3);
        let ids: Vec<u64> = log.list().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }
}
