/*! Catalog row types.

Documents, segments and their links, plus the index-error log. All rows
are serde structs persisted inside the catalog snapshot.
!*/
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Document lifecycle. Advances monotonically except on error, which is
/// retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    Uploaded,
    Normalized,
    Indexed,
    Retired,
    Error,
}

impl DocStatus {
    fn rank(self) -> u8 {
        match self {
            DocStatus::Uploaded => 0,
            DocStatus::Normalized => 1,
            DocStatus::Indexed => 2,
            DocStatus::Retired => 3,
            DocStatus::Error => 0,
        }
    }

    /// Legal forward move (or a drop into/out of the retryable error
    /// state).
    pub fn can_advance_to(self, next: DocStatus) -> bool {
        next == DocStatus::Error || self == DocStatus::Error || next.rank() >= self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Building,
    Ready,
    Merged,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub shard_id: u16,
    pub status: DocStatus,
    pub current_segment_id: Option<u64>,
    pub simhash_hi: u64,
    pub simhash_lo: u64,
    pub tok_len: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub segment_id: u64,
    pub shard_id: u16,
    pub level: u8,
    pub status: SegmentStatus,
    /// Opaque handle, relative to the index root.
    pub path: String,
    pub doc_count: u32,
    pub shingle_count: u64,
    pub size_bytes: u64,
    pub checksum_bin: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_compacted_at: Option<u64>,
    /// Reservation by a running compactor; reserved rows are skipped by
    /// concurrent [lock_for_compaction] calls.
    #[serde(default)]
    pub reserved: bool,
}

/// `(segment_id, document_id, shard_id)` link row. Exactly one `ready`
/// segment holds the authoritative copy of any live document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDocRow {
    pub segment_id: u64,
    pub document_id: String,
    pub shard_id: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexErrorRecord {
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<u64>,
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_monotonic() {
        assert!(DocStatus::Uploaded.can_advance_to(DocStatus::Normalized));
        assert!(DocStatus::Normalized.can_advance_to(DocStatus::Indexed));
        assert!(DocStatus::Indexed.can_advance_to(DocStatus::Indexed));
        assert!(!DocStatus::Indexed.can_advance_to(DocStatus::Uploaded));
        // error is retryable in both directions
        assert!(DocStatus::Indexed.can_advance_to(DocStatus::Error));
        assert!(DocStatus::Error.can_advance_to(DocStatus::Normalized));
    }
}
