/*! Task records.

A task is one JSON file in `queue/<task_type>/`. States map to file
names: `job_*.json` is pending, `job_*.lock` is running, `job_*.failed`
is failed with the error embedded. Done tasks are removed.
!*/
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::io::CorpusRecord;
use crate::store::now_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    EtlDoc,
    BuildL1Segment,
    CompactLevel,
    RebuildL5Monolith,
}

impl TaskType {
    pub fn dir_name(self) -> &'static str {
        match self {
            TaskType::EtlDoc => "etl_doc",
            TaskType::BuildL1Segment => "build_l1_segment",
            TaskType::CompactLevel => "compact_level",
            TaskType::RebuildL5Monolith => "rebuild_l5_monolith",
        }
    }

    /// Polling order: compaction ahead of new builds (back-pressure),
    /// and ingest ahead of the builds it feeds.
    pub const POLL_ORDER: [TaskType; 4] = [
        TaskType::CompactLevel,
        TaskType::RebuildL5Monolith,
        TaskType::EtlDoc,
        TaskType::BuildL1Segment,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: u64,
}

impl Task {
    pub fn new(task_type: TaskType, payload: serde_json::Value) -> Self {
        Self {
            task_type,
            payload,
            attempts: 0,
            last_error: None,
            created_at: now_secs(),
        }
    }
}

/// A claimed (renamed to `.lock`) task.
#[derive(Debug)]
pub struct ClaimedTask {
    pub task: Task,
    pub lock_path: PathBuf,
}

// Typed payloads.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlDocPayload {
    pub shard_id: u16,
    pub record: CorpusRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildL1Payload {
    pub shard_id: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactLevelPayload {
    pub shard_id: u16,
    pub level: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonolithPayload {
    pub shard_id: u16,
}
