/*! Shard manifest.

One `manifest.json` per shard root lists the live (ready) segments with
their levels and checksums. Publication is atomic: temp file, fsync,
rename. Readers that race a publish see either the old or the new list.
!*/
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::RootPaths;
use crate::error::Error;
use crate::io::write_json_atomic;
use crate::store::types::SegmentRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub segment_id: u64,
    pub level: u8,
    pub path: String,
    pub doc_count: u32,
    pub checksum_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardManifest {
    pub shard_id: u16,
    pub generation: u64,
    pub segments: Vec<ManifestEntry>,
}

/// Rewrite the manifest from the current set of ready segments.
pub fn write_manifest(
    paths: &RootPaths,
    shard_id: u16,
    generation: u64,
    ready: &[&SegmentRecord],
) -> Result<(), Error> {
    let manifest = ShardManifest {
        shard_id,
        generation,
        segments: ready
            .iter()
            .map(|s| ManifestEntry {
                segment_id: s.segment_id,
                level: s.level,
                path: s.path.clone(),
                doc_count: s.doc_count,
                checksum_bin: s.checksum_bin.clone(),
            })
            .collect(),
    };
    std::fs::create_dir_all(paths.shard_dir(shard_id))?;
    write_json_atomic(&paths.manifest_path(shard_id), &manifest)
}

pub fn read_manifest(path: &Path) -> Result<ShardManifest, Error> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
