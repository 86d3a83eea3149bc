/*! Engine configuration.

One versioned config object drives indexing and search. The same config
is embedded into every segment at build time (`index_config.json`) so
that incremental builds can detect shape mismatches.

Runtime overrides come from `PLAGIO_*` environment variables; unknown
`PLAGIO_*` names are ignored with a warning.
!*/
use std::env;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::Error;

/// Mixing weights for the per-k score `w_k * (alpha*J + (1-alpha)*C)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub alpha: f64,
    pub w9: f64,
    pub w13: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            alpha: 0.60,
            w9: 0.90,
            w13: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub plag_thr: f64,
    pub partial_thr: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            plag_thr: 0.70,
            partial_thr: 0.30,
        }
    }
}

/// MinHash/LSH shape. Everything defaults to off; when off, no signature
/// or bucket memory is allocated anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinhashConfig {
    pub k: usize,
    pub rows: usize,
    pub seed: u64,
    pub use_lsh: bool,
    pub use_minhash_est: bool,
    pub store_sig: bool,
}

impl Default for MinhashConfig {
    fn default() -> Self {
        Self {
            k: 128,
            rows: 4,
            seed: 1337,
            use_lsh: false,
            use_minhash_est: false,
            store_sig: false,
        }
    }
}

impl MinhashConfig {
    /// Any of the three toggles forces signature computation at build time.
    pub fn wants_signatures(&self) -> bool {
        self.use_lsh || self.use_minhash_est || self.store_sig
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.rows == 0 || self.k % self.rows != 0 {
            return Err(Error::ConfigMismatch(format!(
                "K%rows!=0: K={}, rows={}",
                self.k, self.rows
            )));
        }
        Ok(())
    }
}

/// Index-side configuration, embedded into segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub w_min_doc: usize,
    pub w_min_query: usize,
    pub k_list: Vec<usize>,
    pub weights: Weights,
    pub thresholds: Thresholds,
    pub simhash_bonus: f64,
    pub hamming_bonus_bits: u32,
    pub fetch_per_k: usize,
    pub max_cands_doc: usize,
    pub fragments_for_top: usize,
    pub minhash: MinhashConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            w_min_doc: 8,
            w_min_query: 9,
            k_list: vec![9, 13],
            weights: Weights::default(),
            thresholds: Thresholds::default(),
            simhash_bonus: 0.02,
            hamming_bonus_bits: 6,
            fetch_per_k: 64,
            max_cands_doc: 1000,
            fragments_for_top: 1,
            minhash: MinhashConfig::default(),
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.w_min_doc == 0 || self.w_min_query == 0 {
            return Err(Error::ConfigMismatch(
                "w_min_doc/w_min_query must be >= 1".to_string(),
            ));
        }
        if self.k_list != [9, 13] {
            return Err(Error::ConfigMismatch(format!(
                "unsupported k_list {:?} (authoritative set is [9, 13])",
                self.k_list
            )));
        }
        self.minhash.validate()
    }

    /// Digest of the canonical JSON form, recorded in segment manifests.
    pub fn digest(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut h = Sha1::new();
        h.update(json.as_bytes());
        let d = h.finalize();
        d.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Segments built with a different MinHash shape cannot be searched
    /// or extended with this config.
    pub fn check_compatible(&self, other: &IndexConfig) -> Result<(), Error> {
        if self.minhash.k != other.minhash.k
            || self.minhash.rows != other.minhash.rows
            || self.minhash.seed != other.minhash.seed
            || self.minhash.store_sig != other.minhash.store_sig
        {
            return Err(Error::ConfigMismatch(format!(
                "minhash shape changed: have K={} rows={} seed={} store_sig={}, \
                 segment was built with K={} rows={} seed={} store_sig={}",
                self.minhash.k,
                self.minhash.rows,
                self.minhash.seed,
                self.minhash.store_sig,
                other.minhash.k,
                other.minhash.rows,
                other.minhash.seed,
                other.minhash.store_sig,
            )));
        }
        Ok(())
    }
}

/// Engine-wide configuration: sharding, compaction fan-in, worker sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub n_shards: u16,
    pub docs_per_l1: usize,
    pub segments_per_l2: usize,
    pub segments_per_l3: usize,
    pub segments_per_l4: usize,
    pub max_auto_level: u8,
    pub backlog_max: usize,
    pub worker_threads: usize,
    pub final_top: usize,
    /// OCR languages handed to the (external) extraction side. Recorded
    /// only; the engine itself is text-in / hits-out.
    pub ocr_lang: String,
    pub index: IndexConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_shards: 1,
            docs_per_l1: 10,
            segments_per_l2: 10,
            segments_per_l3: 10,
            segments_per_l4: 10,
            max_auto_level: 4,
            backlog_max: 64,
            worker_threads: num_cpus::get(),
            final_top: 5,
            ocr_lang: "kaz+rus+eng".to_string(),
            index: IndexConfig::default(),
        }
    }
}

/// Level used by the monolith bulk rebuild; never auto-compacted.
pub const MONOLITH_LEVEL: u8 = 5;

const KNOWN_ENV: &[&str] = &[
    "PLAGIO_ROOT",
    "PLAGIO_N_SHARDS",
    "PLAGIO_DOCS_PER_L1",
    "PLAGIO_SEGMENTS_PER_L2",
    "PLAGIO_SEGMENTS_PER_L3",
    "PLAGIO_SEGMENTS_PER_L4",
    "PLAGIO_MAX_AUTO_LEVEL",
    "PLAGIO_BACKLOG_MAX",
    "PLAGIO_WORKER_THREADS",
    "PLAGIO_MINHASH_K",
    "PLAGIO_MINHASH_ROWS",
    "PLAGIO_MINHASH_SEED",
    "PLAGIO_MINHASH_USE_LSH",
    "PLAGIO_MINHASH_USE_EST",
    "PLAGIO_MINHASH_STORE_SIG",
    "PLAGIO_OCR_LANG",
];

fn env_bool(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y")
}

fn env_parse<T: std::str::FromStr>(key: &str, into: &mut T) {
    if let Ok(v) = env::var(key) {
        match v.parse::<T>() {
            Ok(parsed) => *into = parsed,
            Err(_) => warn!("ignoring unparsable {}={:?}", key, v),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `PLAGIO_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        env_parse("PLAGIO_N_SHARDS", &mut cfg.n_shards);
        env_parse("PLAGIO_DOCS_PER_L1", &mut cfg.docs_per_l1);
        env_parse("PLAGIO_SEGMENTS_PER_L2", &mut cfg.segments_per_l2);
        env_parse("PLAGIO_SEGMENTS_PER_L3", &mut cfg.segments_per_l3);
        env_parse("PLAGIO_SEGMENTS_PER_L4", &mut cfg.segments_per_l4);
        env_parse("PLAGIO_MAX_AUTO_LEVEL", &mut cfg.max_auto_level);
        env_parse("PLAGIO_BACKLOG_MAX", &mut cfg.backlog_max);
        env_parse("PLAGIO_WORKER_THREADS", &mut cfg.worker_threads);
        env_parse("PLAGIO_MINHASH_K", &mut cfg.index.minhash.k);
        env_parse("PLAGIO_MINHASH_ROWS", &mut cfg.index.minhash.rows);
        env_parse("PLAGIO_MINHASH_SEED", &mut cfg.index.minhash.seed);
        if let Ok(v) = env::var("PLAGIO_MINHASH_USE_LSH") {
            cfg.index.minhash.use_lsh = env_bool(&v);
        }
        if let Ok(v) = env::var("PLAGIO_MINHASH_USE_EST") {
            cfg.index.minhash.use_minhash_est = env_bool(&v);
        }
        if let Ok(v) = env::var("PLAGIO_MINHASH_STORE_SIG") {
            cfg.index.minhash.store_sig = env_bool(&v);
        }
        if let Ok(v) = env::var("PLAGIO_OCR_LANG") {
            cfg.ocr_lang = v;
        }

        for (key, _) in env::vars() {
            if key.starts_with("PLAGIO_") && !KNOWN_ENV.contains(&key.as_str()) {
                warn!("unknown option {} ignored", key);
            }
        }
        cfg
    }

    /// Compaction fan-in for `level -> level+1`.
    pub fn segments_per_compact(&self, level: u8) -> usize {
        match level {
            1 => self.segments_per_l2,
            2 => self.segments_per_l3,
            3 => self.segments_per_l4,
            _ => self.segments_per_l2,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.n_shards == 0 {
            return Err(Error::ConfigMismatch("n_shards must be >= 1".to_string()));
        }
        if self.max_auto_level == 0 || self.max_auto_level >= MONOLITH_LEVEL {
            return Err(Error::ConfigMismatch(format!(
                "max_auto_level {} out of range 1..{}",
                self.max_auto_level, MONOLITH_LEVEL
            )));
        }
        self.index.validate()
    }
}

/// Directory layout under the engine root.
#[derive(Debug, Clone)]
pub struct RootPaths {
    pub root: PathBuf,
}

impl RootPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn from_env_or<P: AsRef<Path>>(fallback: P) -> Self {
        match env::var("PLAGIO_ROOT") {
            Ok(v) => Self::new(v),
            Err(_) => Self::new(fallback),
        }
    }

    pub fn corpus_dir(&self) -> PathBuf {
        self.root.join("corpus")
    }

    pub fn corpus_jsonl(&self) -> PathBuf {
        self.corpus_dir().join("corpus.jsonl")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.index_dir().join("catalog.json")
    }

    pub fn shard_dir(&self, shard_id: u16) -> PathBuf {
        self.index_dir().join(format!("shard_{}", shard_id))
    }

    pub fn manifest_path(&self, shard_id: u16) -> PathBuf {
        self.shard_dir(shard_id).join("manifest.json")
    }

    pub fn segment_dir(&self, shard_id: u16, segment_id: u64) -> PathBuf {
        self.shard_dir(shard_id).join(format!("segment_{}", segment_id))
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    /// Create every directory the engine expects.
    pub fn ensure(&self) -> Result<(), Error> {
        std::fs::create_dir_all(self.corpus_dir())?;
        std::fs::create_dir_all(self.index_dir())?;
        std::fs::create_dir_all(self.queue_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.index.w_min_doc, 8);
        assert_eq!(cfg.index.w_min_query, 9);
        assert_eq!(cfg.index.k_list, vec![9, 13]);
        assert_eq!(cfg.index.weights.alpha, 0.60);
        assert_eq!(cfg.index.weights.w9, 0.90);
        assert_eq!(cfg.index.weights.w13, 0.85);
        assert_eq!(cfg.index.thresholds.plag_thr, 0.70);
        assert_eq!(cfg.index.thresholds.partial_thr, 0.30);
        assert_eq!(cfg.index.minhash.k, 128);
        assert!(!cfg.index.minhash.use_lsh);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_lsh_shape_rejected() {
        let mut cfg = IndexConfig::default();
        cfg.minhash.k = 126;
        cfg.minhash.rows = 4;
        assert!(matches!(cfg.validate(), Err(Error::ConfigMismatch(_))));
    }

    #[test]
    fn test_digest_changes_with_config() {
        let a = IndexConfig::default();
        let mut b = IndexConfig::default();
        b.fetch_per_k = 32;
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), IndexConfig::default().digest());
    }

    #[test]
    fn test_minhash_shape_compat() {
        let a = IndexConfig::default();
        let mut b = IndexConfig::default();
        assert!(a.check_compatible(&b).is_ok());
        b.minhash.seed = 7;
        assert!(matches!(
            a.check_compatible(&b),
            Err(Error::ConfigMismatch(_))
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_env_overrides_and_unknowns_ignored() {
        env::set_var("PLAGIO_DOCS_PER_L1", "17");
        env::set_var("PLAGIO_MINHASH_USE_LSH", "yes");
        env::set_var("PLAGIO_SOMETHING_ELSE", "1");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.docs_per_l1, 17);
        assert!(cfg.index.minhash.use_lsh);
        env::remove_var("PLAGIO_DOCS_PER_L1");
        env::remove_var("PLAGIO_MINHASH_USE_LSH");
        env::remove_var("PLAGIO_SOMETHING_ELSE");
        assert_eq!(EngineConfig::from_env().docs_per_l1, 10);
    }

    #[test]
    fn test_segments_per_compact_levels() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.segments_per_compact(1), 10);
        assert_eq!(cfg.segments_per_compact(3), 10);
        // out-of-range levels fall back to the L2 setting
        assert_eq!(cfg.segments_per_compact(9), cfg.segments_per_l2);
    }
}
