/*! Segment building.

Takes a batch of corpus records and produces one immutable segment
bundle: postings for k=9/k=13, doc meta, doc-id table, JSON sidecars.
Per-document work (normalize, shingle, fingerprint) runs on rayon with an
order-preserving collect, so `internal_id` assignment follows input order
and rebuilding the same batch yields byte-identical files.
!*/
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;

use crate::config::IndexConfig;
use crate::error::Error;
use crate::io::{write_json_atomic, CorpusRecord};
use crate::segment::format::{
    self, DocMeta, DocMetaJson, Posting, SegmentData, SegmentMeta, SegmentStats, SignatureBlock,
    BIN_FILE, CONFIG_FILE, DOCIDS_FILE, META_FILE,
};
use crate::text::{normalize, shingle_set, simhash128, MinHasher, SimHash128};

/// Why a document was left out of the segment.
pub const CODE_TOO_SHORT: &str = "TOO_SHORT";
pub const CODE_NO_SHINGLES: &str = "NO_SHINGLES";

#[derive(Debug, Clone)]
pub struct BuiltDoc {
    pub doc_id: String,
    pub internal_id: u32,
    pub tok_len: u32,
    pub simhash: SimHash128,
}

#[derive(Debug, Clone)]
pub struct SkippedDoc {
    pub doc_id: String,
    pub code: &'static str,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub stats: SegmentStats,
    pub accepted: Vec<BuiltDoc>,
    pub skipped: Vec<SkippedDoc>,
}

struct DocProduct {
    record_idx: usize,
    tok_len: u32,
    s9: Vec<u64>,
    s13: Vec<u64>,
    simhash: SimHash128,
    signature: Option<Vec<u32>>,
}

pub struct SegmentBuilder<'a> {
    cfg: &'a IndexConfig,
}

impl<'a> SegmentBuilder<'a> {
    pub fn new(cfg: &'a IndexConfig) -> Result<Self, Error> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    /// Build the segment bundle under `out_dir`. A failed build removes
    /// whatever was partially written and leaves the error to the caller.
    pub fn build(&self, records: &[CorpusRecord], out_dir: &Path) -> Result<BuildOutcome, Error> {
        match self.try_build(records, out_dir) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let _ = std::fs::remove_dir_all(out_dir);
                Err(e)
            }
        }
    }

    fn try_build(&self, records: &[CorpusRecord], out_dir: &Path) -> Result<BuildOutcome, Error> {
        std::fs::create_dir_all(out_dir)?;

        let minhash = &self.cfg.minhash;
        let hasher = if minhash.wants_signatures() {
            Some(MinHasher::new(minhash.k, minhash.seed))
        } else {
            None
        };
        let w_min_doc = self.cfg.w_min_doc;

        let products: Vec<Result<DocProduct, SkippedDoc>> = records
            .par_iter()
            .enumerate()
            .map(|(idx, rec)| {
                let tokens = normalize(&rec.text);
                if tokens.len() < w_min_doc {
                    return Err(SkippedDoc {
                        doc_id: rec.doc_id.clone(),
                        code: CODE_TOO_SHORT,
                    });
                }
                let s9 = shingle_set(&tokens, 9);
                let s13 = shingle_set(&tokens, 13);
                if s9.is_empty() && s13.is_empty() {
                    return Err(SkippedDoc {
                        doc_id: rec.doc_id.clone(),
                        code: CODE_NO_SHINGLES,
                    });
                }
                let signature = hasher.as_ref().map(|h| {
                    let base = if !s9.is_empty() { &s9 } else { &s13 };
                    h.signature(base)
                });
                Ok(DocProduct {
                    record_idx: idx,
                    tok_len: tokens.len() as u32,
                    simhash: simhash128(&tokens),
                    s9,
                    s13,
                    signature,
                })
            })
            .collect();

        let mut accepted = Vec::new();
        let mut skipped = Vec::new();
        let mut doc_ids = Vec::new();
        let mut meta = Vec::new();
        let mut post9: Vec<Posting> = Vec::new();
        let mut post13: Vec<Posting> = Vec::new();
        let mut docs_meta_json = BTreeMap::new();
        let mut sig_flat: Vec<u32> = Vec::new();
        let mut tok_total: u64 = 0;

        for product in products {
            let product = match product {
                Ok(p) => p,
                Err(skip) => {
                    debug!("doc {} skipped: {}", skip.doc_id, skip.code);
                    skipped.push(skip);
                    continue;
                }
            };
            let rec = &records[product.record_idx];
            let internal_id = doc_ids.len() as u32;

            for h in &product.s9 {
                post9.push((*h, internal_id));
            }
            for h in &product.s13 {
                post13.push((*h, internal_id));
            }
            if let Some(sig) = &product.signature {
                sig_flat.extend_from_slice(sig);
            }
            tok_total += product.tok_len as u64;

            docs_meta_json.insert(
                rec.doc_id.clone(),
                DocMetaJson {
                    tok_len: product.tok_len,
                    simhash128: product.simhash.to_hex(),
                    title: rec.title.clone(),
                    author: rec.author.clone(),
                },
            );
            accepted.push(BuiltDoc {
                doc_id: rec.doc_id.clone(),
                internal_id,
                tok_len: product.tok_len,
                simhash: product.simhash,
            });
            doc_ids.push(rec.doc_id.clone());
            meta.push(DocMeta {
                tok_len: product.tok_len,
                simhash: product.simhash,
            });
        }

        if doc_ids.is_empty() {
            return Err(Error::BadInput(
                "no indexable documents in batch".to_string(),
            ));
        }

        post9.sort_unstable();
        post9.dedup();
        post13.sort_unstable();
        post13.dedup();
        let n_docs = doc_ids.len() as u32;
        format::validate_postings("post9", &post9, n_docs)?;
        format::validate_postings("post13", &post13, n_docs)?;

        let signatures = if minhash.store_sig && hasher.is_some() {
            Some(SignatureBlock {
                k: minhash.k as u32,
                rows: minhash.rows as u32,
                sig: sig_flat,
            })
        } else {
            None
        };

        let data = SegmentData {
            doc_ids,
            meta,
            post9,
            post13,
            signatures,
        };
        let bin = format::encode_bin(&data);

        let mut stats = SegmentStats {
            n_docs,
            k9: data.post9.len() as u64,
            k13: data.post13.len() as u64,
            tok_total,
            size_bytes: 0,
            checksum_bin: format::sha1_hex(&bin),
            config_digest: self.cfg.digest(),
        };

        let bin_path = out_dir.join(BIN_FILE);
        let mut f = File::create(&bin_path)?;
        f.write_all(&bin)?;
        f.sync_all()?;
        drop(f);

        write_json_atomic(&out_dir.join(DOCIDS_FILE), &data.doc_ids)?;
        write_json_atomic(&out_dir.join(CONFIG_FILE), self.cfg)?;

        let mut size_bytes = bin.len() as u64;
        size_bytes += std::fs::metadata(out_dir.join(DOCIDS_FILE))?.len();
        size_bytes += std::fs::metadata(out_dir.join(CONFIG_FILE))?.len();
        stats.size_bytes = size_bytes;

        let meta_json = SegmentMeta {
            docs_meta: docs_meta_json,
            config: self.cfg.clone(),
            stats: stats.clone(),
        };
        write_json_atomic(&out_dir.join(META_FILE), &meta_json)?;
        stats.size_bytes += std::fs::metadata(out_dir.join(META_FILE))?.len();

        info!(
            "built segment at {:?}: docs={}, post9={}, post13={}, skipped={}",
            out_dir,
            stats.n_docs,
            stats.k9,
            stats.k13,
            skipped.len()
        );

        Ok(BuildOutcome {
            stats,
            accepted,
            skipped,
        })
    }
}
