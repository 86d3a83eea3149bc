/*! Memory-mapped segment reader.

A `ready` segment is immutable, so readers hold an mmap and need no
locks. Opening validates the whole bundle: magic/version, checksum
against the recorded one, posting sortedness and id bounds. Anything off
is [Error::CorruptSegment] and the caller quarantines the segment.
!*/
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::config::IndexConfig;
use crate::error::Error;
use crate::segment::format::{
    self, Layout, SegmentMeta, SegmentStats, BIN_FILE, CONFIG_FILE, DOCIDS_FILE, DOC_META_LEN,
    META_FILE, POSTING_LEN,
};
use crate::text::{LshBuckets, SimHash128};

struct SigLayout {
    k: usize,
    rows: usize,
    off: usize,
}

pub struct SegmentReader {
    segment_id: u64,
    dir: PathBuf,
    mmap: Mmap,
    layout: Layout,
    doc_ids: Vec<String>,
    titles: Vec<Option<String>>,
    authors: Vec<Option<String>>,
    tok_len: Vec<u32>,
    simhash: Vec<SimHash128>,
    config: IndexConfig,
    stats: SegmentStats,
    sig: Option<SigLayout>,
    lsh: Option<LshBuckets>,
}

impl SegmentReader {
    pub fn open(dir: &Path, segment_id: u64) -> Result<Self, Error> {
        let meta_raw = std::fs::read(dir.join(META_FILE))?;
        let meta: SegmentMeta = serde_json::from_slice(&meta_raw)?;
        let config: IndexConfig = serde_json::from_slice(&std::fs::read(dir.join(CONFIG_FILE))?)?;
        let doc_ids: Vec<String> = serde_json::from_slice(&std::fs::read(dir.join(DOCIDS_FILE))?)?;

        let file = File::open(dir.join(BIN_FILE))?;
        let mmap = unsafe { Mmap::map(&file)? };

        let checksum = format::sha1_hex(&mmap);
        if checksum != meta.stats.checksum_bin {
            return Err(Error::CorruptSegment(format!(
                "checksum mismatch in {:?}: have {}, manifest says {}",
                dir, checksum, meta.stats.checksum_bin
            )));
        }

        let layout = format::parse_layout(&mmap)?;
        if doc_ids.len() != layout.n_docs as usize {
            return Err(Error::CorruptSegment(format!(
                "doc_ids table has {} entries, binary has {} docs",
                doc_ids.len(),
                layout.n_docs
            )));
        }

        let mut tok_len = Vec::with_capacity(layout.n_docs as usize);
        let mut simhash = Vec::with_capacity(layout.n_docs as usize);
        let mut at = layout.doc_meta_off;
        for _ in 0..layout.n_docs {
            tok_len.push(format::read_u32(&mmap, at));
            simhash.push(SimHash128 {
                hi: format::read_u64(&mmap, at + 4),
                lo: format::read_u64(&mmap, at + 12),
            });
            at += DOC_META_LEN;
        }

        Self::check_postings_section(&mmap, layout.post9_off, layout.n_post9, layout.n_docs, "post9")?;
        Self::check_postings_section(
            &mmap,
            layout.post13_off,
            layout.n_post13,
            layout.n_docs,
            "post13",
        )?;

        let sig = match layout.sig_off {
            None => None,
            Some(off) => {
                if mmap.len() < off + 8 {
                    return Err(Error::CorruptSegment(
                        "signature section truncated".to_string(),
                    ));
                }
                let k = format::read_u32(&mmap, off) as usize;
                let rows = format::read_u32(&mmap, off + 4) as usize;
                let want = off + 8 + layout.n_docs as usize * k * 4;
                if mmap.len() != want {
                    return Err(Error::CorruptSegment(format!(
                        "signature section size mismatch (k={})",
                        k
                    )));
                }
                if k != config.minhash.k || rows != config.minhash.rows {
                    return Err(Error::ConfigMismatch(format!(
                        "stored signatures are K={} rows={}, config says K={} rows={}",
                        k, rows, config.minhash.k, config.minhash.rows
                    )));
                }
                Some(SigLayout { k, rows, off: off + 8 })
            }
        };

        // title/author keyed by doc_id in the meta sidecar
        let mut titles = Vec::with_capacity(doc_ids.len());
        let mut authors = Vec::with_capacity(doc_ids.len());
        for did in &doc_ids {
            let extra = meta.docs_meta.get(did);
            titles.push(extra.and_then(|m| m.title.clone()));
            authors.push(extra.and_then(|m| m.author.clone()));
        }

        let mut reader = Self {
            segment_id,
            dir: dir.to_path_buf(),
            mmap,
            layout,
            doc_ids,
            titles,
            authors,
            tok_len,
            simhash,
            config,
            stats: meta.stats,
            sig,
            lsh: None,
        };

        if reader.config.minhash.use_lsh {
            if let Some(sig) = &reader.sig {
                let mut lsh = LshBuckets::new(sig.k, sig.rows)?;
                for id in 0..reader.layout.n_docs {
                    let s = reader.read_signature(id);
                    lsh.insert(&s, id);
                }
                reader.lsh = Some(lsh);
            }
        }

        Ok(reader)
    }

    fn check_postings_section(
        bytes: &[u8],
        off: usize,
        n: u64,
        n_docs: u32,
        name: &str,
    ) -> Result<(), Error> {
        let mut prev: Option<(u64, u32)> = None;
        let mut at = off;
        for _ in 0..n {
            let entry = (format::read_u64(bytes, at), format::read_u32(bytes, at + 8));
            if entry.1 >= n_docs {
                return Err(Error::CorruptSegment(format!(
                    "{}: intid {} out of range (n_docs={})",
                    name, entry.1, n_docs
                )));
            }
            if let Some(p) = prev {
                if entry <= p {
                    return Err(Error::CorruptSegment(format!(
                        "{}: postings unsorted or duplicated at hash {:#x}",
                        name, entry.0
                    )));
                }
            }
            prev = Some(entry);
            at += POSTING_LEN;
        }
        Ok(())
    }

    fn read_signature(&self, internal_id: u32) -> Vec<u32> {
        match &self.sig {
            None => Vec::new(),
            Some(sig) => {
                let mut out = Vec::with_capacity(sig.k);
                let mut at = sig.off + internal_id as usize * sig.k * 4;
                for _ in 0..sig.k {
                    out.push(format::read_u32(&self.mmap, at));
                    at += 4;
                }
                out
            }
        }
    }

    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn n_docs(&self) -> u32 {
        self.layout.n_docs
    }

    pub fn doc_id(&self, internal_id: u32) -> &str {
        &self.doc_ids[internal_id as usize]
    }

    pub fn title(&self, internal_id: u32) -> Option<&str> {
        self.titles[internal_id as usize].as_deref()
    }

    pub fn author(&self, internal_id: u32) -> Option<&str> {
        self.authors[internal_id as usize].as_deref()
    }

    pub fn tok_len(&self, internal_id: u32) -> u32 {
        self.tok_len[internal_id as usize]
    }

    pub fn simhash(&self, internal_id: u32) -> SimHash128 {
        self.simhash[internal_id as usize]
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn stats(&self) -> &SegmentStats {
        &self.stats
    }

    pub fn lsh(&self) -> Option<&LshBuckets> {
        self.lsh.as_ref()
    }

    /// Stored MinHash signature, if the segment carries them.
    pub fn signature(&self, internal_id: u32) -> Option<Vec<u32>> {
        self.sig.as_ref().map(|_| self.read_signature(internal_id))
    }

    /// Posting list view for one k.
    pub fn postings(&self, k: usize) -> Postings<'_> {
        let (off, n) = match k {
            9 => (self.layout.post9_off, self.layout.n_post9),
            13 => (self.layout.post13_off, self.layout.n_post13),
            _ => (self.layout.post9_off, 0),
        };
        Postings {
            bytes: &self.mmap[..],
            off,
            n: n as usize,
        }
    }
}

/// Sorted (hash, intid) entries over the raw mmap bytes.
pub struct Postings<'a> {
    bytes: &'a [u8],
    off: usize,
    n: usize,
}

impl<'a> Postings<'a> {
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    fn hash_at(&self, i: usize) -> u64 {
        format::read_u64(self.bytes, self.off + i * POSTING_LEN)
    }

    fn id_at(&self, i: usize) -> u32 {
        format::read_u32(self.bytes, self.off + i * POSTING_LEN + 8)
    }

    fn lower_bound(&self, hash: u64) -> usize {
        let mut lo = 0;
        let mut hi = self.n;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.hash_at(mid) < hash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Internal ids posted under `hash`, ascending.
    pub fn ids_for(&self, hash: u64) -> IdsFor<'_> {
        let start = self.lower_bound(hash);
        IdsFor {
            postings: self,
            hash,
            at: start,
        }
    }

    /// True when `(hash, intid)` is present.
    pub fn contains(&self, hash: u64, internal_id: u32) -> bool {
        self.ids_for(hash).any(|id| id == internal_id)
    }
}

pub struct IdsFor<'a> {
    postings: &'a Postings<'a>,
    hash: u64,
    at: usize,
}

impl Iterator for IdsFor<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.at >= self.postings.n || self.postings.hash_at(self.at) != self.hash {
            return None;
        }
        let id = self.postings.id_at(self.at);
        self.at += 1;
        Some(id)
    }
}
