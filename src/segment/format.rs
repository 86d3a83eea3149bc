/*! Segment binary format.

Little-endian throughout:

```text
magic      : "PLAG"               (4 bytes)
version    : u32                  (= 1)
n_docs     : u32
n_post9    : u64
n_post13   : u64
doc_meta[n_docs]:  tok_len: u32, sim_hi: u64, sim_lo: u64
post9[n_post9]:    hash: u64, intid: u32
post13[n_post13]:  hash: u64, intid: u32
```

When signatures are stored the binary gains an appended section after
`post13`: `sig_k: u32, sig_rows: u32, sig[n_docs * sig_k]: u32`.

Alongside the binary live `index_native_docids.json` (doc_id strings,
index == internal_id), `index_native_meta.json` (docs_meta + config +
stats) and `index_config.json` (the effective engine config at build
time).
!*/
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::config::IndexConfig;
use crate::error::Error;
use crate::text::SimHash128;

pub const MAGIC: &[u8; 4] = b"PLAG";
pub const VERSION: u32 = 1;

pub const BIN_FILE: &str = "index_native.bin";
pub const DOCIDS_FILE: &str = "index_native_docids.json";
pub const META_FILE: &str = "index_native_meta.json";
pub const CONFIG_FILE: &str = "index_config.json";

pub const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 8;
pub const DOC_META_LEN: usize = 4 + 8 + 8;
pub const POSTING_LEN: usize = 8 + 4;

/// One posting: (shingle hash, internal id).
pub type Posting = (u64, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocMeta {
    pub tok_len: u32,
    pub simhash: SimHash128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    pub k: u32,
    pub rows: u32,
    /// `n_docs * k` slots, doc-major.
    pub sig: Vec<u32>,
}

/// In-memory form of one segment's binary content.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentData {
    pub doc_ids: Vec<String>,
    pub meta: Vec<DocMeta>,
    pub post9: Vec<Posting>,
    pub post13: Vec<Posting>,
    pub signatures: Option<SignatureBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMetaJson {
    pub tok_len: u32,
    pub simhash128: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub n_docs: u32,
    pub k9: u64,
    pub k13: u64,
    pub tok_total: u64,
    pub size_bytes: u64,
    pub checksum_bin: String,
    pub config_digest: String,
}

/// `index_native_meta.json`. `docs_meta` is a BTreeMap so repeated builds
/// of the same batch serialize byte-identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub docs_meta: BTreeMap<String, DocMetaJson>,
    pub config: IndexConfig,
    pub stats: SegmentStats,
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    let d = Sha1::digest(bytes);
    d.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Postings must be sorted ascending by (hash, intid), hold no duplicate
/// pairs, and reference only ids below `n_docs`.
pub fn validate_postings(name: &str, postings: &[Posting], n_docs: u32) -> Result<(), Error> {
    let mut prev: Option<Posting> = None;
    for &(h, id) in postings {
        if id >= n_docs {
            return Err(Error::CorruptSegment(format!(
                "{}: intid {} out of range (n_docs={})",
                name, id, n_docs
            )));
        }
        if let Some(p) = prev {
            if (h, id) <= p {
                return Err(Error::CorruptSegment(format!(
                    "{}: postings unsorted or duplicated at hash {:#x}",
                    name, h
                )));
            }
        }
        prev = Some((h, id));
    }
    Ok(())
}

/// Serialize the binary part of a segment.
pub fn encode_bin(data: &SegmentData) -> Vec<u8> {
    let mut cap = HEADER_LEN
        + data.meta.len() * DOC_META_LEN
        + (data.post9.len() + data.post13.len()) * POSTING_LEN;
    if let Some(s) = &data.signatures {
        cap += 8 + s.sig.len() * 4;
    }
    let mut out = Vec::with_capacity(cap);

    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(data.meta.len() as u32).to_le_bytes());
    out.extend_from_slice(&(data.post9.len() as u64).to_le_bytes());
    out.extend_from_slice(&(data.post13.len() as u64).to_le_bytes());

    for m in &data.meta {
        out.extend_from_slice(&m.tok_len.to_le_bytes());
        out.extend_from_slice(&m.simhash.hi.to_le_bytes());
        out.extend_from_slice(&m.simhash.lo.to_le_bytes());
    }
    for &(h, id) in data.post9.iter().chain(data.post13.iter()) {
        out.extend_from_slice(&h.to_le_bytes());
        out.extend_from_slice(&id.to_le_bytes());
    }
    if let Some(s) = &data.signatures {
        out.extend_from_slice(&s.k.to_le_bytes());
        out.extend_from_slice(&s.rows.to_le_bytes());
        for v in &s.sig {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

pub(crate) fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes([
        bytes[at],
        bytes[at + 1],
        bytes[at + 2],
        bytes[at + 3],
        bytes[at + 4],
        bytes[at + 5],
        bytes[at + 6],
        bytes[at + 7],
    ])
}

/// Parsed header + section offsets of a segment binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub n_docs: u32,
    pub n_post9: u64,
    pub n_post13: u64,
    pub doc_meta_off: usize,
    pub post9_off: usize,
    pub post13_off: usize,
    /// Offset of the signature section, if trailing bytes exist.
    pub sig_off: Option<usize>,
}

pub fn parse_layout(bytes: &[u8]) -> Result<Layout, Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::CorruptSegment(format!(
            "binary too small: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(Error::CorruptSegment("bad magic".to_string()));
    }
    let version = read_u32(bytes, 4);
    if version != VERSION {
        return Err(Error::CorruptSegment(format!(
            "unsupported version {}",
            version
        )));
    }
    let n_docs = read_u32(bytes, 8);
    let n_post9 = read_u64(bytes, 12);
    let n_post13 = read_u64(bytes, 20);

    let doc_meta_off = HEADER_LEN;
    let post9_off = doc_meta_off + n_docs as usize * DOC_META_LEN;
    let post13_off = post9_off + n_post9 as usize * POSTING_LEN;
    let end = post13_off + n_post13 as usize * POSTING_LEN;

    if bytes.len() < end {
        return Err(Error::CorruptSegment(format!(
            "binary truncated: have {} bytes, sections need {}",
            bytes.len(),
            end
        )));
    }
    let sig_off = if bytes.len() > end { Some(end) } else { None };

    Ok(Layout {
        n_docs,
        n_post9,
        n_post13,
        doc_meta_off,
        post9_off,
        post13_off,
        sig_off,
    })
}

fn parse_postings(bytes: &[u8], off: usize, n: u64) -> Vec<Posting> {
    let mut out = Vec::with_capacity(n as usize);
    let mut at = off;
    for _ in 0..n {
        out.push((read_u64(bytes, at), read_u32(bytes, at + 8)));
        at += POSTING_LEN;
    }
    out
}

/// Full decode of a segment binary (doc_ids come from the JSON sidecar).
/// Validates structure, not the checksum; the reader handles that.
pub fn decode_bin(bytes: &[u8]) -> Result<SegmentData, Error> {
    let layout = parse_layout(bytes)?;

    let mut meta = Vec::with_capacity(layout.n_docs as usize);
    let mut at = layout.doc_meta_off;
    for _ in 0..layout.n_docs {
        meta.push(DocMeta {
            tok_len: read_u32(bytes, at),
            simhash: SimHash128 {
                hi: read_u64(bytes, at + 4),
                lo: read_u64(bytes, at + 12),
            },
        });
        at += DOC_META_LEN;
    }

    let post9 = parse_postings(bytes, layout.post9_off, layout.n_post9);
    let post13 = parse_postings(bytes, layout.post13_off, layout.n_post13);
    validate_postings("post9", &post9, layout.n_docs)?;
    validate_postings("post13", &post13, layout.n_docs)?;

    let signatures = match layout.sig_off {
        None => None,
        Some(off) => {
            if bytes.len() < off + 8 {
                return Err(Error::CorruptSegment(
                    "signature section truncated".to_string(),
                ));
            }
            let k = read_u32(bytes, off);
            let rows = read_u32(bytes, off + 4);
            let n_slots = layout.n_docs as usize * k as usize;
            if bytes.len() != off + 8 + n_slots * 4 {
                return Err(Error::CorruptSegment(format!(
                    "signature section size mismatch (k={}, n_docs={})",
                    k, layout.n_docs
                )));
            }
            let mut sig = Vec::with_capacity(n_slots);
            let mut at = off + 8;
            for _ in 0..n_slots {
                sig.push(read_u32(bytes, at));
                at += 4;
            }
            Some(SignatureBlock { k, rows, sig })
        }
    };

    Ok(SegmentData {
        doc_ids: Vec::new(),
        meta,
        post9,
        post13,
        signatures,
    })
}
