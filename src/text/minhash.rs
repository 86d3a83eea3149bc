/*! MinHash signatures and LSH banding.

Optional candidate-generation aid: the signature of a shingle set is the
slot-wise minimum of K seeded hash families, and signatures are cut into
bands whose keys address buckets of internal ids. Probabilistically, two
documents share a bucket when their Jaccard similarity is high.
!*/
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha1::{Digest, Sha1};

use crate::error::Error;

/// Signature slot value of the empty set.
pub const EMPTY_SLOT: u32 = 0xFFFF_FFFF;

struct Coeffs {
    a: Vec<u64>,
    b: Vec<u64>,
}

lazy_static! {
    // one coefficient table per (K, seed); builders and every query share it
    static ref COEFF_CACHE: Mutex<HashMap<(usize, u64), Arc<Coeffs>>> =
        Mutex::new(HashMap::new());
}

fn coeffs(k: usize, seed: u64) -> Arc<Coeffs> {
    let mut cache = match COEFF_CACHE.lock() {
        Ok(c) => c,
        Err(poisoned) => poisoned.into_inner(),
    };
    cache
        .entry((k, seed))
        .or_insert_with(|| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut a = Vec::with_capacity(k);
            let mut b = Vec::with_capacity(k);
            for _ in 0..k {
                // A_i must be odd
                a.push(rng.gen::<u64>() | 1);
                b.push(rng.gen::<u64>());
            }
            Arc::new(Coeffs { a, b })
        })
        .clone()
}

/// K seeded hash families `h_i(x) = (A_i*x + B_i) mod 2^64`, projected
/// down to u32.
pub struct MinHasher {
    coeffs: Arc<Coeffs>,
}

impl MinHasher {
    pub fn new(k: usize, seed: u64) -> Self {
        Self {
            coeffs: coeffs(k, seed),
        }
    }

    pub fn k(&self) -> usize {
        self.coeffs.a.len()
    }

    /// Signature of a shingle set. The empty set maps to all [EMPTY_SLOT].
    pub fn signature(&self, hashes: &[u64]) -> Vec<u32> {
        let k = self.k();
        let mut sig = vec![EMPTY_SLOT; k];
        for &h in hashes {
            for i in 0..k {
                let v = self.coeffs.a[i]
                    .wrapping_mul(h)
                    .wrapping_add(self.coeffs.b[i]);
                let v32 = ((v ^ (v >> 32)) & 0xFFFF_FFFF) as u32;
                if v32 < sig[i] {
                    sig[i] = v32;
                }
            }
        }
        sig
    }
}

/// Band key: first 8 bytes of SHA-1 over the band's big-endian u32s.
pub fn band_key(band: &[u32]) -> u64 {
    let mut h = Sha1::new();
    for v in band {
        h.update(v.to_be_bytes());
    }
    let d = h.finalize();
    u64::from_be_bytes([d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]])
}

/// In-memory LSH buckets for one segment: band index → band key → ids.
pub struct LshBuckets {
    rows: usize,
    bands: Vec<HashMap<u64, Vec<u32>>>,
}

impl LshBuckets {
    pub fn new(k: usize, rows: usize) -> Result<Self, Error> {
        if rows == 0 || k % rows != 0 {
            return Err(Error::ConfigMismatch(format!(
                "K%rows!=0: K={}, rows={}",
                k, rows
            )));
        }
        Ok(Self {
            rows,
            bands: vec![HashMap::new(); k / rows],
        })
    }

    pub fn insert(&mut self, sig: &[u32], internal_id: u32) {
        for (b, bucket) in self.bands.iter_mut().enumerate() {
            let chunk = &sig[b * self.rows..(b + 1) * self.rows];
            bucket.entry(band_key(chunk)).or_default().push(internal_id);
        }
    }

    /// Ids sharing at least one bucket with the query signature,
    /// deduplicated and sorted.
    pub fn candidates(&self, sig: &[u32]) -> Vec<u32> {
        let mut out = Vec::new();
        for (b, bucket) in self.bands.iter().enumerate() {
            let chunk = &sig[b * self.rows..(b + 1) * self.rows];
            if let Some(ids) = bucket.get(&band_key(chunk)) {
                out.extend_from_slice(ids);
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }
}
