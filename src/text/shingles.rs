/*! k-gram shingles.

A shingle is the window of `k` consecutive tokens starting at position
`i`, represented by the first 8 bytes (big-endian) of the SHA-1 of the
window joined with a single space.
!*/
use std::collections::HashMap;

use sha1::{Digest, Sha1};

fn sha1_first8(bytes: &[u8]) -> u64 {
    let d = Sha1::digest(bytes);
    u64::from_be_bytes([d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]])
}

/// Shingle hash sequence, in token order. Positions matter for fragment
/// reconstruction; the scorer works on the deduplicated set.
pub fn shingles<T: AsRef<str>>(tokens: &[T], k: usize) -> Vec<u64> {
    let n = tokens.len();
    if k == 0 || n < k {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(n - k + 1);
    let mut buf: Vec<u8> = Vec::with_capacity(k * 8);
    for window in tokens.windows(k) {
        buf.clear();
        for (j, tok) in window.iter().enumerate() {
            if j > 0 {
                buf.push(b' ');
            }
            buf.extend_from_slice(tok.as_ref().as_bytes());
        }
        out.push(sha1_first8(&buf));
    }
    out
}

/// Sorted, deduplicated shingle set. Sorted so that every downstream
/// iteration over the set is deterministic.
pub fn shingle_set<T: AsRef<str>>(tokens: &[T], k: usize) -> Vec<u64> {
    let mut set = shingles(tokens, k);
    set.sort_unstable();
    set.dedup();
    set
}

/// hash → every window position it occurs at.
pub fn position_map(hashes: &[u64]) -> HashMap<u64, Vec<usize>> {
    let mut pos: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, h) in hashes.iter().enumerate() {
        pos.entry(*h).or_default().push(i);
    }
    pos
}
