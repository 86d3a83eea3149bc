/*! 128-bit SimHash document fingerprints.

Similar token streams yield fingerprints with a small Hamming distance.
Each token contributes the first 16 bytes of its SHA-1 as 128 independent
bits to a +1/-1 accumulator; the final bit is set where the accumulator
is non-negative.
!*/
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// hi/lo split of the 128-bit fingerprint, as stored in segment meta.
/// The text form is the 32-char lowercase hex of the full value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimHash128 {
    pub hi: u64,
    pub lo: u64,
}

impl SimHash128 {
    pub fn from_u128(x: u128) -> Self {
        Self {
            hi: (x >> 64) as u64,
            lo: x as u64,
        }
    }

    pub fn as_u128(&self) -> u128 {
        ((self.hi as u128) << 64) | self.lo as u128
    }

    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.as_u128())
    }

    /// Accepts the 32-char hex form; anything unparsable is the zero hash
    /// (matches how absent fingerprints are stored).
    pub fn from_hex(s: &str) -> Self {
        match u128::from_str_radix(s, 16) {
            Ok(x) => Self::from_u128(x),
            Err(_) => Self::default(),
        }
    }

    pub fn hamming(&self, other: &SimHash128) -> u32 {
        (self.as_u128() ^ other.as_u128()).count_ones()
    }
}

/// Fingerprint of a normalized token sequence.
pub fn simhash128<T: AsRef<str>>(tokens: &[T]) -> SimHash128 {
    let mut acc = [0i64; 128];
    for tok in tokens {
        let d = Sha1::digest(tok.as_ref().as_bytes());
        let mut first16 = [0u8; 16];
        first16.copy_from_slice(&d[..16]);
        let bits = u128::from_be_bytes(first16);
        for (i, slot) in acc.iter_mut().enumerate() {
            if (bits >> i) & 1 == 1 {
                *slot += 1;
            } else {
                *slot -= 1;
            }
        }
    }
    let mut x: u128 = 0;
    for (i, slot) in acc.iter().enumerate() {
        if *slot >= 0 {
            x |= 1 << i;
        }
    }
    SimHash128::from_u128(x)
}
