/*! Query preparation.

Normalizes the query text once and precomputes everything the per-segment
searchers need: shingle sequences and sets, position maps for fragment
reconstruction, the query SimHash and (when enabled) the MinHash
signature. Sets are sorted vectors so every downstream scan is
deterministic.
!*/
use std::collections::HashMap;

use crate::config::IndexConfig;
use crate::error::Error;
use crate::text::{normalize, position_map, shingle_set, shingles, simhash128, MinHasher, SimHash128};

#[derive(Debug)]
pub struct PreparedQuery {
    pub tokens: Vec<String>,
    pub s9_seq: Vec<u64>,
    pub s13_seq: Vec<u64>,
    pub s9_set: Vec<u64>,
    pub s13_set: Vec<u64>,
    pub pos9: HashMap<u64, Vec<usize>>,
    pub pos13: HashMap<u64, Vec<usize>>,
    pub simhash: SimHash128,
    pub signature: Option<Vec<u32>>,
}

impl PreparedQuery {
    /// Rejects queries below `w_min_query` tokens with [Error::BadInput].
    pub fn prepare(text: &str, cfg: &IndexConfig) -> Result<Self, Error> {
        let tokens = normalize(text);
        if tokens.len() < cfg.w_min_query {
            return Err(Error::BadInput(format!(
                "query has {} tokens, need at least {}",
                tokens.len(),
                cfg.w_min_query
            )));
        }

        let s9_seq = shingles(&tokens, 9);
        let s13_seq = shingles(&tokens, 13);
        let s9_set = shingle_set(&tokens, 9);
        let s13_set = shingle_set(&tokens, 13);
        let pos9 = position_map(&s9_seq);
        let pos13 = position_map(&s13_seq);
        let simhash = simhash128(&tokens);

        let signature = if cfg.minhash.wants_signatures() {
            let base = if !s9_set.is_empty() { &s9_set } else { &s13_set };
            if base.is_empty() {
                None
            } else {
                Some(MinHasher::new(cfg.minhash.k, cfg.minhash.seed).signature(base))
            }
        } else {
            None
        };

        Ok(Self {
            tokens,
            s9_seq,
            s13_seq,
            s9_set,
            s13_set,
            pos9,
            pos13,
            simhash,
            signature,
        })
    }

    /// Query-side window count for one k (the `qS_k` of the scoring
    /// formulas).
    pub fn window_count(&self, k: usize) -> usize {
        self.tokens.len().saturating_sub(k - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_query_rejected() {
        let cfg = IndexConfig::default();
        let err = PreparedQuery::prepare("abc def ghi", &cfg).unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }

    #[test]
    fn test_prepared_shapes() {
        let cfg = IndexConfig::default();
        let text = "один два три четыре пять шесть семь восемь девять десять";
        let q = PreparedQuery::prepare(text, &cfg).unwrap();
        assert_eq!(q.tokens.len(), 10);
        assert_eq!(q.s9_seq.len(), 2);
        assert_eq!(q.s13_seq.len(), 0);
        assert_eq!(q.window_count(9), 2);
        assert_eq!(q.window_count(13), 0);
        // defaults disable minhash entirely
        assert!(q.signature.is_none());
    }

    #[test]
    fn test_signature_follows_toggle() {
        let mut cfg = IndexConfig::default();
        cfg.minhash.use_lsh = true;
        cfg.minhash.k = 64;
        let text = "один два три четыре пять шесть семь восемь девять десять";
        let q = PreparedQuery::prepare(text, &cfg).unwrap();
        assert_eq!(q.signature.unwrap().len(), 64);
    }
}
