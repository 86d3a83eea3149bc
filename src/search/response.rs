/*! Search response shapes.

The caller always receives a structured response with `hits_total`,
`docs_found` and a `documents` array, even on partial failure.
!*/
use serde::{Deserialize, Serialize};

/// Matched region of the query, in token indices, `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitDetails {
    #[serde(rename = "J9")]
    pub j9: f64,
    #[serde(rename = "C9")]
    pub c9: f64,
    #[serde(rename = "J13")]
    pub j13: f64,
    #[serde(rename = "C13")]
    pub c13: f64,
    pub inter9: u32,
    pub inter13: u32,
    pub cand_hits: u32,
    pub hamming_simhash: u32,
    pub minhash_sim_est: f64,
    pub matching_fragments: Vec<Fragment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHit {
    pub doc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub max_score: f64,
    pub originality_pct: f64,
    pub decision: String,
    pub segment_id: u64,
    pub details: HitDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits_total: usize,
    pub docs_found: usize,
    pub documents: Vec<DocumentHit>,
    /// Some segment was skipped (quarantined or failing).
    #[serde(default)]
    pub partial: bool,
    /// The deadline expired before all candidates were scored.
    #[serde(default)]
    pub truncated: bool,
}

impl SearchResponse {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Threshold order: original < partial < plagiarism.
pub fn decision(score: f64, plag_thr: f64, partial_thr: f64) -> &'static str {
    if score >= plag_thr {
        "plagiarism"
    } else if score >= partial_thr {
        "partial"
    } else {
        "original"
    }
}

/// `round((1 - clamp(score, 0, 1)) * 100, 1)`.
pub fn originality_pct(score: f64) -> f64 {
    ((1.0 - score.clamp(0.0, 1.0)) * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_thresholds() {
        assert_eq!(decision(0.70, 0.70, 0.30), "plagiarism");
        assert_eq!(decision(0.69, 0.70, 0.30), "partial");
        assert_eq!(decision(0.30, 0.70, 0.30), "partial");
        assert_eq!(decision(0.29, 0.70, 0.30), "original");
    }

    #[test]
    fn test_decision_monotonic_in_score() {
        let strictness = |d: &str| match d {
            "original" => 0,
            "partial" => 1,
            _ => 2,
        };
        let mut prev = 0;
        for i in 0..=100 {
            let s = i as f64 / 100.0;
            let now = strictness(decision(s, 0.70, 0.30));
            assert!(now >= prev);
            prev = now;
        }
    }

    #[test]
    fn test_originality_pct() {
        assert_eq!(originality_pct(1.0), 0.0);
        assert_eq!(originality_pct(1.5), 0.0);
        assert_eq!(originality_pct(0.0), 100.0);
        assert_eq!(originality_pct(0.345), 65.5);
    }
}
