pub mod fusion;
pub mod query;

// Re-export key types for convenience
pub use fusion::{fuse, normalize, FusionWeights};
pub use query::{KeywordQuery, ParsedQuery};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::DocType;

/// Which retrieval leg produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMethod {
    Keyword,
    Semantic,
}

impl fmt::Display for ScoreMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreMethod::Keyword => write!(f, "keyword"),
            ScoreMethod::Semantic => write!(f, "semantic"),
        }
    }
}

/// A single hit from one retrieval leg, before fusion.
///
/// Keyword scores are `ts_rank` values (unbounded, corpus dependent);
/// semantic scores are `1 - cosine_distance` in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: String,
    pub score: f64,
    pub method: ScoreMethod,
    pub title: String,
    pub doc_type: DocType,
    /// Highlighted excerpt (keyword hits only)
    pub snippet: Option<String>,
}

/// Which legs a fused result appeared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Both,
    KeywordOnly,
    SemanticOnly,
}

/// A ranked hybrid result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub id: String,
    /// fts_weight * keyword_score + semantic_weight * semantic_score
    pub score: f64,
    /// 1-based position in the final ordering
    pub rank: usize,
    /// Min-max normalized keyword score, 0.0 when absent from the keyword leg
    pub keyword_score: f64,
    /// Min-max normalized semantic score, 0.0 when absent from the semantic leg
    pub semantic_score: f64,
    pub match_source: MatchSource,
    pub title: String,
    pub doc_type: DocType,
    pub snippet: Option<String>,
}
