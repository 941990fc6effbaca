//! Hybrid search
//!
//! Dense retrieval and lexical retrieval are fused with reciprocal rank
//! fusion; query rewriting and domain boosts shape the dense side.

pub mod boost;
pub mod engine;

pub use boost::BoostTable;
pub use engine::{HybridSearchEngine, SearchEngine};

/// Ranking weights and thresholds, kept in one place rather than scattered
/// through the fusion code.
pub mod weights {
    /// Default weight of dense retrieval in the fused score
    pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.7;
    /// Weight used when dense scores collapse into a narrow band
    pub const COLLAPSED_SEMANTIC_WEIGHT: f32 = 0.3;
    /// Dense score spread below which dense retrieval is judged
    /// non-discriminative
    pub const SCORE_SPREAD_FLOOR: f32 = 0.05;
    /// Reciprocal rank fusion constant
    pub const RRF_K: f32 = 60.0;
    /// Each source retrieves this multiple of the requested limit
    pub const CANDIDATE_FACTOR: usize = 2;
}
