//! Hybrid retrieval engine
//!
//! Candidate generation runs a vector scan over a bounded recent pool plus
//! an FTS5 match; per-signal scores (vector, lexical, recency, frequency)
//! are fused by either a legacy weighted sum or Reciprocal Rank Fusion.

pub mod expansion;
pub mod feedback;
pub mod hybrid;

pub use feedback::FeedbackTracker;
pub use hybrid::hybrid_search;

use rusqlite::Connection;

use crate::storage::settings;

/// Scoring and candidate-generation knobs, loaded from settings
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub use_rrf: bool,
    pub rrf_k: f32,
    pub vector_weight: f32,
    pub fts_weight: f32,
    pub recency_weight: f32,
    pub frequency_weight: f32,
    pub importance_boost: f32,
    /// Subtracted from legacy weighted sums so typical scores land ~0.15-0.80
    pub constant_shift: f32,
    /// Multiplier applied to configuration-like memories
    pub metadata_penalty: f32,
    pub vector_candidate_pool: i64,
    pub recency_half_life_days: f64,
    pub expansion_limit: i64,
    pub link_strength_floor: f32,
}

impl SearchConfig {
    pub fn load(conn: &Connection) -> Self {
        Self {
            use_rrf: settings::get_bool(conn, "scoring.use_rrf"),
            rrf_k: settings::get_f64(conn, "scoring.rrf_k") as f32,
            vector_weight: settings::get_f64(conn, "scoring.vector_weight") as f32,
            fts_weight: settings::get_f64(conn, "scoring.fts_weight") as f32,
            recency_weight: settings::get_f64(conn, "scoring.recency_weight") as f32,
            frequency_weight: settings::get_f64(conn, "scoring.frequency_weight") as f32,
            importance_boost: settings::get_f64(conn, "scoring.importance_boost") as f32,
            constant_shift: settings::get_f64(conn, "scoring.constant_shift") as f32,
            metadata_penalty: settings::get_f64(conn, "scoring.metadata_penalty") as f32,
            vector_candidate_pool: settings::get_i64(conn, "search.vector_candidate_pool"),
            recency_half_life_days: settings::get_f64(conn, "search.recency_half_life_days"),
            expansion_limit: settings::get_i64(conn, "search.expansion_limit"),
            link_strength_floor: settings::get_f64(conn, "search.link_strength_floor") as f32,
        }
    }
}

/// Exponential decay on age in days with the configured half-life
pub fn recency_score(age_days: f64, half_life_days: f64) -> f32 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    (0.5_f64.powf(age_days.max(0.0) / half_life_days)) as f32
}

/// Log-scaled usefulness (primary) plus a small fraction of raw access
/// count; saturates around ten uses
pub fn frequency_score(useful_count: i64, access_count: i64) -> f32 {
    let useful = ((1.0 + useful_count.max(0) as f64).ln() / (1.0 + 10.0_f64).ln()).min(1.0);
    let access = (access_count.max(0) as f64 / 10.0).min(1.0);
    (0.8 * useful + 0.2 * access) as f32
}
