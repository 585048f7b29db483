//! Candidate generation and score fusion

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use super::{frequency_score, recency_score, SearchConfig};
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::Result;
use crate::storage::queries::{load_tags, memory_from_row, MEMORY_COLUMNS};
use crate::types::{Memory, SearchOptions, SearchResult};

/// One memory while signals are still being assembled
struct Candidate {
    memory: Memory,
    vector_score: f32,
    fts_raw: Option<f32>,
}

/// Run hybrid search and return fused, filtered, ordered results.
///
/// The query embedding is attempted once; an oracle failure degrades to a
/// lexical-only search rather than failing the operation.
pub fn hybrid_search(
    conn: &Connection,
    embedder: &dyn Embedder,
    query: &str,
    options: &SearchOptions,
    config: &SearchConfig,
) -> Result<Vec<SearchResult>> {
    let limit = options.limit.unwrap_or(10).max(1);

    let query_embedding = match embedder.embed(query) {
        Ok(e) => Some(e),
        Err(e) => {
            debug!("query embedding failed, lexical-only search: {}", e);
            None
        }
    };

    let mut candidates: HashMap<String, Candidate> = HashMap::new();

    // Vector side: bounded scan over the most recent embedded rows
    if let Some(ref qe) = query_embedding {
        for memory in vector_candidates(conn, options, config.vector_candidate_pool)? {
            let score = memory
                .embedding
                .as_ref()
                .map(|e| cosine_similarity(qe, e).max(0.0))
                .unwrap_or(0.0);
            candidates.insert(
                memory.id.clone(),
                Candidate {
                    memory,
                    vector_score: score,
                    fts_raw: None,
                },
            );
        }
    }

    // Lexical side: FTS5 match over content + keywords + tags
    for (memory, raw) in fts_candidates(conn, query, options, config.vector_candidate_pool)? {
        match candidates.get_mut(&memory.id) {
            Some(c) => c.fts_raw = Some(raw),
            None => {
                let vector_score = match (&query_embedding, &memory.embedding) {
                    (Some(qe), Some(e)) => cosine_similarity(qe, e).max(0.0),
                    _ => 0.0,
                };
                candidates.insert(
                    memory.id.clone(),
                    Candidate {
                        memory,
                        vector_score,
                        fts_raw: Some(raw),
                    },
                );
            }
        }
    }

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Min-max normalize the negated bm25 values to [0,1]
    let raws: Vec<f32> = candidates.values().filter_map(|c| c.fts_raw).collect();
    let (fts_min, fts_max) = raws
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let now = Utc::now();
    let mut scored: Vec<SearchResult> = candidates
        .into_values()
        .map(|c| {
            let fts_score = match c.fts_raw {
                Some(raw) if fts_max > fts_min => (raw - fts_min) / (fts_max - fts_min),
                Some(_) => 1.0,
                None => 0.0,
            };
            let age_days = (now - c.memory.created_at).num_seconds().max(0) as f64 / 86_400.0;
            let recency = recency_score(age_days, config.recency_half_life_days);
            let frequency = frequency_score(c.memory.useful_count, c.memory.access_count);

            SearchResult {
                score: 0.0,
                vector_score: c.vector_score,
                fts_score,
                recency_score: recency,
                frequency_score: frequency,
                memory: c.memory,
            }
        })
        .collect();

    if config.use_rrf {
        fuse_rrf(&mut scored, config);
    } else {
        fuse_weighted(&mut scored, config);
    }

    // Configuration-like memories rank below substantive ones
    for r in &mut scored {
        if r.memory.is_metadata {
            r.score *= config.metadata_penalty;
        }
    }

    // Chunk hits surface their parent; duplicates keep the best score
    let mut collapsed: HashMap<String, SearchResult> = HashMap::new();
    for mut result in scored {
        if let Some(parent_id) = result.memory.parent_id.clone() {
            let parent = {
                let sql = format!("SELECT {} FROM memories WHERE id = ?", MEMORY_COLUMNS);
                let mut stmt = conn.prepare_cached(&sql)?;
                stmt.query_row([&parent_id], memory_from_row).ok()
            };
            if let Some(mut parent) = parent {
                parent.tags = load_tags(conn, &parent.id)?;
                result.memory = parent;
            }
        }
        let key = result.memory.id.clone();
        match collapsed.get(&key) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                collapsed.insert(key, result);
            }
        }
    }

    let mut results: Vec<SearchResult> = collapsed.into_values().collect();

    // Post-filters
    if let Some(min_score) = options.min_score {
        results.retain(|r| r.score >= min_score);
    }
    if let Some(min_importance) = options.min_importance {
        results.retain(|r| r.memory.importance >= min_importance);
    }

    // Final ordering: score desc, created_at desc, id desc
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| b.memory.id.cmp(&a.memory.id))
    });
    results.truncate(limit as usize);

    Ok(results)
}

/// Legacy fusion: weighted sum of signals plus an importance boost, shifted
fn fuse_weighted(results: &mut [SearchResult], config: &SearchConfig) {
    for r in results {
        let raw = config.vector_weight * r.vector_score
            + config.fts_weight * r.fts_score
            + config.recency_weight * r.recency_score
            + config.frequency_weight * r.frequency_score
            + config.importance_boost * r.memory.importance;
        r.score = (raw - config.constant_shift).max(0.0);
    }
}

/// Reciprocal Rank Fusion: per-signal weight over (k + rank)
fn fuse_rrf(results: &mut Vec<SearchResult>, config: &SearchConfig) {
    let k = config.rrf_k;

    let rank_map = |results: &Vec<SearchResult>, key: fn(&SearchResult) -> f32| {
        let mut order: Vec<(String, f32)> = results
            .iter()
            .filter(|r| key(r) > 0.0)
            .map(|r| (r.memory.id.clone(), key(r)))
            .collect();
        order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        order
            .into_iter()
            .enumerate()
            .map(|(rank, (id, _))| (id, rank + 1))
            .collect::<HashMap<String, usize>>()
    };

    let vector_ranks = rank_map(results, |r| r.vector_score);
    let fts_ranks = rank_map(results, |r| r.fts_score);
    let recency_ranks = rank_map(results, |r| r.recency_score);
    let frequency_ranks = rank_map(results, |r| r.frequency_score);

    for r in results.iter_mut() {
        let mut score = 0.0;
        if let Some(&rank) = vector_ranks.get(&r.memory.id) {
            score += config.vector_weight / (k + rank as f32);
        }
        if let Some(&rank) = fts_ranks.get(&r.memory.id) {
            score += config.fts_weight / (k + rank as f32);
        }
        if let Some(&rank) = recency_ranks.get(&r.memory.id) {
            score += config.recency_weight / (k + rank as f32);
        }
        if let Some(&rank) = frequency_ranks.get(&r.memory.id) {
            score += config.frequency_weight / (k + rank as f32);
        }
        r.score = score;
    }
}

/// Shared WHERE fragment for both candidate sides
fn push_filters(
    sql: &mut String,
    params: &mut Vec<Box<dyn rusqlite::ToSql>>,
    options: &SearchOptions,
) {
    if options.include_superseded {
        sql.push_str(" AND (m.is_active = 1 OR m.superseded_by IS NOT NULL)");
    } else {
        sql.push_str(" AND m.is_active = 1");
    }
    if let Some(ct) = options.content_type {
        sql.push_str(" AND m.content_type = ?");
        params.push(Box::new(ct.as_str().to_string()));
    }
    if let Some(ref after) = options.after {
        sql.push_str(" AND substr(m.created_at, 1, length(?)) >= ?");
        params.push(Box::new(after.clone()));
        params.push(Box::new(after.clone()));
    }
    if let Some(ref before) = options.before {
        sql.push_str(" AND substr(m.created_at, 1, length(?)) <= ?");
        params.push(Box::new(before.clone()));
        params.push(Box::new(before.clone()));
    }
    if let Some(ref tags) = options.tags {
        if !tags.is_empty() {
            let placeholders: Vec<&str> = tags.iter().map(|_| "?").collect();
            sql.push_str(&format!(
                " AND m.id IN (SELECT memory_id FROM memory_tags WHERE tag IN ({}))",
                placeholders.join(", ")
            ));
            for tag in tags {
                params.push(Box::new(tag.clone()));
            }
        }
    }
}

/// Recent embedded rows (chunks included) satisfying the filters
fn vector_candidates(
    conn: &Connection,
    options: &SearchOptions,
    pool: i64,
) -> Result<Vec<Memory>> {
    let mut sql = format!(
        "SELECT {} FROM memories m WHERE m.embedding IS NOT NULL",
        MEMORY_COLUMNS
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    push_filters(&mut sql, &mut params, options);
    sql.push_str(" ORDER BY m.created_at DESC, m.id DESC LIMIT ?");
    params.push(Box::new(pool));

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut memories: Vec<Memory> = stmt
        .query_map(param_refs.as_slice(), memory_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    for m in &mut memories {
        m.tags = load_tags(conn, &m.id)?;
    }
    Ok(memories)
}

/// FTS matches with the negated bm25 value (higher = better)
fn fts_candidates(
    conn: &Connection,
    query: &str,
    options: &SearchOptions,
    pool: i64,
) -> Result<Vec<(Memory, f32)>> {
    let match_expr = build_match_expression(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }

    let mut sql = format!(
        "SELECT {}, bm25(memories_fts) AS rank FROM memories_fts f
         JOIN memories m ON m.rowid = f.rowid
         WHERE memories_fts MATCH ?",
        MEMORY_COLUMNS
            .split(", ")
            .map(|c| format!("m.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_expr)];
    push_filters(&mut sql, &mut params, options);
    sql.push_str(" ORDER BY bm25(memories_fts) LIMIT ?");
    params.push(Box::new(pool));

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut rows: Vec<(Memory, f32)> = stmt
        .query_map(param_refs.as_slice(), |row| {
            let memory = memory_from_row(row)?;
            let rank: f64 = row.get(27)?;
            Ok((memory, -(rank as f32)))
        })?
        .filter_map(|r| r.ok())
        .collect();
    for (m, _) in &mut rows {
        m.tags = load_tags(conn, &m.id)?;
    }
    Ok(rows)
}

/// Quote query tokens into a prefix-matching OR expression, dropping FTS5
/// operator characters
fn build_match_expression(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_expression_escapes_and_prefixes() {
        assert_eq!(build_match_expression("postgres"), "\"postgres\"*");
        assert_eq!(
            build_match_expression("metrics-store (v2)"),
            "\"metrics\"* OR \"store\"* OR \"v2\"*"
        );
        assert_eq!(build_match_expression("\"';--"), "");
    }

    #[test]
    fn test_weighted_fusion_monotonic_in_importance() {
        let config = SearchConfig {
            use_rrf: false,
            rrf_k: 60.0,
            vector_weight: 0.4,
            fts_weight: 0.25,
            recency_weight: 0.15,
            frequency_weight: 0.1,
            importance_boost: 0.1,
            constant_shift: 0.1,
            metadata_penalty: 0.5,
            vector_candidate_pool: 500,
            recency_half_life_days: 30.0,
            expansion_limit: 10,
            link_strength_floor: 0.3,
        };

        let mk = |importance: f32| SearchResult {
            memory: {
                let mut m = crate::storage::queries::tests_support::sample_memory("x");
                m.importance = importance;
                m
            },
            score: 0.0,
            vector_score: 0.5,
            fts_score: 0.5,
            recency_score: 0.5,
            frequency_score: 0.5,
        };

        let mut results = vec![mk(0.2), mk(0.9)];
        fuse_weighted(&mut results, &config);
        assert!(results[1].score > results[0].score);
    }

    #[test]
    fn test_rrf_scores_nonnegative_and_rank_ordered() {
        let config = SearchConfig {
            use_rrf: true,
            rrf_k: 60.0,
            vector_weight: 1.0,
            fts_weight: 1.0,
            recency_weight: 1.0,
            frequency_weight: 1.0,
            importance_boost: 0.1,
            constant_shift: 0.0,
            metadata_penalty: 0.5,
            vector_candidate_pool: 500,
            recency_half_life_days: 30.0,
            expansion_limit: 10,
            link_strength_floor: 0.3,
        };

        let mk = |vector: f32| SearchResult {
            memory: crate::storage::queries::tests_support::sample_memory("x"),
            score: 0.0,
            vector_score: vector,
            fts_score: 0.5,
            recency_score: 0.5,
            frequency_score: 0.0,
        };

        let mut results = vec![mk(0.9), mk(0.3)];
        fuse_rrf(&mut results, &config);
        assert!(results.iter().all(|r| r.score >= 0.0));
        // Equal lexical/recency rank sets: the higher vector score wins
        assert!(results[0].score > results[1].score);
    }
}
