//! Maintenance loops: decay/archival, importance adjustment and
//! recalibration, re-embedding, entity backfill, graph densification,
//! co-retrieval link building, adaptive weight tuning, consolidation
//!
//! Every routine here is idempotent and restartable; each runs its mutation
//! inside one transaction so partial failure leaves the store consistent.

pub mod health;

use chrono::{Duration, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::intelligence::consolidation::{build_summary, find_clusters, Cluster};
use crate::intelligence::entities::extract_entities;
use crate::storage::entity_queries::{ensure_entity, link_entity, upsert_relationship};
use crate::storage::links::upsert_link;
use crate::storage::queries::{self, MEMORY_COLUMNS};
use crate::storage::{counters, settings};
use crate::store::MemoryStore;
use crate::types::{new_id, BrowseOptions, ContentType, LinkType, Memory};

/// A memory eligible for archival
#[derive(Debug, Clone, Serialize)]
pub struct DecayCandidate {
    pub memory_id: String,
    pub age_days: i64,
    pub importance: f32,
    pub access_count: i64,
    pub reason: String,
}

/// Outcome of importance recalibration
#[derive(Debug, Clone, Serialize)]
pub struct RecalibrationReport {
    pub count: usize,
    pub mean_before: f64,
    pub stddev_before: f64,
    pub mean_after: f64,
    pub stddev_after: f64,
}

/// Outcome of consolidation
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub clusters: Vec<Cluster>,
    /// Summary memory ids, one per consolidated cluster (empty on dry-run)
    pub created_ids: Vec<String>,
    pub dry_run: bool,
}

/// Outcome of weight tuning
#[derive(Debug, Clone, Serialize)]
pub struct TuneReport {
    pub adjusted: bool,
    pub feedback_volume: i64,
    pub weights: Vec<(String, f64)>,
}

/// Aggregate report for `memory_maintenance`
#[derive(Debug, Clone, Serialize, Default)]
pub struct MaintenanceReport {
    pub archived: Option<usize>,
    pub importance_boosted: Option<usize>,
    pub importance_decayed: Option<usize>,
    pub reembedded: Option<usize>,
    pub entities_backfilled: Option<usize>,
    pub recalibration: Option<RecalibrationReport>,
    pub graph_edges_added: Option<usize>,
    pub co_retrieval_links: Option<usize>,
    pub weights: Option<TuneReport>,
    pub purged: Option<usize>,
}

/// Sub-operation flags for `memory_maintenance`
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceFlags {
    pub reembed: bool,
    pub backfill_entities: bool,
    pub recalibrate: bool,
    pub densify_graph: bool,
    pub build_co_retrieval_links: bool,
    pub tune_weights: bool,
}

/// Preview which memories decay/archival would touch, without mutation
pub fn decay_preview(store: &MemoryStore) -> Result<Vec<DecayCandidate>> {
    store.storage().with_connection(|conn| {
        let archive_age_days = settings::get_i64(conn, "decay.archive_age_days");
        let protected = settings::get_f64(conn, "decay.protected_importance");
        let floor = settings::get_f64(conn, "decay.floor");
        let grace_days = settings::get_i64(conn, "decay.grace_period_days");
        let now = Utc::now();

        let sql = format!(
            "SELECT {} FROM memories WHERE is_active = 1 AND parent_id IS NULL",
            MEMORY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let memories: Vec<Memory> = stmt
            .query_map([], queries::memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        let mut candidates = Vec::new();
        for m in memories {
            let age_days = (now - m.created_at).num_days();
            if m.access_count == 0
                && age_days > archive_age_days
                && (m.importance as f64) < protected
            {
                candidates.push(DecayCandidate {
                    memory_id: m.id,
                    age_days,
                    importance: m.importance,
                    access_count: m.access_count,
                    reason: "never accessed past archive age".to_string(),
                });
            } else if (m.importance as f64) < floor && age_days > grace_days {
                candidates.push(DecayCandidate {
                    memory_id: m.id,
                    age_days,
                    importance: m.importance,
                    access_count: m.access_count,
                    reason: "importance below floor".to_string(),
                });
            }
        }
        Ok(candidates)
    })
}

/// Archive every decay candidate; returns how many rows were archived
#[instrument(skip(store))]
pub fn archive_stale(store: &MemoryStore) -> Result<usize> {
    let candidates = decay_preview(store)?;
    if candidates.is_empty() {
        return Ok(0);
    }
    store.storage().with_transaction(|conn| {
        let mut archived = 0;
        for c in &candidates {
            // Idempotent: a row archived by a previous partial run is skipped
            let affected = conn.execute(
                "UPDATE memories SET is_active = 0, superseded_by = NULL, updated_at = ?
                 WHERE id = ? AND is_active = 1",
                params![Utc::now().to_rfc3339(), c.memory_id],
            )?;
            archived += affected;
        }
        counters::bump_by(conn, "maintenance.archived", archived as i64)?;
        info!(archived, "archived stale memories");
        Ok(archived)
    })
}

/// Boost recently useful memories, decay long-untouched ones. Bounded to
/// [0,1]; a no-op when `importance.auto_adjust` is off.
pub fn adjust_importance(store: &MemoryStore) -> Result<(usize, usize)> {
    store.storage().with_transaction(|conn| {
        if !settings::get_bool(conn, "importance.auto_adjust") {
            return Ok((0, 0));
        }
        let boost_threshold = settings::get_i64(conn, "importance.boost_threshold");
        let boost_window = settings::get_i64(conn, "importance.boost_window_days");
        let boost_delta = settings::get_f64(conn, "importance.boost_delta");
        let decay_after = settings::get_i64(conn, "importance.decay_after_days");
        let decay_delta = settings::get_f64(conn, "importance.decay_delta");
        let now = Utc::now();

        let window_start = (now - Duration::days(boost_window)).to_rfc3339();
        let boosted = conn.execute(
            "UPDATE memories SET importance = MIN(1.0, importance + ?)
             WHERE is_active = 1 AND parent_id IS NULL
               AND last_accessed_at IS NOT NULL AND last_accessed_at >= ?
               AND access_count > ?",
            params![boost_delta, window_start, boost_threshold],
        )?;

        let stale_cutoff = (now - Duration::days(decay_after)).to_rfc3339();
        let decayed = conn.execute(
            "UPDATE memories SET importance = MAX(0.0, importance - ?)
             WHERE is_active = 1 AND parent_id IS NULL
               AND COALESCE(last_accessed_at, created_at) < ?",
            params![decay_delta, stale_cutoff],
        )?;

        Ok((boosted, decayed))
    })
}

/// Map the active importance distribution onto a normal target centered at
/// 0.5 with stddev 0.15, preserving relative order
#[instrument(skip(store))]
pub fn recalibrate_importance(store: &MemoryStore) -> Result<RecalibrationReport> {
    store.storage().with_transaction(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, importance FROM memories
             WHERE is_active = 1 AND parent_id IS NULL
             ORDER BY importance, id",
        )?;
        let rows: Vec<(String, f64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, f64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let n = rows.len();
        if n == 0 {
            return Ok(RecalibrationReport {
                count: 0,
                mean_before: 0.0,
                stddev_before: 0.0,
                mean_after: 0.0,
                stddev_after: 0.0,
            });
        }

        let before: Vec<f64> = rows.iter().map(|(_, i)| *i).collect();
        let (mean_before, stddev_before) = mean_stddev(&before);

        let mut after = Vec::with_capacity(n);
        for (rank, (id, _)) in rows.iter().enumerate() {
            let percentile = (rank as f64 + 0.5) / n as f64;
            let target = (0.5 + 0.15 * normal_quantile(percentile)).clamp(0.0, 1.0);
            conn.execute(
                "UPDATE memories SET importance = ? WHERE id = ?",
                params![target, id],
            )?;
            after.push(target);
        }
        let (mean_after, stddev_after) = mean_stddev(&after);

        Ok(RecalibrationReport {
            count: n,
            mean_before,
            stddev_before,
            mean_after,
            stddev_after,
        })
    })
}

/// Re-embed active memories whose embedding is missing or has the wrong
/// byte length for the current oracle
pub fn reembed_missing(store: &MemoryStore) -> Result<usize> {
    let expected_len = store.embedder().dimensions();
    let targets: Vec<(String, String)> = store.storage().with_connection(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, content, LENGTH(embedding) FROM memories
             WHERE is_active = 1 AND is_indexed = 1 AND content != ''
               AND (embedding IS NULL OR LENGTH(embedding) != ?)
               AND id NOT IN (SELECT DISTINCT parent_id FROM memories WHERE parent_id IS NOT NULL)",
        )?;
        let rows = stmt
            .query_map(params![(expected_len * 4) as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    })?;

    let mut updated = 0;
    for (id, content) in targets {
        match store.embedder().embed(&content) {
            Ok(embedding) => {
                let blob = crate::embedding::pack_embedding(&embedding);
                store.storage().with_transaction(|conn| {
                    conn.execute(
                        "UPDATE memories SET embedding = ?, updated_at = ? WHERE id = ?",
                        params![blob, Utc::now().to_rfc3339(), id],
                    )?;
                    Ok(())
                })?;
                updated += 1;
            }
            Err(e) => {
                warn!(memory_id = %id, "re-embed failed: {}", e);
            }
        }
    }
    Ok(updated)
}

/// Run entity extraction for memories that have no entity links yet
pub fn backfill_entities(store: &MemoryStore) -> Result<usize> {
    let targets: Vec<(String, String)> = store.storage().with_connection(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, content FROM memories
             WHERE is_active = 1 AND parent_id IS NULL
               AND id NOT IN (SELECT DISTINCT memory_id FROM memory_entities)",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    })?;

    let mut backfilled = 0;
    for (id, content) in targets {
        let extracted = extract_entities(&content);
        if extracted.is_empty() {
            continue;
        }
        let result: Result<()> = store.storage().with_transaction(|conn| {
            for e in &extracted {
                let entity = ensure_entity(conn, &e.name, e.entity_type)?;
                link_entity(conn, &id, &entity.id, e.confidence)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => backfilled += 1,
            Err(e) => warn!(memory_id = %id, "entity backfill failed: {}", e),
        }
    }
    Ok(backfilled)
}

/// Insert a `co_occurs` relationship for entity pairs sharing enough
/// memories without an existing direct relationship
pub fn densify_graph(store: &MemoryStore) -> Result<usize> {
    store.storage().with_transaction(|conn| {
        let threshold = settings::get_i64(conn, "graph.co_occurrence_threshold");
        let mut stmt = conn.prepare(
            "SELECT a.entity_id, b.entity_id, COUNT(*) AS shared
             FROM memory_entities a
             JOIN memory_entities b
               ON a.memory_id = b.memory_id AND a.entity_id < b.entity_id
             GROUP BY a.entity_id, b.entity_id
             HAVING shared >= ?",
        )?;
        let pairs: Vec<(String, String, i64)> = stmt
            .query_map(params![threshold], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut added = 0;
        for (a, b, shared) in pairs {
            let related: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM entity_relationships
                     WHERE (source_entity_id = ?1 AND target_entity_id = ?2)
                        OR (source_entity_id = ?2 AND target_entity_id = ?1)
                     LIMIT 1",
                    params![a, b],
                    |row| row.get(0),
                )
                .ok();
            if related.is_some() {
                continue;
            }
            let confidence = (0.4 + 0.05 * shared as f32).min(0.9);
            if upsert_relationship(conn, &a, &b, "co_occurs", confidence, None, None)? {
                added += 1;
            }
        }
        counters::bump_by(conn, "maintenance.graph_densified", added as i64)?;
        Ok(added)
    })
}

/// Build/strengthen `related` links between memories co-retrieved by the
/// same query within the configured window
pub fn build_co_retrieval_links(store: &MemoryStore) -> Result<usize> {
    store.storage().with_transaction(|conn| {
        let window_hours = settings::get_i64(conn, "links.co_retrieval_window");
        let min_count = settings::get_i64(conn, "links.co_retrieval_min_count");
        let ceiling = settings::get_f64(conn, "links.co_retrieval_ceiling") as f32;
        let cutoff = (Utc::now() - Duration::hours(window_hours)).to_rfc3339();

        // One retrieval event = same query text at the same instant
        let mut stmt = conn.prepare(
            "SELECT query, accessed_at, GROUP_CONCAT(memory_id) FROM access_log
             WHERE query IS NOT NULL AND accessed_at >= ?
             GROUP BY query, accessed_at
             HAVING COUNT(*) > 1",
        )?;
        let groups: Vec<String> = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(2))?
            .filter_map(|r| r.ok())
            .collect();

        let mut pair_counts: std::collections::HashMap<(String, String), i64> =
            std::collections::HashMap::new();
        for group in groups {
            let mut ids: Vec<&str> = group.split(',').collect();
            ids.sort();
            ids.dedup();
            for i in 0..ids.len() {
                for j in (i + 1)..ids.len() {
                    *pair_counts
                        .entry((ids[i].to_string(), ids[j].to_string()))
                        .or_insert(0) += 1;
                }
            }
        }

        let mut linked = 0;
        for ((a, b), count) in pair_counts {
            if count < min_count {
                continue;
            }
            let strength = (0.3 + 0.1 * count as f32).min(ceiling);
            upsert_link(conn, &a, &b, LinkType::Related, strength, false)?;
            linked += 1;
        }
        counters::bump_by(conn, "maintenance.co_retrieval_links", linked as i64)?;
        Ok(linked)
    })
}

/// Nudge scoring weights toward signals whose results keep proving useful.
/// A no-op below the feedback-volume threshold.
pub fn tune_weights(store: &MemoryStore) -> Result<TuneReport> {
    store.storage().with_transaction(|conn| {
        let min_feedback = settings::get_i64(conn, "tuning.min_feedback");
        let step = settings::get_f64(conn, "tuning.step");
        let min_weight = settings::get_f64(conn, "tuning.min_weight");
        let max_weight = settings::get_f64(conn, "tuning.max_weight");

        let volume = counters::get(conn, "feedback.implicit_useful")
            + counters::get(conn, "feedback.explicit_useful");

        let signals = ["vector", "fts", "recency", "frequency"];
        let mut weights: Vec<(String, f64)> = signals
            .iter()
            .map(|s| {
                let key = format!("scoring.{}_weight", s);
                let value = settings::get_f64(conn, &key);
                (key, value)
            })
            .collect();

        if volume < min_feedback {
            return Ok(TuneReport {
                adjusted: false,
                feedback_volume: volume,
                weights,
            });
        }

        // Useful-rate per signal from the attribution counters
        let rates: Vec<f64> = signals
            .iter()
            .map(|s| {
                let shown = counters::get(conn, &format!("tuning.shown.{}", s));
                let useful = counters::get(conn, &format!("tuning.useful.{}", s));
                if shown > 0 {
                    useful as f64 / shown as f64
                } else {
                    0.0
                }
            })
            .collect();
        let mean_rate = rates.iter().sum::<f64>() / rates.len() as f64;

        for (i, (key, value)) in weights.iter_mut().enumerate() {
            let nudge = if rates[i] > mean_rate {
                step
            } else if rates[i] < mean_rate {
                -step
            } else {
                0.0
            };
            *value = (*value + nudge).clamp(min_weight, max_weight);
            settings::set(conn, key, &format!("{:.4}", value))?;
        }

        counters::bump(conn, "maintenance.weights_tuned");
        Ok(TuneReport {
            adjusted: true,
            feedback_volume: volume,
            weights,
        })
    })
}

/// Hard-delete archived memories older than `trash.auto_purge_days`
/// (0 disables purging)
pub fn purge_trash(store: &MemoryStore) -> Result<usize> {
    store.storage().with_transaction(|conn| {
        let purge_days = settings::get_i64(conn, "trash.auto_purge_days");
        if purge_days <= 0 {
            return Ok(0);
        }
        let cutoff = (Utc::now() - Duration::days(purge_days)).to_rfc3339();
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM memories
                 WHERE is_active = 0 AND superseded_by IS NULL AND parent_id IS NULL
                   AND updated_at < ?",
            )?;
            let rows = stmt
                .query_map(params![cutoff], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };
        for id in &ids {
            queries::delete_memory(conn, id)?;
        }
        Ok(ids.len())
    })
}

/// Detect clusters of semantically similar memories and, unless dry-run,
/// merge each into a summary memory that supersedes its members
#[instrument(skip(store))]
pub fn consolidate(store: &MemoryStore, dry_run: bool) -> Result<ConsolidationReport> {
    let (min_similarity, min_size) = store.storage().with_connection(|conn| {
        Ok((
            settings::get_f64(conn, "consolidation.min_similarity") as f32,
            settings::get_i64(conn, "consolidation.min_size") as usize,
        ))
    })?;

    // All active root memories with embeddings, oldest first so summaries
    // lead with the earliest phrasing
    let mut memories = store.browse(&BrowseOptions {
        limit: Some(i64::MAX),
        ..Default::default()
    })?;
    memories.retain(|m| m.embedding.is_some());
    memories.reverse();

    let clusters = find_clusters(&memories, min_similarity, min_size);
    if dry_run || clusters.is_empty() {
        return Ok(ConsolidationReport {
            clusters,
            created_ids: Vec::new(),
            dry_run,
        });
    }

    let by_id: std::collections::HashMap<&str, &Memory> =
        memories.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut created_ids = Vec::new();
    for cluster in &clusters {
        let members: Vec<&Memory> = cluster
            .member_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();
        if members.len() < min_size {
            continue;
        }

        let (content, tags) = build_summary(&members);
        let embedding = store.embedder().embed(&content).ok();
        let now = Utc::now();
        let summary = Memory {
            id: new_id(),
            content: content.clone(),
            content_type: ContentType::Summary,
            source: "consolidation".to_string(),
            source_uri: None,
            attribution: Default::default(),
            tags,
            metadata: std::collections::HashMap::new(),
            embedding,
            content_hash: crate::content::content_hash(&content),
            is_indexed: true,
            is_metadata: false,
            importance: members.iter().map(|m| m.importance).fold(0.0, f32::max),
            access_count: 0,
            useful_count: 0,
            last_accessed_at: None,
            parent_id: None,
            chunk_index: None,
            superseded_by: None,
            is_active: true,
            keywords: String::new(),
            created_at: now,
            updated_at: now,
        };

        let result: Result<()> = store.storage().with_transaction(|conn| {
            queries::insert_memory(conn, &summary)?;
            for member in &members {
                queries::mark_superseded(conn, &member.id, &summary.id)?;
                upsert_link(conn, &summary.id, &member.id, LinkType::DerivedFrom, 1.0, true)?;
            }
            counters::bump(conn, "maintenance.consolidated_clusters");
            Ok(())
        });
        match result {
            Ok(()) => created_ids.push(summary.id),
            Err(e) => warn!("cluster consolidation failed: {}", e),
        }
    }

    Ok(ConsolidationReport {
        clusters,
        created_ids,
        dry_run,
    })
}

/// Run the flagged maintenance sub-operations plus the always-on decay and
/// importance passes
pub fn run_maintenance(store: &MemoryStore, flags: MaintenanceFlags) -> Result<MaintenanceReport> {
    let mut report = MaintenanceReport::default();

    report.archived = Some(archive_stale(store)?);
    let (boosted, decayed) = adjust_importance(store)?;
    report.importance_boosted = Some(boosted);
    report.importance_decayed = Some(decayed);
    report.purged = Some(purge_trash(store)?);

    if flags.reembed {
        report.reembedded = Some(reembed_missing(store)?);
    }
    if flags.backfill_entities {
        report.entities_backfilled = Some(backfill_entities(store)?);
    }
    if flags.recalibrate {
        report.recalibration = Some(recalibrate_importance(store)?);
    }
    if flags.densify_graph {
        report.graph_edges_added = Some(densify_graph(store)?);
    }
    if flags.build_co_retrieval_links {
        report.co_retrieval_links = Some(build_co_retrieval_links(store)?);
    }
    if flags.tune_weights {
        report.weights = Some(tune_weights(store)?);
    }

    Ok(report)
}

fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

/// Inverse standard-normal CDF (Acklam's rational approximation)
fn normal_quantile(p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    let p_low = 0.02425;
    let p_high = 1.0 - p_low;

    if p < p_low {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= p_high {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_quantile_symmetry() {
        assert!(normal_quantile(0.5).abs() < 1e-9);
        assert!((normal_quantile(0.8413) - 1.0).abs() < 0.01);
        assert!((normal_quantile(0.1587) + 1.0).abs() < 0.01);
        assert!((normal_quantile(0.25) + normal_quantile(0.75)).abs() < 1e-9);
    }

    #[test]
    fn test_mean_stddev() {
        let (mean, stddev) = mean_stddev(&[1.0, 2.0, 3.0, 4.0]);
        assert!((mean - 2.5).abs() < 1e-9);
        assert!((stddev - (1.25_f64).sqrt()).abs() < 1e-9);
        assert_eq!(mean_stddev(&[]), (0.0, 0.0));
    }
}
