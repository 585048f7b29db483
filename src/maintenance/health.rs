//! Structured health checks
//!
//! Each named check reports ok / warn / critical with a human message; the
//! overall status is the worst of its parts.

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::intelligence::consolidation::find_clusters;
use crate::storage::entity_queries::count_orphan_entities;
use crate::storage::settings;
use crate::store::MemoryStore;
use crate::types::BrowseOptions;

/// Severity of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warn,
    Critical,
}

/// One named check
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

/// Full health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

fn check(name: &str, status: HealthStatus, message: String) -> HealthCheck {
    HealthCheck {
        name: name.to_string(),
        status,
        message,
    }
}

/// Run every health check
pub fn health_checks(store: &MemoryStore) -> Result<HealthReport> {
    let mut checks = Vec::new();

    let counts = store.storage().with_connection(|conn| {
        let one = |sql: &str| -> i64 { conn.query_row(sql, [], |r| r.get(0)).unwrap_or(0) };
        Ok((
            one("SELECT COUNT(*) FROM memories WHERE is_active = 1 AND parent_id IS NULL"),
            one("SELECT COUNT(*) FROM memories WHERE is_active = 1 AND parent_id IS NULL \
                 AND is_indexed = 1 AND embedding IS NULL \
                 AND id NOT IN (SELECT DISTINCT parent_id FROM memories WHERE parent_id IS NOT NULL)"),
            one("SELECT COUNT(*) FROM memories m WHERE m.is_active = 1 AND m.parent_id IS NULL \
                 AND NOT EXISTS (SELECT 1 FROM memory_tags t WHERE t.memory_id = m.id)"),
            one(&format!(
                "SELECT COUNT(*) FROM access_log WHERE accessed_at >= '{}'",
                (Utc::now() - Duration::days(7)).to_rfc3339()
            )),
            one(&format!(
                "SELECT COUNT(*) FROM memories WHERE created_at >= '{}'",
                (Utc::now() - Duration::days(14)).to_rfc3339()
            )),
        ))
    })?;
    let (active, embedding_gap, untagged, recent_accesses, recent_creates) = counts;

    // Embedding gap
    checks.push(if active == 0 || embedding_gap == 0 {
        check("embedding_gap", HealthStatus::Ok, "all indexed memories embedded".into())
    } else if embedding_gap * 5 > active {
        check(
            "embedding_gap",
            HealthStatus::Critical,
            format!("{} of {} active memories lack embeddings", embedding_gap, active),
        )
    } else {
        check(
            "embedding_gap",
            HealthStatus::Warn,
            format!("{} memories pending re-embed", embedding_gap),
        )
    });

    // Tag sparsity
    checks.push(if active == 0 || untagged * 2 < active {
        check("tag_sparsity", HealthStatus::Ok, "tag coverage is healthy".into())
    } else {
        check(
            "tag_sparsity",
            HealthStatus::Warn,
            format!("{} of {} active memories have no tags", untagged, active),
        )
    });

    // Entity orphans
    let orphans = store.storage().with_connection(count_orphan_entities)?;
    checks.push(if orphans == 0 {
        check("entity_orphans", HealthStatus::Ok, "no orphan entities".into())
    } else if orphans > 50 {
        check(
            "entity_orphans",
            HealthStatus::Warn,
            format!("{} entities have no memory links", orphans),
        )
    } else {
        check(
            "entity_orphans",
            HealthStatus::Ok,
            format!("{} orphan entities (within tolerance)", orphans),
        )
    });

    // Retrieval desert: a populated store nobody searches
    checks.push(if active < 20 || recent_accesses > 0 {
        check("retrieval_desert", HealthStatus::Ok, "retrieval activity present".into())
    } else {
        check(
            "retrieval_desert",
            HealthStatus::Warn,
            format!("{} active memories but no retrievals in 7 days", active),
        )
    });

    // Importance collapse: a flat distribution can no longer rank
    let importances: Vec<f64> = store.storage().with_connection(|conn| {
        let mut stmt = conn.prepare(
            "SELECT importance FROM memories WHERE is_active = 1 AND parent_id IS NULL",
        )?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    })?;
    let stddev = {
        let n = importances.len().max(1) as f64;
        let mean = importances.iter().sum::<f64>() / n;
        (importances.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
    };
    checks.push(if importances.len() < 20 || stddev >= 0.05 {
        check("importance_collapse", HealthStatus::Ok, "importance spread is healthy".into())
    } else {
        check(
            "importance_collapse",
            HealthStatus::Warn,
            format!("importance stddev {:.3}; consider recalibration", stddev),
        )
    });

    // Consolidation backlog
    let (min_similarity, min_size) = store.storage().with_connection(|conn| {
        Ok((
            settings::get_f64(conn, "consolidation.min_similarity") as f32,
            settings::get_i64(conn, "consolidation.min_size") as usize,
        ))
    })?;
    let mut embedded = store.browse(&BrowseOptions {
        limit: Some(2000),
        ..Default::default()
    })?;
    embedded.retain(|m| m.embedding.is_some());
    let backlog = find_clusters(&embedded, min_similarity, min_size).len();
    checks.push(if backlog < 5 {
        check(
            "consolidation_backlog",
            HealthStatus::Ok,
            format!("{} clusters awaiting consolidation", backlog),
        )
    } else {
        check(
            "consolidation_backlog",
            HealthStatus::Warn,
            format!("{} clusters awaiting consolidation", backlog),
        )
    });

    // Growth stall
    checks.push(if active < 20 || recent_creates > 0 {
        check("growth_stall", HealthStatus::Ok, "store is still growing".into())
    } else {
        check(
            "growth_stall",
            HealthStatus::Warn,
            "no new memories in 14 days".into(),
        )
    });

    // Stale access: most of the store untouched for a long time
    let stale: i64 = store.storage().with_connection(|conn| {
        let cutoff = (Utc::now() - Duration::days(90)).to_rfc3339();
        Ok(conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE is_active = 1 AND parent_id IS NULL
                 AND COALESCE(last_accessed_at, created_at) < ?",
                [cutoff],
                |r| r.get(0),
            )
            .unwrap_or(0))
    })?;
    checks.push(if active == 0 || stale * 2 < active {
        check("stale_access", HealthStatus::Ok, "access recency is healthy".into())
    } else {
        check(
            "stale_access",
            HealthStatus::Warn,
            format!("{} of {} active memories untouched for 90+ days", stale, active),
        )
    });

    let status = checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Ok);

    Ok(HealthReport { status, checks })
}
