//! Settings key-value store
//!
//! Every runtime knob lives in the `settings` table as a string; unset keys
//! fall back to the compiled-in defaults below.

use rusqlite::{params, Connection};

use crate::error::Result;

/// Recognized keys and their defaults
pub const DEFAULTS: &[(&str, &str)] = &[
    ("dedup.enabled", "true"),
    ("dedup.hash_enabled", "true"),
    ("dedup.skip_insert_on_match", "true"),
    ("dedup.similarity_threshold", "0.85"),
    ("dedup.candidate_pool", "200"),
    ("chunking.enabled", "true"),
    ("chunking.max_length", "1500"),
    ("chunking.target_size", "500"),
    ("auto_tagging.enabled", "true"),
    ("scoring.use_rrf", "false"),
    ("scoring.rrf_k", "60"),
    ("scoring.vector_weight", "0.40"),
    ("scoring.fts_weight", "0.25"),
    ("scoring.recency_weight", "0.15"),
    ("scoring.frequency_weight", "0.10"),
    ("scoring.importance_boost", "0.10"),
    ("scoring.constant_shift", "0.10"),
    ("scoring.metadata_penalty", "0.5"),
    ("search.vector_candidate_pool", "500"),
    ("search.recency_half_life_days", "30"),
    ("search.feedback_ttl_secs", "300"),
    ("search.expansion_limit", "10"),
    ("search.link_strength_floor", "0.3"),
    ("decay.archive_age_days", "90"),
    ("decay.protected_importance", "0.7"),
    ("decay.floor", "0.05"),
    ("decay.grace_period_days", "14"),
    ("importance.auto_adjust", "true"),
    ("importance.boost_threshold", "3"),
    ("importance.boost_window_days", "7"),
    ("importance.boost_delta", "0.05"),
    ("importance.decay_after_days", "60"),
    ("importance.decay_delta", "0.02"),
    ("consolidation.min_similarity", "0.75"),
    ("consolidation.min_size", "3"),
    ("benchmark.indexed", "false"),
    ("benchmark.chunking", "false"),
    ("benchmark.default_importance", "0.15"),
    ("observability.log_events", "false"),
    ("links.co_retrieval_window", "24"),
    ("links.co_retrieval_min_count", "2"),
    ("links.co_retrieval_ceiling", "0.9"),
    ("graph.co_occurrence_threshold", "3"),
    ("graph.max_betweenness_nodes", "1000"),
    ("graph.community_max_iterations", "10"),
    ("goal.autolink_threshold", "0.6"),
    ("trash.auto_purge_days", "0"),
    ("tuning.min_feedback", "20"),
    ("tuning.step", "0.02"),
    ("tuning.min_weight", "0.05"),
    ("tuning.max_weight", "0.60"),
    // Consumed by external adapters only
    ("ai.provider", ""),
    ("ai.api_key", ""),
    ("ai.model", ""),
];

/// Raw setting row, or None
pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .ok();
    Ok(value)
}

/// Set (upsert) a setting
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Delete a setting, reverting to the default
pub fn unset(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?", params![key])?;
    Ok(())
}

fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Stored value, falling back to the compiled-in default
pub fn get_string(conn: &Connection, key: &str) -> String {
    get(conn, key)
        .ok()
        .flatten()
        .or_else(|| default_for(key).map(String::from))
        .unwrap_or_default()
}

pub fn get_bool(conn: &Connection, key: &str) -> bool {
    matches!(get_string(conn, key).as_str(), "true" | "1" | "yes" | "on")
}

pub fn get_f64(conn: &Connection, key: &str) -> f64 {
    get_string(conn, key).parse().unwrap_or_else(|_| {
        default_for(key)
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0)
    })
}

pub fn get_i64(conn: &Connection, key: &str) -> i64 {
    get_string(conn, key).parse().unwrap_or_else(|_| {
        default_for(key).and_then(|d| d.parse().ok()).unwrap_or(0)
    })
}

/// All stored settings merged over the defaults
pub fn all(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut merged: Vec<(String, String)> = DEFAULTS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
    let rows: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();

    for (k, v) in rows {
        match merged.iter_mut().find(|(mk, _)| *mk == k) {
            Some(entry) => entry.1 = v,
            None => merged.push((k, v)),
        }
    }
    merged.sort();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        run_migrations(&c).unwrap();
        c
    }

    #[test]
    fn test_defaults_apply_when_unset() {
        let c = conn();
        assert!(get_bool(&c, "dedup.enabled"));
        assert!((get_f64(&c, "dedup.similarity_threshold") - 0.85).abs() < 1e-9);
        assert_eq!(get_i64(&c, "dedup.candidate_pool"), 200);
    }

    #[test]
    fn test_set_overrides_default() {
        let c = conn();
        set(&c, "dedup.enabled", "false").unwrap();
        assert!(!get_bool(&c, "dedup.enabled"));

        unset(&c, "dedup.enabled").unwrap();
        assert!(get_bool(&c, "dedup.enabled"));
    }

    #[test]
    fn test_garbage_value_falls_back_to_default() {
        let c = conn();
        set(&c, "chunking.max_length", "not-a-number").unwrap();
        assert_eq!(get_i64(&c, "chunking.max_length"), 1500);
    }

    #[test]
    fn test_all_merges_stored_over_defaults() {
        let c = conn();
        set(&c, "chunking.max_length", "900").unwrap();
        let all = all(&c).unwrap();
        let entry = all.iter().find(|(k, _)| k == "chunking.max_length").unwrap();
        assert_eq!(entry.1, "900");
    }
}
