//! Typed memory-to-memory links
//!
//! At most one link exists per unordered pair. Re-linking max-merges strength
//! and keeps the earliest link_type unless an explicit override is requested.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::types::{LinkType, MemoryLink};

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn link_from_row(row: &Row) -> rusqlite::Result<MemoryLink> {
    let link_type: String = row.get(2)?;
    let created_at: String = row.get(4)?;
    Ok(MemoryLink {
        source_memory_id: row.get(0)?,
        target_memory_id: row.get(1)?,
        link_type: link_type.parse().unwrap_or_default(),
        strength: row.get(3)?,
        created_at: parse_ts(&created_at),
    })
}

/// Find the stored link for an unordered pair, if any
fn find_pair(conn: &Connection, a: &str, b: &str) -> Result<Option<MemoryLink>> {
    let mut stmt = conn.prepare_cached(
        "SELECT source_memory_id, target_memory_id, link_type, strength, created_at
         FROM memory_links
         WHERE (source_memory_id = ?1 AND target_memory_id = ?2)
            OR (source_memory_id = ?2 AND target_memory_id = ?1)",
    )?;
    Ok(stmt.query_row(params![a, b], link_from_row).ok())
}

/// Upsert a link. Strength is monotone non-decreasing; link_type changes only
/// when `override_type` is set.
pub fn upsert_link(
    conn: &Connection,
    source: &str,
    target: &str,
    link_type: LinkType,
    strength: f32,
    override_type: bool,
) -> Result<MemoryLink> {
    let strength = strength.clamp(0.0, 1.0);

    if source == target {
        return Err(crate::error::ExocortexError::InvalidInput(
            "cannot link a memory to itself".into(),
        ));
    }

    match find_pair(conn, source, target)? {
        Some(existing) => {
            let new_strength = existing.strength.max(strength);
            let new_type = if override_type { link_type } else { existing.link_type };
            conn.execute(
                "UPDATE memory_links SET strength = ?, link_type = ?
                 WHERE source_memory_id = ? AND target_memory_id = ?",
                params![
                    new_strength,
                    new_type.as_str(),
                    existing.source_memory_id,
                    existing.target_memory_id,
                ],
            )?;
            Ok(MemoryLink {
                strength: new_strength,
                link_type: new_type,
                ..existing
            })
        }
        None => {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO memory_links
                     (source_memory_id, target_memory_id, link_type, strength, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![source, target, link_type.as_str(), strength, now.to_rfc3339()],
            )?;
            Ok(MemoryLink {
                source_memory_id: source.to_string(),
                target_memory_id: target.to_string(),
                link_type,
                strength,
                created_at: now,
            })
        }
    }
}

/// Delete the link for an unordered pair; true when something was removed
pub fn unlink(conn: &Connection, a: &str, b: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM memory_links
         WHERE (source_memory_id = ?1 AND target_memory_id = ?2)
            OR (source_memory_id = ?2 AND target_memory_id = ?1)",
        params![a, b],
    )?;
    Ok(affected > 0)
}

/// Outgoing and incoming links for a set of memories, deduplicated
pub fn links_for_ids(conn: &Connection, ids: &[String]) -> Result<Vec<MemoryLink>> {
    let mut out: Vec<MemoryLink> = Vec::new();
    for id in ids {
        let mut stmt = conn.prepare_cached(
            "SELECT source_memory_id, target_memory_id, link_type, strength, created_at
             FROM memory_links
             WHERE source_memory_id = ?1 OR target_memory_id = ?1",
        )?;
        let rows: Vec<MemoryLink> = stmt
            .query_map(params![id], link_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        for link in rows {
            let dup = out.iter().any(|l| {
                l.source_memory_id == link.source_memory_id
                    && l.target_memory_id == link.target_memory_id
            });
            if !dup {
                out.push(link);
            }
        }
    }
    Ok(out)
}

/// All links (backup export)
pub fn all_links(conn: &Connection) -> Result<Vec<MemoryLink>> {
    let mut stmt = conn.prepare(
        "SELECT source_memory_id, target_memory_id, link_type, strength, created_at
         FROM memory_links",
    )?;
    let rows = stmt
        .query_map([], link_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        run_migrations(&c).unwrap();
        for id in ["a", "b", "c"] {
            c.execute(
                "INSERT INTO memories (id, content, content_hash, created_at, updated_at)
                 VALUES (?1, 'x', ?1 || '-h', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                params![id],
            )
            .unwrap();
        }
        c
    }

    #[test]
    fn test_upsert_max_merges_strength() {
        let c = conn();
        upsert_link(&c, "a", "b", LinkType::Related, 0.8, false).unwrap();
        let updated = upsert_link(&c, "a", "b", LinkType::Related, 0.3, false).unwrap();
        assert!((updated.strength - 0.8).abs() < 1e-6);

        let raised = upsert_link(&c, "a", "b", LinkType::Related, 0.95, false).unwrap();
        assert!((raised.strength - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_one_link_per_unordered_pair() {
        let c = conn();
        upsert_link(&c, "a", "b", LinkType::Related, 0.5, false).unwrap();
        upsert_link(&c, "b", "a", LinkType::Elaborates, 0.7, false).unwrap();

        let count: i64 = c
            .query_row("SELECT COUNT(*) FROM memory_links", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        // Earliest type preserved without override
        let links = all_links(&c).unwrap();
        assert_eq!(links[0].link_type, LinkType::Related);
        assert!((links[0].strength - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_override_type() {
        let c = conn();
        upsert_link(&c, "a", "b", LinkType::Related, 0.5, false).unwrap();
        let updated = upsert_link(&c, "a", "b", LinkType::Contradicts, 0.5, true).unwrap();
        assert_eq!(updated.link_type, LinkType::Contradicts);
    }

    #[test]
    fn test_self_link_rejected() {
        let c = conn();
        assert!(upsert_link(&c, "a", "a", LinkType::Related, 0.5, false).is_err());
    }

    #[test]
    fn test_unlink_either_direction() {
        let c = conn();
        upsert_link(&c, "a", "b", LinkType::Related, 0.5, false).unwrap();
        assert!(unlink(&c, "b", "a").unwrap());
        assert!(!unlink(&c, "b", "a").unwrap());
    }

    #[test]
    fn test_links_for_ids_dedups() {
        let c = conn();
        upsert_link(&c, "a", "b", LinkType::Related, 0.5, false).unwrap();
        upsert_link(&c, "b", "c", LinkType::Supports, 0.6, false).unwrap();

        let links = links_for_ids(&c, &["a".into(), "b".into()]).unwrap();
        assert_eq!(links.len(), 2);
    }
}
