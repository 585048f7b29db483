//! Multi-hop link expansion
//!
//! After the primary result set is ranked, memory-link edges are followed one
//! hop out from the top ids. Linked memories come back as an annex, never
//! mixed into the primary ranking.

use std::collections::HashSet;

use rusqlite::Connection;

use crate::error::Result;
use crate::storage::links::links_for_ids;
use crate::storage::queries::get_memory;
use crate::types::LinkedResult;

/// Follow links (any type, strength >= floor) one hop out from `primary_ids`,
/// capped at `limit`. Primary ids themselves are never returned.
pub fn expand_links(
    conn: &Connection,
    primary_ids: &[String],
    strength_floor: f32,
    limit: i64,
) -> Result<Vec<LinkedResult>> {
    if primary_ids.is_empty() || limit <= 0 {
        return Ok(Vec::new());
    }

    let primary: HashSet<&str> = primary_ids.iter().map(|s| s.as_str()).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<LinkedResult> = Vec::new();

    for link in links_for_ids(conn, primary_ids)? {
        if link.strength < strength_floor {
            continue;
        }
        // Orient the hop away from whichever endpoint is primary
        let (from, to) = if primary.contains(link.source_memory_id.as_str()) {
            (link.source_memory_id.clone(), link.target_memory_id.clone())
        } else {
            (link.target_memory_id.clone(), link.source_memory_id.clone())
        };
        if primary.contains(to.as_str()) || !seen.insert(to.clone()) {
            continue;
        }

        if let Some(memory) = get_memory(conn, &to)? {
            out.push(LinkedResult {
                memory,
                linked_from: from,
                link_type: link.link_type,
                strength: link.strength,
            });
        }
        if out.len() as i64 >= limit {
            break;
        }
    }

    // Strongest links first
    out.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::links::upsert_link;
    use crate::storage::migrations::run_migrations;
    use crate::storage::queries::{insert_memory, tests_support::sample_memory};
    use crate::types::LinkType;

    fn setup() -> (Connection, String, String, String) {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let mut a = sample_memory("memory a content");
        let mut b = sample_memory("memory b content");
        let mut c = sample_memory("memory c content");
        a.content_hash = "ha".into();
        b.content_hash = "hb".into();
        c.content_hash = "hc".into();
        insert_memory(&conn, &a).unwrap();
        insert_memory(&conn, &b).unwrap();
        insert_memory(&conn, &c).unwrap();
        (conn, a.id, b.id, c.id)
    }

    #[test]
    fn test_one_hop_only() {
        let (conn, a, b, c) = setup();
        upsert_link(&conn, &a, &b, LinkType::Related, 0.8, false).unwrap();
        upsert_link(&conn, &b, &c, LinkType::Elaborates, 0.7, false).unwrap();

        let annex = expand_links(&conn, &[a.clone()], 0.3, 10).unwrap();
        assert_eq!(annex.len(), 1);
        assert_eq!(annex[0].memory.id, b);
        assert_eq!(annex[0].linked_from, a);
        assert_eq!(annex[0].link_type, LinkType::Related);
        assert!((annex[0].strength - 0.8).abs() < 1e-6);
        // c is two hops away and must not appear
        assert!(annex.iter().all(|l| l.memory.id != c));
    }

    #[test]
    fn test_strength_floor_filters() {
        let (conn, a, b, _c) = setup();
        upsert_link(&conn, &a, &b, LinkType::Related, 0.2, false).unwrap();

        let annex = expand_links(&conn, &[a], 0.3, 10).unwrap();
        assert!(annex.is_empty());
    }

    #[test]
    fn test_incoming_links_expand_too() {
        let (conn, a, b, _c) = setup();
        // Link stored with b as source; expanding from a must still reach b
        upsert_link(&conn, &b, &a, LinkType::Supports, 0.9, false).unwrap();

        let annex = expand_links(&conn, &[a.clone()], 0.3, 10).unwrap();
        assert_eq!(annex.len(), 1);
        assert_eq!(annex[0].memory.id, b);
        assert_eq!(annex[0].linked_from, a);
    }

    #[test]
    fn test_budget_cap() {
        let (conn, a, b, c) = setup();
        upsert_link(&conn, &a, &b, LinkType::Related, 0.8, false).unwrap();
        upsert_link(&conn, &a, &c, LinkType::Related, 0.9, false).unwrap();

        let annex = expand_links(&conn, &[a], 0.3, 1).unwrap();
        assert_eq!(annex.len(), 1);
    }
}
