//! Row-level queries for entities, entity links, relationships, and
//! contradictions

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::types::{
    Contradiction, Entity, EntityLink, EntityRelationship, EntityType, new_id,
};

const ENTITY_COLUMNS: &str = "id, name, entity_type, aliases, metadata, created_at, updated_at";

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn entity_from_row(row: &Row) -> rusqlite::Result<Entity> {
    let entity_type: String = row.get(2)?;
    let aliases: String = row.get(3)?;
    let metadata: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: entity_type.parse().unwrap_or_default(),
        aliases: serde_json::from_str(&aliases).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        tags: Vec::new(),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

fn load_entity_tags(conn: &Connection, entity_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT tag FROM entity_tags WHERE entity_id = ? ORDER BY tag")?;
    let tags = stmt
        .query_map(params![entity_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(tags)
}

/// Find an entity by case-insensitive name
pub fn get_entity_by_name(conn: &Connection, name: &str) -> Result<Option<Entity>> {
    let sql = format!(
        "SELECT {} FROM entities WHERE name = ? COLLATE NOCASE",
        ENTITY_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let entity = stmt.query_row(params![name], entity_from_row).ok();
    match entity {
        Some(mut e) => {
            e.tags = load_entity_tags(conn, &e.id)?;
            Ok(Some(e))
        }
        None => Ok(None),
    }
}

/// Get an entity by id
pub fn get_entity(conn: &Connection, id: &str) -> Result<Option<Entity>> {
    let sql = format!("SELECT {} FROM entities WHERE id = ?", ENTITY_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    let entity = stmt.query_row(params![id], entity_from_row).ok();
    match entity {
        Some(mut e) => {
            e.tags = load_entity_tags(conn, &e.id)?;
            Ok(Some(e))
        }
        None => Ok(None),
    }
}

/// Create an entity if missing, reuse by case-insensitive name otherwise.
/// Idempotent under concurrent callers via the unique name index.
pub fn ensure_entity(conn: &Connection, name: &str, entity_type: EntityType) -> Result<Entity> {
    if let Some(existing) = get_entity_by_name(conn, name)? {
        return Ok(existing);
    }

    let now = Utc::now().to_rfc3339();
    let id = new_id();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO entities (id, name, entity_type, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)",
        params![id, name, entity_type.as_str(), now, now],
    )?;

    if inserted == 0 {
        // Lost the race; the winner's row exists now
        return get_entity_by_name(conn, name)?
            .ok_or_else(|| crate::error::ExocortexError::Storage(format!(
                "entity {} vanished during ensure",
                name
            )));
    }

    get_entity(conn, &id)?.ok_or_else(|| {
        crate::error::ExocortexError::Storage(format!("entity {} vanished after insert", id))
    })
}

/// List all entities, optionally filtered by type
pub fn list_entities(
    conn: &Connection,
    entity_type: Option<EntityType>,
    limit: i64,
) -> Result<Vec<Entity>> {
    let (sql, binding): (String, Option<String>) = match entity_type {
        Some(t) => (
            format!(
                "SELECT {} FROM entities WHERE entity_type = ? ORDER BY name LIMIT ?",
                ENTITY_COLUMNS
            ),
            Some(t.as_str().to_string()),
        ),
        None => (
            format!("SELECT {} FROM entities ORDER BY name LIMIT ?", ENTITY_COLUMNS),
            None,
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let mut entities: Vec<Entity> = match binding {
        Some(t) => stmt
            .query_map(params![t, limit], entity_from_row)?
            .filter_map(|r| r.ok())
            .collect(),
        None => stmt
            .query_map(params![limit], entity_from_row)?
            .filter_map(|r| r.ok())
            .collect(),
    };
    for e in &mut entities {
        e.tags = load_entity_tags(conn, &e.id)?;
    }
    Ok(entities)
}

/// Upsert a memory-entity link; latest relevance wins
pub fn link_entity(
    conn: &Connection,
    memory_id: &str,
    entity_id: &str,
    relevance: f32,
) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_entities (memory_id, entity_id, relevance) VALUES (?, ?, ?)
         ON CONFLICT(memory_id, entity_id) DO UPDATE SET relevance = excluded.relevance",
        params![memory_id, entity_id, relevance.clamp(0.0, 1.0)],
    )?;
    Ok(())
}

/// Entities linked to a memory, with relevance
pub fn entities_for_memory(conn: &Connection, memory_id: &str) -> Result<Vec<(Entity, f32)>> {
    let sql = format!(
        "SELECT {}, me.relevance FROM entities e
         JOIN memory_entities me ON me.entity_id = e.id
         WHERE me.memory_id = ?
         ORDER BY me.relevance DESC",
        ENTITY_COLUMNS
            .split(", ")
            .map(|c| format!("e.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows: Vec<(Entity, f32)> = stmt
        .query_map(params![memory_id], |row| {
            Ok((entity_from_row(row)?, row.get(7)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Memory ids linked to an entity
pub fn memory_ids_for_entity(conn: &Connection, entity_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT memory_id FROM memory_entities WHERE entity_id = ? ORDER BY relevance DESC",
    )?;
    let ids = stmt
        .query_map(params![entity_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

/// All memory-entity links (backup export)
pub fn all_entity_links(conn: &Connection) -> Result<Vec<EntityLink>> {
    let mut stmt =
        conn.prepare("SELECT memory_id, entity_id, relevance FROM memory_entities")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(EntityLink {
                memory_id: row.get(0)?,
                entity_id: row.get(1)?,
                relevance: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Insert a relationship, deduplicated by (source, target, relationship)
pub fn upsert_relationship(
    conn: &Connection,
    source_entity_id: &str,
    target_entity_id: &str,
    relationship: &str,
    confidence: f32,
    memory_id: Option<&str>,
    context: Option<&str>,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO entity_relationships
             (id, source_entity_id, target_entity_id, relationship, confidence, memory_id, context, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            new_id(),
            source_entity_id,
            target_entity_id,
            relationship,
            confidence.clamp(0.0, 1.0),
            memory_id,
            context,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(inserted == 1)
}

fn relationship_from_row(row: &Row) -> rusqlite::Result<EntityRelationship> {
    let created_at: String = row.get(7)?;
    Ok(EntityRelationship {
        id: row.get(0)?,
        source_entity_id: row.get(1)?,
        target_entity_id: row.get(2)?,
        relationship: row.get(3)?,
        confidence: row.get(4)?,
        memory_id: row.get(5)?,
        context: row.get(6)?,
        created_at: parse_ts(&created_at),
    })
}

/// All relationships (graph construction, backup export)
pub fn all_relationships(conn: &Connection) -> Result<Vec<EntityRelationship>> {
    let mut stmt = conn.prepare(
        "SELECT id, source_entity_id, target_entity_id, relationship, confidence, memory_id, \
         context, created_at FROM entity_relationships",
    )?;
    let rows = stmt
        .query_map([], relationship_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Relationships touching an entity
pub fn relationships_for_entity(
    conn: &Connection,
    entity_id: &str,
) -> Result<Vec<EntityRelationship>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, source_entity_id, target_entity_id, relationship, confidence, memory_id, \
         context, created_at FROM entity_relationships
         WHERE source_entity_id = ? OR target_entity_id = ?",
    )?;
    let rows = stmt
        .query_map(params![entity_id, entity_id], relationship_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Entities with no memory links at all (maintenance signal)
pub fn count_orphan_entities(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM entities e
         WHERE NOT EXISTS (SELECT 1 FROM memory_entities me WHERE me.entity_id = e.id)",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Record a contradiction between two memories
pub fn record_contradiction(
    conn: &Connection,
    memory_id_a: &str,
    memory_id_b: &str,
    detail: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO contradictions (id, memory_id_a, memory_id_b, detail, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![new_id(), memory_id_a, memory_id_b, detail, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// All recorded contradictions (backup export)
pub fn all_contradictions(conn: &Connection) -> Result<Vec<Contradiction>> {
    let mut stmt = conn.prepare(
        "SELECT id, memory_id_a, memory_id_b, detail, created_at FROM contradictions",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let created_at: String = row.get(4)?;
            Ok(Contradiction {
                id: row.get(0)?,
                memory_id_a: row.get(1)?,
                memory_id_b: row.get(2)?,
                detail: row.get(3)?,
                created_at: parse_ts(&created_at),
            })
        })?
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
        c
    }

    #[test]
    fn test_ensure_entity_is_idempotent_case_insensitive() {
        let c = conn();
        let a = ensure_entity(&c, "Anthropic", EntityType::Organization).unwrap();
        let b = ensure_entity(&c, "anthropic", EntityType::Organization).unwrap();
        assert_eq!(a.id, b.id);

        let count: i64 = c
            .query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_link_entity_latest_relevance_wins() {
        let c = conn();
        c.execute(
            "INSERT INTO memories (id, content, content_hash, created_at, updated_at)
             VALUES ('m1', 'x', 'h', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        let e = ensure_entity(&c, "SQLite", EntityType::Technology).unwrap();

        link_entity(&c, "m1", &e.id, 0.4).unwrap();
        link_entity(&c, "m1", &e.id, 0.9).unwrap();

        let links = entities_for_memory(&c, "m1").unwrap();
        assert_eq!(links.len(), 1);
        assert!((links[0].1 - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_relationship_dedup_by_triple() {
        let c = conn();
        let a = ensure_entity(&c, "Alice", EntityType::Person).unwrap();
        let b = ensure_entity(&c, "Anthropic", EntityType::Organization).unwrap();

        assert!(upsert_relationship(&c, &a.id, &b.id, "works_at", 0.8, None, None).unwrap());
        assert!(!upsert_relationship(&c, &a.id, &b.id, "works_at", 0.9, None, None).unwrap());
        assert!(upsert_relationship(&c, &a.id, &b.id, "created", 0.7, None, None).unwrap());

        assert_eq!(all_relationships(&c).unwrap().len(), 2);
    }

    #[test]
    fn test_orphan_entity_count() {
        let c = conn();
        ensure_entity(&c, "Loner", EntityType::Concept).unwrap();
        assert_eq!(count_orphan_entities(&c).unwrap(), 1);
    }
}
