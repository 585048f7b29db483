//! Row-level queries for memories: mapping, CRUD, tags, FTS maintenance,
//! access logging, browsing, and timeline walks
//!
//! Functions here operate on a borrowed connection; transaction boundaries
//! belong to the callers in `store`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::embedding::unpack_embedding;
use crate::error::{ExocortexError, Result};
use crate::types::{Attribution, BrowseOptions, ContentType, Memory, StoreStats, TimelineMode};

/// Column list matching [`memory_from_row`] positions
pub const MEMORY_COLUMNS: &str = "id, content, content_type, source, source_uri, provider, \
     model_id, model_name, agent, session_id, conversation_id, embedding, content_hash, \
     is_indexed, is_metadata, importance, access_count, useful_count, last_accessed_at, \
     parent_id, chunk_index, superseded_by, is_active, metadata, keywords, created_at, \
     updated_at";

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Map a row selected with [`MEMORY_COLUMNS`] into a Memory (tags not loaded)
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let content_type: String = row.get(2)?;
    let embedding: Option<Vec<u8>> = row.get(11)?;
    let last_accessed: Option<String> = row.get(18)?;
    let metadata_json: Option<String> = row.get(23)?;
    let created_at: String = row.get(25)?;
    let updated_at: String = row.get(26)?;

    Ok(Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        content_type: content_type.parse().unwrap_or_default(),
        source: row.get(3)?,
        source_uri: row.get(4)?,
        attribution: Attribution {
            provider: row.get(5)?,
            model_id: row.get(6)?,
            model_name: row.get(7)?,
            agent: row.get(8)?,
            session_id: row.get(9)?,
            conversation_id: row.get(10)?,
        },
        tags: Vec::new(),
        metadata: metadata_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default(),
        embedding: embedding.and_then(|b| unpack_embedding(&b)),
        content_hash: row.get(12)?,
        is_indexed: row.get(13)?,
        is_metadata: row.get(14)?,
        importance: row.get(15)?,
        access_count: row.get(16)?,
        useful_count: row.get(17)?,
        last_accessed_at: last_accessed.map(|s| parse_ts(&s)),
        parent_id: row.get(19)?,
        chunk_index: row.get(20)?,
        superseded_by: row.get(21)?,
        is_active: row.get(22)?,
        keywords: row.get(24)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

/// Load the tag set of a memory
pub fn load_tags(conn: &Connection, memory_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT tag FROM memory_tags WHERE memory_id = ? ORDER BY tag")?;
    let tags = stmt
        .query_map(params![memory_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(tags)
}

/// Get a memory by id with tags loaded; None when absent
pub fn get_memory(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {} FROM memories WHERE id = ?", MEMORY_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    let memory = stmt.query_row(params![id], memory_from_row).ok();

    match memory {
        Some(mut m) => {
            m.tags = load_tags(conn, &m.id)?;
            Ok(Some(m))
        }
        None => Ok(None),
    }
}

/// Get a memory or fail with NotFound
pub fn require_memory(conn: &Connection, id: &str) -> Result<Memory> {
    get_memory(conn, id)?.ok_or_else(|| ExocortexError::NotFound(id.to_string()))
}

/// Child chunks of a parent, ordered by chunk_index
pub fn get_children(conn: &Connection, parent_id: &str) -> Result<Vec<Memory>> {
    let sql = format!(
        "SELECT {} FROM memories WHERE parent_id = ? ORDER BY chunk_index",
        MEMORY_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut memories: Vec<Memory> = stmt
        .query_map(params![parent_id], memory_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    for m in &mut memories {
        m.tags = load_tags(conn, &m.id)?;
    }
    Ok(memories)
}

/// Insert a fully-resolved memory row, its tags, and its FTS entry
pub fn insert_memory(conn: &Connection, memory: &Memory) -> Result<()> {
    let metadata_json = metadata_to_sql(&memory.metadata)?;
    let embedding_blob = memory
        .embedding
        .as_ref()
        .map(|e| crate::embedding::pack_embedding(e));

    conn.execute(
        "INSERT INTO memories (id, content, content_type, source, source_uri, provider, \
         model_id, model_name, agent, session_id, conversation_id, embedding, content_hash, \
         is_indexed, is_metadata, importance, access_count, useful_count, last_accessed_at, \
         parent_id, chunk_index, superseded_by, is_active, metadata, keywords, created_at, \
         updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            memory.id,
            memory.content,
            memory.content_type.as_str(),
            memory.source,
            memory.source_uri,
            memory.attribution.provider,
            memory.attribution.model_id,
            memory.attribution.model_name,
            memory.attribution.agent,
            memory.attribution.session_id,
            memory.attribution.conversation_id,
            embedding_blob,
            memory.content_hash,
            memory.is_indexed,
            memory.is_metadata,
            memory.importance,
            memory.access_count,
            memory.useful_count,
            memory.last_accessed_at.map(|d| d.to_rfc3339()),
            memory.parent_id,
            memory.chunk_index,
            memory.superseded_by,
            memory.is_active,
            metadata_json,
            memory.keywords,
            memory.created_at.to_rfc3339(),
            memory.updated_at.to_rfc3339(),
        ],
    )?;

    replace_tags(conn, &memory.id, &memory.tags)?;
    fts_index(conn, &memory.id, &memory.content, &memory.keywords, &memory.tags)?;

    Ok(())
}

/// Empty metadata maps are stored as NULL
fn metadata_to_sql(
    metadata: &HashMap<String, serde_json::Value>,
) -> Result<Option<String>> {
    if metadata.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(metadata)?))
    }
}

/// Replace the tag set of a memory
pub fn replace_tags(conn: &Connection, memory_id: &str, tags: &[String]) -> Result<()> {
    conn.execute("DELETE FROM memory_tags WHERE memory_id = ?", params![memory_id])?;
    for tag in tags {
        conn.execute(
            "INSERT OR IGNORE INTO memory_tags (memory_id, tag) VALUES (?, ?)",
            params![memory_id, tag],
        )?;
    }
    Ok(())
}

/// Lowercase-trim, alias-resolve, and dedup tags preserving first occurrence
pub fn normalize_tags(conn: &Connection, tags: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let lowered = tag.trim().to_lowercase();
        if lowered.is_empty() {
            continue;
        }
        let resolved: String = conn
            .query_row(
                "SELECT tag FROM tag_aliases WHERE alias = ?",
                params![lowered],
                |row| row.get(0),
            )
            .unwrap_or(lowered);
        if !out.contains(&resolved) {
            out.push(resolved);
        }
    }
    Ok(out)
}

/// Whether any of the tags implies is_metadata
pub fn has_metadata_tag(conn: &Connection, tags: &[String]) -> Result<bool> {
    for tag in tags {
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM metadata_tags WHERE tag = ?",
                params![tag],
                |row| row.get(0),
            )
            .ok();
        if hit.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// (Re)write the FTS entry of a memory
pub fn fts_index(
    conn: &Connection,
    memory_id: &str,
    content: &str,
    keywords: &str,
    tags: &[String],
) -> Result<()> {
    fts_remove(conn, memory_id)?;
    let rowid: i64 = conn.query_row(
        "SELECT rowid FROM memories WHERE id = ?",
        params![memory_id],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO memories_fts (rowid, content, keywords, tags, memory_id)
         VALUES (?, ?, ?, ?, ?)",
        params![rowid, content, keywords, tags.join(" "), memory_id],
    )?;
    Ok(())
}

/// Remove the FTS entry of a memory
pub fn fts_remove(conn: &Connection, memory_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM memories_fts WHERE memory_id = ?",
        params![memory_id],
    )?;
    Ok(())
}

/// Find the active root memory with this (content_type, content_hash)
pub fn find_active_by_hash(
    conn: &Connection,
    content_type: ContentType,
    content_hash: &str,
) -> Result<Option<Memory>> {
    let sql = format!(
        "SELECT {} FROM memories
         WHERE content_type = ? AND content_hash = ? AND is_active = 1 AND parent_id IS NULL
         LIMIT 1",
        MEMORY_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let memory = stmt
        .query_row(params![content_type.as_str(), content_hash], memory_from_row)
        .ok();

    match memory {
        Some(mut m) => {
            m.tags = load_tags(conn, &m.id)?;
            Ok(Some(m))
        }
        None => Ok(None),
    }
}

/// Most recent active root memories of a type with embeddings, for the
/// semantic dedup scan
pub fn recent_embedded_roots(
    conn: &Connection,
    content_type: ContentType,
    pool: i64,
) -> Result<Vec<Memory>> {
    let sql = format!(
        "SELECT {} FROM memories
         WHERE content_type = ? AND is_active = 1 AND parent_id IS NULL
           AND embedding IS NOT NULL
         ORDER BY created_at DESC, id DESC
         LIMIT ?",
        MEMORY_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut memories: Vec<Memory> = stmt
        .query_map(params![content_type.as_str(), pool], memory_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    for m in &mut memories {
        m.tags = load_tags(conn, &m.id)?;
    }
    Ok(memories)
}

/// Touch-update an existing memory on a dedup hit: merge tags and metadata,
/// raise importance, fill attribution gaps, bump is_metadata only upward
pub fn merge_into_existing(
    conn: &Connection,
    existing: &Memory,
    tags: &[String],
    metadata: &HashMap<String, serde_json::Value>,
    importance: Option<f32>,
    attribution: &Attribution,
    is_metadata: bool,
) -> Result<Memory> {
    let mut merged_tags = existing.tags.clone();
    for tag in tags {
        if !merged_tags.contains(tag) {
            merged_tags.push(tag.clone());
        }
    }

    let mut merged_metadata = existing.metadata.clone();
    for (k, v) in metadata {
        merged_metadata.insert(k.clone(), v.clone());
    }

    let mut merged_attribution = existing.attribution.clone();
    merged_attribution.merge_missing(attribution);

    let new_importance = match importance {
        Some(i) if i > existing.importance => i,
        _ => existing.importance,
    };
    let new_is_metadata = existing.is_metadata || is_metadata;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE memories SET importance = ?, is_metadata = ?, metadata = ?, provider = ?,
             model_id = ?, model_name = ?, agent = ?, session_id = ?, conversation_id = ?,
             updated_at = ?
         WHERE id = ?",
        params![
            new_importance,
            new_is_metadata,
            metadata_to_sql(&merged_metadata)?,
            merged_attribution.provider,
            merged_attribution.model_id,
            merged_attribution.model_name,
            merged_attribution.agent,
            merged_attribution.session_id,
            merged_attribution.conversation_id,
            now,
            existing.id,
        ],
    )?;

    replace_tags(conn, &existing.id, &merged_tags)?;
    fts_index(conn, &existing.id, &existing.content, &existing.keywords, &merged_tags)?;

    require_memory(conn, &existing.id)
}

/// Mark a memory superseded by another. Returns false when the row was no
/// longer active (another writer acted first).
pub fn mark_superseded(conn: &Connection, id: &str, new_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE memories SET is_active = 0, superseded_by = ?, updated_at = ?
         WHERE id = ? AND is_active = 1",
        params![new_id, Utc::now().to_rfc3339(), id],
    )?;
    Ok(affected == 1)
}

/// Rewrite the mutable columns of a memory from the struct, plus tags and FTS
pub fn update_memory_row(conn: &Connection, memory: &Memory) -> Result<()> {
    let embedding_blob = memory
        .embedding
        .as_ref()
        .map(|e| crate::embedding::pack_embedding(e));

    conn.execute(
        "UPDATE memories SET content = ?, content_type = ?, embedding = ?, content_hash = ?,
             is_indexed = ?, is_metadata = ?, importance = ?, metadata = ?, keywords = ?,
             updated_at = ?
         WHERE id = ?",
        params![
            memory.content,
            memory.content_type.as_str(),
            embedding_blob,
            memory.content_hash,
            memory.is_indexed,
            memory.is_metadata,
            memory.importance,
            metadata_to_sql(&memory.metadata)?,
            memory.keywords,
            Utc::now().to_rfc3339(),
            memory.id,
        ],
    )?;

    replace_tags(conn, &memory.id, &memory.tags)?;
    fts_index(conn, &memory.id, &memory.content, &memory.keywords, &memory.tags)?;
    Ok(())
}

/// Archive: deactivate without a supersession pointer
pub fn archive_memory(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute(
        "UPDATE memories SET is_active = 0, superseded_by = NULL, updated_at = ?
         WHERE id = ? AND is_active = 1",
        params![Utc::now().to_rfc3339(), id],
    )?;
    if affected == 0 {
        return Err(ExocortexError::PreconditionFailed(format!(
            "memory {} is not active",
            id
        )));
    }
    Ok(())
}

/// Restore an archived memory
pub fn restore_memory(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute(
        "UPDATE memories SET is_active = 1, superseded_by = NULL, updated_at = ?
         WHERE id = ? AND is_active = 0",
        params![Utc::now().to_rfc3339(), id],
    )?;
    if affected == 0 {
        return Err(ExocortexError::PreconditionFailed(format!(
            "memory {} is already active or missing",
            id
        )));
    }
    Ok(())
}

/// Hard delete: purge the row, its chunks, tags, entity links, memory links,
/// access log rows, and FTS entries
pub fn delete_memory(conn: &Connection, id: &str) -> Result<()> {
    let children: Vec<String> = {
        let mut stmt = conn.prepare_cached("SELECT id FROM memories WHERE parent_id = ?")?;
        let rows = stmt
            .query_map(params![id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        rows
    };
    for child in &children {
        delete_single(conn, child)?;
    }
    delete_single(conn, id)
}

fn delete_single(conn: &Connection, id: &str) -> Result<()> {
    fts_remove(conn, id)?;
    conn.execute("DELETE FROM memory_tags WHERE memory_id = ?", params![id])?;
    conn.execute("DELETE FROM memory_entities WHERE memory_id = ?", params![id])?;
    conn.execute(
        "DELETE FROM memory_links WHERE source_memory_id = ? OR target_memory_id = ?",
        params![id, id],
    )?;
    conn.execute("DELETE FROM access_log WHERE memory_id = ?", params![id])?;
    let affected = conn.execute("DELETE FROM memories WHERE id = ?", params![id])?;
    if affected == 0 {
        return Err(ExocortexError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Atomically bump access_count, stamp last_accessed_at, and append an
/// access-log row
pub fn record_access(conn: &Connection, memory_id: &str, query: Option<&str>) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ? WHERE id = ?",
        params![now, memory_id],
    )?;
    conn.execute(
        "INSERT INTO access_log (memory_id, query, accessed_at) VALUES (?, ?, ?)",
        params![memory_id, query, now],
    )?;
    Ok(())
}

/// Bump useful_count by one
pub fn increment_useful(conn: &Connection, memory_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE memories SET useful_count = useful_count + 1 WHERE id = ?",
        params![memory_id],
    )?;
    Ok(())
}

/// Browse memories without a query (filters + pagination)
pub fn browse_memories(conn: &Connection, options: &BrowseOptions) -> Result<Vec<Memory>> {
    let mut sql = format!(
        "SELECT {} FROM memories m WHERE parent_id IS NULL",
        MEMORY_COLUMNS
    );
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if !options.include_inactive {
        sql.push_str(" AND is_active = 1");
    }
    if let Some(ct) = options.content_type {
        sql.push_str(" AND content_type = ?");
        sql_params.push(Box::new(ct.as_str().to_string()));
    }
    if let Some(ref after) = options.after {
        sql.push_str(" AND substr(created_at, 1, length(?)) >= ?");
        sql_params.push(Box::new(after.clone()));
        sql_params.push(Box::new(after.clone()));
    }
    if let Some(ref before) = options.before {
        sql.push_str(" AND substr(created_at, 1, length(?)) <= ?");
        sql_params.push(Box::new(before.clone()));
        sql_params.push(Box::new(before.clone()));
    }
    if let Some(ref tags) = options.tags {
        if !tags.is_empty() {
            let placeholders: Vec<&str> = tags.iter().map(|_| "?").collect();
            sql.push_str(&format!(
                " AND m.id IN (SELECT memory_id FROM memory_tags WHERE tag IN ({}))",
                placeholders.join(", ")
            ));
            for tag in tags {
                sql_params.push(Box::new(tag.clone()));
            }
        }
    }

    sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
    sql_params.push(Box::new(options.limit.unwrap_or(20)));
    sql_params.push(Box::new(options.offset.unwrap_or(0)));

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|b| b.as_ref()).collect();
    let mut memories: Vec<Memory> = stmt
        .query_map(param_refs.as_slice(), memory_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    for m in &mut memories {
        m.tags = load_tags(conn, &m.id)?;
    }
    Ok(memories)
}

/// One step of a timeline query
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimelineEntry {
    pub memory: Option<Memory>,
    /// Day bucket (evolution mode)
    pub day: Option<String>,
    /// Created count for the day (evolution mode)
    pub count: Option<i64>,
    /// Position in a lineage chain (0 = requested memory)
    pub depth: Option<i64>,
}

/// Timeline queries: decisions, supersession lineage, per-day evolution
pub fn timeline(
    conn: &Connection,
    mode: TimelineMode,
    memory_id: Option<&str>,
    limit: i64,
) -> Result<Vec<TimelineEntry>> {
    match mode {
        TimelineMode::Decisions => {
            let opts = BrowseOptions {
                limit: Some(limit),
                tags: Some(vec!["decision".to_string()]),
                ..Default::default()
            };
            Ok(browse_memories(conn, &opts)?
                .into_iter()
                .map(|m| TimelineEntry {
                    memory: Some(m),
                    day: None,
                    count: None,
                    depth: None,
                })
                .collect())
        }
        TimelineMode::Lineage => {
            let id = memory_id.ok_or_else(|| {
                ExocortexError::InvalidInput("lineage mode requires a memory id".into())
            })?;
            lineage(conn, id, limit)
        }
        TimelineMode::Evolution => {
            let mut stmt = conn.prepare(
                "SELECT substr(created_at, 1, 10) AS day, COUNT(*) FROM memories
                 WHERE parent_id IS NULL
                 GROUP BY day ORDER BY day DESC LIMIT ?",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok(TimelineEntry {
                        memory: None,
                        day: Some(row.get(0)?),
                        count: Some(row.get(1)?),
                        depth: None,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        }
    }
}

/// Walk the supersession chain around a memory. Supersession forms a DAG by
/// invariant, but the walk carries a visited set so a corrupt cycle cannot
/// hang it.
fn lineage(conn: &Connection, id: &str, limit: i64) -> Result<Vec<TimelineEntry>> {
    let mut entries = Vec::new();
    let mut visited: std::collections::HashSet<String> = std::collections::HashSet::new();

    // Ancestors: rows this chain superseded (negative depth)
    let mut frontier = vec![id.to_string()];
    let mut depth: i64 = 0;
    while let Some(current) = frontier.pop() {
        if entries.len() as i64 >= limit {
            break;
        }
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM memories WHERE superseded_by = ? ORDER BY created_at DESC LIMIT 1",
        )?;
        let prev: Option<String> = stmt.query_row(params![current], |row| row.get(0)).ok();
        match prev {
            Some(prev_id) if visited.insert(prev_id.clone()) => {
                depth -= 1;
                if let Some(m) = get_memory(conn, &prev_id)? {
                    entries.push(TimelineEntry {
                        memory: Some(m),
                        day: None,
                        count: None,
                        depth: Some(depth),
                    });
                }
                frontier.push(prev_id);
            }
            _ => break,
        }
    }
    entries.reverse();

    // The memory itself
    visited.insert(id.to_string());
    if let Some(m) = get_memory(conn, id)? {
        entries.push(TimelineEntry {
            memory: Some(m),
            day: None,
            count: None,
            depth: Some(0),
        });
    }

    // Descendants: follow superseded_by forward
    let mut current = id.to_string();
    let mut depth: i64 = 0;
    while (entries.len() as i64) < limit {
        let next: Option<String> = conn
            .query_row(
                "SELECT superseded_by FROM memories WHERE id = ?",
                params![current],
                |row| row.get(0),
            )
            .ok()
            .flatten();
        match next {
            Some(next_id) if visited.insert(next_id.clone()) => {
                depth += 1;
                if let Some(m) = get_memory(conn, &next_id)? {
                    entries.push(TimelineEntry {
                        memory: Some(m),
                        day: None,
                        count: None,
                        depth: Some(depth),
                    });
                }
                current = next_id;
            }
            _ => break,
        }
    }

    Ok(entries)
}

/// Store-wide statistics
pub fn get_stats(conn: &Connection, db_size_bytes: i64) -> Result<StoreStats> {
    let one = |sql: &str| -> i64 { conn.query_row(sql, [], |r| r.get(0)).unwrap_or(0) };

    let mut type_counts = HashMap::new();
    let mut stmt =
        conn.prepare("SELECT content_type, COUNT(*) FROM memories GROUP BY content_type")?;
    let rows: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    for (t, c) in rows {
        type_counts.insert(t, c);
    }

    Ok(StoreStats {
        total_memories: one("SELECT COUNT(*) FROM memories"),
        active_memories: one("SELECT COUNT(*) FROM memories WHERE is_active = 1"),
        chunk_memories: one("SELECT COUNT(*) FROM memories WHERE parent_id IS NOT NULL"),
        superseded_memories: one("SELECT COUNT(*) FROM memories WHERE superseded_by IS NOT NULL"),
        archived_memories: one(
            "SELECT COUNT(*) FROM memories WHERE is_active = 0 AND superseded_by IS NULL",
        ),
        memories_with_embeddings: one("SELECT COUNT(*) FROM memories WHERE embedding IS NOT NULL"),
        total_tags: one("SELECT COUNT(DISTINCT tag) FROM memory_tags"),
        total_entities: one("SELECT COUNT(*) FROM entities"),
        total_relationships: one("SELECT COUNT(*) FROM entity_relationships"),
        total_links: one("SELECT COUNT(*) FROM memory_links"),
        total_goals: one("SELECT COUNT(*) FROM goals"),
        db_size_bytes,
        type_counts,
    })
}

/// All tags with usage counts
pub fn list_tags(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT tag, COUNT(*) FROM memory_tags GROUP BY tag ORDER BY COUNT(*) DESC, tag",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Shared fixtures for unit tests across modules
#[cfg(test)]
pub mod tests_support {
    use super::*;
    use crate::types::new_id;

    pub fn sample_memory(content: &str) -> Memory {
        Memory {
            id: new_id(),
            content: content.to_string(),
            content_type: ContentType::Text,
            source: "manual".into(),
            source_uri: None,
            attribution: Attribution::default(),
            tags: vec!["alpha".into()],
            metadata: HashMap::new(),
            embedding: Some(vec![0.6, 0.8]),
            content_hash: crate::content::content_hash(content),
            is_indexed: true,
            is_metadata: false,
            importance: 0.5,
            access_count: 0,
            useful_count: 0,
            last_accessed_at: None,
            parent_id: None,
            chunk_index: None,
            superseded_by: None,
            is_active: true,
            keywords: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::sample_memory;
    use super::*;
    use crate::storage::migrations::run_migrations;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        run_migrations(&c).unwrap();
        c
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let c = conn();
        let m = sample_memory("hello round trip");
        insert_memory(&c, &m).unwrap();

        let loaded = get_memory(&c, &m.id).unwrap().unwrap();
        assert_eq!(loaded.content, "hello round trip");
        assert_eq!(loaded.tags, vec!["alpha"]);
        assert_eq!(loaded.embedding.as_deref(), Some(&[0.6_f32, 0.8][..]));
        assert!(loaded.is_active);
    }

    #[test]
    fn test_find_active_by_hash() {
        let c = conn();
        let m = sample_memory("dedup target");
        insert_memory(&c, &m).unwrap();

        let hit = find_active_by_hash(&c, ContentType::Text, &m.content_hash)
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, m.id);

        assert!(find_active_by_hash(&c, ContentType::Note, &m.content_hash)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_mark_superseded_only_hits_active_rows() {
        let c = conn();
        let m = sample_memory("to be superseded");
        insert_memory(&c, &m).unwrap();

        assert!(mark_superseded(&c, &m.id, "NEW").unwrap());
        // Second writer loses the race
        assert!(!mark_superseded(&c, &m.id, "OTHER").unwrap());

        let loaded = get_memory(&c, &m.id).unwrap().unwrap();
        assert!(!loaded.is_active);
        assert_eq!(loaded.superseded_by.as_deref(), Some("NEW"));
    }

    #[test]
    fn test_archive_restore_round_trip() {
        let c = conn();
        let m = sample_memory("archive me");
        insert_memory(&c, &m).unwrap();

        archive_memory(&c, &m.id).unwrap();
        let archived = get_memory(&c, &m.id).unwrap().unwrap();
        assert!(archived.is_archived());

        // Archiving twice is a precondition failure
        assert!(archive_memory(&c, &m.id).is_err());

        restore_memory(&c, &m.id).unwrap();
        let restored = get_memory(&c, &m.id).unwrap().unwrap();
        assert!(restored.is_active);
        assert_eq!(restored.content, m.content);
        assert_eq!(restored.tags, m.tags);
    }

    #[test]
    fn test_delete_is_total() {
        let c = conn();
        let m = sample_memory("delete me fully");
        insert_memory(&c, &m).unwrap();
        record_access(&c, &m.id, Some("q")).unwrap();

        delete_memory(&c, &m.id).unwrap();

        assert!(get_memory(&c, &m.id).unwrap().is_none());
        let tag_rows: i64 = c
            .query_row(
                "SELECT COUNT(*) FROM memory_tags WHERE memory_id = ?",
                params![m.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tag_rows, 0);
        let log_rows: i64 = c
            .query_row(
                "SELECT COUNT(*) FROM access_log WHERE memory_id = ?",
                params![m.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(log_rows, 0);
        let fts_rows: i64 = c
            .query_row(
                "SELECT COUNT(*) FROM memories_fts WHERE memory_id = ?",
                params![m.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(fts_rows, 0);
    }

    #[test]
    fn test_record_access_is_atomic_pairing() {
        let c = conn();
        let m = sample_memory("access me");
        insert_memory(&c, &m).unwrap();

        record_access(&c, &m.id, Some("the query")).unwrap();
        record_access(&c, &m.id, None).unwrap();

        let loaded = get_memory(&c, &m.id).unwrap().unwrap();
        assert_eq!(loaded.access_count, 2);
        assert!(loaded.last_accessed_at.is_some());

        let log_rows: i64 = c
            .query_row(
                "SELECT COUNT(*) FROM access_log WHERE memory_id = ?",
                params![m.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(log_rows, 2);
    }

    #[test]
    fn test_normalize_tags_aliases_and_dedup() {
        let c = conn();
        c.execute(
            "INSERT INTO tag_aliases (alias, tag) VALUES ('db', 'database')",
            [],
        )
        .unwrap();

        let tags = normalize_tags(
            &c,
            &["DB".into(), "  Database ".into(), "rust".into(), "".into()],
        )
        .unwrap();
        assert_eq!(tags, vec!["database".to_string(), "rust".to_string()]);
    }

    #[test]
    fn test_browse_filters_by_tag_and_type() {
        let c = conn();
        let mut a = sample_memory("tagged note");
        a.content_type = ContentType::Note;
        a.tags = vec!["work".into()];
        insert_memory(&c, &a).unwrap();

        let mut b = sample_memory("plain text");
        b.tags = vec!["home".into()];
        insert_memory(&c, &b).unwrap();

        let got = browse_memories(
            &c,
            &BrowseOptions {
                tags: Some(vec!["work".into()]),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, a.id);

        let got = browse_memories(
            &c,
            &BrowseOptions {
                content_type: Some(ContentType::Note),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, a.id);
    }

    #[test]
    fn test_lineage_walks_both_directions() {
        let c = conn();
        let a = sample_memory("version one");
        let mut b = sample_memory("version two");
        let mut cm = sample_memory("version three");
        b.content_hash = "h-b".into();
        cm.content_hash = "h-c".into();
        insert_memory(&c, &a).unwrap();
        insert_memory(&c, &b).unwrap();
        insert_memory(&c, &cm).unwrap();
        mark_superseded(&c, &a.id, &b.id).unwrap();
        mark_superseded(&c, &b.id, &cm.id).unwrap();

        let chain = timeline(&c, TimelineMode::Lineage, Some(&b.id), 10).unwrap();
        let depths: Vec<i64> = chain.iter().filter_map(|e| e.depth).collect();
        assert_eq!(depths, vec![-1, 0, 1]);
    }
}
