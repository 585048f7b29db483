//! Database migrations for Exocortex

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Memories: atomic or chunked units of recorded text
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'text',
            source TEXT NOT NULL DEFAULT 'manual',
            source_uri TEXT,
            provider TEXT,
            model_id TEXT,
            model_name TEXT,
            agent TEXT,
            session_id TEXT,
            conversation_id TEXT,
            embedding BLOB,
            content_hash TEXT NOT NULL,
            is_indexed INTEGER NOT NULL DEFAULT 1,
            is_metadata INTEGER NOT NULL DEFAULT 0,
            importance REAL NOT NULL DEFAULT 0.5,
            access_count INTEGER NOT NULL DEFAULT 0,
            useful_count INTEGER NOT NULL DEFAULT 0,
            last_accessed_at TEXT,
            parent_id TEXT REFERENCES memories(id),
            chunk_index INTEGER,
            superseded_by TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            metadata TEXT,
            keywords TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Backstop for concurrent duplicate writers: one active root memory
        -- per (content_type, content_hash)
        CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_active_hash
            ON memories(content_type, content_hash)
            WHERE is_active = 1 AND parent_id IS NULL;

        CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_memories_active ON memories(is_active);
        CREATE INDEX IF NOT EXISTS idx_memories_parent ON memories(parent_id);
        CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(content_type);
        CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories(importance DESC);

        -- Tags (lowercase, alias-resolved before storage)
        CREATE TABLE IF NOT EXISTS memory_tags (
            memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            tag TEXT NOT NULL,
            PRIMARY KEY (memory_id, tag)
        );
        CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag);

        CREATE TABLE IF NOT EXISTS tag_aliases (
            alias TEXT PRIMARY KEY,
            tag TEXT NOT NULL
        );

        -- Tags whose presence marks a memory as configuration-like
        CREATE TABLE IF NOT EXISTS metadata_tags (
            tag TEXT PRIMARY KEY
        );
        INSERT OR IGNORE INTO metadata_tags (tag) VALUES
            ('config'), ('settings'), ('preferences'), ('benchmark-artifact');

        -- Entities extracted from memory content
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            entity_type TEXT NOT NULL DEFAULT 'concept',
            aliases TEXT NOT NULL DEFAULT '[]',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entity_tags (
            entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            tag TEXT NOT NULL,
            PRIMARY KEY (entity_id, tag)
        );

        -- Memory <-> entity associations; latest relevance wins
        CREATE TABLE IF NOT EXISTS memory_entities (
            memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            relevance REAL NOT NULL DEFAULT 0.5,
            PRIMARY KEY (memory_id, entity_id)
        );
        CREATE INDEX IF NOT EXISTS idx_memory_entities_entity ON memory_entities(entity_id);

        -- Directed typed edges between entities
        CREATE TABLE IF NOT EXISTS entity_relationships (
            id TEXT PRIMARY KEY,
            source_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            target_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            relationship TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0.5,
            memory_id TEXT,
            context TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (source_entity_id, target_entity_id, relationship)
        );

        -- Typed memory-to-memory links; one per unordered pair
        CREATE TABLE IF NOT EXISTS memory_links (
            source_memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            target_memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            link_type TEXT NOT NULL DEFAULT 'related',
            strength REAL NOT NULL DEFAULT 0.5,
            created_at TEXT NOT NULL,
            PRIMARY KEY (source_memory_id, target_memory_id)
        );
        CREATE INDEX IF NOT EXISTS idx_memory_links_target ON memory_links(target_memory_id);

        -- Goals and their ordered milestones
        CREATE TABLE IF NOT EXISTS goals (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            priority TEXT NOT NULL DEFAULT 'medium',
            deadline TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS milestones (
            goal_id TEXT NOT NULL REFERENCES goals(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            PRIMARY KEY (goal_id, position)
        );

        -- Append-only retrieval log
        CREATE TABLE IF NOT EXISTS access_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id TEXT NOT NULL,
            query TEXT,
            accessed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_access_log_memory ON access_log(memory_id);
        CREATE INDEX IF NOT EXISTS idx_access_log_time ON access_log(accessed_at);

        -- Monotonic counters
        CREATE TABLE IF NOT EXISTS observability_counters (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );

        -- Runtime knobs
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Recorded contradictions between memories
        CREATE TABLE IF NOT EXISTS contradictions (
            id TEXT PRIMARY KEY,
            memory_id_a TEXT NOT NULL,
            memory_id_b TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        -- Lexical index over content + keywords + tags, maintained by the
        -- write paths (rowid matches memories.rowid)
        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            content,
            keywords,
            tags,
            memory_id UNINDEXED,
            tokenize='porter unicode61'
        );
        "#,
    )?;

    conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_active_hash_index_rejects_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO memories (id, content, content_type, content_hash, created_at, updated_at)
             VALUES ('a', 'x', 'text', 'h1', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO memories (id, content, content_type, content_hash, created_at, updated_at)
             VALUES ('b', 'x', 'text', 'h1', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(dup.is_err());

        // Inactive rows escape the partial index
        conn.execute(
            "INSERT INTO memories (id, content, content_type, content_hash, is_active, created_at, updated_at)
             VALUES ('c', 'x', 'text', 'h1', 0, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }
}
