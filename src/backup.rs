//! Backup and restore
//!
//! A versioned JSON envelope carries memories (without embeddings), entities,
//! links, relationships, contradictions, goals, and settings. Import is
//! idempotent: rows insert by id and ignore conflicts, existing settings are
//! never overwritten, and re-embedding happens out of band. The encrypted
//! variant frames `salt(32) || iv(12) || authTag(16) || ciphertext` with a
//! PBKDF2-HMAC-SHA256 key (100 000 iterations) and AES-256-GCM.
//!
//! Database-file backups use `VACUUM INTO` for an atomic compact copy, with
//! keep-newest-N rotation over ISO-timestamped filenames.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::Utc;
use rand::RngCore;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::info;

use crate::error::{ExocortexError, Result};
use crate::storage::entity_queries::{
    all_contradictions, all_entity_links, all_relationships,
};
use crate::storage::links::all_links;
use crate::storage::queries::{self, memory_from_row, MEMORY_COLUMNS};
use crate::store::MemoryStore;
use crate::types::{
    Contradiction, Entity, EntityLink, EntityRelationship, Goal, Memory, MemoryLink,
};

/// Envelope format version
pub const BACKUP_VERSION: u32 = 1;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// The versioned backup envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupEnvelope {
    pub version: u32,
    pub exported_at: String,
    pub memories: Vec<Memory>,
    pub entities: Vec<Entity>,
    pub memory_entities: Vec<EntityLink>,
    pub entity_relationships: Vec<EntityRelationship>,
    pub memory_links: Vec<MemoryLink>,
    pub contradictions: Vec<Contradiction>,
    pub goals: Vec<Goal>,
    /// Stored settings rows only (defaults are not materialized)
    pub settings: Vec<(String, String)>,
}

/// Export the full store (embeddings excluded; they re-derive on import)
pub fn export(store: &MemoryStore) -> Result<BackupEnvelope> {
    store.storage().with_connection(|conn| {
        let sql = format!("SELECT {} FROM memories ORDER BY id", MEMORY_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut memories: Vec<Memory> = stmt
            .query_map([], memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        for m in &mut memories {
            m.tags = queries::load_tags(conn, &m.id)?;
            m.embedding = None;
        }

        let mut entity_stmt = conn.prepare(
            "SELECT id FROM entities ORDER BY id",
        )?;
        let entity_ids: Vec<String> = entity_stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        let mut entities = Vec::with_capacity(entity_ids.len());
        for id in entity_ids {
            if let Some(e) = crate::storage::entity_queries::get_entity(conn, &id)? {
                entities.push(e);
            }
        }

        let mut goal_stmt = conn.prepare("SELECT id FROM goals ORDER BY id")?;
        let goal_ids: Vec<String> = goal_stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let settings_rows: Vec<(String, String)> = {
            let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let goals: Vec<Goal> = goal_ids
            .iter()
            .filter_map(|id| load_goal(conn, id).ok().flatten())
            .collect();

        Ok(BackupEnvelope {
            version: BACKUP_VERSION,
            exported_at: Utc::now().to_rfc3339(),
            memories,
            entities,
            memory_entities: all_entity_links(conn)?,
            entity_relationships: all_relationships(conn)?,
            memory_links: all_links(conn)?,
            contradictions: all_contradictions(conn)?,
            goals,
            settings: settings_rows,
        })
    })
}

fn load_goal(conn: &rusqlite::Connection, id: &str) -> Result<Option<Goal>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, title, description, status, priority, deadline, metadata, created_at, \
         updated_at, completed_at FROM goals WHERE id = ?",
    )?;
    let goal = stmt
        .query_row(params![id], |row| {
            let status: String = row.get(3)?;
            let priority: String = row.get(4)?;
            let metadata: Option<String> = row.get(6)?;
            let created_at: String = row.get(7)?;
            let updated_at: String = row.get(8)?;
            let completed_at: Option<String> = row.get(9)?;
            Ok(Goal {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                status: status.parse().unwrap_or_default(),
                priority: priority.parse().unwrap_or_default(),
                deadline: row.get(5)?,
                metadata: metadata
                    .as_deref()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_default(),
                milestones: Vec::new(),
                created_at: parse_ts(&created_at),
                updated_at: parse_ts(&updated_at),
                completed_at: completed_at.map(|s| parse_ts(&s)),
            })
        })
        .ok();
    match goal {
        Some(mut g) => {
            let mut ms = conn.prepare_cached(
                "SELECT position, title, status FROM milestones WHERE goal_id = ? ORDER BY position",
            )?;
            g.milestones = ms
                .query_map(params![id], |row| {
                    let status: String = row.get(2)?;
                    Ok(crate::types::Milestone {
                        position: row.get(0)?,
                        title: row.get(1)?,
                        status: status.parse().unwrap_or_default(),
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(Some(g))
        }
        None => Ok(None),
    }
}

fn parse_ts(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
}

/// Import an envelope. Inserts are by-id-ignore-on-conflict; existing
/// settings win over imported values.
pub fn import(store: &MemoryStore, envelope: &BackupEnvelope) -> Result<ImportReport> {
    if envelope.version != BACKUP_VERSION {
        return Err(ExocortexError::InvalidInput(format!(
            "unsupported backup version {}",
            envelope.version
        )));
    }

    store.storage().with_transaction(|conn| {
        let mut report = ImportReport::default();

        for memory in &envelope.memories {
            let metadata = if memory.metadata.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&memory.metadata)?)
            };
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO memories (id, content, content_type, source, source_uri, \
                 provider, model_id, model_name, agent, session_id, conversation_id, embedding, \
                 content_hash, is_indexed, is_metadata, importance, access_count, useful_count, \
                 last_accessed_at, parent_id, chunk_index, superseded_by, is_active, metadata, \
                 keywords, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
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
                    metadata,
                    memory.keywords,
                    memory.created_at.to_rfc3339(),
                    memory.updated_at.to_rfc3339(),
                ],
            )?;
            if inserted == 1 {
                report.memories += 1;
                for tag in &memory.tags {
                    conn.execute(
                        "INSERT OR IGNORE INTO memory_tags (memory_id, tag) VALUES (?, ?)",
                        params![memory.id, tag],
                    )?;
                }
                queries::fts_index(conn, &memory.id, &memory.content, &memory.keywords, &memory.tags)?;
            }
        }

        for entity in &envelope.entities {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO entities (id, name, entity_type, aliases, metadata, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    entity.id,
                    entity.name,
                    entity.entity_type.as_str(),
                    serde_json::to_string(&entity.aliases)?,
                    serde_json::to_string(&entity.metadata)?,
                    entity.created_at.to_rfc3339(),
                    entity.updated_at.to_rfc3339(),
                ],
            )?;
            if inserted == 1 {
                report.entities += 1;
                for tag in &entity.tags {
                    conn.execute(
                        "INSERT OR IGNORE INTO entity_tags (entity_id, tag) VALUES (?, ?)",
                        params![entity.id, tag],
                    )?;
                }
            }
        }

        for link in &envelope.memory_entities {
            report.entity_links += conn.execute(
                "INSERT OR IGNORE INTO memory_entities (memory_id, entity_id, relevance) VALUES (?, ?, ?)",
                params![link.memory_id, link.entity_id, link.relevance],
            )?;
        }

        for rel in &envelope.entity_relationships {
            report.relationships += conn.execute(
                "INSERT OR IGNORE INTO entity_relationships
                     (id, source_entity_id, target_entity_id, relationship, confidence, memory_id, context, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    rel.id,
                    rel.source_entity_id,
                    rel.target_entity_id,
                    rel.relationship,
                    rel.confidence,
                    rel.memory_id,
                    rel.context,
                    rel.created_at.to_rfc3339(),
                ],
            )?;
        }

        for link in &envelope.memory_links {
            report.memory_links += conn.execute(
                "INSERT OR IGNORE INTO memory_links
                     (source_memory_id, target_memory_id, link_type, strength, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    link.source_memory_id,
                    link.target_memory_id,
                    link.link_type.as_str(),
                    link.strength,
                    link.created_at.to_rfc3339(),
                ],
            )?;
        }

        for c in &envelope.contradictions {
            conn.execute(
                "INSERT OR IGNORE INTO contradictions (id, memory_id_a, memory_id_b, detail, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![c.id, c.memory_id_a, c.memory_id_b, c.detail, c.created_at.to_rfc3339()],
            )?;
        }

        for goal in &envelope.goals {
            let metadata = if goal.metadata.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&goal.metadata)?)
            };
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO goals
                     (id, title, description, status, priority, deadline, metadata, created_at, updated_at, completed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    goal.id,
                    goal.title,
                    goal.description,
                    goal.status.as_str(),
                    goal.priority.as_str(),
                    goal.deadline,
                    metadata,
                    goal.created_at.to_rfc3339(),
                    goal.updated_at.to_rfc3339(),
                    goal.completed_at.map(|d| d.to_rfc3339()),
                ],
            )?;
            if inserted == 1 {
                report.goals += 1;
                for m in &goal.milestones {
                    conn.execute(
                        "INSERT OR IGNORE INTO milestones (goal_id, position, title, status) VALUES (?, ?, ?, ?)",
                        params![goal.id, m.position, m.title, m.status.as_str()],
                    )?;
                }
            }
        }

        for (key, value) in &envelope.settings {
            conn.execute(
                "INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)",
                params![key, value],
            )?;
        }

        info!(
            memories = report.memories,
            entities = report.entities,
            "backup import complete"
        );
        Ok(report)
    })
}

/// Row counts actually inserted by an import
#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportReport {
    pub memories: usize,
    pub entities: usize,
    pub entity_links: usize,
    pub relationships: usize,
    pub memory_links: usize,
    pub goals: usize,
}

/// Serialize and encrypt an envelope with a password
pub fn export_encrypted(store: &MemoryStore, password: &str) -> Result<Vec<u8>> {
    let envelope = export(store)?;
    let json = serde_json::to_vec(&envelope)?;

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| ExocortexError::Encryption(e.to_string()))?;
    let ciphertext_and_tag = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), json.as_slice())
        .map_err(|e| ExocortexError::Encryption(e.to_string()))?;

    // AES-GCM appends the tag; the envelope frame wants it up front
    let split = ciphertext_and_tag.len() - TAG_LEN;
    let (ciphertext, tag) = ciphertext_and_tag.split_at(split);

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + TAG_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(tag);
    out.extend_from_slice(ciphertext);
    Ok(out)
}

/// Decrypt and import an encrypted envelope
pub fn import_encrypted(store: &MemoryStore, data: &[u8], password: &str) -> Result<ImportReport> {
    if data.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(ExocortexError::Encryption("backup too short".into()));
    }
    let (salt, rest) = data.split_at(SALT_LEN);
    let (nonce_bytes, rest) = rest.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let key = derive_key(password, salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| ExocortexError::Encryption(e.to_string()))?;

    let mut ciphertext_and_tag = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    ciphertext_and_tag.extend_from_slice(ciphertext);
    ciphertext_and_tag.extend_from_slice(tag);

    let json = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext_and_tag.as_slice())
        .map_err(|_| ExocortexError::Encryption("decryption failed (wrong password?)".into()))?;

    let envelope: BackupEnvelope = serde_json::from_slice(&json)?;
    import(store, &envelope)
}

fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Produce an atomic compact DB copy via `VACUUM INTO`, named with an ISO
/// timestamp so rotation can sort lexicographically
pub fn backup_database(store: &MemoryStore, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let filename = format!("exocortex-{}.db", Utc::now().format("%Y%m%dT%H%M%SZ"));
    let path = dir.join(filename);
    let path_str = path
        .to_str()
        .ok_or_else(|| ExocortexError::InvalidInput("non-UTF8 backup path".into()))?
        .to_string();

    store.storage().with_connection(|conn| {
        conn.execute("VACUUM INTO ?", params![path_str])?;
        Ok(())
    })?;
    Ok(path)
}

/// Keep the newest `keep` database backups, deleting the rest
pub fn rotate_backups(dir: &Path, keep: usize) -> Result<usize> {
    let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("exocortex-") && n.ends_with(".db"))
                .unwrap_or(false)
        })
        .collect();

    // ISO timestamps sort lexicographically: newest last
    backups.sort();
    let mut removed = 0;
    if backups.len() > keep {
        let excess = backups.len() - keep;
        for path in backups.into_iter().take(excess) {
            std::fs::remove_file(path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
