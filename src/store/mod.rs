//! The memory store: validation, hashing, chunking, embedding, dedup,
//! transactional insert, and post-insert enrichment
//!
//! One external suspension point exists in the write pipeline: the embedding
//! oracle. Everything around it is synchronous SQL inside explicit
//! transactions; pre-commit failures roll back completely, post-insert
//! enrichment is best-effort and never rolls back the write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, instrument, warn};

use crate::content::{chunk_text, content_hash, strip_private_blocks};
use crate::embedding::{self, Embedder};
use crate::error::{ExocortexError, Result};
use crate::intelligence::auto_tagging::{suggest_tags, AutoTagConfig};
use crate::intelligence::entities::{extract_entities, extract_relationships};
use crate::intelligence::keywords::generate_keywords;
use crate::search::expansion::expand_links;
use crate::search::{hybrid_search, FeedbackTracker, SearchConfig};
use crate::storage::entity_queries::{ensure_entity, link_entity, record_contradiction, upsert_relationship};
use crate::storage::links::{unlink, upsert_link};
use crate::storage::queries::{self, TimelineEntry};
use crate::storage::{counters, settings, Storage};
use crate::types::{
    new_id, BrowseOptions, ContentType, CreateMemoryInput, CreateMemoryResult, DedupAction,
    LinkType, Memory, MemoryLink, SearchOptions, SearchResponse, StoreStats, TimelineMode,
    UpdateMemoryInput,
};

/// Retries for the insert-vs-unique-index race
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Content shorter than this never goes through semantic dedup
const SEMANTIC_DEDUP_MIN_CHARS: usize = 50;

/// Memory store facade: owns the storage handle, the embedding provider
/// reference, and the search feedback tracker
pub struct MemoryStore {
    storage: Storage,
    embedder: Arc<dyn Embedder>,
    feedback: FeedbackTracker,
}

/// How a dedup candidate was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DedupKind {
    Hash,
    Semantic,
}

impl DedupKind {
    fn counter_suffix(&self) -> &'static str {
        match self {
            DedupKind::Hash => "hash",
            DedupKind::Semantic => "semantic",
        }
    }
}

impl MemoryStore {
    /// Open a store at the given path with the process-wide embedder
    pub fn open(db_path: &str) -> Result<Self> {
        let storage = Storage::open(db_path)?;
        Ok(Self::with_embedder(storage, embedding::provider()))
    }

    /// In-memory store (tests)
    pub fn open_in_memory() -> Result<Self> {
        let storage = Storage::open_in_memory()?;
        Ok(Self::with_embedder(storage, embedding::provider()))
    }

    /// Wire an explicit embedder (tests substitute deterministic oracles)
    pub fn with_embedder(storage: Storage, embedder: Arc<dyn Embedder>) -> Self {
        let ttl = storage
            .with_connection(|conn| Ok(settings::get_i64(conn, "search.feedback_ttl_secs")))
            .unwrap_or(300);
        Self {
            storage,
            embedder,
            feedback: FeedbackTracker::new(Duration::from_secs(ttl.max(1) as u64)),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    // ------------------------------------------------------------------
    // Write pipeline
    // ------------------------------------------------------------------

    /// Create a memory: strip, normalize, hash, dedup, embed, chunk, insert,
    /// enrich. See the crate docs for the full step order.
    #[instrument(skip(self, input), fields(content_len = input.content.len()))]
    pub fn create(&self, input: CreateMemoryInput) -> Result<CreateMemoryResult> {
        // 1. Normalize input
        let content = strip_private_blocks(&input.content);
        if content.is_empty() {
            return Err(ExocortexError::InvalidInput(
                "content is empty after removing private blocks".into(),
            ));
        }
        if let Some(i) = input.importance {
            if !(0.0..=1.0).contains(&i) {
                return Err(ExocortexError::InvalidInput(format!(
                    "importance {} outside [0,1]",
                    i
                )));
            }
        }

        let benchmark = input.benchmark;
        let snapshot = self.storage.with_connection(|conn| {
            Ok(PipelineSettings::load(conn, benchmark))
        })?;

        let importance = input
            .importance
            .unwrap_or(if benchmark { snapshot.benchmark_importance } else { 0.5 });

        // 2. Normalize tags and infer is_metadata
        let mut raw_tags = input.tags.clone();
        let mut metadata = input.metadata.clone();
        if benchmark {
            raw_tags.push("benchmark-artifact".to_string());
            metadata.insert("mode".to_string(), serde_json::Value::from("benchmark"));
        }
        let (tags, is_metadata) = self.storage.with_connection(|conn| {
            let tags = queries::normalize_tags(conn, &raw_tags)?;
            let inferred = input.is_metadata.unwrap_or(false)
                || benchmark
                || queries::has_metadata_tag(conn, &tags)?
                || has_wellknown_metadata_key(&metadata);
            Ok((tags, inferred))
        })?;

        // 3. Content hash
        let hash = content_hash(&content);

        let mut attempt = 0;
        loop {
            attempt += 1;

            // 4. Hash dedup pre-check
            let mut dedup: Option<(Memory, f32, DedupKind)> = None;
            if snapshot.dedup_enabled && snapshot.hash_dedup_enabled {
                if let Some(existing) = self.storage.with_connection(|conn| {
                    queries::find_active_by_hash(conn, input.content_type, &hash)
                })? {
                    if snapshot.skip_insert_on_match {
                        return self.resolve_skip(
                            existing,
                            &input,
                            &tags,
                            &metadata,
                            importance,
                            is_metadata,
                            1.0,
                            DedupKind::Hash,
                        );
                    }
                    dedup = Some((existing, 1.0, DedupKind::Hash));
                }
            }

            // 5. Embed the full content (oracle failure downgrades to no
            //    embedding)
            let embedding = if snapshot.indexed {
                match self.embedder.embed(&content) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        warn!("embedding failed, storing without vector: {}", e);
                        self.bump("oracle.embed_failed");
                        None
                    }
                }
            } else {
                None
            };

            // 6. Chunk decision
            let should_chunk = snapshot.chunking_enabled
                && content.chars().count() > snapshot.chunking_max_length;

            // 7. Semantic dedup (non-chunk path only)
            if !should_chunk
                && dedup.is_none()
                && snapshot.dedup_enabled
                && embedding.is_some()
                && content.chars().count() >= SEMANTIC_DEDUP_MIN_CHARS
            {
                if let Some((existing, similarity)) = self.storage.with_connection(|conn| {
                    find_semantic_duplicate(
                        conn,
                        input.content_type,
                        embedding.as_ref().unwrap(),
                        &tags,
                        snapshot.similarity_threshold,
                        snapshot.candidate_pool,
                    )
                })? {
                    if snapshot.skip_insert_on_match {
                        return self.resolve_skip(
                            existing,
                            &input,
                            &tags,
                            &metadata,
                            importance,
                            is_metadata,
                            similarity,
                            DedupKind::Semantic,
                        );
                    }
                    dedup = Some((existing, similarity, DedupKind::Semantic));
                }
            }

            // Build the row set outside the transaction (chunk embeddings
            // are oracle calls)
            let now = Utc::now();
            let parent_id = new_id();
            let mut parent = Memory {
                id: parent_id.clone(),
                content: content.clone(),
                content_type: input.content_type,
                source: input.source.clone().unwrap_or_else(|| "manual".to_string()),
                source_uri: input.source_uri.clone(),
                attribution: input.attribution.clone(),
                tags: tags.clone(),
                metadata: metadata.clone(),
                embedding: if should_chunk { None } else { embedding.clone() },
                content_hash: hash.clone(),
                is_indexed: snapshot.indexed,
                is_metadata,
                importance,
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

            let chunks = if should_chunk {
                self.build_chunks(&parent, &content, snapshot.chunking_target_size)
            } else {
                Vec::new()
            };

            // 8. Transactional insert + supersede
            let dedup_for_tx = dedup.clone();
            let insert_result = self.storage.with_transaction(|conn| {
                let mut superseded: Option<(String, f32, DedupKind)> = None;
                if let Some((ref existing, similarity, kind)) = dedup_for_tx {
                    if queries::mark_superseded(conn, &existing.id, &parent.id)? {
                        superseded = Some((existing.id.clone(), similarity, kind));
                    }
                    // 0 rows: another writer already superseded it; insert
                    // plain and drop the dedup marker
                }
                queries::insert_memory(conn, &parent)?;
                for chunk in &chunks {
                    queries::insert_memory(conn, chunk)?;
                }
                if benchmark {
                    counters::bump(conn, "memory.benchmark_writes");
                }
                if let Some((_, _, kind)) = superseded {
                    counters::bump(conn, "memory.dedup_superseded");
                    counters::bump(
                        conn,
                        &format!("memory.dedup_superseded.{}", kind.counter_suffix()),
                    );
                }
                Ok(superseded)
            });

            let superseded = match insert_result {
                Ok(s) => s,
                Err(ref e) if is_unique_violation(e) && attempt < MAX_CREATE_ATTEMPTS => {
                    // Lost the race against a concurrent identical writer:
                    // re-run the dedup scan from the top
                    self.bump("memory.dedup_skipped.constraint");
                    debug!("unique violation on insert, retrying dedup (attempt {})", attempt);
                    continue;
                }
                Err(ref e) if is_unique_violation(e) => {
                    // Dedup could not resolve it (e.g. dedup disabled while
                    // the hash index is still present)
                    return Err(ExocortexError::Conflict(
                        "an active memory with identical content already exists".into(),
                    ));
                }
                Err(e) => return Err(e),
            };

            // 9. Post-insert enrichment (best-effort)
            if !benchmark {
                self.post_insert(&mut parent);
            }

            if snapshot.log_events {
                tracing::info!(
                    memory_id = %parent_id,
                    chunks = chunks.len(),
                    superseded = superseded.is_some(),
                    "memory created"
                );
            }

            let memory = self
                .storage
                .with_connection(|conn| queries::require_memory(conn, &parent_id))?;

            return Ok(CreateMemoryResult {
                memory,
                dedup_action: superseded.as_ref().map(|_| DedupAction::Superseded),
                superseded_id: superseded.as_ref().map(|(id, _, _)| id.clone()),
                dedup_similarity: superseded.as_ref().map(|(_, s, _)| *s),
            });
        }
    }

    /// Dedup skip path: touch the existing row instead of inserting
    #[allow(clippy::too_many_arguments)]
    fn resolve_skip(
        &self,
        existing: Memory,
        input: &CreateMemoryInput,
        tags: &[String],
        metadata: &HashMap<String, serde_json::Value>,
        importance: f32,
        is_metadata: bool,
        similarity: f32,
        kind: DedupKind,
    ) -> Result<CreateMemoryResult> {
        let merged = self.storage.with_transaction(|conn| {
            let merged = queries::merge_into_existing(
                conn,
                &existing,
                tags,
                metadata,
                Some(importance),
                &input.attribution,
                is_metadata,
            )?;
            counters::bump(conn, "memory.dedup_skipped");
            counters::bump(conn, &format!("memory.dedup_skipped.{}", kind.counter_suffix()));
            Ok(merged)
        })?;

        Ok(CreateMemoryResult {
            memory: merged,
            dedup_action: Some(DedupAction::Skipped),
            superseded_id: None,
            dedup_similarity: Some(similarity),
        })
    }

    /// Chunk rows inherit the parent's tags, attribution, and flags; each
    /// chunk's embedding is attempted independently
    fn build_chunks(&self, parent: &Memory, content: &str, target_size: usize) -> Vec<Memory> {
        chunk_text(content, target_size)
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let chunk_embedding = if parent.is_indexed {
                    match self.embedder.embed(&text) {
                        Ok(e) => Some(e),
                        Err(e) => {
                            warn!("chunk {} embedding failed: {}", i, e);
                            self.bump("oracle.chunk_embed_failed");
                            None
                        }
                    }
                } else {
                    None
                };
                Memory {
                    id: new_id(),
                    content_hash: content_hash(&text),
                    content: text,
                    embedding: chunk_embedding,
                    parent_id: Some(parent.id.clone()),
                    chunk_index: Some(i as i64),
                    keywords: String::new(),
                    metadata: HashMap::new(),
                    access_count: 0,
                    useful_count: 0,
                    last_accessed_at: None,
                    superseded_by: None,
                    is_active: true,
                    ..parent.clone()
                }
            })
            .collect()
    }

    /// Post-insert sub-steps: entities, relationships, auto-tags, keywords.
    /// Each failure increments a counter and never unwinds the insert.
    fn post_insert(&self, memory: &mut Memory) {
        let extracted = extract_entities(&memory.content);
        let mut entity_names: Vec<String> = Vec::new();

        let entity_result: Result<()> = self.storage.with_transaction(|conn| {
            for e in &extracted {
                let entity = ensure_entity(conn, &e.name, e.entity_type)?;
                link_entity(conn, &memory.id, &entity.id, e.confidence)?;
                entity_names.push(entity.name);
            }
            Ok(())
        });
        if let Err(e) = entity_result {
            warn!("entity linking failed: {}", e);
            self.bump("postinsert.entities_failed");
        }

        let relationships = extract_relationships(&memory.content, &extracted);
        if !relationships.is_empty() {
            let rel_result: Result<()> = self.storage.with_transaction(|conn| {
                for rel in &relationships {
                    let source = ensure_entity(
                        conn,
                        &rel.source,
                        extracted
                            .iter()
                            .find(|e| e.name == rel.source)
                            .map(|e| e.entity_type)
                            .unwrap_or_default(),
                    )?;
                    let target = ensure_entity(
                        conn,
                        &rel.target,
                        extracted
                            .iter()
                            .find(|e| e.name == rel.target)
                            .map(|e| e.entity_type)
                            .unwrap_or_default(),
                    )?;
                    upsert_relationship(
                        conn,
                        &source.id,
                        &target.id,
                        &rel.relationship,
                        rel.confidence,
                        Some(&memory.id),
                        rel.context.as_deref(),
                    )?;
                }
                Ok(())
            });
            if let Err(e) = rel_result {
                warn!("relationship persistence failed: {}", e);
                self.bump("postinsert.relationships_failed");
            }
        }

        // Auto-tagging
        let auto_enabled = self
            .storage
            .with_connection(|conn| Ok(settings::get_bool(conn, "auto_tagging.enabled")))
            .unwrap_or(true);
        if auto_enabled {
            let suggestions = suggest_tags(&memory.content, &memory.tags, &AutoTagConfig::default());
            if !suggestions.is_empty() {
                let mut new_tags = memory.tags.clone();
                for s in suggestions {
                    if !new_tags.contains(&s.tag) {
                        new_tags.push(s.tag);
                    }
                }
                let tag_result: Result<()> = self.storage.with_transaction(|conn| {
                    let normalized = queries::normalize_tags(conn, &new_tags)?;
                    queries::replace_tags(conn, &memory.id, &normalized)?;
                    memory.tags = normalized;
                    Ok(())
                });
                if let Err(e) = tag_result {
                    warn!("auto-tagging failed: {}", e);
                    self.bump("postinsert.autotag_failed");
                }
            }
        }

        // Keyword generation feeds the lexical index
        let keywords = generate_keywords(&memory.content, &memory.tags, &entity_names);
        let kw_result: Result<()> = self.storage.with_transaction(|conn| {
            conn.execute(
                "UPDATE memories SET keywords = ? WHERE id = ?",
                rusqlite::params![keywords, memory.id],
            )?;
            queries::fts_index(conn, &memory.id, &memory.content, &keywords, &memory.tags)?;
            memory.keywords = keywords.clone();
            Ok(())
        });
        if let Err(e) = kw_result {
            warn!("keyword generation failed: {}", e);
            self.bump("postinsert.keywords_failed");
        }
    }

    // ------------------------------------------------------------------
    // Update / lifecycle
    // ------------------------------------------------------------------

    /// Update a memory. Content changes recompute the hash, re-embed, and
    /// re-chunk or dechunk as the length crosses the chunking threshold.
    #[instrument(skip(self, patch))]
    pub fn update(&self, id: &str, patch: UpdateMemoryInput) -> Result<Memory> {
        let mut memory = self
            .storage
            .with_connection(|conn| queries::require_memory(conn, id))?;
        if memory.is_chunk() {
            return Err(ExocortexError::InvalidInput(
                "chunks are updated through their parent".into(),
            ));
        }

        let snapshot = self
            .storage
            .with_connection(|conn| Ok(PipelineSettings::load(conn, false)))?;

        let mut content_changed = false;
        if let Some(new_content) = patch.content {
            let stripped = strip_private_blocks(&new_content);
            if stripped.is_empty() {
                return Err(ExocortexError::InvalidInput(
                    "content is empty after removing private blocks".into(),
                ));
            }
            if stripped != memory.content {
                memory.content = stripped;
                memory.content_hash = content_hash(&memory.content);
                content_changed = true;
            }
        }
        if let Some(ct) = patch.content_type {
            memory.content_type = ct;
        }
        if let Some(i) = patch.importance {
            if !(0.0..=1.0).contains(&i) {
                return Err(ExocortexError::InvalidInput(format!(
                    "importance {} outside [0,1]",
                    i
                )));
            }
            memory.importance = i;
        }
        if let Some(flag) = patch.is_metadata {
            memory.is_metadata = flag;
        }

        let mut tags_changed = false;
        if let Some(new_tags) = patch.tags {
            let normalized = self
                .storage
                .with_connection(|conn| queries::normalize_tags(conn, &new_tags))?;
            if normalized != memory.tags {
                memory.tags = normalized;
                tags_changed = true;
            }
        }

        // Metadata merge: new keys overwrite, null deletes
        if let Some(meta_patch) = patch.metadata {
            for (k, v) in meta_patch {
                if v.is_null() {
                    memory.metadata.remove(&k);
                } else {
                    memory.metadata.insert(k, v);
                }
            }
        }

        let entity_names: Vec<String> = self.storage.with_connection(|conn| {
            Ok(crate::storage::entity_queries::entities_for_memory(conn, &memory.id)?
                .into_iter()
                .map(|(e, _)| e.name)
                .collect())
        })?;
        if content_changed || tags_changed {
            memory.keywords = generate_keywords(&memory.content, &memory.tags, &entity_names);
        }

        let had_children = !self
            .storage
            .with_connection(|conn| queries::get_children(conn, &memory.id))?
            .is_empty();
        let should_chunk = snapshot.chunking_enabled
            && memory.content.chars().count() > snapshot.chunking_max_length;

        // Re-embed outside the transaction
        let mut new_chunks: Vec<Memory> = Vec::new();
        if content_changed {
            if should_chunk {
                memory.embedding = None;
                new_chunks = self.build_chunks(&memory, &memory.content.clone(), snapshot.chunking_target_size);
            } else if memory.is_indexed {
                memory.embedding = match self.embedder.embed(&memory.content) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        warn!("re-embedding failed: {}", e);
                        self.bump("oracle.embed_failed");
                        None
                    }
                };
            }
        }

        let rechunk = content_changed && (had_children || should_chunk);
        let tx_result = self.storage.with_transaction(|conn| {
            if rechunk {
                // Replace or drop the chunk set atomically; the parent row id
                // is stable so inbound supersession pointers stay valid
                for child in queries::get_children(conn, &memory.id)? {
                    queries::delete_memory(conn, &child.id)?;
                }
                for chunk in &new_chunks {
                    queries::insert_memory(conn, chunk)?;
                }
            }
            queries::update_memory_row(conn, &memory)?;
            Ok(())
        });
        match tx_result {
            Err(ref e) if is_unique_violation(e) => {
                return Err(ExocortexError::Conflict(
                    "another active memory already holds this content".into(),
                ));
            }
            other => other?,
        }

        self.storage
            .with_connection(|conn| queries::require_memory(conn, id))
    }

    /// Archive a memory (soft delete without supersession)
    pub fn archive(&self, id: &str) -> Result<()> {
        self.storage
            .with_transaction(|conn| queries::archive_memory(conn, id))
    }

    /// Restore an archived memory
    pub fn restore(&self, id: &str) -> Result<()> {
        self.storage
            .with_transaction(|conn| queries::restore_memory(conn, id))
    }

    /// Hard delete with full cascade
    pub fn delete(&self, id: &str) -> Result<()> {
        self.storage
            .with_transaction(|conn| queries::delete_memory(conn, id))
    }

    // ------------------------------------------------------------------
    // Reads, access, feedback
    // ------------------------------------------------------------------

    /// Get one memory; records the access and counts an implicit usefulness
    /// hit when the id came from a recent search
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        let memory = self
            .storage
            .with_connection(|conn| queries::get_memory(conn, id))?;
        if memory.is_some() {
            self.note_retrieval(id, None);
        }
        Ok(memory)
    }

    /// Get several memories; same feedback semantics as [`get`]
    pub fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Memory>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(m) = self.get(id)? {
                out.push(m);
            }
        }
        Ok(out)
    }

    fn note_retrieval(&self, id: &str, query: Option<&str>) {
        let implicit_hit = self.feedback.take_hit(id);
        let result: Result<()> = self.storage.with_transaction(|conn| {
            queries::record_access(conn, id, query)?;
            if let Some(ref top_signal) = implicit_hit {
                queries::increment_useful(conn, id)?;
                counters::bump(conn, "feedback.implicit_useful");
                if let Some(signal) = top_signal {
                    counters::bump(conn, &format!("tuning.useful.{}", signal));
                }
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!("access logging failed: {}", e);
            self.bump("access_log.failed");
        }
    }

    /// Explicit usefulness feedback
    pub fn mark_useful(&self, ids: &[String]) -> Result<usize> {
        let signals: Vec<Option<Option<String>>> =
            ids.iter().map(|id| self.feedback.take_hit(id)).collect();
        self.storage.with_transaction(|conn| {
            let mut updated = 0;
            for (id, hit) in ids.iter().zip(&signals) {
                if queries::get_memory(conn, id)?.is_some() {
                    queries::increment_useful(conn, id)?;
                    updated += 1;
                    if let Some(Some(signal)) = hit {
                        counters::bump(conn, &format!("tuning.useful.{}", signal));
                    }
                }
            }
            counters::bump_by(conn, "feedback.explicit_useful", updated as i64)?;
            Ok(updated)
        })
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Hybrid search plus one-hop link expansion. Returned ids are tracked
    /// for implicit feedback; accesses are logged fire-and-forget.
    #[instrument(skip(self, options))]
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ExocortexError::InvalidInput("empty search query".into()));
        }

        // Alias-normalize the tag filter
        let mut options = options.clone();
        if let Some(ref tags) = options.tags {
            options.tags = Some(
                self.storage
                    .with_connection(|conn| queries::normalize_tags(conn, tags))?,
            );
        }

        let (results, linked) = self.storage.with_connection(|conn| {
            let config = SearchConfig::load(conn);
            let results = hybrid_search(conn, self.embedder.as_ref(), query, &options, &config)?;
            let ids: Vec<String> = results.iter().map(|r| r.memory.id.clone()).collect();
            let linked = expand_links(conn, &ids, config.link_strength_floor, config.expansion_limit)?;
            Ok((results, linked))
        })?;

        // Track result ids (with their strongest signal) for implicit
        // feedback and the weight tuner
        let tracked: Vec<(String, String)> = results
            .iter()
            .map(|r| (r.memory.id.clone(), top_signal(r).to_string()))
            .collect();
        for (_, signal) in &tracked {
            self.bump(&format!("tuning.shown.{}", signal));
        }
        self.feedback.register_with_signals(tracked);

        for r in &results {
            let logged: Result<()> = self.storage.with_transaction(|conn| {
                queries::record_access(conn, &r.memory.id, Some(query))
            });
            if let Err(e) = logged {
                warn!("search access logging failed: {}", e);
                self.bump("access_log.failed");
            }
        }

        Ok(SearchResponse { results, linked })
    }

    /// Browse without a query
    pub fn browse(&self, options: &BrowseOptions) -> Result<Vec<Memory>> {
        let mut options = options.clone();
        if let Some(ref tags) = options.tags {
            options.tags = Some(
                self.storage
                    .with_connection(|conn| queries::normalize_tags(conn, tags))?,
            );
        }
        self.storage
            .with_connection(|conn| queries::browse_memories(conn, &options))
    }

    /// Timeline queries (decisions / lineage / evolution)
    pub fn timeline(
        &self,
        mode: TimelineMode,
        memory_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<TimelineEntry>> {
        self.storage
            .with_connection(|conn| queries::timeline(conn, mode, memory_id, limit))
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Create or strengthen a typed link between two memories. Contradiction
    /// links are also recorded in the contradictions table.
    pub fn link(
        &self,
        source: &str,
        target: &str,
        link_type: LinkType,
        strength: f32,
    ) -> Result<MemoryLink> {
        self.link_full(source, target, link_type, strength, false)
    }

    /// [`link`] with an explicit request to override the stored link_type
    pub fn link_full(
        &self,
        source: &str,
        target: &str,
        link_type: LinkType,
        strength: f32,
        override_type: bool,
    ) -> Result<MemoryLink> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(ExocortexError::InvalidInput(format!(
                "strength {} outside [0,1]",
                strength
            )));
        }
        self.storage.with_transaction(|conn| {
            queries::require_memory(conn, source)?;
            queries::require_memory(conn, target)?;
            let link = upsert_link(conn, source, target, link_type, strength, override_type)?;
            if link_type == LinkType::Contradicts {
                record_contradiction(conn, source, target, "linked as contradicting")?;
            }
            Ok(link)
        })
    }

    /// Remove the link between two memories
    pub fn unlink(&self, source: &str, target: &str) -> Result<bool> {
        self.storage
            .with_transaction(|conn| unlink(conn, source, target))
    }

    /// Outgoing and incoming link references for a set of memories
    pub fn get_linked_refs(&self, ids: &[String]) -> Result<Vec<MemoryLink>> {
        self.storage
            .with_connection(|conn| crate::storage::links::links_for_ids(conn, ids))
    }

    // ------------------------------------------------------------------
    // Stats / settings / counters
    // ------------------------------------------------------------------

    pub fn stats(&self) -> Result<StoreStats> {
        let size = self.storage.db_size().unwrap_or(0);
        self.storage
            .with_connection(|conn| queries::get_stats(conn, size))
    }

    pub fn list_tags(&self) -> Result<Vec<(String, i64)>> {
        self.storage.with_connection(queries::list_tags)
    }

    pub fn get_setting(&self, key: &str) -> Result<String> {
        self.storage
            .with_connection(|conn| Ok(settings::get_string(conn, key)))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.storage.with_transaction(|conn| {
            settings::set(conn, key, value)?;
            // The hash-uniqueness index is the concurrent-dedup backstop;
            // disabling hash dedup drops it so duplicates become storable
            if key == "dedup.hash_enabled" {
                if settings::get_bool(conn, "dedup.hash_enabled") {
                    conn.execute_batch(
                        "CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_active_hash
                             ON memories(content_type, content_hash)
                             WHERE is_active = 1 AND parent_id IS NULL;",
                    )?;
                } else {
                    conn.execute_batch("DROP INDEX IF EXISTS idx_memories_active_hash;")?;
                }
            }
            Ok(())
        })
    }

    pub fn counters(&self) -> Result<Vec<(String, i64)>> {
        self.storage.with_connection(counters::all)
    }

    fn bump(&self, key: &str) {
        let _ = self.storage.with_connection(|conn| {
            counters::bump(conn, key);
            Ok(())
        });
    }
}

/// Settings snapshot taken once per pipeline run
struct PipelineSettings {
    dedup_enabled: bool,
    hash_dedup_enabled: bool,
    skip_insert_on_match: bool,
    similarity_threshold: f32,
    candidate_pool: i64,
    chunking_enabled: bool,
    chunking_max_length: usize,
    chunking_target_size: usize,
    indexed: bool,
    benchmark_importance: f32,
    log_events: bool,
}

impl PipelineSettings {
    fn load(conn: &Connection, benchmark: bool) -> Self {
        Self {
            dedup_enabled: settings::get_bool(conn, "dedup.enabled"),
            hash_dedup_enabled: settings::get_bool(conn, "dedup.hash_enabled"),
            skip_insert_on_match: settings::get_bool(conn, "dedup.skip_insert_on_match"),
            similarity_threshold: settings::get_f64(conn, "dedup.similarity_threshold") as f32,
            candidate_pool: settings::get_i64(conn, "dedup.candidate_pool"),
            chunking_enabled: if benchmark {
                settings::get_bool(conn, "benchmark.chunking")
            } else {
                settings::get_bool(conn, "chunking.enabled")
            },
            chunking_max_length: settings::get_i64(conn, "chunking.max_length").max(1) as usize,
            chunking_target_size: settings::get_i64(conn, "chunking.target_size").max(1) as usize,
            indexed: if benchmark {
                settings::get_bool(conn, "benchmark.indexed")
            } else {
                true
            },
            benchmark_importance: settings::get_f64(conn, "benchmark.default_importance") as f32,
            log_events: settings::get_bool(conn, "observability.log_events"),
        }
    }
}

/// Scan the recent candidate pool for a semantic duplicate: first row at or
/// above the threshold that shares a tag with the new row (when it has tags)
fn find_semantic_duplicate(
    conn: &Connection,
    content_type: ContentType,
    embedding: &[f32],
    tags: &[String],
    threshold: f32,
    pool: i64,
) -> Result<Option<(Memory, f32)>> {
    let candidates = queries::recent_embedded_roots(conn, content_type, pool)?;
    for candidate in candidates {
        let Some(ref cand_embedding) = candidate.embedding else { continue };
        let similarity = crate::embedding::cosine_similarity(embedding, cand_embedding);
        if similarity < threshold {
            continue;
        }
        if !tags.is_empty() && !candidate.tags.iter().any(|t| tags.contains(t)) {
            continue;
        }
        return Ok(Some((candidate, similarity)));
    }
    Ok(None)
}

/// Metadata keys whose presence marks a memory as configuration-like
fn has_wellknown_metadata_key(metadata: &HashMap<String, serde_json::Value>) -> bool {
    if metadata
        .get("mode")
        .and_then(|v| v.as_str())
        .map(|s| s == "benchmark")
        .unwrap_or(false)
    {
        return true;
    }
    ["config", "setting", "preference_key"]
        .iter()
        .any(|k| metadata.contains_key(*k))
}

/// Which signal contributed most to a fused result (for feedback
/// attribution)
fn top_signal(result: &crate::types::SearchResult) -> &'static str {
    let signals = [
        ("vector", result.vector_score),
        ("fts", result.fts_score),
        ("recency", result.recency_score),
        ("frequency", result.frequency_score),
    ];
    signals
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, _)| *name)
        .unwrap_or("vector")
}

fn is_unique_violation(err: &ExocortexError) -> bool {
    matches!(
        err,
        ExocortexError::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
