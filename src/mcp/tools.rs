//! MCP tool definitions and dispatch
//!
//! Each tool validates its input (types, required fields, enumerated
//! domains) before touching the core; errors surface with machine-readable
//! JSON-RPC codes.

use serde_json::{json, Value};

use super::protocol::{McpHandler, McpRequest, McpResponse};
use crate::error::{ExocortexError, Result};
use crate::goals;
use crate::graph::EntityGraph;
use crate::intelligence::document_ingest::split_markdown;
use crate::intelligence::session_digest::digest_transcript;
use crate::maintenance::{self, health::health_checks, MaintenanceFlags};
use crate::storage::entity_queries;
use crate::storage::settings;
use crate::store::MemoryStore;
use crate::types::{
    Attribution, BrowseOptions, ContentType, CreateMemoryInput, SearchOptions, TimelineMode,
    UpdateMemoryInput,
};

/// (name, description, JSON schema) for every exposed tool
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        "memory_store",
        "Store a new memory. Private <private>...</private> blocks are stripped before anything is persisted.",
        r#"{"type":"object","properties":{
            "content":{"type":"string","description":"Text to remember"},
            "type":{"type":"string","enum":["text","note","conversation","summary"],"default":"text"},
            "source":{"type":"string","description":"Origin tag (manual, mcp, api, ingest)"},
            "source_uri":{"type":"string"},
            "tags":{"type":"array","items":{"type":"string"}},
            "metadata":{"type":"object"},
            "importance":{"type":"number","minimum":0,"maximum":1},
            "is_metadata":{"type":"boolean"},
            "benchmark":{"type":"boolean","default":false},
            "provider":{"type":"string"},"model_id":{"type":"string"},"model_name":{"type":"string"},
            "agent":{"type":"string"},"session_id":{"type":"string"},"conversation_id":{"type":"string"}
        },"required":["content"]}"#,
    ),
    (
        "memory_search",
        "Hybrid semantic + lexical search with recency/frequency fusion and one-hop link expansion.",
        r#"{"type":"object","properties":{
            "query":{"type":"string"},
            "limit":{"type":"integer","default":10},
            "tags":{"type":"array","items":{"type":"string"}},
            "after":{"type":"string","description":"Date prefix lower bound (YYYY-MM-DD)"},
            "before":{"type":"string","description":"Date prefix upper bound"},
            "type":{"type":"string","enum":["text","note","conversation","summary"]},
            "min_score":{"type":"number"},
            "min_importance":{"type":"number"},
            "include_superseded":{"type":"boolean","default":false}
        },"required":["query"]}"#,
    ),
    (
        "memory_browse",
        "Page through memories without a query.",
        r#"{"type":"object","properties":{
            "limit":{"type":"integer","default":20},
            "offset":{"type":"integer","default":0},
            "tags":{"type":"array","items":{"type":"string"}},
            "type":{"type":"string","enum":["text","note","conversation","summary"]},
            "after":{"type":"string"},"before":{"type":"string"},
            "include_inactive":{"type":"boolean","default":false}
        }}"#,
    ),
    (
        "memory_get",
        "Fetch memories by id (counts implicit usefulness for recent search results).",
        r#"{"type":"object","properties":{
            "ids":{"type":"array","items":{"type":"string"}}
        },"required":["ids"]}"#,
    ),
    (
        "memory_update",
        "Patch a memory's content, type, tags, metadata, or importance.",
        r#"{"type":"object","properties":{
            "id":{"type":"string"},
            "content":{"type":"string"},
            "type":{"type":"string","enum":["text","note","conversation","summary"]},
            "tags":{"type":"array","items":{"type":"string"}},
            "metadata":{"type":"object","description":"Merged; null values delete keys"},
            "importance":{"type":"number","minimum":0,"maximum":1},
            "is_metadata":{"type":"boolean"}
        },"required":["id"]}"#,
    ),
    (
        "memory_forget",
        "Archive a memory, or hard-delete it (cascades to chunks, tags, links, logs).",
        r#"{"type":"object","properties":{
            "id":{"type":"string"},
            "hard":{"type":"boolean","default":false},
            "restore":{"type":"boolean","default":false,"description":"Restore an archived memory instead"}
        },"required":["id"]}"#,
    ),
    (
        "memory_feedback",
        "Mark retrieved memories as useful (drives frequency scoring and weight tuning).",
        r#"{"type":"object","properties":{
            "ids":{"type":"array","items":{"type":"string"}}
        },"required":["ids"]}"#,
    ),
    (
        "memory_link",
        "Create or strengthen a typed link between two memories.",
        r#"{"type":"object","properties":{
            "source_id":{"type":"string"},
            "target_id":{"type":"string"},
            "link_type":{"type":"string","enum":["related","elaborates","contradicts","supersedes","supports","derived_from"],"default":"related"},
            "strength":{"type":"number","minimum":0,"maximum":1,"default":0.5},
            "override_type":{"type":"boolean","default":false,"description":"Replace the stored link_type instead of preserving the earliest"}
        },"required":["source_id","target_id"]}"#,
    ),
    (
        "memory_unlink",
        "Remove the link between two memories.",
        r#"{"type":"object","properties":{
            "source_id":{"type":"string"},
            "target_id":{"type":"string"}
        },"required":["source_id","target_id"]}"#,
    ),
    (
        "memory_timeline",
        "Timeline views: decisions, supersession lineage of one memory, or per-day evolution.",
        r#"{"type":"object","properties":{
            "mode":{"type":"string","enum":["decisions","lineage","evolution"],"default":"decisions"},
            "memory_id":{"type":"string","description":"Required for lineage mode"},
            "limit":{"type":"integer","default":20}
        }}"#,
    ),
    (
        "memory_entities",
        "List extracted entities, or the entities of one memory.",
        r#"{"type":"object","properties":{
            "memory_id":{"type":"string"},
            "entity_type":{"type":"string","enum":["person","project","technology","organization","concept"]},
            "limit":{"type":"integer","default":100}
        }}"#,
    ),
    (
        "memory_graph",
        "Entity graph queries: stats, centrality, bridges, communities.",
        r#"{"type":"object","properties":{
            "mode":{"type":"string","enum":["stats","centrality","bridges","communities"],"default":"stats"},
            "limit":{"type":"integer","default":20}
        }}"#,
    ),
    (
        "memory_decay_preview",
        "Preview which memories the decay pass would archive, without mutating.",
        r#"{"type":"object","properties":{}}"#,
    ),
    (
        "memory_maintenance",
        "Run maintenance: decay/importance always, plus flagged sub-operations.",
        r#"{"type":"object","properties":{
            "reembed":{"type":"boolean","default":false},
            "backfill_entities":{"type":"boolean","default":false},
            "recalibrate":{"type":"boolean","default":false},
            "densify_graph":{"type":"boolean","default":false},
            "build_co_retrieval_links":{"type":"boolean","default":false},
            "tune_weights":{"type":"boolean","default":false}
        }}"#,
    ),
    (
        "memory_consolidate",
        "Find clusters of near-duplicate memories and merge them into summaries (dry-run by default).",
        r#"{"type":"object","properties":{
            "dry_run":{"type":"boolean","default":true}
        }}"#,
    ),
    (
        "memory_ingest",
        "Ingest a markdown document, split into one memory per H2 section.",
        r#"{"type":"object","properties":{
            "content":{"type":"string","description":"Markdown text"},
            "title":{"type":"string","description":"Fallback title / source name"},
            "source_uri":{"type":"string"},
            "tags":{"type":"array","items":{"type":"string"}}
        },"required":["content"]}"#,
    ),
    (
        "memory_digest_session",
        "Digest a session transcript into a stored summary plus extracted fact memories.",
        r#"{"type":"object","properties":{
            "transcript":{"type":"string"},
            "session_id":{"type":"string"}
        },"required":["transcript"]}"#,
    ),
    (
        "memory_ping",
        "Liveness check: store stats, health status, and version.",
        r#"{"type":"object","properties":{}}"#,
    ),
    (
        "goal_create",
        "Create a goal with optional milestones.",
        r#"{"type":"object","properties":{
            "title":{"type":"string"},
            "description":{"type":"string"},
            "priority":{"type":"string","enum":["low","medium","high","critical"],"default":"medium"},
            "deadline":{"type":"string","description":"YYYY-MM-DD"},
            "milestones":{"type":"array","items":{"type":"string"}}
        },"required":["title"]}"#,
    ),
    (
        "goal_update",
        "Update a goal's fields or status.",
        r#"{"type":"object","properties":{
            "id":{"type":"string"},
            "title":{"type":"string"},
            "description":{"type":"string"},
            "status":{"type":"string","enum":["active","completed","stalled","abandoned"]},
            "priority":{"type":"string","enum":["low","medium","high","critical"]},
            "deadline":{"type":"string"}
        },"required":["id"]}"#,
    ),
    (
        "goal_list",
        "List goals, optionally by status.",
        r#"{"type":"object","properties":{
            "status":{"type":"string","enum":["active","completed","stalled","abandoned"]}
        }}"#,
    ),
    (
        "goal_get",
        "Fetch one goal with milestones.",
        r#"{"type":"object","properties":{"id":{"type":"string"}},"required":["id"]}"#,
    ),
    (
        "goal_delete",
        "Delete a goal and its milestones.",
        r#"{"type":"object","properties":{"id":{"type":"string"}},"required":["id"]}"#,
    ),
    (
        "goal_milestone_add",
        "Append a milestone to a goal.",
        r#"{"type":"object","properties":{
            "goal_id":{"type":"string"},
            "title":{"type":"string"}
        },"required":["goal_id","title"]}"#,
    ),
    (
        "goal_milestone_update",
        "Set a milestone's status.",
        r#"{"type":"object","properties":{
            "goal_id":{"type":"string"},
            "position":{"type":"integer"},
            "status":{"type":"string","enum":["pending","in_progress","completed"]}
        },"required":["goal_id","position","status"]}"#,
    ),
    (
        "goal_progress",
        "Log a progress note; auto-links to the most similar active goal when no id is given.",
        r#"{"type":"object","properties":{
            "content":{"type":"string"},
            "goal_id":{"type":"string"}
        },"required":["content"]}"#,
    ),
];

/// MCP handler wired to a memory store
pub struct ExocortexHandler {
    store: MemoryStore,
}

impl ExocortexHandler {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    fn dispatch(&self, tool: &str, args: &Value) -> Result<Value> {
        match tool {
            "memory_store" => self.memory_store(args),
            "memory_search" => self.memory_search(args),
            "memory_browse" => self.memory_browse(args),
            "memory_get" => self.memory_get(args),
            "memory_update" => self.memory_update(args),
            "memory_forget" => self.memory_forget(args),
            "memory_feedback" => self.memory_feedback(args),
            "memory_link" => self.memory_link(args),
            "memory_unlink" => self.memory_unlink(args),
            "memory_timeline" => self.memory_timeline(args),
            "memory_entities" => self.memory_entities(args),
            "memory_graph" => self.memory_graph(args),
            "memory_decay_preview" => {
                Ok(serde_json::to_value(maintenance::decay_preview(&self.store)?)?)
            }
            "memory_maintenance" => self.memory_maintenance(args),
            "memory_consolidate" => {
                let dry_run = opt_bool(args, "dry_run").unwrap_or(true);
                Ok(serde_json::to_value(maintenance::consolidate(&self.store, dry_run)?)?)
            }
            "memory_ingest" => self.memory_ingest(args),
            "memory_digest_session" => self.memory_digest_session(args),
            "memory_ping" => self.memory_ping(),
            "goal_create" => self.goal_create(args),
            "goal_update" => self.goal_update(args),
            "goal_list" => {
                let status = opt_enum(args, "status")?;
                Ok(serde_json::to_value(goals::list_goals(&self.store, status)?)?)
            }
            "goal_get" => {
                let id = req_str(args, "id")?;
                Ok(serde_json::to_value(goals::get_goal(&self.store, &id)?)?)
            }
            "goal_delete" => {
                let id = req_str(args, "id")?;
                goals::delete_goal(&self.store, &id)?;
                Ok(json!({"deleted": id}))
            }
            "goal_milestone_add" => {
                let goal_id = req_str(args, "goal_id")?;
                let title = req_str(args, "title")?;
                Ok(serde_json::to_value(goals::add_milestone(&self.store, &goal_id, &title)?)?)
            }
            "goal_milestone_update" => {
                let goal_id = req_str(args, "goal_id")?;
                let position = req_i64(args, "position")?;
                let status = req_str(args, "status")?
                    .parse()
                    .map_err(ExocortexError::InvalidInput)?;
                goals::update_milestone(&self.store, &goal_id, position, status)?;
                Ok(json!({"updated": true}))
            }
            "goal_progress" => {
                let content = req_str(args, "content")?;
                let goal_id = opt_str(args, "goal_id");
                Ok(serde_json::to_value(goals::log_progress(
                    &self.store,
                    goal_id.as_deref(),
                    &content,
                )?)?)
            }
            other => Err(ExocortexError::InvalidInput(format!(
                "unknown tool: {}",
                other
            ))),
        }
    }

    fn memory_store(&self, args: &Value) -> Result<Value> {
        let input = CreateMemoryInput {
            content: req_str(args, "content")?,
            content_type: opt_enum(args, "type")?.unwrap_or_default(),
            source: opt_str(args, "source").or(Some("mcp".to_string())),
            source_uri: opt_str(args, "source_uri"),
            attribution: Attribution {
                provider: opt_str(args, "provider"),
                model_id: opt_str(args, "model_id"),
                model_name: opt_str(args, "model_name"),
                agent: opt_str(args, "agent"),
                session_id: opt_str(args, "session_id"),
                conversation_id: opt_str(args, "conversation_id"),
            },
            tags: opt_str_vec(args, "tags"),
            metadata: opt_map(args, "metadata"),
            importance: opt_f64(args, "importance").map(|f| f as f32),
            is_metadata: opt_bool(args, "is_metadata"),
            benchmark: opt_bool(args, "benchmark").unwrap_or(false),
        };
        Ok(serde_json::to_value(self.store.create(input)?)?)
    }

    fn memory_search(&self, args: &Value) -> Result<Value> {
        let query = req_str(args, "query")?;
        let options = SearchOptions {
            limit: opt_i64(args, "limit"),
            tags: opt_str_vec_maybe(args, "tags"),
            after: opt_str(args, "after"),
            before: opt_str(args, "before"),
            content_type: opt_enum(args, "type")?,
            min_score: opt_f64(args, "min_score").map(|f| f as f32),
            min_importance: opt_f64(args, "min_importance").map(|f| f as f32),
            include_superseded: opt_bool(args, "include_superseded").unwrap_or(false),
        };
        Ok(serde_json::to_value(self.store.search(&query, &options)?)?)
    }

    fn memory_browse(&self, args: &Value) -> Result<Value> {
        let options = BrowseOptions {
            limit: opt_i64(args, "limit"),
            offset: opt_i64(args, "offset"),
            tags: opt_str_vec_maybe(args, "tags"),
            content_type: opt_enum(args, "type")?,
            after: opt_str(args, "after"),
            before: opt_str(args, "before"),
            include_inactive: opt_bool(args, "include_inactive").unwrap_or(false),
        };
        Ok(serde_json::to_value(self.store.browse(&options)?)?)
    }

    fn memory_get(&self, args: &Value) -> Result<Value> {
        let ids = opt_str_vec(args, "ids");
        if ids.is_empty() {
            return Err(ExocortexError::InvalidInput("ids is empty".into()));
        }
        Ok(serde_json::to_value(self.store.get_by_ids(&ids)?)?)
    }

    fn memory_update(&self, args: &Value) -> Result<Value> {
        let id = req_str(args, "id")?;
        let patch = UpdateMemoryInput {
            content: opt_str(args, "content"),
            content_type: opt_enum(args, "type")?,
            tags: opt_str_vec_maybe(args, "tags"),
            metadata: args.get("metadata").and_then(|v| v.as_object()).map(|m| {
                m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }),
            importance: opt_f64(args, "importance").map(|f| f as f32),
            is_metadata: opt_bool(args, "is_metadata"),
        };
        Ok(serde_json::to_value(self.store.update(&id, patch)?)?)
    }

    fn memory_forget(&self, args: &Value) -> Result<Value> {
        let id = req_str(args, "id")?;
        if opt_bool(args, "restore").unwrap_or(false) {
            self.store.restore(&id)?;
            return Ok(json!({"restored": id}));
        }
        if opt_bool(args, "hard").unwrap_or(false) {
            self.store.delete(&id)?;
            Ok(json!({"deleted": id}))
        } else {
            self.store.archive(&id)?;
            Ok(json!({"archived": id}))
        }
    }

    fn memory_feedback(&self, args: &Value) -> Result<Value> {
        let ids = opt_str_vec(args, "ids");
        let updated = self.store.mark_useful(&ids)?;
        Ok(json!({"marked_useful": updated}))
    }

    fn memory_link(&self, args: &Value) -> Result<Value> {
        let source = req_str(args, "source_id")?;
        let target = req_str(args, "target_id")?;
        let link_type = opt_str(args, "link_type")
            .map(|s| s.parse().map_err(ExocortexError::InvalidInput))
            .transpose()?
            .unwrap_or_default();
        let strength = opt_f64(args, "strength").unwrap_or(0.5) as f32;
        let override_type = opt_bool(args, "override_type").unwrap_or(false);
        Ok(serde_json::to_value(self.store.link_full(
            &source,
            &target,
            link_type,
            strength,
            override_type,
        )?)?)
    }

    fn memory_unlink(&self, args: &Value) -> Result<Value> {
        let source = req_str(args, "source_id")?;
        let target = req_str(args, "target_id")?;
        Ok(json!({"unlinked": self.store.unlink(&source, &target)?}))
    }

    fn memory_timeline(&self, args: &Value) -> Result<Value> {
        let mode: TimelineMode = opt_str(args, "mode")
            .unwrap_or_else(|| "decisions".to_string())
            .parse()
            .map_err(ExocortexError::InvalidInput)?;
        let memory_id = opt_str(args, "memory_id");
        let limit = opt_i64(args, "limit").unwrap_or(20);
        Ok(serde_json::to_value(self.store.timeline(
            mode,
            memory_id.as_deref(),
            limit,
        )?)?)
    }

    fn memory_entities(&self, args: &Value) -> Result<Value> {
        self.store.storage().with_connection(|conn| {
            if let Some(memory_id) = opt_str(args, "memory_id") {
                let linked = entity_queries::entities_for_memory(conn, &memory_id)?;
                let out: Vec<Value> = linked
                    .into_iter()
                    .map(|(e, relevance)| {
                        let mut v = serde_json::to_value(e).unwrap_or_default();
                        if let Some(obj) = v.as_object_mut() {
                            obj.insert("relevance".into(), json!(relevance));
                        }
                        v
                    })
                    .collect();
                return Ok(Value::Array(out));
            }
            let entity_type = match opt_str(args, "entity_type") {
                Some(s) => Some(s.parse().map_err(ExocortexError::InvalidInput)?),
                None => None,
            };
            let limit = opt_i64(args, "limit").unwrap_or(100);
            Ok(serde_json::to_value(entity_queries::list_entities(
                conn,
                entity_type,
                limit,
            )?)?)
        })
    }

    fn memory_graph(&self, args: &Value) -> Result<Value> {
        let mode = opt_str(args, "mode").unwrap_or_else(|| "stats".to_string());
        let limit = opt_i64(args, "limit").unwrap_or(20) as usize;

        let graph = self.store.storage().with_connection(|conn| {
            let entities = entity_queries::list_entities(conn, None, i64::MAX)?;
            let relationships = entity_queries::all_relationships(conn)?;
            Ok(EntityGraph::from_data(&entities, &relationships))
        })?;

        let (max_betweenness, max_iterations) = self.store.storage().with_connection(|conn| {
            Ok((
                settings::get_i64(conn, "graph.max_betweenness_nodes") as usize,
                settings::get_i64(conn, "graph.community_max_iterations") as usize,
            ))
        })?;

        match mode.as_str() {
            "stats" => Ok(serde_json::to_value(graph.stats())?),
            "centrality" => {
                let mut scores = graph.centrality(max_betweenness);
                scores.truncate(limit);
                Ok(serde_json::to_value(scores)?)
            }
            "bridges" => {
                // Bridges: the highest-betweenness nodes spanning components
                let mut scores = graph.centrality(max_betweenness);
                scores.retain(|s| s.betweenness.map(|b| b > 0.0).unwrap_or(s.degree > 1));
                scores.truncate(limit);
                Ok(serde_json::to_value(scores)?)
            }
            "communities" => {
                let mut communities = graph.communities(max_iterations);
                communities.truncate(limit);
                Ok(serde_json::to_value(communities)?)
            }
            other => Err(ExocortexError::InvalidInput(format!(
                "unknown graph mode: {}",
                other
            ))),
        }
    }

    fn memory_maintenance(&self, args: &Value) -> Result<Value> {
        let flags = MaintenanceFlags {
            reembed: opt_bool(args, "reembed").unwrap_or(false),
            backfill_entities: opt_bool(args, "backfill_entities").unwrap_or(false),
            recalibrate: opt_bool(args, "recalibrate").unwrap_or(false),
            densify_graph: opt_bool(args, "densify_graph").unwrap_or(false),
            build_co_retrieval_links: opt_bool(args, "build_co_retrieval_links").unwrap_or(false),
            tune_weights: opt_bool(args, "tune_weights").unwrap_or(false),
        };
        Ok(serde_json::to_value(maintenance::run_maintenance(&self.store, flags)?)?)
    }

    fn memory_ingest(&self, args: &Value) -> Result<Value> {
        let content = req_str(args, "content")?;
        let title = opt_str(args, "title").unwrap_or_else(|| "document".to_string());
        let source_uri = opt_str(args, "source_uri");
        let mut tags = opt_str_vec(args, "tags");
        if !tags.contains(&"ingest".to_string()) {
            tags.push("ingest".to_string());
        }

        let mut stored = Vec::new();
        for section in split_markdown(&content, &title) {
            let result = self.store.create(CreateMemoryInput {
                content: format!("{}\n\n{}", section.title, section.body),
                content_type: ContentType::Note,
                source: Some("ingest".to_string()),
                source_uri: source_uri.clone(),
                tags: tags.clone(),
                ..Default::default()
            })?;
            stored.push(json!({
                "memory_id": result.memory.id,
                "title": section.title,
                "dedup_action": result.dedup_action,
            }));
        }
        Ok(json!({"sections": stored}))
    }

    fn memory_digest_session(&self, args: &Value) -> Result<Value> {
        let transcript = req_str(args, "transcript")?;
        let session_id = opt_str(args, "session_id");
        let digest = digest_transcript(&transcript);
        if digest.summary.is_empty() {
            return Err(ExocortexError::InvalidInput("transcript is empty".into()));
        }

        let attribution = Attribution {
            session_id: session_id.clone(),
            ..Default::default()
        };

        let summary = self.store.create(CreateMemoryInput {
            content: digest.summary.clone(),
            content_type: ContentType::Summary,
            source: Some("mcp".to_string()),
            attribution: attribution.clone(),
            tags: vec!["session-digest".to_string()],
            ..Default::default()
        })?;

        let mut fact_ids = Vec::new();
        for fact in &digest.facts {
            let result = self.store.create(CreateMemoryInput {
                content: fact.clone(),
                content_type: ContentType::Note,
                source: Some("mcp".to_string()),
                attribution: attribution.clone(),
                tags: vec!["session-fact".to_string()],
                ..Default::default()
            })?;
            fact_ids.push(result.memory.id);
        }

        Ok(json!({
            "summary_id": summary.memory.id,
            "summary": digest.summary,
            "facts": digest.facts,
            "fact_ids": fact_ids,
        }))
    }

    fn memory_ping(&self) -> Result<Value> {
        let stats = self.store.stats()?;
        let health = health_checks(&self.store)?;
        Ok(json!({
            "version": crate::VERSION,
            "status": health.status,
            "stats": stats,
        }))
    }

    fn goal_create(&self, args: &Value) -> Result<Value> {
        let input = goals::CreateGoalInput {
            title: req_str(args, "title")?,
            description: opt_str(args, "description").unwrap_or_default(),
            priority: match opt_str(args, "priority") {
                Some(s) => s.parse().map_err(ExocortexError::InvalidInput)?,
                None => Default::default(),
            },
            deadline: opt_str(args, "deadline"),
            metadata: opt_map(args, "metadata"),
            milestones: opt_str_vec(args, "milestones"),
        };
        Ok(serde_json::to_value(goals::create_goal(&self.store, input)?)?)
    }

    fn goal_update(&self, args: &Value) -> Result<Value> {
        let id = req_str(args, "id")?;
        let patch = goals::UpdateGoalInput {
            title: opt_str(args, "title"),
            description: opt_str(args, "description"),
            status: match opt_str(args, "status") {
                Some(s) => Some(s.parse().map_err(ExocortexError::InvalidInput)?),
                None => None,
            },
            priority: match opt_str(args, "priority") {
                Some(s) => Some(s.parse().map_err(ExocortexError::InvalidInput)?),
                None => None,
            },
            deadline: opt_str(args, "deadline"),
        };
        Ok(serde_json::to_value(goals::update_goal(&self.store, &id, patch)?)?)
    }
}

impl McpHandler for ExocortexHandler {
    fn handle_request(&self, request: McpRequest) -> McpResponse {
        match request.method.as_str() {
            "initialize" => McpResponse::success(
                request.id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "exocortex", "version": crate::VERSION},
                }),
            ),
            "tools/list" => {
                let tools: Vec<Value> = TOOL_DEFINITIONS
                    .iter()
                    .map(|(name, description, schema)| {
                        json!({
                            "name": name,
                            "description": description,
                            "inputSchema": serde_json::from_str::<Value>(schema)
                                .unwrap_or_else(|_| json!({"type":"object"})),
                        })
                    })
                    .collect();
                McpResponse::success(request.id, json!({"tools": tools}))
            }
            "tools/call" => {
                let tool = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let empty = json!({});
                let args = request.params.get("arguments").unwrap_or(&empty);
                match self.dispatch(tool, args) {
                    Ok(result) => McpResponse::success(
                        request.id,
                        json!({
                            "content": [{
                                "type": "text",
                                "text": serde_json::to_string_pretty(&result)
                                    .unwrap_or_else(|_| "{}".to_string()),
                            }]
                        }),
                    ),
                    Err(e) => McpResponse::from_error(request.id, e),
                }
            }
            "ping" => McpResponse::success(request.id, json!({})),
            other => {
                McpResponse::error(request.id, -32601, format!("method not found: {}", other))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Argument extraction helpers
// ---------------------------------------------------------------------------

fn req_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ExocortexError::InvalidInput(format!("missing required field: {}", key)))
}

fn req_i64(args: &Value, key: &str) -> Result<i64> {
    args.get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ExocortexError::InvalidInput(format!("missing required field: {}", key)))
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn opt_i64(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

fn opt_f64(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(|v| v.as_f64())
}

fn opt_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}

fn opt_str_vec(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn opt_str_vec_maybe(args: &Value, key: &str) -> Option<Vec<String>> {
    args.get(key).and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect()
    })
}

fn opt_map(args: &Value, key: &str) -> std::collections::HashMap<String, Value> {
    args.get(key)
        .and_then(|v| v.as_object())
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Parse an optional enum-valued string field
fn opt_enum<T: std::str::FromStr<Err = String>>(args: &Value, key: &str) -> Result<Option<T>> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(ExocortexError::InvalidInput),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> ExocortexHandler {
        ExocortexHandler::new(MemoryStore::open_in_memory().unwrap())
    }

    fn call(h: &ExocortexHandler, tool: &str, args: Value) -> McpResponse {
        h.handle_request(McpRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            method: "tools/call".into(),
            params: json!({"name": tool, "arguments": args}),
        })
    }

    #[test]
    fn test_tools_list_returns_all_definitions() {
        let h = handler();
        let response = h.handle_request(McpRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            method: "tools/list".into(),
            params: json!({}),
        });
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, TOOL_DEFINITIONS.len());
    }

    #[test]
    fn test_store_and_search_round_trip() {
        let h = handler();
        let stored = call(
            &h,
            "memory_store",
            json!({"content": "Kubernetes deploy pipeline notes", "tags": ["infra"]}),
        );
        assert!(stored.error.is_none(), "{:?}", stored.error);

        let found = call(&h, "memory_search", json!({"query": "kubernetes pipeline"}));
        assert!(found.error.is_none());
        let text = found.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("Kubernetes"));
    }

    #[test]
    fn test_missing_required_field_is_invalid_input() {
        let h = handler();
        let response = call(&h, "memory_store", json!({}));
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[test]
    fn test_unknown_enum_value_rejected() {
        let h = handler();
        let response = call(
            &h,
            "memory_store",
            json!({"content": "x", "type": "nonsense"}),
        );
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[test]
    fn test_unknown_tool_and_method() {
        let h = handler();
        let response = call(&h, "memory_explode", json!({}));
        assert!(response.error.is_some());

        let response = h.handle_request(McpRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(2)),
            method: "bogus/method".into(),
            params: json!({}),
        });
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[test]
    fn test_ping_reports_version() {
        let h = handler();
        let response = call(&h, "memory_ping", json!({}));
        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains(crate::VERSION));
    }
}
