//! Core types for Exocortex

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a memory (ULID string; lexicographically sortable,
/// time-ordered, globally unique)
pub type MemoryId = String;

/// Unique identifier for an entity
pub type EntityId = String;

/// Mint a fresh time-ordered identifier
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

/// A memory entry in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// Main content of the memory (after private-block stripping)
    pub content: String,
    /// Content type
    #[serde(rename = "type", default)]
    pub content_type: ContentType,
    /// Origin of the memory (manual, mcp, api, ingest, ...)
    #[serde(default = "default_source")]
    pub source: String,
    /// Optional URI of the source document
    pub source_uri: Option<String>,
    /// Attribution of the producing model/agent, if any
    #[serde(default)]
    pub attribution: Attribution,
    /// Tags for categorization (lowercase, alias-resolved)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Arbitrary metadata as JSON
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Embedding vector; never serialized (backups re-embed out of band)
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Hex digest of the normalized content
    pub content_hash: String,
    /// Whether this memory participates in the vector index
    pub is_indexed: bool,
    /// Configuration-like rather than substantive knowledge
    #[serde(default)]
    pub is_metadata: bool,
    /// Importance score (0.0 - 1.0)
    #[serde(default = "default_importance")]
    pub importance: f32,
    /// Number of times retrieved
    #[serde(default)]
    pub access_count: i64,
    /// Number of times confirmed useful after retrieval
    #[serde(default)]
    pub useful_count: i64,
    /// When the memory was last accessed
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Parent memory id; set iff this row is a chunk
    pub parent_id: Option<MemoryId>,
    /// Sort order within the parent, for chunks
    pub chunk_index: Option<i64>,
    /// Id of the memory that replaced this one
    pub superseded_by: Option<MemoryId>,
    /// Active flag; false for superseded and archived memories
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Derived keyword text feeding the lexical index
    #[serde(default)]
    pub keywords: String,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,
}

fn default_source() -> String {
    "manual".to_string()
}

fn default_importance() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

impl Memory {
    /// True when this row is a chunk split from a parent memory
    pub fn is_chunk(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Archived = inactive without a supersession pointer
    pub fn is_archived(&self) -> bool {
        !self.is_active && self.superseded_by.is_none()
    }
}

/// Content type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Note,
    Conversation,
    Summary,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Note => "note",
            ContentType::Conversation => "conversation",
            ContentType::Summary => "summary",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ContentType::Text),
            "note" => Ok(ContentType::Note),
            "conversation" => Ok(ContentType::Conversation),
            "summary" => Ok(ContentType::Summary),
            _ => Err(format!("Unknown content type: {}", s)),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribution of the producing provider/model/agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attribution {
    pub provider: Option<String>,
    pub model_id: Option<String>,
    pub model_name: Option<String>,
    pub agent: Option<String>,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl Attribution {
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
            && self.model_id.is_none()
            && self.model_name.is_none()
            && self.agent.is_none()
            && self.session_id.is_none()
            && self.conversation_id.is_none()
    }

    /// Fill unset fields from another attribution (existing values win)
    pub fn merge_missing(&mut self, other: &Attribution) {
        if self.provider.is_none() {
            self.provider = other.provider.clone();
        }
        if self.model_id.is_none() {
            self.model_id = other.model_id.clone();
        }
        if self.model_name.is_none() {
            self.model_name = other.model_name.clone();
        }
        if self.agent.is_none() {
            self.agent = other.agent.clone();
        }
        if self.session_id.is_none() {
            self.session_id = other.session_id.clone();
        }
        if self.conversation_id.is_none() {
            self.conversation_id = other.conversation_id.clone();
        }
    }
}

/// Input for creating a new memory
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateMemoryInput {
    pub content: String,
    #[serde(default, alias = "type")]
    pub content_type: ContentType,
    pub source: Option<String>,
    pub source_uri: Option<String>,
    #[serde(default)]
    pub attribution: Attribution,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub importance: Option<f32>,
    /// Explicit metadata-memory flag (also inferred from tags/keys)
    pub is_metadata: Option<bool>,
    /// Benchmark writes skip post-insert enrichment and get low importance
    #[serde(default)]
    pub benchmark: bool,
}

/// How a dedup hit was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupAction {
    /// The prior memory was deactivated and points at the new one
    Superseded,
    /// The insert was skipped; the prior memory was touched instead
    Skipped,
}

/// Result of the write pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemoryResult {
    pub memory: Memory,
    /// Set when the write resolved as a duplicate
    pub dedup_action: Option<DedupAction>,
    /// Id of the memory that was superseded, if any
    pub superseded_id: Option<MemoryId>,
    /// Similarity that triggered dedup (1.0 for hash matches)
    pub dedup_similarity: Option<f32>,
}

/// Input for updating a memory
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateMemoryInput {
    pub content: Option<String>,
    #[serde(alias = "type")]
    pub content_type: Option<ContentType>,
    /// Full replacement tag set
    pub tags: Option<Vec<String>>,
    /// Merged into existing metadata; a null value deletes the key
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub importance: Option<f32>,
    pub is_metadata: Option<bool>,
}

/// Options for hybrid search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: Option<i64>,
    /// Any-match tag filter (alias-normalized before use)
    pub tags: Option<Vec<String>>,
    /// Date-prefix lower bound on created_at (e.g. "2026-01")
    pub after: Option<String>,
    /// Date-prefix upper bound on created_at
    pub before: Option<String>,
    #[serde(alias = "type")]
    pub content_type: Option<ContentType>,
    pub min_score: Option<f32>,
    pub min_importance: Option<f32>,
    /// Include superseded memories in candidates
    #[serde(default)]
    pub include_superseded: bool,
}

/// Search result with per-signal score breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory: Memory,
    /// Fused score
    pub score: f32,
    pub vector_score: f32,
    pub fts_score: f32,
    pub recency_score: f32,
    pub frequency_score: f32,
}

/// A memory reached by one-hop link expansion from a search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedResult {
    pub memory: Memory,
    /// Primary-result memory this one is linked from
    pub linked_from: MemoryId,
    pub link_type: LinkType,
    pub strength: f32,
}

/// Full search response: ranked primaries plus the link-expansion annex
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub linked: Vec<LinkedResult>,
}

/// Options for browsing memories without a query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowseOptions {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub tags: Option<Vec<String>>,
    #[serde(alias = "type")]
    pub content_type: Option<ContentType>,
    pub after: Option<String>,
    pub before: Option<String>,
    /// Include archived/superseded rows
    #[serde(default)]
    pub include_inactive: bool,
}

/// Typed edge between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLink {
    pub source_memory_id: MemoryId,
    pub target_memory_id: MemoryId,
    pub link_type: LinkType,
    pub strength: f32,
    pub created_at: DateTime<Utc>,
}

/// Types of memory-to-memory links
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    #[default]
    Related,
    Elaborates,
    Contradicts,
    Supersedes,
    Supports,
    DerivedFrom,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Related => "related",
            LinkType::Elaborates => "elaborates",
            LinkType::Contradicts => "contradicts",
            LinkType::Supersedes => "supersedes",
            LinkType::Supports => "supports",
            LinkType::DerivedFrom => "derived_from",
        }
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "related" | "related_to" => Ok(LinkType::Related),
            "elaborates" => Ok(LinkType::Elaborates),
            "contradicts" => Ok(LinkType::Contradicts),
            "supersedes" => Ok(LinkType::Supersedes),
            "supports" => Ok(LinkType::Supports),
            "derived_from" => Ok(LinkType::DerivedFrom),
            _ => Err(format!("Unknown link type: {}", s)),
        }
    }
}

/// An extracted entity (person, project, technology, organization, concept)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Canonical name; unique case-insensitively
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed entity type vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Project,
    Technology,
    Organization,
    #[default]
    Concept,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Project => "project",
            EntityType::Technology => "technology",
            EntityType::Organization => "organization",
            EntityType::Concept => "concept",
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" => Ok(EntityType::Person),
            "project" => Ok(EntityType::Project),
            "technology" => Ok(EntityType::Technology),
            "organization" => Ok(EntityType::Organization),
            "concept" => Ok(EntityType::Concept),
            _ => Err(format!("Unknown entity type: {}", s)),
        }
    }
}

/// Association between a memory and an entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityLink {
    pub memory_id: MemoryId,
    pub entity_id: EntityId,
    /// Relevance of the entity to the memory (0.0 - 1.0)
    pub relevance: f32,
}

/// Directed, typed edge between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub id: String,
    pub source_entity_id: EntityId,
    pub target_entity_id: EntityId,
    /// Normalized relationship verb (works_at, uses, created, ...)
    pub relationship: String,
    pub confidence: f32,
    /// Memory the relationship was extracted from
    pub memory_id: Option<MemoryId>,
    /// Trailing context phrase ("for the metrics store")
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A recorded contradiction between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: String,
    pub memory_id_a: MemoryId,
    pub memory_id_b: MemoryId,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// A goal with milestones and auto-linked progress memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: GoalStatus,
    #[serde(default)]
    pub priority: GoalPriority,
    pub deadline: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Active,
    Completed,
    Stalled,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Completed => "completed",
            GoalStatus::Stalled => "stalled",
            GoalStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for GoalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(GoalStatus::Active),
            "completed" => Ok(GoalStatus::Completed),
            "stalled" => Ok(GoalStatus::Stalled),
            "abandoned" => Ok(GoalStatus::Abandoned),
            _ => Err(format!("Unknown goal status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GoalPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl GoalPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalPriority::Low => "low",
            GoalPriority::Medium => "medium",
            GoalPriority::High => "high",
            GoalPriority::Critical => "critical",
        }
    }
}

impl std::str::FromStr for GoalPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(GoalPriority::Low),
            "medium" => Ok(GoalPriority::Medium),
            "high" => Ok(GoalPriority::High),
            "critical" => Ok(GoalPriority::Critical),
            _ => Err(format!("Unknown goal priority: {}", s)),
        }
    }
}

/// An ordered milestone within a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub position: i64,
    pub title: String,
    #[serde(default)]
    pub status: MilestoneStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::InProgress => "in_progress",
            MilestoneStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for MilestoneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(MilestoneStatus::Pending),
            "in_progress" => Ok(MilestoneStatus::InProgress),
            "completed" => Ok(MilestoneStatus::Completed),
            _ => Err(format!("Unknown milestone status: {}", s)),
        }
    }
}

/// Statistics about the memory store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_memories: i64,
    pub active_memories: i64,
    pub chunk_memories: i64,
    pub superseded_memories: i64,
    pub archived_memories: i64,
    pub memories_with_embeddings: i64,
    pub total_tags: i64,
    pub total_entities: i64,
    pub total_relationships: i64,
    pub total_links: i64,
    pub total_goals: i64,
    pub db_size_bytes: i64,
    pub type_counts: HashMap<String, i64>,
}

/// Timeline query modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineMode {
    /// Decision-tagged memories, newest first
    Decisions,
    /// Supersession chain around one memory
    Lineage,
    /// Per-day creation counts
    Evolution,
}

impl std::str::FromStr for TimelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "decisions" => Ok(TimelineMode::Decisions),
            "lineage" => Ok(TimelineMode::Lineage),
            "evolution" => Ok(TimelineMode::Evolution),
            _ => Err(format!("Unknown timeline mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_ids_sort_by_creation_time() {
        let a = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id();
        assert!(a < b, "ULIDs should be lexicographically time-ordered");
        assert_eq!(a.len(), 26);
    }

    #[test]
    fn test_content_type_round_trip() {
        for ct in [
            ContentType::Text,
            ContentType::Note,
            ContentType::Conversation,
            ContentType::Summary,
        ] {
            assert_eq!(ContentType::from_str(ct.as_str()).unwrap(), ct);
        }
        assert!(ContentType::from_str("bogus").is_err());
    }

    #[test]
    fn test_link_type_accepts_legacy_alias() {
        assert_eq!(LinkType::from_str("related_to").unwrap(), LinkType::Related);
        assert_eq!(
            LinkType::from_str("derived_from").unwrap(),
            LinkType::DerivedFrom
        );
    }

    #[test]
    fn test_attribution_merge_missing() {
        let mut a = Attribution {
            provider: Some("anthropic".into()),
            ..Default::default()
        };
        let b = Attribution {
            provider: Some("other".into()),
            agent: Some("assistant".into()),
            ..Default::default()
        };
        a.merge_missing(&b);
        assert_eq!(a.provider.as_deref(), Some("anthropic"));
        assert_eq!(a.agent.as_deref(), Some("assistant"));
    }

    #[test]
    fn test_memory_state_helpers() {
        let m = Memory {
            id: new_id(),
            content: "x".into(),
            content_type: ContentType::Text,
            source: "manual".into(),
            source_uri: None,
            attribution: Attribution::default(),
            tags: vec![],
            metadata: HashMap::new(),
            embedding: None,
            content_hash: "h".into(),
            is_indexed: true,
            is_metadata: false,
            importance: 0.5,
            access_count: 0,
            useful_count: 0,
            last_accessed_at: None,
            parent_id: None,
            chunk_index: None,
            superseded_by: None,
            is_active: false,
            keywords: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(m.is_archived());
        assert!(!m.is_chunk());
    }
}
