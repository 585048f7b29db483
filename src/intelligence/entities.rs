//! Rule-based entity and relationship extraction
//!
//! Named entity recognition over a closed type vocabulary (person, project,
//! technology, organization, concept) using curated term lists, contextual
//! patterns, and a verb-prefix blocklist. Relationships come from templated
//! verb patterns matched back against the extracted entity set only.
//!
//! Extraction never panics on any input; empty input returns empty results.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument};

use crate::types::EntityType;

/// Maximum entities extracted from a single text
const MAX_ENTITIES_PER_TEXT: usize = 50;

/// An extracted entity mention
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub confidence: f32,
}

/// An extracted relationship between two entities from the same content
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    /// Normalized verb (works_at, uses, created, ...)
    pub relationship: String,
    pub confidence: f32,
    /// Trailing context phrase, when present
    pub context: Option<String>,
}

/// Known technologies, lowercase match -> canonical casing
static TECHNOLOGIES: &[(&str, &str)] = &[
    ("sqlite", "SQLite"),
    ("postgres", "Postgres"),
    ("postgresql", "PostgreSQL"),
    ("mysql", "MySQL"),
    ("redis", "Redis"),
    ("mongodb", "MongoDB"),
    ("duckdb", "DuckDB"),
    ("rust", "Rust"),
    ("python", "Python"),
    ("typescript", "TypeScript"),
    ("javascript", "JavaScript"),
    ("golang", "Go"),
    ("kotlin", "Kotlin"),
    ("swift", "Swift"),
    ("react", "React"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("nextjs", "Next.js"),
    ("next.js", "Next.js"),
    ("django", "Django"),
    ("fastapi", "FastAPI"),
    ("axum", "Axum"),
    ("tokio", "Tokio"),
    ("docker", "Docker"),
    ("kubernetes", "Kubernetes"),
    ("terraform", "Terraform"),
    ("graphql", "GraphQL"),
    ("grpc", "gRPC"),
    ("kafka", "Kafka"),
    ("claude", "Claude"),
    ("gpt-4", "GPT-4"),
    ("llama", "Llama"),
    ("linux", "Linux"),
    ("webassembly", "WebAssembly"),
    ("wasm", "WebAssembly"),
];

/// Known organizations, lowercase match -> canonical casing
static ORGANIZATIONS: &[(&str, &str)] = &[
    ("anthropic", "Anthropic"),
    ("openai", "OpenAI"),
    ("google", "Google"),
    ("microsoft", "Microsoft"),
    ("amazon", "Amazon"),
    ("meta", "Meta"),
    ("apple", "Apple"),
    ("mozilla", "Mozilla"),
    ("github", "GitHub"),
    ("gitlab", "GitLab"),
    ("cloudflare", "Cloudflare"),
    ("netflix", "Netflix"),
    ("stripe", "Stripe"),
    ("nvidia", "NVIDIA"),
];

/// Capitalized words that start sentences or phrases but never name people
static NAME_BLOCKLIST: &[&str] = &[
    "The", "This", "That", "These", "Those", "We", "Our", "They", "Their", "It", "Its", "Next",
    "Last", "First", "After", "Before", "When", "Then", "Now", "Today", "Tomorrow", "Yesterday",
    "Store", "Update", "Send", "Create", "Delete", "Add", "Remove", "Use", "Set", "Get", "Run",
    "Make", "Let", "Also", "But", "And", "With", "From", "For", "If", "In", "On", "At", "By",
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday", "January",
    "February", "March", "April", "May", "June", "July", "August", "September", "October",
    "November", "December",
];

/// First name followed by a person-context verb
static PERSON_CONTEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b([A-Z][a-z]+)\s+(?:works|worked|joined|joins|leads|led|manages|managed|said|says|met|wrote|writes|prefers|likes|thinks|created|built|designed|reviewed|suggested|mentioned)\b",
    )
    .expect("valid regex")
});

/// Two-or-more capitalized words (full names)
static FULL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").expect("valid regex"));

/// Project phrasings: "project X", "the X project/repo/service"
static PROJECT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:project\s+([A-Z][\w-]+)|(?:the\s+)?([A-Z][\w-]+)\s+(?:project|repo|repository|codebase|service|initiative))\b",
    )
    .expect("valid regex")
});

/// Concept phrasings: "<word> pattern/algorithm/architecture/..."
static CONCEPT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b([a-z][\w-]+\s+(?:pattern|algorithm|architecture|protocol|pipeline|strategy|heuristic))\b",
    )
    .expect("valid regex")
});

struct RelationTemplate {
    pattern: &'static Lazy<Regex>,
    relationship: &'static str,
}

macro_rules! relation_regex {
    ($name:ident, $verb:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| {
            Regex::new(&format!(
                r"(?i)\b([A-Za-z][\w .-]{{0,40}}?)\s+{}\s+([A-Za-z][\w.-]{{1,40}})(?:\s+(?:for|to|in|as|with|on)\s+([^.!?\n]{{1,80}}))?",
                $verb
            ))
            .expect("valid regex")
        });
    };
}

relation_regex!(REL_WORKS_AT, "works\\s+(?:at|for)");
relation_regex!(REL_USES, "uses");
relation_regex!(REL_BUILT_WITH, "(?:is\\s+)?built\\s+with");
relation_regex!(REL_CREATED, "created");
relation_regex!(REL_REPLACES, "replaces");
relation_regex!(REL_DEPENDS_ON, "depends\\s+on");
relation_regex!(REL_INTEGRATES, "integrates\\s+with");
relation_regex!(REL_MAINTAINS, "maintains");
relation_regex!(REL_MIGRATED_TO, "migrated\\s+to");

static RELATION_TEMPLATES: &[RelationTemplate] = &[
    RelationTemplate { pattern: &REL_WORKS_AT, relationship: "works_at" },
    RelationTemplate { pattern: &REL_USES, relationship: "uses" },
    RelationTemplate { pattern: &REL_BUILT_WITH, relationship: "built_with" },
    RelationTemplate { pattern: &REL_CREATED, relationship: "created" },
    RelationTemplate { pattern: &REL_REPLACES, relationship: "replaces" },
    RelationTemplate { pattern: &REL_DEPENDS_ON, relationship: "depends_on" },
    RelationTemplate { pattern: &REL_INTEGRATES, relationship: "integrates_with" },
    RelationTemplate { pattern: &REL_MAINTAINS, relationship: "maintains" },
    RelationTemplate { pattern: &REL_MIGRATED_TO, relationship: "migrated_to" },
];

/// Extract entities from text. Duplicate names keep the highest confidence.
#[instrument(skip(content), fields(content_len = content.len()))]
pub fn extract_entities(content: &str) -> Vec<ExtractedEntity> {
    let content = content.trim();
    if content.is_empty() {
        return Vec::new();
    }

    // keyed by lowercase name
    let mut found: HashMap<String, ExtractedEntity> = HashMap::new();
    let lower = content.to_lowercase();

    for &(term, canonical) in TECHNOLOGIES {
        if contains_word(&lower, term) {
            add(&mut found, canonical, EntityType::Technology, 0.9);
        }
    }

    for &(term, canonical) in ORGANIZATIONS {
        if contains_word(&lower, term) {
            add(&mut found, canonical, EntityType::Organization, 0.85);
        }
    }

    for cap in FULL_NAME.captures_iter(content) {
        if let Some(m) = cap.get(1) {
            let name = m.as_str();
            if !is_blocked_name(name) && !known_term(name) {
                add(&mut found, name, EntityType::Person, 0.75);
            }
        }
    }

    for cap in PERSON_CONTEXT.captures_iter(content) {
        if let Some(m) = cap.get(1) {
            let name = m.as_str();
            if !is_blocked_name(name) && !known_term(name) {
                add(&mut found, name, EntityType::Person, 0.7);
            }
        }
    }

    for cap in PROJECT_PATTERN.captures_iter(content) {
        let name = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str());
        if let Some(name) = name {
            if !is_blocked_name(name) && !known_term(name) {
                add(&mut found, name, EntityType::Project, 0.7);
            }
        }
    }

    for cap in CONCEPT_PATTERN.captures_iter(content) {
        if let Some(m) = cap.get(1) {
            add(&mut found, &m.as_str().to_lowercase(), EntityType::Concept, 0.6);
        }
    }

    let mut entities: Vec<ExtractedEntity> = found.into_values().collect();
    entities.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    entities.truncate(MAX_ENTITIES_PER_TEXT);

    debug!(entity_count = entities.len(), "entity extraction complete");
    entities
}

fn add(map: &mut HashMap<String, ExtractedEntity>, name: &str, t: EntityType, confidence: f32) {
    let key = name.to_lowercase();
    match map.get_mut(&key) {
        Some(existing) if existing.confidence >= confidence => {}
        Some(existing) => {
            existing.confidence = confidence;
            existing.entity_type = t;
        }
        None => {
            map.insert(
                key,
                ExtractedEntity {
                    name: name.to_string(),
                    entity_type: t,
                    confidence,
                },
            );
        }
    }
}

fn is_blocked_name(name: &str) -> bool {
    name.split_whitespace()
        .next()
        .map(|first| NAME_BLOCKLIST.iter().any(|b| *b == first))
        .unwrap_or(true)
}

fn known_term(name: &str) -> bool {
    let lower = name.to_lowercase();
    TECHNOLOGIES.iter().any(|(t, _)| *t == lower)
        || ORGANIZATIONS.iter().any(|(o, _)| *o == lower)
}

fn contains_word(haystack_lower: &str, needle_lower: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack_lower[start..].find(needle_lower) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack_lower[..abs]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let after = abs + needle_lower.len();
        let after_ok = after >= haystack_lower.len()
            || !haystack_lower[after..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        if before_ok && after_ok {
            return true;
        }
        start = abs + needle_lower.len();
    }
    false
}

/// Extract relationships whose endpoints both match the extracted entity set.
/// Self-relationships are rejected; the (source, target, relationship) triple
/// is deduplicated.
#[instrument(skip(content, entities), fields(entity_count = entities.len()))]
pub fn extract_relationships(
    content: &str,
    entities: &[ExtractedEntity],
) -> Vec<ExtractedRelationship> {
    if content.trim().is_empty() || entities.len() < 2 {
        return Vec::new();
    }

    let mut out: Vec<ExtractedRelationship> = Vec::new();

    for template in RELATION_TEMPLATES {
        for cap in template.pattern.captures_iter(content) {
            let left = cap.get(1).map(|m| m.as_str()).unwrap_or("");
            let right = cap.get(2).map(|m| m.as_str()).unwrap_or("");
            let context = cap.get(3).map(|m| m.as_str().trim().to_string());

            let source = match_endpoint(left, entities);
            let target = match_endpoint(right, entities);

            if let (Some(source), Some(target)) = (source, target) {
                if source.name.eq_ignore_ascii_case(&target.name) {
                    continue;
                }
                let dup = out.iter().any(|r| {
                    r.source.eq_ignore_ascii_case(&source.name)
                        && r.target.eq_ignore_ascii_case(&target.name)
                        && r.relationship == template.relationship
                });
                if dup {
                    continue;
                }
                out.push(ExtractedRelationship {
                    source: source.name.clone(),
                    target: target.name.clone(),
                    relationship: template.relationship.to_string(),
                    confidence: ((source.confidence + target.confidence) / 2.0).clamp(0.0, 1.0),
                    context,
                });
            }
        }
    }

    out
}

/// Match a captured phrase back to an extracted entity (containment,
/// case-insensitive; longest entity name wins)
fn match_endpoint<'a>(
    phrase: &str,
    entities: &'a [ExtractedEntity],
) -> Option<&'a ExtractedEntity> {
    let phrase_lower = phrase.to_lowercase();
    entities
        .iter()
        .filter(|e| contains_word(&phrase_lower, &e.name.to_lowercase()))
        .max_by_key(|e| e.name.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_people_orgs_and_tech() {
        let entities = extract_entities("Alice works at Anthropic on Claude.");

        let get = |name: &str| {
            entities
                .iter()
                .find(|e| e.name.eq_ignore_ascii_case(name))
                .unwrap_or_else(|| panic!("missing entity {}", name))
        };

        assert_eq!(get("Alice").entity_type, EntityType::Person);
        assert_eq!(get("Anthropic").entity_type, EntityType::Organization);
        assert_eq!(get("Claude").entity_type, EntityType::Technology);
    }

    #[test]
    fn test_works_at_relationship() {
        let content = "Alice works at Anthropic on Claude.";
        let entities = extract_entities(content);
        let rels = extract_relationships(content, &entities);

        let works_at = rels
            .iter()
            .find(|r| r.relationship == "works_at")
            .expect("works_at relationship");
        assert_eq!(works_at.source, "Alice");
        assert_eq!(works_at.target, "Anthropic");
        assert!(works_at.confidence >= 0.7);
    }

    #[test]
    fn test_uses_relationship_with_context() {
        let content = "Exocortex uses SQLite for storage.";
        let entities = extract_entities(content);
        let rels = extract_relationships(content, &entities);

        // "Exocortex" is not in any curated list, so only SQLite matches;
        // a single endpoint is not enough for a relationship
        assert!(rels.iter().all(|r| r.relationship != "uses" || r.target == "SQLite"));
    }

    #[test]
    fn test_project_uses_tech_relationship() {
        let content = "The Atlas project uses Postgres with read replicas.";
        let entities = extract_entities(content);
        assert!(entities
            .iter()
            .any(|e| e.name == "Atlas" && e.entity_type == EntityType::Project));

        let rels = extract_relationships(content, &entities);
        let uses = rels.iter().find(|r| r.relationship == "uses").unwrap();
        assert_eq!(uses.source, "Atlas");
        assert_eq!(uses.target, "Postgres");
    }

    #[test]
    fn test_blocklist_rejects_sentence_starters() {
        let entities = extract_entities("Next Monday we will deploy. The Update went fine.");
        assert!(entities
            .iter()
            .all(|e| e.entity_type != EntityType::Person || e.name != "Next Monday"));
        assert!(!entities.iter().any(|e| e.name.starts_with("The ")));
    }

    #[test]
    fn test_dedup_keeps_highest_confidence() {
        let entities = extract_entities("Rust is great. I love rust. RUST forever.");
        let rust: Vec<_> = entities
            .iter()
            .filter(|e| e.name.eq_ignore_ascii_case("rust"))
            .collect();
        assert_eq!(rust.len(), 1);
        assert!((rust[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_self_relationship_rejected() {
        let content = "Postgres replaces Postgres.";
        let entities = extract_entities(content);
        let rels = extract_relationships(content, &entities);
        assert!(rels.is_empty());
    }

    #[test]
    fn test_empty_and_garbage_input_never_panics() {
        for input in ["", "   ", "@@@@", "\0\0", "日本語 テキスト"] {
            let entities = extract_entities(input);
            let _ = extract_relationships(input, &entities);
        }
    }

    #[test]
    fn test_concept_extraction() {
        let entities = extract_entities("We adopted the saga pattern for order flows.");
        assert!(entities
            .iter()
            .any(|e| e.name == "saga pattern" && e.entity_type == EntityType::Concept));
    }
}
