//! Automatic tag suggestion from content
//!
//! Combines pattern tables (topic keywords), technology keywords, and
//! structural cues. Suggestions are deduplicated by tag keeping the highest
//! confidence, sorted, and capped.

use std::collections::{HashMap, HashSet};

/// Configuration for auto-tagging
#[derive(Debug, Clone)]
pub struct AutoTagConfig {
    /// Minimum confidence to suggest a tag
    pub min_confidence: f32,
    /// Maximum number of tags to suggest
    pub max_tags: usize,
}

impl Default for AutoTagConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_tags: 5,
        }
    }
}

/// A suggested tag with confidence
#[derive(Debug, Clone)]
pub struct TagSuggestion {
    pub tag: String,
    pub confidence: f32,
}

struct TagPattern {
    keywords: &'static [&'static str],
    tag: &'static str,
    confidence: f32,
}

static PATTERNS: &[TagPattern] = &[
    TagPattern {
        keywords: &["bug", "fix", "issue", "error", "crash"],
        tag: "bug",
        confidence: 0.85,
    },
    TagPattern {
        keywords: &["decided", "decision", "agreed", "consensus", "we will use"],
        tag: "decision",
        confidence: 0.9,
    },
    TagPattern {
        keywords: &["learned", "til", "insight", "realized"],
        tag: "learning",
        confidence: 0.85,
    },
    TagPattern {
        keywords: &["meeting", "standup", "sync", "retro"],
        tag: "meeting",
        confidence: 0.8,
    },
    TagPattern {
        keywords: &["database", "sql", "query", "migration", "schema"],
        tag: "database",
        confidence: 0.8,
    },
    TagPattern {
        keywords: &["security", "auth", "authentication", "permission", "vulnerability"],
        tag: "security",
        confidence: 0.85,
    },
    TagPattern {
        keywords: &["api", "endpoint", "rest", "graphql"],
        tag: "api",
        confidence: 0.8,
    },
    TagPattern {
        keywords: &["performance", "optimization", "benchmark", "latency", "slow"],
        tag: "performance",
        confidence: 0.8,
    },
    TagPattern {
        keywords: &["config", "configuration", "settings", "environment variable"],
        tag: "config",
        confidence: 0.75,
    },
    TagPattern {
        keywords: &["architecture", "design", "refactor", "structure"],
        tag: "architecture",
        confidence: 0.75,
    },
    TagPattern {
        keywords: &["test", "testing", "unit test", "integration test", "coverage"],
        tag: "testing",
        confidence: 0.8,
    },
    TagPattern {
        keywords: &["deploy", "deployment", "release", "rollout", "production"],
        tag: "deployment",
        confidence: 0.8,
    },
    TagPattern {
        keywords: &["documentation", "docs", "readme", "guide"],
        tag: "documentation",
        confidence: 0.8,
    },
    TagPattern {
        keywords: &["goal", "milestone", "objective", "deadline"],
        tag: "planning",
        confidence: 0.75,
    },
];

/// Technology keywords that become their own tags
static TECH_TAGS: &[&str] = &[
    "rust",
    "python",
    "typescript",
    "javascript",
    "react",
    "postgres",
    "sqlite",
    "redis",
    "docker",
    "kubernetes",
    "terraform",
    "linux",
    "kafka",
    "graphql",
];

/// Suggest tags for content, excluding ones already present
pub fn suggest_tags(
    content: &str,
    existing_tags: &[String],
    config: &AutoTagConfig,
) -> Vec<TagSuggestion> {
    let content_lower = content.to_lowercase();
    let existing: HashSet<String> = existing_tags.iter().map(|t| t.to_lowercase()).collect();
    let mut suggestions: Vec<TagSuggestion> = Vec::new();

    for pattern in PATTERNS {
        let matches = pattern
            .keywords
            .iter()
            .filter(|kw| content_lower.contains(*kw))
            .count();
        if matches > 0 && !existing.contains(pattern.tag) {
            // More keyword hits raise confidence toward the pattern base
            let confidence =
                pattern.confidence * (0.7 + 0.3 * (matches as f32 / pattern.keywords.len() as f32));
            suggestions.push(TagSuggestion {
                tag: pattern.tag.to_string(),
                confidence,
            });
        }
    }

    for &tech in TECH_TAGS {
        if contains_word(&content_lower, tech) && !existing.contains(tech) {
            suggestions.push(TagSuggestion {
                tag: tech.to_string(),
                confidence: 0.75,
            });
        }
    }

    // Structural cues
    if content.contains("```") && !existing.contains("has-code") {
        suggestions.push(TagSuggestion {
            tag: "has-code".to_string(),
            confidence: 0.9,
        });
    }
    if (content.contains("http://") || content.contains("https://"))
        && !existing.contains("has-links")
    {
        suggestions.push(TagSuggestion {
            tag: "has-links".to_string(),
            confidence: 0.85,
        });
    }

    // Dedup keeping the best confidence
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut deduped: Vec<TagSuggestion> = Vec::new();
    for s in suggestions {
        match seen.get(&s.tag) {
            Some(&idx) if deduped[idx].confidence >= s.confidence => {}
            Some(&idx) => deduped[idx] = s,
            None => {
                seen.insert(s.tag.clone(), deduped.len());
                deduped.push(s);
            }
        }
    }

    deduped.retain(|s| s.confidence >= config.min_confidence);
    deduped.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.tag.cmp(&b.tag))
    });
    deduped.truncate(config.max_tags);
    deduped
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_and_database_content() {
        let tags = suggest_tags(
            "We decided to use Postgres for the metrics database.",
            &[],
            &AutoTagConfig::default(),
        );
        let names: Vec<&str> = tags.iter().map(|t| t.tag.as_str()).collect();
        assert!(names.contains(&"decision"));
        assert!(names.contains(&"database"));
        assert!(names.contains(&"postgres"));
    }

    #[test]
    fn test_existing_tags_not_resuggested() {
        let tags = suggest_tags(
            "We decided to adopt Rust.",
            &["decision".to_string()],
            &AutoTagConfig::default(),
        );
        assert!(tags.iter().all(|t| t.tag != "decision"));
        assert!(tags.iter().any(|t| t.tag == "rust"));
    }

    #[test]
    fn test_structural_cues() {
        let tags = suggest_tags(
            "See https://docs.rs and the snippet:\n```rust\nfn main() {}\n```",
            &[],
            &AutoTagConfig::default(),
        );
        let names: Vec<&str> = tags.iter().map(|t| t.tag.as_str()).collect();
        assert!(names.contains(&"has-code"));
        assert!(names.contains(&"has-links"));
    }

    #[test]
    fn test_max_tags_cap() {
        let config = AutoTagConfig {
            max_tags: 2,
            ..Default::default()
        };
        let tags = suggest_tags(
            "We decided to fix the auth bug, deploy to production, and benchmark the database with Postgres on Docker.",
            &[],
            &config,
        );
        assert!(tags.len() <= 2);
    }

    #[test]
    fn test_sorted_by_confidence() {
        let tags = suggest_tags(
            "We decided to fix the slow query bug in the database.",
            &[],
            &AutoTagConfig::default(),
        );
        for pair in tags.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn test_word_boundary_on_tech_tags() {
        // "crusty" must not yield "rust"
        let tags = suggest_tags("A crusty baguette recipe", &[], &AutoTagConfig::default());
        assert!(tags.iter().all(|t| t.tag != "rust"));
    }
}
