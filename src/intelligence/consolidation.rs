//! Cluster detection and summary construction for memory consolidation
//!
//! Clusters are pairwise-complete: every member is within the similarity
//! threshold of every other member. Summaries are deterministic (no LLM):
//! the first sentence of the earliest member followed by a bullet per member.

use crate::embedding::cosine_similarity;
use crate::types::Memory;

/// A detected cluster of semantically similar memories
#[derive(Debug, Clone, serde::Serialize)]
pub struct Cluster {
    pub member_ids: Vec<String>,
    /// Mean pairwise similarity across members
    pub mean_similarity: f32,
}

/// Find clusters among the given memories where pairwise cosine similarity
/// meets `min_similarity` and cluster size reaches `min_size`.
///
/// Greedy seed expansion over creation order; memories without embeddings
/// never cluster.
pub fn find_clusters(memories: &[Memory], min_similarity: f32, min_size: usize) -> Vec<Cluster> {
    let min_size = min_size.max(2);
    let mut assigned = vec![false; memories.len()];
    let mut clusters = Vec::new();

    for seed in 0..memories.len() {
        if assigned[seed] || memories[seed].embedding.is_none() {
            continue;
        }

        let mut members = vec![seed];
        for candidate in (seed + 1)..memories.len() {
            if assigned[candidate] || memories[candidate].embedding.is_none() {
                continue;
            }
            let fits = members.iter().all(|&m| {
                similarity(&memories[m], &memories[candidate]) >= min_similarity
            });
            if fits {
                members.push(candidate);
            }
        }

        if members.len() >= min_size {
            let mut total = 0.0;
            let mut pairs = 0;
            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    total += similarity(&memories[members[i]], &memories[members[j]]);
                    pairs += 1;
                }
            }
            for &m in &members {
                assigned[m] = true;
            }
            clusters.push(Cluster {
                member_ids: members.iter().map(|&m| memories[m].id.clone()).collect(),
                mean_similarity: if pairs > 0 { total / pairs as f32 } else { 1.0 },
            });
        }
    }

    clusters.sort_by(|a, b| b.member_ids.len().cmp(&a.member_ids.len()));
    clusters
}

fn similarity(a: &Memory, b: &Memory) -> f32 {
    match (&a.embedding, &b.embedding) {
        (Some(ea), Some(eb)) => cosine_similarity(ea, eb),
        _ => 0.0,
    }
}

/// Build the deterministic summary content and the union tag set for a
/// cluster. Members are expected in creation order.
pub fn build_summary(members: &[&Memory]) -> (String, Vec<String>) {
    let lead = members
        .first()
        .map(|m| first_sentence(&m.content))
        .unwrap_or_default();

    let mut content = String::new();
    content.push_str(&lead);
    content.push_str("\n\n");
    for member in members {
        content.push_str("- ");
        content.push_str(&clip(&member.content, 120));
        content.push('\n');
    }

    let mut tags: Vec<String> = Vec::new();
    for member in members {
        for tag in &member.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }

    (content.trim_end().to_string(), tags)
}

fn first_sentence(text: &str) -> String {
    let text = text.trim();
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            return text[..=i].to_string();
        }
        if c == '\n' {
            return text[..i].trim_end().to_string();
        }
    }
    clip(text, 160)
}

fn clip(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let end = flat
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(flat.len());
    format!("{}...", flat[..end].trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_id, Attribution, ContentType};
    use chrono::Utc;
    use std::collections::HashMap;

    fn memory(content: &str, embedding: Option<Vec<f32>>, tags: &[&str]) -> Memory {
        Memory {
            id: new_id(),
            content: content.to_string(),
            content_type: ContentType::Text,
            source: "manual".into(),
            source_uri: None,
            attribution: Attribution::default(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            metadata: HashMap::new(),
            embedding,
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

    #[test]
    fn test_clusters_require_pairwise_similarity() {
        let a = memory("a", Some(vec![1.0, 0.0]), &["x"]);
        let b = memory("b", Some(vec![0.99, 0.1]), &["y"]);
        let c = memory("c", Some(vec![0.0, 1.0]), &[]);

        let clusters = find_clusters(&[a, b, c], 0.75, 2);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids.len(), 2);
        assert!(clusters[0].mean_similarity > 0.75);
    }

    #[test]
    fn test_min_size_filters_small_groups() {
        let a = memory("a", Some(vec![1.0, 0.0]), &[]);
        let b = memory("b", Some(vec![0.99, 0.1]), &[]);

        let clusters = find_clusters(&[a, b], 0.75, 3);
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_unembedded_memories_never_cluster() {
        let a = memory("a", None, &[]);
        let b = memory("b", None, &[]);
        let c = memory("c", None, &[]);
        assert!(find_clusters(&[a, b, c], 0.1, 2).is_empty());
    }

    #[test]
    fn test_summary_shape_and_tag_union() {
        let a = memory("First insight about caching. More detail.", None, &["cache"]);
        let b = memory("Second insight about caching layers.", None, &["cache", "infra"]);
        let (content, tags) = build_summary(&[&a, &b]);

        assert!(content.starts_with("First insight about caching."));
        assert_eq!(content.matches("- ").count(), 2);
        assert_eq!(tags, vec!["cache".to_string(), "infra".to_string()]);
    }

    #[test]
    fn test_summary_is_deterministic() {
        let a = memory("Alpha beta gamma.", None, &[]);
        let b = memory("Delta epsilon.", None, &[]);
        let one = build_summary(&[&a, &b]);
        let two = build_summary(&[&a, &b]);
        assert_eq!(one, two);
    }
}
