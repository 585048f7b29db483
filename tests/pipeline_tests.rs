//! End-to-end write-pipeline scenarios: dedup, supersession, chunking,
//! entity extraction, and recalibration

use std::sync::Arc;

use exocortex::embedding::{Embedder, HashingEmbedder};
use exocortex::error::{ExocortexError, Result};
use exocortex::maintenance;
use exocortex::storage::Storage;
use exocortex::types::{ContentType, CreateMemoryInput, DedupAction, UpdateMemoryInput};
use exocortex::MemoryStore;

fn store() -> MemoryStore {
    MemoryStore::with_embedder(
        Storage::open_in_memory().unwrap(),
        Arc::new(HashingEmbedder::new(384)),
    )
}

/// Oracle that maps every text mentioning both "postgres" and "metrics" to
/// the same unit vector, so semantic-dedup assertions are exact
struct KeyedEmbedder {
    inner: HashingEmbedder,
}

impl Embedder for KeyedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        if lower.contains("postgres") && lower.contains("metrics") {
            let mut v = vec![0.0; 384];
            v[0] = 1.0;
            return Ok(v);
        }
        self.inner.embed(text)
    }

    fn dimensions(&self) -> usize {
        384
    }

    fn model_name(&self) -> &str {
        "keyed-test"
    }
}

fn keyed_store() -> MemoryStore {
    MemoryStore::with_embedder(
        Storage::open_in_memory().unwrap(),
        Arc::new(KeyedEmbedder {
            inner: HashingEmbedder::new(384),
        }),
    )
}

fn counter(store: &MemoryStore, key: &str) -> i64 {
    store
        .counters()
        .unwrap()
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
        .unwrap_or(0)
}

#[test]
fn dedup_via_hash_merges_tags_and_counts() {
    let s = store();

    let first = s
        .create(CreateMemoryInput {
            content: "Exocortex uses SQLite for storage.".into(),
            tags: vec!["storage".into()],
            ..Default::default()
        })
        .unwrap();
    assert!(first.dedup_action.is_none());

    let second = s
        .create(CreateMemoryInput {
            content: "Exocortex uses SQLite for storage.".into(),
            tags: vec!["infra".into()],
            ..Default::default()
        })
        .unwrap();

    assert_eq!(second.dedup_action, Some(DedupAction::Skipped));
    assert_eq!(second.dedup_similarity, Some(1.0));
    assert_eq!(second.memory.id, first.memory.id);

    let merged = s.get(&first.memory.id).unwrap().unwrap();
    assert!(merged.tags.contains(&"storage".to_string()));
    assert!(merged.tags.contains(&"infra".to_string()));
    assert!(merged.is_active);

    // Exactly one active memory exists for the content
    let stats = s.stats().unwrap();
    assert_eq!(stats.active_memories, 1);
    assert_eq!(counter(&s, "memory.dedup_skipped.hash"), 1);
    assert_eq!(counter(&s, "memory.dedup_skipped"), 1);
}

#[test]
fn semantic_supersession_deactivates_the_older_memory() {
    let s = keyed_store();
    s.set_setting("dedup.skip_insert_on_match", "false").unwrap();

    let first = s
        .create(CreateMemoryInput {
            content: "Next sprint we will use Postgres for the metrics store.".into(),
            ..Default::default()
        })
        .unwrap();

    let second = s
        .create(CreateMemoryInput {
            content: "We decided to adopt Postgres as the metrics backend going forward.".into(),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(second.dedup_action, Some(DedupAction::Superseded));
    assert_eq!(second.superseded_id.as_deref(), Some(first.memory.id.as_str()));
    assert!(second.dedup_similarity.unwrap() >= 0.85);

    let old = s.get(&first.memory.id).unwrap().unwrap();
    assert!(!old.is_active);
    assert_eq!(old.superseded_by.as_deref(), Some(second.memory.id.as_str()));
    assert_eq!(counter(&s, "memory.dedup_superseded.semantic"), 1);
}

#[test]
fn chunking_round_trip_returns_parent_from_chunk_hit() {
    let s = store();

    let filler = |topic: &str| {
        format!(
            "{} paragraph with plenty of prose about routine operational matters, \
             written to pad this section toward the chunking threshold with more \
             ordinary but grammatical sentences about daily engineering work. \
             It keeps going for a while so the splitter has material.",
            topic
        )
    };
    let mut doc = String::new();
    for topic in [
        "Opening", "Background", "Zephyr turbine calibration", "Methodology", "Evaluation",
        "Discussion", "Limitations", "Appendix", "Closing",
    ] {
        doc.push_str(&filler(topic));
        doc.push_str("\n\n");
    }
    assert!(doc.len() > 1600, "doc must exceed the chunking threshold");

    let created = s
        .create(CreateMemoryInput {
            content: doc.trim().to_string(),
            ..Default::default()
        })
        .unwrap();

    // Parent carries no embedding; chunks carry their own
    let parent = s.get(&created.memory.id).unwrap().unwrap();
    assert!(parent.embedding.is_none());
    assert!(parent.parent_id.is_none());

    let children: Vec<_> = s
        .storage()
        .with_connection(|conn| exocortex::storage::queries::get_children(conn, &parent.id))
        .unwrap();
    assert!(children.len() >= 3, "expected >= 3 chunks, got {}", children.len());
    for (i, child) in children.iter().enumerate() {
        assert_eq!(child.chunk_index, Some(i as i64));
        assert!(child.embedding.is_some());
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child.tags, parent.tags);
    }

    // Chunks concatenated reconstruct the content modulo whitespace
    let rejoined: String = children
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let norm = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    assert_eq!(norm(&rejoined), norm(&parent.content));

    // A phrase distinctive to one chunk surfaces the parent as top result
    let response = s
        .search("zephyr turbine calibration", &Default::default())
        .unwrap();
    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].memory.id, parent.id);
    assert!(response.results[0].vector_score > 0.0);
}

#[test]
fn update_dechunks_when_content_shrinks() {
    let s = store();
    let long = "A sentence of filler content for the chunking machinery. ".repeat(40);
    let created = s
        .create(CreateMemoryInput {
            content: long.trim().to_string(),
            ..Default::default()
        })
        .unwrap();

    let children = s
        .storage()
        .with_connection(|conn| {
            exocortex::storage::queries::get_children(conn, &created.memory.id)
        })
        .unwrap();
    assert!(!children.is_empty());

    let updated = s
        .update(
            &created.memory.id,
            UpdateMemoryInput {
                content: Some("Now just a short note.".into()),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(updated.embedding.is_some(), "dechunked parent gets its own embedding");
    let children_after = s
        .storage()
        .with_connection(|conn| {
            exocortex::storage::queries::get_children(conn, &created.memory.id)
        })
        .unwrap();
    assert!(children_after.is_empty());
}

#[test]
fn update_preserves_inbound_supersession_across_rechunk() {
    let s = store();
    // a is superseded by b; b then grows past the chunking threshold
    let a = s
        .create(CreateMemoryInput {
            content: "Original phrasing of the policy.".into(),
            ..Default::default()
        })
        .unwrap();
    let b = s
        .create(CreateMemoryInput {
            content: "Replacement phrasing of the policy.".into(),
            ..Default::default()
        })
        .unwrap();
    s.storage()
        .with_transaction(|conn| {
            exocortex::storage::queries::mark_superseded(conn, &a.memory.id, &b.memory.id)?;
            Ok(())
        })
        .unwrap();

    let long = "The policy now spells out each clause in exhausting detail. ".repeat(40);
    s.update(
        &b.memory.id,
        UpdateMemoryInput {
            content: Some(long.trim().to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    // The supersession pointer still resolves to the (now chunked) parent
    let old = s.get(&a.memory.id).unwrap().unwrap();
    assert_eq!(old.superseded_by.as_deref(), Some(b.memory.id.as_str()));
    assert!(s.get(&b.memory.id).unwrap().is_some());
}

#[test]
fn private_only_content_is_invalid_input() {
    let s = store();
    let result = s.create(CreateMemoryInput {
        content: "<private>all of this is secret</private>".into(),
        ..Default::default()
    });
    assert!(matches!(result, Err(ExocortexError::InvalidInput(_))));
}

#[test]
fn private_blocks_never_reach_storage_or_index() {
    let s = store();
    let created = s
        .create(CreateMemoryInput {
            content: "Public fact. <private>secret token xyzzy</private> More public text.".into(),
            ..Default::default()
        })
        .unwrap();

    assert!(!created.memory.content.contains("xyzzy"));

    let response = s.search("xyzzy", &Default::default()).unwrap();
    assert!(response.results.is_empty());
}

#[test]
fn short_content_skips_semantic_dedup_but_not_hash() {
    let s = keyed_store();
    s.set_setting("dedup.skip_insert_on_match", "false").unwrap();

    // Both map to the identical keyed vector but sit under 50 chars
    let a = s
        .create(CreateMemoryInput {
            content: "Postgres metrics v1".into(),
            ..Default::default()
        })
        .unwrap();
    let b = s
        .create(CreateMemoryInput {
            content: "Postgres metrics v2".into(),
            ..Default::default()
        })
        .unwrap();
    assert!(b.dedup_action.is_none());
    assert!(s.get(&a.memory.id).unwrap().unwrap().is_active);
    assert!(s.get(&b.memory.id).unwrap().unwrap().is_active);

    // Hash dedup still applies at any length
    let c = s
        .create(CreateMemoryInput {
            content: "Postgres metrics v1".into(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(c.dedup_action, Some(DedupAction::Superseded));
}

#[test]
fn dedup_disabled_surfaces_conflict_until_index_dropped() {
    let s = store();
    s.set_setting("dedup.enabled", "false").unwrap();

    s.create(CreateMemoryInput {
        content: "identical content".into(),
        ..Default::default()
    })
    .unwrap();

    // The hash-unique index still rejects
    let rejected = s.create(CreateMemoryInput {
        content: "identical content".into(),
        ..Default::default()
    });
    assert!(matches!(rejected, Err(ExocortexError::Conflict(_))));

    // Dropping hash dedup drops the index; duplicates become storable
    s.set_setting("dedup.hash_enabled", "false").unwrap();
    let dup = s
        .create(CreateMemoryInput {
            content: "identical content".into(),
            ..Default::default()
        })
        .unwrap();
    assert!(dup.dedup_action.is_none());
    assert_eq!(s.stats().unwrap().active_memories, 2);
}

#[test]
fn entity_extraction_links_and_relationship() {
    let s = store();
    let created = s
        .create(CreateMemoryInput {
            content: "Alice works at Anthropic on Claude.".into(),
            ..Default::default()
        })
        .unwrap();

    let linked = s
        .storage()
        .with_connection(|conn| {
            exocortex::storage::entity_queries::entities_for_memory(conn, &created.memory.id)
        })
        .unwrap();
    let names: Vec<String> = linked.iter().map(|(e, _)| e.name.clone()).collect();
    assert!(names.iter().any(|n| n == "Alice"));
    assert!(names.iter().any(|n| n == "Anthropic"));
    assert!(names.iter().any(|n| n == "Claude"));

    let types: Vec<(String, String)> = linked
        .iter()
        .map(|(e, _)| (e.name.clone(), e.entity_type.as_str().to_string()))
        .collect();
    assert!(types.contains(&("Alice".into(), "person".into())));
    assert!(types.contains(&("Anthropic".into(), "organization".into())));
    assert!(types.contains(&("Claude".into(), "technology".into())));

    let rels = s
        .storage()
        .with_connection(exocortex::storage::entity_queries::all_relationships)
        .unwrap();
    let works_at = rels
        .iter()
        .find(|r| r.relationship == "works_at")
        .expect("works_at relationship persisted");
    assert!(works_at.confidence >= 0.7);
    assert_eq!(works_at.memory_id.as_deref(), Some(created.memory.id.as_str()));
}

#[test]
fn recalibration_targets_normal_distribution() {
    let s = store();
    for i in 0..100 {
        // Deterministic spread standing in for uniform random importance
        let importance = (i * 37 % 101) as f32 / 100.0;
        s.create(CreateMemoryInput {
            content: format!("seed memory number {} with importance {}", i, importance),
            importance: Some(importance),
            ..Default::default()
        })
        .unwrap();
    }

    let before: Vec<(String, f32)> = s
        .browse(&exocortex::types::BrowseOptions {
            limit: Some(200),
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|m| (m.id, m.importance))
        .collect();

    let report = maintenance::recalibrate_importance(&s).unwrap();
    assert_eq!(report.count, 100);
    assert!((report.mean_after - 0.5).abs() < 0.02, "mean {}", report.mean_after);
    assert!((report.stddev_after - 0.15).abs() < 0.02, "stddev {}", report.stddev_after);

    let after: Vec<(String, f32)> = s
        .browse(&exocortex::types::BrowseOptions {
            limit: Some(200),
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|m| (m.id, m.importance))
        .collect();

    for (_, importance) in &after {
        assert!((0.0..=1.0).contains(importance));
    }

    // Relative ordering is preserved
    let mut pairs: Vec<(f32, f32)> = before
        .iter()
        .map(|(id, b)| {
            let a = after.iter().find(|(aid, _)| aid == id).unwrap().1;
            (*b, a)
        })
        .collect();
    pairs.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap());
    for w in pairs.windows(2) {
        if w[0].0 < w[1].0 {
            assert!(w[0].1 <= w[1].1, "ordering broken: {:?} vs {:?}", w[0], w[1]);
        }
    }
}

#[test]
fn benchmark_writes_skip_enrichment() {
    let s = store();
    let created = s
        .create(CreateMemoryInput {
            content: "Alice works at Anthropic on benchmark day.".into(),
            benchmark: true,
            ..Default::default()
        })
        .unwrap();

    let m = &created.memory;
    assert!((m.importance - 0.15).abs() < 1e-6);
    assert!(m.tags.contains(&"benchmark-artifact".to_string()));
    assert!(m.is_metadata);
    assert!(!m.is_indexed);
    assert!(m.embedding.is_none());

    // No post-insert extraction ran
    let linked = s
        .storage()
        .with_connection(|conn| {
            exocortex::storage::entity_queries::entities_for_memory(conn, &m.id)
        })
        .unwrap();
    assert!(linked.is_empty());
    assert_eq!(counter(&s, "memory.benchmark_writes"), 1);
}

#[test]
fn oracle_failure_stores_memory_without_embedding() {
    struct FailingEmbedder;
    impl Embedder for FailingEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(ExocortexError::Oracle("model offline".into()))
        }
        fn dimensions(&self) -> usize {
            384
        }
        fn model_name(&self) -> &str {
            "failing"
        }
    }

    let s = MemoryStore::with_embedder(Storage::open_in_memory().unwrap(), Arc::new(FailingEmbedder));
    let created = s
        .create(CreateMemoryInput {
            content: "Stored despite the oracle being down.".into(),
            ..Default::default()
        })
        .unwrap();

    let m = s.get(&created.memory.id).unwrap().unwrap();
    assert!(m.embedding.is_none());
    assert!(m.is_indexed, "stays indexed, pending re-embed");
    assert!(counter(&s, "oracle.embed_failed") >= 1);
}

#[test]
fn create_is_idempotent_in_content() {
    let s = store();
    let input = || CreateMemoryInput {
        content: "Idempotency check sentence for repeated creates.".into(),
        content_type: ContentType::Note,
        ..Default::default()
    };

    let first = s.create(input()).unwrap();
    for _ in 0..3 {
        let again = s.create(input()).unwrap();
        assert_eq!(again.memory.id, first.memory.id);
    }
    assert_eq!(s.stats().unwrap().active_memories, 1);
}

#[test]
fn delete_cascades_everywhere() {
    let s = store();
    let a = s
        .create(CreateMemoryInput {
            content: "Alice works at Anthropic on the deletion target.".into(),
            tags: vec!["doomed".into()],
            ..Default::default()
        })
        .unwrap();
    let b = s
        .create(CreateMemoryInput {
            content: "A surviving neighbor memory.".into(),
            ..Default::default()
        })
        .unwrap();
    s.link(&a.memory.id, &b.memory.id, exocortex::types::LinkType::Related, 0.7)
        .unwrap();
    s.search("deletion target", &Default::default()).unwrap();

    s.delete(&a.memory.id).unwrap();

    let id = a.memory.id.clone();
    s.storage()
        .with_connection(|conn| {
            for table in [
                "memories",
                "memory_tags",
                "memory_entities",
                "access_log",
            ] {
                let count: i64 = conn
                    .query_row(
                        &format!("SELECT COUNT(*) FROM {} WHERE memory_id = ?", table),
                        [&id],
                        |r| r.get(0),
                    )
                    .or_else(|_| {
                        conn.query_row(
                            &format!("SELECT COUNT(*) FROM {} WHERE id = ?", table),
                            [&id],
                            |r| r.get(0),
                        )
                    })
                    .unwrap();
                assert_eq!(count, 0, "lingering rows in {}", table);
            }
            let links: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM memory_links WHERE source_memory_id = ?1 OR target_memory_id = ?1",
                    [&id],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(links, 0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn archive_restore_round_trip_preserves_fields() {
    let s = store();
    let created = s
        .create(CreateMemoryInput {
            content: "Round trip survivor.".into(),
            tags: vec!["keep".into()],
            importance: Some(0.8),
            ..Default::default()
        })
        .unwrap();
    let id = created.memory.id.clone();

    s.archive(&id).unwrap();
    let archived = s.get(&id).unwrap().unwrap();
    assert!(archived.is_archived());

    // Restoring an active memory is a precondition failure
    s.restore(&id).unwrap();
    assert!(matches!(
        s.restore(&id),
        Err(ExocortexError::PreconditionFailed(_))
    ));

    let restored = s.get(&id).unwrap().unwrap();
    assert!(restored.is_active);
    assert_eq!(restored.content, created.memory.content);
    assert_eq!(restored.tags, created.memory.tags);
    assert!((restored.importance - 0.8).abs() < 1e-6);
}
