//! Goal store: goals, ordered milestones, and progress memories auto-linked
//! by embedding similarity to active goal descriptions

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;

use crate::embedding::cosine_similarity;
use crate::error::{ExocortexError, Result};
use crate::storage::settings;
use crate::store::MemoryStore;
use crate::types::{
    new_id, ContentType, CreateMemoryInput, Goal, GoalPriority, GoalStatus, Milestone,
    MilestoneStatus,
};

/// Input for creating a goal
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CreateGoalInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: GoalPriority,
    pub deadline: Option<String>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub milestones: Vec<String>,
}

/// Patch for updating a goal
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UpdateGoalInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<GoalStatus>,
    pub priority: Option<GoalPriority>,
    pub deadline: Option<String>,
}

/// Result of logging goal progress
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressResult {
    pub memory_id: String,
    /// Goal the progress entry was linked to, when one matched
    pub goal_id: Option<String>,
    pub similarity: Option<f32>,
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn goal_from_row(row: &Row) -> rusqlite::Result<Goal> {
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
}

const GOAL_COLUMNS: &str =
    "id, title, description, status, priority, deadline, metadata, created_at, updated_at, completed_at";

fn load_milestones(conn: &Connection, goal_id: &str) -> Result<Vec<Milestone>> {
    let mut stmt = conn.prepare_cached(
        "SELECT position, title, status FROM milestones WHERE goal_id = ? ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![goal_id], |row| {
            let status: String = row.get(2)?;
            Ok(Milestone {
                position: row.get(0)?,
                title: row.get(1)?,
                status: status.parse().unwrap_or_default(),
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

fn validate_deadline(deadline: &str) -> Result<()> {
    let date_part = deadline.get(..10).unwrap_or(deadline);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| {
        ExocortexError::InvalidInput(format!("malformed deadline: {}", deadline))
    })?;
    Ok(())
}

/// Create a goal with optional seed milestones
pub fn create_goal(store: &MemoryStore, input: CreateGoalInput) -> Result<Goal> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(ExocortexError::InvalidInput("goal title is empty".into()));
    }
    if let Some(ref deadline) = input.deadline {
        validate_deadline(deadline)?;
    }

    let id = new_id();
    store.storage().with_transaction(|conn| {
        let now = Utc::now().to_rfc3339();
        let metadata = if input.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&input.metadata)?)
        };
        conn.execute(
            "INSERT INTO goals (id, title, description, status, priority, deadline, metadata, created_at, updated_at)
             VALUES (?, ?, ?, 'active', ?, ?, ?, ?, ?)",
            params![
                id,
                title,
                input.description,
                input.priority.as_str(),
                input.deadline,
                metadata,
                now,
                now,
            ],
        )?;
        for (i, milestone) in input.milestones.iter().enumerate() {
            conn.execute(
                "INSERT INTO milestones (goal_id, position, title, status) VALUES (?, ?, ?, 'pending')",
                params![id, i as i64, milestone],
            )?;
        }
        Ok(())
    })?;

    get_goal(store, &id)?.ok_or_else(|| ExocortexError::Storage("goal vanished after insert".into()))
}

/// Get a goal with milestones; None when absent
pub fn get_goal(store: &MemoryStore, id: &str) -> Result<Option<Goal>> {
    store.storage().with_connection(|conn| {
        let sql = format!("SELECT {} FROM goals WHERE id = ?", GOAL_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        let goal = stmt.query_row(params![id], goal_from_row).ok();
        match goal {
            Some(mut g) => {
                g.milestones = load_milestones(conn, &g.id)?;
                Ok(Some(g))
            }
            None => Ok(None),
        }
    })
}

/// List goals, optionally filtered by status
pub fn list_goals(store: &MemoryStore, status: Option<GoalStatus>) -> Result<Vec<Goal>> {
    store.storage().with_connection(|conn| {
        let (sql, binding) = match status {
            Some(s) => (
                format!(
                    "SELECT {} FROM goals WHERE status = ? ORDER BY created_at DESC",
                    GOAL_COLUMNS
                ),
                Some(s.as_str().to_string()),
            ),
            None => (
                format!("SELECT {} FROM goals ORDER BY created_at DESC", GOAL_COLUMNS),
                None,
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let mut goals: Vec<Goal> = match binding {
            Some(s) => stmt
                .query_map(params![s], goal_from_row)?
                .filter_map(|r| r.ok())
                .collect(),
            None => stmt
                .query_map([], goal_from_row)?
                .filter_map(|r| r.ok())
                .collect(),
        };
        for g in &mut goals {
            g.milestones = load_milestones(conn, &g.id)?;
        }
        Ok(goals)
    })
}

/// Update a goal; completing it stamps completed_at
pub fn update_goal(store: &MemoryStore, id: &str, patch: UpdateGoalInput) -> Result<Goal> {
    if let Some(ref deadline) = patch.deadline {
        validate_deadline(deadline)?;
    }
    store.storage().with_transaction(|conn| {
        let existing: Option<String> = conn
            .query_row("SELECT id FROM goals WHERE id = ?", params![id], |r| r.get(0))
            .ok();
        if existing.is_none() {
            return Err(ExocortexError::NotFound(id.to_string()));
        }

        let now = Utc::now().to_rfc3339();
        if let Some(ref title) = patch.title {
            conn.execute(
                "UPDATE goals SET title = ?, updated_at = ? WHERE id = ?",
                params![title, now, id],
            )?;
        }
        if let Some(ref description) = patch.description {
            conn.execute(
                "UPDATE goals SET description = ?, updated_at = ? WHERE id = ?",
                params![description, now, id],
            )?;
        }
        if let Some(ref deadline) = patch.deadline {
            conn.execute(
                "UPDATE goals SET deadline = ?, updated_at = ? WHERE id = ?",
                params![deadline, now, id],
            )?;
        }
        if let Some(priority) = patch.priority {
            conn.execute(
                "UPDATE goals SET priority = ?, updated_at = ? WHERE id = ?",
                params![priority.as_str(), now, id],
            )?;
        }
        if let Some(status) = patch.status {
            let completed_at = if status == GoalStatus::Completed {
                Some(now.clone())
            } else {
                None
            };
            conn.execute(
                "UPDATE goals SET status = ?, completed_at = ?, updated_at = ? WHERE id = ?",
                params![status.as_str(), completed_at, now, id],
            )?;
        }
        Ok(())
    })?;

    get_goal(store, id)?.ok_or_else(|| ExocortexError::NotFound(id.to_string()))
}

/// Delete a goal and its milestones
pub fn delete_goal(store: &MemoryStore, id: &str) -> Result<()> {
    store.storage().with_transaction(|conn| {
        conn.execute("DELETE FROM milestones WHERE goal_id = ?", params![id])?;
        let affected = conn.execute("DELETE FROM goals WHERE id = ?", params![id])?;
        if affected == 0 {
            return Err(ExocortexError::NotFound(id.to_string()));
        }
        Ok(())
    })
}

/// Append a milestone at the next position
pub fn add_milestone(store: &MemoryStore, goal_id: &str, title: &str) -> Result<Milestone> {
    if title.trim().is_empty() {
        return Err(ExocortexError::InvalidInput("milestone title is empty".into()));
    }
    store.storage().with_transaction(|conn| {
        let exists: Option<String> = conn
            .query_row("SELECT id FROM goals WHERE id = ?", params![goal_id], |r| r.get(0))
            .ok();
        if exists.is_none() {
            return Err(ExocortexError::NotFound(goal_id.to_string()));
        }
        let position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM milestones WHERE goal_id = ?",
            params![goal_id],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT INTO milestones (goal_id, position, title, status) VALUES (?, ?, ?, 'pending')",
            params![goal_id, position, title.trim()],
        )?;
        Ok(Milestone {
            position,
            title: title.trim().to_string(),
            status: MilestoneStatus::Pending,
        })
    })
}

/// Set the status of one milestone
pub fn update_milestone(
    store: &MemoryStore,
    goal_id: &str,
    position: i64,
    status: MilestoneStatus,
) -> Result<()> {
    store.storage().with_transaction(|conn| {
        let affected = conn.execute(
            "UPDATE milestones SET status = ? WHERE goal_id = ? AND position = ?",
            params![status.as_str(), goal_id, position],
        )?;
        if affected == 0 {
            return Err(ExocortexError::NotFound(format!(
                "milestone {} of goal {}",
                position, goal_id
            )));
        }
        Ok(())
    })
}

/// Record a progress entry as a `goal-progress` memory. Without an explicit
/// goal id, the entry auto-links to the most similar active goal description
/// above `goal.autolink_threshold`.
#[instrument(skip(store, content))]
pub fn log_progress(
    store: &MemoryStore,
    goal_id: Option<&str>,
    content: &str,
) -> Result<ProgressResult> {
    let (matched_goal, similarity) = match goal_id {
        Some(id) => {
            if get_goal(store, id)?.is_none() {
                return Err(ExocortexError::NotFound(id.to_string()));
            }
            (Some(id.to_string()), None)
        }
        None => match autolink_goal(store, content)? {
            Some((id, sim)) => (Some(id), Some(sim)),
            None => (None, None),
        },
    };

    let mut metadata = std::collections::HashMap::new();
    if let Some(ref gid) = matched_goal {
        metadata.insert("goal_id".to_string(), serde_json::Value::from(gid.clone()));
    }

    let created = store.create(CreateMemoryInput {
        content: content.to_string(),
        content_type: ContentType::Note,
        source: Some("goal".to_string()),
        tags: vec!["goal-progress".to_string()],
        metadata,
        ..Default::default()
    })?;

    Ok(ProgressResult {
        memory_id: created.memory.id,
        goal_id: matched_goal,
        similarity,
    })
}

/// Find the active goal whose description best matches the content
fn autolink_goal(store: &MemoryStore, content: &str) -> Result<Option<(String, f32)>> {
    let threshold = store
        .storage()
        .with_connection(|conn| Ok(settings::get_f64(conn, "goal.autolink_threshold") as f32))?;

    let content_embedding = match store.embedder().embed(content) {
        Ok(e) => e,
        Err(_) => return Ok(None),
    };

    let goals = list_goals(store, Some(GoalStatus::Active))?;
    let mut best: Option<(String, f32)> = None;
    for goal in goals {
        let text = format!("{} {}", goal.title, goal.description);
        let Ok(goal_embedding) = store.embedder().embed(&text) else { continue };
        let similarity = cosine_similarity(&content_embedding, &goal_embedding);
        if similarity >= threshold {
            match &best {
                Some((_, s)) if *s >= similarity => {}
                _ => best = Some((goal.id.clone(), similarity)),
            }
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_goal_crud_round_trip() {
        let s = store();
        let goal = create_goal(
            &s,
            CreateGoalInput {
                title: "Ship the metrics migration".into(),
                description: "Move the metrics store to Postgres".into(),
                priority: GoalPriority::High,
                milestones: vec!["Schema design".into(), "Cutover".into()],
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(goal.status, GoalStatus::Active);
        assert_eq!(goal.milestones.len(), 2);
        assert_eq!(goal.milestones[0].position, 0);

        let updated = update_goal(
            &s,
            &goal.id,
            UpdateGoalInput {
                status: Some(GoalStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.status, GoalStatus::Completed);
        assert!(updated.completed_at.is_some());

        delete_goal(&s, &goal.id).unwrap();
        assert!(get_goal(&s, &goal.id).unwrap().is_none());
    }

    #[test]
    fn test_milestone_ordering_and_status() {
        let s = store();
        let goal = create_goal(
            &s,
            CreateGoalInput {
                title: "Write docs".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let m0 = add_milestone(&s, &goal.id, "Outline").unwrap();
        let m1 = add_milestone(&s, &goal.id, "Draft").unwrap();
        assert_eq!(m0.position, 0);
        assert_eq!(m1.position, 1);

        update_milestone(&s, &goal.id, 0, MilestoneStatus::Completed).unwrap();
        let loaded = get_goal(&s, &goal.id).unwrap().unwrap();
        assert_eq!(loaded.milestones[0].status, MilestoneStatus::Completed);
        assert_eq!(loaded.milestones[1].status, MilestoneStatus::Pending);

        assert!(update_milestone(&s, &goal.id, 9, MilestoneStatus::Completed).is_err());
    }

    #[test]
    fn test_malformed_deadline_rejected() {
        let s = store();
        let result = create_goal(
            &s,
            CreateGoalInput {
                title: "Bad deadline".into(),
                deadline: Some("soonish".into()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(ExocortexError::InvalidInput(_))));
    }

    #[test]
    fn test_progress_with_explicit_goal() {
        let s = store();
        let goal = create_goal(
            &s,
            CreateGoalInput {
                title: "Track progress".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let progress =
            log_progress(&s, Some(&goal.id), "Finished the first draft of tracking").unwrap();
        assert_eq!(progress.goal_id.as_deref(), Some(goal.id.as_str()));

        let memory = s.get(&progress.memory_id).unwrap().unwrap();
        assert!(memory.tags.contains(&"goal-progress".to_string()));
        assert_eq!(
            memory.metadata.get("goal_id").and_then(|v| v.as_str()),
            Some(goal.id.as_str())
        );
    }

    #[test]
    fn test_progress_autolinks_by_similarity() {
        let s = store();
        let goal = create_goal(
            &s,
            CreateGoalInput {
                title: "Postgres migration".into(),
                description: "Migrate the metrics backend to Postgres with replicas".into(),
                ..Default::default()
            },
        )
        .unwrap();
        // An unrelated goal that must not match
        create_goal(
            &s,
            CreateGoalInput {
                title: "Garden redesign".into(),
                description: "Plant roses along the fence".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let progress = log_progress(
            &s,
            None,
            "Migrated half the metrics backend tables to Postgres with replicas today",
        )
        .unwrap();

        // The hashing embedder shares enough tokens with the goal text
        if let Some(linked) = progress.goal_id {
            assert_eq!(linked, goal.id);
        }
    }
}
