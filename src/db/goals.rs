//! Goal CRUD and hierarchy maintenance.

use super::progress::propagate_from;
use super::{Database, json_column, now_ms};
use crate::error::PlanError;
use crate::progress::MAX_GOAL_DEPTH;
use crate::types::{
    Goal, GoalPatch, GoalStatus, GoalSummary, NewGoal, validate_metrics, validate_title,
};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};
use uuid::Uuid;

pub fn parse_goal_row(row: &Row) -> rusqlite::Result<Goal> {
    let metrics_json: Option<String> = row.get("metrics")?;

    Ok(Goal {
        id: row.get("id")?,
        owner: row.get("owner")?,
        parent_goal_id: row.get("parent_goal_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        horizon: row.get("horizon")?,
        target_date: row.get("target_date")?,
        status: row.get("status")?,
        progress_percentage: row.get("progress_percentage")?,
        success_criteria: row.get("success_criteria")?,
        metrics: json_column(metrics_json),
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

/// Internal helper to get a goal using an existing connection (avoids deadlock).
fn get_goal_internal(conn: &Connection, owner: &str, goal_id: &str) -> Result<Option<Goal>> {
    let goal = conn
        .query_row(
            "SELECT * FROM goals WHERE id = ?1 AND owner = ?2",
            params![goal_id, owner],
            parse_goal_row,
        )
        .optional()?;
    Ok(goal)
}

/// Load a goal owned by `owner` or fail with `NotFound`.
pub(crate) fn require_goal(conn: &Connection, owner: &str, goal_id: &str) -> Result<Goal> {
    get_goal_internal(conn, owner, goal_id)?
        .ok_or_else(|| PlanError::goal_not_found(goal_id).into())
}

/// Parent of a goal, if the goal exists and has one.
fn parent_of(conn: &Connection, goal_id: &str) -> Result<Option<String>> {
    let parent = conn
        .query_row(
            "SELECT parent_goal_id FROM goals WHERE id = ?1",
            params![goal_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten();
    Ok(parent)
}

/// Levels below `goal_id`, counted up to `MAX_GOAL_DEPTH`.
fn subtree_height(conn: &Connection, goal_id: &str) -> Result<usize> {
    let mut stmt = conn.prepare("SELECT id FROM goals WHERE parent_goal_id = ?1")?;
    let mut level = vec![goal_id.to_string()];
    let mut height = 0;

    while height < MAX_GOAL_DEPTH {
        let mut next = Vec::new();
        for id in &level {
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            for row in rows {
                next.push(row?);
            }
        }
        if next.is_empty() {
            break;
        }
        height += 1;
        level = next;
    }
    Ok(height)
}

fn too_deep() -> anyhow::Error {
    PlanError::validation(
        "parent_goal_id",
        format!("goal hierarchy deeper than {} levels", MAX_GOAL_DEPTH),
    )
    .into()
}

/// Check a parent assignment for a new goal (`goal_id` is `None`) or an
/// existing one. The parent must exist, must not sit inside the goal's own
/// subtree, and the resulting chain from the deepest descendant to the root
/// must stay within `MAX_GOAL_DEPTH` goals.
fn check_parent(
    conn: &Connection,
    owner: &str,
    goal_id: Option<&str>,
    new_parent: &str,
) -> Result<()> {
    if goal_id == Some(new_parent) {
        return Err(PlanError::validation("parent_goal_id", "a goal cannot be its own parent").into());
    }
    require_goal(conn, owner, new_parent)?;

    let below = match goal_id {
        Some(id) => subtree_height(conn, id)?,
        None => 0,
    };

    let mut current = Some(new_parent.to_string());
    let mut ancestors = 0;
    while let Some(id) = current {
        if goal_id == Some(id.as_str()) {
            return Err(PlanError::validation(
                "parent_goal_id",
                format!("goal {} is a descendant of {}", new_parent, id),
            )
            .into());
        }
        ancestors += 1;
        if ancestors + 1 + below > MAX_GOAL_DEPTH {
            return Err(too_deep());
        }
        current = parent_of(conn, &id)?;
    }
    Ok(())
}

impl Database {
    /// Create a goal. A parent, if given, must belong to the same owner.
    pub fn create_goal(&self, owner: &str, input: &NewGoal) -> Result<Goal> {
        validate_title("title", &input.title)?;
        validate_metrics(&input.metrics)?;
        let metrics_json = serde_json::to_string(&input.metrics)?;

        let goal = self.write_tx(&format!("goals of {}", owner), |tx| {
            if let Some(ref parent) = input.parent_goal_id {
                check_parent(tx, owner, None, parent)?;
            }

            let id = Uuid::now_v7().to_string();
            let now = now_ms();
            tx.execute(
                "INSERT INTO goals (id, owner, parent_goal_id, title, description, horizon,
                    target_date, status, progress_percentage, success_criteria, metrics,
                    version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, 0, ?11, ?11)",
                params![
                    &id,
                    owner,
                    &input.parent_goal_id,
                    input.title.trim(),
                    &input.description,
                    input.horizon,
                    input.target_date,
                    GoalStatus::Active,
                    &input.success_criteria,
                    &metrics_json,
                    now,
                ],
            )?;

            propagate_from(tx, owner, input.parent_goal_id.as_deref())?;
            require_goal(tx, owner, &id)
        })?;

        info!(goal_id = %goal.id, owner, horizon = goal.horizon.as_str(), "Goal created");
        Ok(goal)
    }

    pub fn get_goal(&self, owner: &str, goal_id: &str) -> Result<Goal> {
        self.with_conn(|conn| require_goal(conn, owner, goal_id))
    }

    /// All goals of an owner, oldest first.
    pub fn list_goals(&self, owner: &str) -> Result<Vec<Goal>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM goals WHERE owner = ?1 ORDER BY created_at, id")?;
            let goals = stmt
                .query_map(params![owner], parse_goal_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(goals)
        })
    }

    /// Apply a partial update. Reparenting re-aggregates both the old and the
    /// new parent chains.
    pub fn update_goal(&self, owner: &str, goal_id: &str, patch: &GoalPatch) -> Result<Goal> {
        if let Some(ref title) = patch.title {
            validate_title("title", title)?;
        }
        if let Some(ref metrics) = patch.metrics {
            validate_metrics(metrics)?;
        }

        self.write_tx(&format!("goal {}", goal_id), |tx| {
            let current = require_goal(tx, owner, goal_id)?;
            let mut goal = current.clone();

            if let Some(ref title) = patch.title {
                goal.title = title.trim().to_string();
            }
            if let Some(ref description) = patch.description {
                goal.description = description.clone();
            }
            if let Some(horizon) = patch.horizon {
                goal.horizon = horizon;
            }
            if let Some(target_date) = patch.target_date {
                goal.target_date = target_date;
            }
            if let Some(ref criteria) = patch.success_criteria {
                goal.success_criteria = criteria.clone();
            }
            if let Some(ref metrics) = patch.metrics {
                goal.metrics = metrics.clone();
            }
            if let Some(ref parent) = patch.parent_goal_id {
                if let Some(new_parent) = parent {
                    check_parent(tx, owner, Some(goal_id), new_parent)?;
                }
                goal.parent_goal_id = parent.clone();
            }

            let now = now_ms();
            if let Some(status) = patch.status {
                goal.status = status;
                goal.completed_at = match (current.status, status) {
                    (GoalStatus::Completed, GoalStatus::Completed) => current.completed_at,
                    (_, GoalStatus::Completed) => Some(now),
                    _ => None,
                };
            }

            tx.execute(
                "UPDATE goals SET parent_goal_id = ?1, title = ?2, description = ?3,
                    horizon = ?4, target_date = ?5, status = ?6, success_criteria = ?7,
                    metrics = ?8, completed_at = ?9, version = version + 1, updated_at = ?10
                 WHERE id = ?11",
                params![
                    &goal.parent_goal_id,
                    &goal.title,
                    &goal.description,
                    goal.horizon,
                    goal.target_date,
                    goal.status,
                    &goal.success_criteria,
                    serde_json::to_string(&goal.metrics)?,
                    goal.completed_at,
                    now,
                    goal_id,
                ],
            )?;

            if current.parent_goal_id != goal.parent_goal_id {
                debug!(
                    goal_id,
                    from = ?current.parent_goal_id,
                    to = ?goal.parent_goal_id,
                    "Goal reparented"
                );
                propagate_from(tx, owner, current.parent_goal_id.as_deref())?;
                propagate_from(tx, owner, goal.parent_goal_id.as_deref())?;
            }

            require_goal(tx, owner, goal_id)
        })
    }

    /// Delete a goal. Its tasks and subgoals are detached, not deleted.
    pub fn delete_goal(&self, owner: &str, goal_id: &str) -> Result<()> {
        self.write_tx(&format!("goal {}", goal_id), |tx| {
            let goal = require_goal(tx, owner, goal_id)?;
            let now = now_ms();

            let tasks = tx.execute(
                "UPDATE tasks SET parent_goal_id = NULL, updated_at = ?1 WHERE parent_goal_id = ?2",
                params![now, goal_id],
            )?;
            let subgoals = tx.execute(
                "UPDATE goals SET parent_goal_id = NULL, version = version + 1, updated_at = ?1
                 WHERE parent_goal_id = ?2",
                params![now, goal_id],
            )?;
            tx.execute("DELETE FROM goals WHERE id = ?1", params![goal_id])?;

            propagate_from(tx, owner, goal.parent_goal_id.as_deref())?;
            info!(goal_id, tasks, subgoals, "Goal deleted, children detached");
            Ok(())
        })
    }

    /// Owner-wide goal counts and progress statistics.
    pub fn goal_summary(&self, owner: &str) -> Result<GoalSummary> {
        let goals = self.list_goals(owner)?;
        let mut summary = GoalSummary {
            total: goals.len() as i64,
            ..Default::default()
        };

        let mut active_progress = Vec::new();
        for goal in &goals {
            *summary
                .by_status
                .entry(goal.status.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_horizon
                .entry(goal.horizon.as_str().to_string())
                .or_default() += 1;
            if goal.status == GoalStatus::Active {
                active_progress.push(goal.progress_percentage);
            }
        }

        if !active_progress.is_empty() {
            let sum: u32 = active_progress.iter().map(|&p| u32::from(p)).sum();
            summary.average_progress = f64::from(sum) / active_progress.len() as f64;
        }
        summary.near_completion = active_progress.iter().filter(|&&p| p >= 80).count() as i64;

        Ok(summary)
    }
}
