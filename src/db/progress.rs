//! Progress propagation over stored goals and tasks.

use super::{Database, now_ms};
use crate::error::PlanError;
use crate::progress::{ProgressChange, ProgressIndex};
use crate::types::TaskStatus;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use tracing::{debug, info};

/// Build the roll-up index for one owner from current rows.
pub(crate) fn load_index(conn: &Connection, owner: &str) -> Result<ProgressIndex> {
    let mut index = ProgressIndex::new();

    let mut stmt = conn.prepare("SELECT id, parent_goal_id FROM goals WHERE owner = ?1")?;
    let rows = stmt.query_map(params![owner], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;
    for row in rows {
        let (id, parent) = row?;
        index.add_goal(id, parent);
    }

    let mut stmt = conn.prepare(
        "SELECT parent_goal_id, status FROM tasks
         WHERE owner = ?1 AND parent_goal_id IS NOT NULL",
    )?;
    let rows = stmt.query_map(params![owner], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, TaskStatus>(1)?))
    })?;
    for row in rows {
        let (goal_id, status) = row?;
        index.add_task(goal_id, status.is_completed());
    }

    Ok(index)
}

/// Recompute `goal_id` and each ancestor from source-of-truth state. Every goal
/// in the chain is written and gets a fresh `updated_at`; only goals whose
/// value moved are returned. Must run inside a write transaction.
///
/// Each write is guarded by the row version read in the same pass; a lost
/// race surfaces as `ConcurrencyConflict` so the caller's transaction is
/// retried from scratch.
pub(crate) fn propagate(
    conn: &Connection,
    owner: &str,
    goal_id: &str,
) -> Result<Vec<ProgressChange>> {
    let index = load_index(conn, owner)?;
    let mut memo = HashMap::new();
    let mut changes = Vec::new();
    let now = now_ms();

    for id in index.chain(goal_id) {
        let progress = index.progress(&id, &mut memo);
        memo.insert(id.clone(), progress);

        let Some((previous, version)) = conn
            .query_row(
                "SELECT progress_percentage, version FROM goals WHERE id = ?1",
                params![&id],
                |row| Ok((row.get::<_, u8>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?
        else {
            continue;
        };

        let updated = conn.execute(
            "UPDATE goals SET progress_percentage = ?1, version = version + 1, updated_at = ?2
             WHERE id = ?3 AND version = ?4",
            params![progress, now, &id, version],
        )?;
        if updated == 0 {
            return Err(PlanError::ConcurrencyConflict {
                scope: format!("goal {}", id),
                attempts: 1,
            }
            .into());
        }

        if previous == progress {
            continue;
        }
        debug!(goal_id = %id, previous, progress, "Goal progress updated");
        changes.push(ProgressChange {
            goal_id: id,
            previous,
            progress,
        });
    }

    Ok(changes)
}

/// Propagate from an optional goal; unattached tasks touch nothing.
pub(crate) fn propagate_from(
    conn: &Connection,
    owner: &str,
    goal_id: Option<&str>,
) -> Result<Vec<ProgressChange>> {
    match goal_id {
        Some(id) => propagate(conn, owner, id),
        None => Ok(Vec::new()),
    }
}

impl Database {
    /// Recompute a goal's progress from its tasks and subgoals, repairing the
    /// cached value and its ancestors if they drifted.
    pub fn recompute_goal(&self, owner: &str, goal_id: &str) -> Result<u8> {
        self.write_tx(&format!("goal {}", goal_id), |tx| {
            super::goals::require_goal(tx, owner, goal_id)?;
            let changes = propagate(tx, owner, goal_id)?;
            if !changes.is_empty() {
                info!(goal_id, repaired = changes.len(), "Drifted goal progress repaired");
            }
            let progress = tx.query_row(
                "SELECT progress_percentage FROM goals WHERE id = ?1",
                params![goal_id],
                |row| row.get::<_, u8>(0),
            )?;
            Ok(progress)
        })
    }

    /// Outstanding work units under a goal (see [`ProgressIndex::remaining_units`]).
    pub fn remaining_units(&self, owner: &str, goal_id: &str) -> Result<f64> {
        self.with_conn(|conn| {
            super::goals::require_goal(conn, owner, goal_id)?;
            let index = load_index(conn, owner)?;
            Ok(index.remaining_units(goal_id))
        })
    }
}
