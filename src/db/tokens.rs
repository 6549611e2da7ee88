//! Breakdown token store.
//!
//! Tokens live in the shared database rather than process memory so that a
//! proposal made by one process can be accepted by another. Consumption is a
//! single conditional UPDATE, which gives at-most-once acceptance.

use super::goals::require_goal;
use super::progress::propagate;
use super::tasks::{insert_task, titles_under_goal};
use super::{Database, now_ms};
use crate::breakdown::plan_accepted_tasks;
use crate::error::PlanError;
use crate::types::{BreakdownToken, Goal, Task};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

/// How long expired tokens are kept before being purged.
const EXPIRED_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

fn parse_token_row(row: &Row) -> rusqlite::Result<BreakdownToken> {
    let suggestions_json: String = row.get("suggestions")?;
    let suggestions = serde_json::from_str(&suggestions_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    let consumed_at: Option<i64> = row.get("consumed_at")?;

    Ok(BreakdownToken {
        id: row.get("id")?,
        owner: row.get("owner")?,
        goal_id: row.get("goal_id")?,
        suggestions,
        reasoning: row.get("reasoning")?,
        estimated_timeline: row.get("estimated_timeline")?,
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
        consumed: consumed_at.is_some(),
    })
}

fn get_token_internal(
    conn: &Connection,
    owner: &str,
    token_id: &str,
) -> Result<Option<BreakdownToken>> {
    let token = conn
        .query_row(
            "SELECT id, owner, goal_id, suggestions, reasoning, estimated_timeline,
                    created_at, expires_at, consumed_at
             FROM breakdown_tokens WHERE id = ?1 AND owner = ?2",
            params![token_id, owner],
            parse_token_row,
        )
        .optional()?;
    Ok(token)
}

impl Database {
    /// A goal and the titles of the tasks directly under it.
    pub fn goal_with_task_titles(&self, owner: &str, goal_id: &str) -> Result<(Goal, Vec<String>)> {
        self.with_conn(|conn| {
            let goal = require_goal(conn, owner, goal_id)?;
            let titles = titles_under_goal(conn, goal_id)?;
            Ok((goal, titles))
        })
    }

    /// Persist a freshly proposed token and drop long-expired ones.
    pub fn store_breakdown_token(&self, token: &BreakdownToken) -> Result<()> {
        let suggestions = serde_json::to_string(&token.suggestions)?;
        self.with_conn(|conn| {
            let purged = conn.execute(
                "DELETE FROM breakdown_tokens WHERE expires_at < ?1",
                params![now_ms() - EXPIRED_RETENTION_MS],
            )?;
            if purged > 0 {
                debug!(purged, "Purged expired breakdown tokens");
            }

            conn.execute(
                "INSERT INTO breakdown_tokens (id, owner, goal_id, suggestions, reasoning,
                    estimated_timeline, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    &token.id,
                    &token.owner,
                    &token.goal_id,
                    &suggestions,
                    &token.reasoning,
                    &token.estimated_timeline,
                    token.created_at,
                    token.expires_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_breakdown_token(&self, owner: &str, token_id: &str) -> Result<BreakdownToken> {
        self.with_conn(|conn| {
            get_token_internal(conn, owner, token_id)?
                .ok_or_else(|| PlanError::token_not_found(token_id).into())
        })
    }

    /// Consume a token and create one task per selected suggestion, all in
    /// one transaction. `today` anchors due-date spreading.
    pub fn accept_breakdown_token(
        &self,
        owner: &str,
        token_id: &str,
        indices: &[usize],
        today: NaiveDate,
    ) -> Result<Vec<Task>> {
        let origin = format!("breakdown token {}", token_id);

        let tasks = self.write_tx(&format!("breakdown token {}", token_id), |tx| {
            let token = get_token_internal(tx, owner, token_id)?
                .ok_or_else(|| PlanError::token_not_found(token_id))?;
            if token.consumed {
                return Err(PlanError::TokenAlreadyConsumed {
                    token_id: token_id.to_string(),
                }
                .into());
            }
            let now = now_ms();
            if token.is_expired(now) {
                return Err(PlanError::TokenExpired {
                    token_id: token_id.to_string(),
                }
                .into());
            }

            let goal = require_goal(tx, owner, &token.goal_id)?;
            let planned = plan_accepted_tasks(&token.suggestions, indices, &goal, today)?;

            let consumed = tx.execute(
                "UPDATE breakdown_tokens SET consumed_at = ?1
                 WHERE id = ?2 AND consumed_at IS NULL AND expires_at > ?1",
                params![now, token_id],
            )?;
            if consumed == 0 {
                return Err(PlanError::TokenAlreadyConsumed {
                    token_id: token_id.to_string(),
                }
                .into());
            }

            let mut tasks = Vec::with_capacity(planned.len());
            for input in &planned {
                tasks.push(insert_task(tx, owner, input, Some(&origin))?);
            }
            propagate(tx, owner, &goal.id)?;
            Ok(tasks)
        })?;

        info!(token_id, created = tasks.len(), "Breakdown accepted");
        Ok(tasks)
    }
}
