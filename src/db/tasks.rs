//! Task CRUD, lifecycle transitions and the task event log.

use super::deps::{dependencies_of, dependency_map, load_graph, replace_dependencies};
use super::goals::require_goal;
use super::progress::propagate_from;
use super::{Database, json_column, now_ms};
use crate::dependencies::{can_complete, validate_dependencies};
use crate::error::PlanError;
use crate::types::{
    CompleteOutcome, NewTask, PRIORITY_DEFAULT, Priority, Task, TaskAnalytics, TaskEvent,
    TaskFilter, TaskPatch, TaskStatus, TaskSummary, UNCATEGORIZED, UncompleteOutcome,
    normalize_tags, validate_hours, validate_priority, validate_title,
};
use crate::velocity::day_range_ms;
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Parse a task row. Dependencies live in their own table and are filled in
/// by the caller.
pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let tags_json: Option<String> = row.get("tags")?;

    Ok(Task {
        id: row.get("id")?,
        owner: row.get("owner")?,
        parent_goal_id: row.get("parent_goal_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        priority: row.get("priority")?,
        status: row.get("status")?,
        category: row.get("category")?,
        estimated_hours: row.get("estimated_hours")?,
        actual_hours: row.get("actual_hours")?,
        due_date: row.get("due_date")?,
        dependencies: BTreeSet::new(),
        tags: json_column(tags_json),
        notes: row.get("notes")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
fn get_task_internal(conn: &Connection, owner: &str, task_id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE id = ?1 AND owner = ?2",
            params![task_id, owner],
            parse_task_row,
        )
        .optional()?;

    match task {
        Some(mut task) => {
            task.dependencies = dependencies_of(conn, &task.id)?;
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

/// Load a task owned by `owner` or fail with `NotFound`.
pub(crate) fn require_task(conn: &Connection, owner: &str, task_id: &str) -> Result<Task> {
    get_task_internal(conn, owner, task_id)?
        .ok_or_else(|| PlanError::task_not_found(task_id).into())
}

/// Append an entry to a task's event log.
pub(crate) fn record_event(
    conn: &Connection,
    task_id: &str,
    event: &str,
    reason: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO task_events (task_id, event, reason, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![task_id, event, reason, now_ms()],
    )?;
    Ok(())
}

/// Titles of the tasks directly under a goal.
pub(crate) fn titles_under_goal(conn: &Connection, goal_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT title FROM tasks WHERE parent_goal_id = ?1 ORDER BY created_at, id",
    )?;
    let titles = stmt
        .query_map(params![goal_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(titles)
}

fn collect_dependencies(ids: &[String]) -> BTreeSet<String> {
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Insert a task without propagating progress. `origin` is recorded as the
/// reason of the `created` event.
pub(crate) fn insert_task(
    conn: &Connection,
    owner: &str,
    input: &NewTask,
    origin: Option<&str>,
) -> Result<Task> {
    validate_title("title", &input.title)?;
    let priority = input.priority.unwrap_or(PRIORITY_DEFAULT);
    validate_priority(priority)?;
    validate_hours("estimated_hours", input.estimated_hours)?;
    validate_hours("actual_hours", input.actual_hours)?;

    if let Some(ref goal_id) = input.parent_goal_id {
        require_goal(conn, owner, goal_id)?;
    }

    let id = Uuid::now_v7().to_string();
    let dependencies = collect_dependencies(&input.dependencies);
    if !dependencies.is_empty() {
        let graph = load_graph(conn, owner)?;
        validate_dependencies(&id, &dependencies, &graph)?;
    }

    let tags = normalize_tags(input.tags.clone());
    let now = now_ms();
    conn.execute(
        "INSERT INTO tasks (id, owner, parent_goal_id, title, description, priority, status,
            category, estimated_hours, actual_hours, due_date, tags, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            &id,
            owner,
            &input.parent_goal_id,
            input.title.trim(),
            &input.description,
            priority,
            TaskStatus::Pending,
            &input.category,
            input.estimated_hours,
            input.actual_hours,
            input.due_date,
            serde_json::to_string(&tags)?,
            &input.notes,
            now,
        ],
    )?;
    replace_dependencies(conn, &id, &dependencies)?;
    record_event(conn, &id, "created", origin)?;

    require_task(conn, owner, &id)
}

/// Outcome of passing a status change through the completion gate.
struct StatusChange {
    completed_at: Option<i64>,
    overridden: Vec<String>,
}

/// Check and log a status change from `task.status` to `new`.
///
/// Completion requires every dependency to be completed unless `force` is
/// set, in which case the override is logged and recorded as a
/// `forced_completion` event.
fn gate_status_change(
    conn: &Connection,
    owner: &str,
    task: &Task,
    new: TaskStatus,
    force: bool,
) -> Result<StatusChange> {
    if new == task.status {
        return Ok(StatusChange {
            completed_at: task.completed_at,
            overridden: Vec::new(),
        });
    }

    let mut overridden = Vec::new();
    let mut completed_at = None;

    if new.is_completed() {
        let graph = load_graph(conn, owner)?;
        match can_complete(&task.id, &graph) {
            Ok(()) => {}
            Err(PlanError::DependencyNotSatisfied { blockers, .. }) if force => {
                warn!(
                    task_id = %task.id,
                    blockers = %blockers.join(", "),
                    "Completing task with unfinished dependencies"
                );
                record_event(conn, &task.id, "forced_completion", Some(&blockers.join(", ")))?;
                overridden = blockers;
            }
            Err(e) => return Err(e.into()),
        }
        completed_at = Some(now_ms());
    }

    record_event(conn, &task.id, &format!("status:{}", new.as_str()), None)?;
    Ok(StatusChange {
        completed_at,
        overridden,
    })
}

impl Database {
    /// Create a task, optionally under a goal, and re-aggregate that goal.
    pub fn create_task(&self, owner: &str, input: &NewTask) -> Result<Task> {
        let task = self.write_tx(&format!("tasks of {}", owner), |tx| {
            let task = insert_task(tx, owner, input, None)?;
            propagate_from(tx, owner, task.parent_goal_id.as_deref())?;
            Ok(task)
        })?;

        info!(task_id = %task.id, owner, goal_id = ?task.parent_goal_id, "Task created");
        Ok(task)
    }

    pub fn get_task(&self, owner: &str, task_id: &str) -> Result<Task> {
        self.with_conn(|conn| require_task(conn, owner, task_id))
    }

    /// List an owner's tasks, most urgent first.
    pub fn list_tasks(&self, owner: &str, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM tasks WHERE owner = ?");
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(owner.to_string())];

            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                params_vec.push(Box::new(status));
            }
            if let Some(ref goal_id) = filter.parent_goal_id {
                sql.push_str(" AND parent_goal_id = ?");
                params_vec.push(Box::new(goal_id.clone()));
            }
            if let Some(ref category) = filter.category {
                sql.push_str(" AND category = ?");
                params_vec.push(Box::new(category.clone()));
            }
            sql.push_str(" ORDER BY priority ASC, due_date IS NULL, due_date ASC, created_at ASC");

            let mut stmt = conn.prepare(&sql)?;
            let mut tasks = stmt
                .query_map(params_from_iter(params_vec.iter()), parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut deps = dependency_map(conn, owner)?;
            for task in &mut tasks {
                if let Some(set) = deps.remove(&task.id) {
                    task.dependencies = set;
                }
            }
            Ok(tasks)
        })
    }

    /// Apply a partial update. Dependency edits are validated against the
    /// owner's graph; status edits pass the completion gate.
    pub fn update_task(&self, owner: &str, task_id: &str, patch: &TaskPatch) -> Result<Task> {
        if let Some(ref title) = patch.title {
            validate_title("title", title)?;
        }
        if let Some(priority) = patch.priority {
            validate_priority(priority)?;
        }
        if let Some(hours) = patch.estimated_hours {
            validate_hours("estimated_hours", hours)?;
        }
        if let Some(hours) = patch.actual_hours {
            validate_hours("actual_hours", hours)?;
        }

        self.write_tx(&format!("task {}", task_id), |tx| {
            let current = require_task(tx, owner, task_id)?;
            let mut task = current.clone();

            if let Some(ref title) = patch.title {
                task.title = title.trim().to_string();
            }
            if let Some(ref description) = patch.description {
                task.description = description.clone();
            }
            if let Some(priority) = patch.priority {
                task.priority = priority;
            }
            if let Some(ref category) = patch.category {
                task.category = category.clone();
            }
            if let Some(hours) = patch.estimated_hours {
                task.estimated_hours = hours;
            }
            if let Some(hours) = patch.actual_hours {
                task.actual_hours = hours;
            }
            if let Some(due_date) = patch.due_date {
                task.due_date = due_date;
            }
            if let Some(ref notes) = patch.notes {
                task.notes = notes.clone();
            }
            if let Some(ref tags) = patch.tags {
                task.tags = normalize_tags(tags.clone());
            }
            if let Some(ref parent) = patch.parent_goal_id {
                if let Some(goal_id) = parent {
                    require_goal(tx, owner, goal_id)?;
                }
                task.parent_goal_id = parent.clone();
            }
            if let Some(ref deps) = patch.dependencies {
                let deps = collect_dependencies(deps);
                let graph = load_graph(tx, owner)?;
                validate_dependencies(task_id, &deps, &graph)?;
                task.dependencies = deps;
            }

            // Gate after dependency edits so the new set is what gets checked.
            if task.dependencies != current.dependencies {
                replace_dependencies(tx, task_id, &task.dependencies)?;
            }
            if let Some(status) = patch.status {
                let change = gate_status_change(tx, owner, &current, status, patch.force)?;
                task.status = status;
                task.completed_at = change.completed_at;
            }

            tx.execute(
                "UPDATE tasks SET parent_goal_id = ?1, title = ?2, description = ?3,
                    priority = ?4, status = ?5, category = ?6, estimated_hours = ?7,
                    actual_hours = ?8, due_date = ?9, tags = ?10, notes = ?11,
                    completed_at = ?12, updated_at = ?13
                 WHERE id = ?14",
                params![
                    &task.parent_goal_id,
                    &task.title,
                    &task.description,
                    task.priority,
                    task.status,
                    &task.category,
                    task.estimated_hours,
                    task.actual_hours,
                    task.due_date,
                    serde_json::to_string(&task.tags)?,
                    &task.notes,
                    task.completed_at,
                    now_ms(),
                    task_id,
                ],
            )?;

            if current.parent_goal_id != task.parent_goal_id {
                propagate_from(tx, owner, current.parent_goal_id.as_deref())?;
                propagate_from(tx, owner, task.parent_goal_id.as_deref())?;
            } else if current.status.is_completed() != task.status.is_completed() {
                propagate_from(tx, owner, task.parent_goal_id.as_deref())?;
            }

            debug!(task_id, status = task.status.as_str(), "Task updated");
            require_task(tx, owner, task_id)
        })
    }

    /// Mark a task completed. Already-completed tasks are reported, not an error.
    pub fn complete_task(&self, owner: &str, task_id: &str, force: bool) -> Result<CompleteOutcome> {
        self.complete_task_with_hours(owner, task_id, force, None)
    }

    /// Mark a task completed, recording the hours actually spent when given.
    /// An already-completed task keeps its recorded hours.
    pub fn complete_task_with_hours(
        &self,
        owner: &str,
        task_id: &str,
        force: bool,
        actual_hours: Option<f64>,
    ) -> Result<CompleteOutcome> {
        validate_hours("actual_hours", actual_hours)?;

        let outcome = self.write_tx(&format!("task {}", task_id), |tx| {
            let task = require_task(tx, owner, task_id)?;
            if task.status.is_completed() {
                return Ok(CompleteOutcome::AlreadyCompleted { task });
            }

            let change = gate_status_change(tx, owner, &task, TaskStatus::Completed, force)?;
            tx.execute(
                "UPDATE tasks SET status = ?1, completed_at = ?2,
                    actual_hours = COALESCE(?3, actual_hours), updated_at = ?4
                 WHERE id = ?5",
                params![TaskStatus::Completed, change.completed_at, actual_hours, now_ms(), task_id],
            )?;
            propagate_from(tx, owner, task.parent_goal_id.as_deref())?;

            Ok(CompleteOutcome::Completed {
                task: require_task(tx, owner, task_id)?,
                overridden: change.overridden,
            })
        })?;

        if let CompleteOutcome::Completed { ref overridden, .. } = outcome {
            info!(task_id, forced = !overridden.is_empty(), "Task completed");
        }
        Ok(outcome)
    }

    /// Return a completed task to pending.
    pub fn uncomplete_task(&self, owner: &str, task_id: &str) -> Result<UncompleteOutcome> {
        self.write_tx(&format!("task {}", task_id), |tx| {
            let task = require_task(tx, owner, task_id)?;
            if !task.status.is_completed() {
                return Ok(UncompleteOutcome::NotCompleted { task });
            }

            gate_status_change(tx, owner, &task, TaskStatus::Pending, false)?;
            tx.execute(
                "UPDATE tasks SET status = ?1, completed_at = NULL, updated_at = ?2 WHERE id = ?3",
                params![TaskStatus::Pending, now_ms(), task_id],
            )?;
            propagate_from(tx, owner, task.parent_goal_id.as_deref())?;

            info!(task_id, "Task reopened");
            Ok(UncompleteOutcome::Reopened {
                task: require_task(tx, owner, task_id)?,
            })
        })
    }

    /// Delete a task. Other tasks stop depending on it.
    pub fn delete_task(&self, owner: &str, task_id: &str) -> Result<()> {
        self.write_tx(&format!("task {}", task_id), |tx| {
            let task = require_task(tx, owner, task_id)?;
            let dependents: i64 = tx.query_row(
                "SELECT COUNT(*) FROM task_dependencies WHERE depends_on_id = ?1",
                params![task_id],
                |row| row.get(0),
            )?;

            // Dependency rows in both directions and the event log cascade.
            tx.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            propagate_from(tx, owner, task.parent_goal_id.as_deref())?;

            info!(task_id, dependents, "Task deleted");
            Ok(())
        })
    }

    /// Lifecycle log of a task, oldest first.
    pub fn task_history(&self, owner: &str, task_id: &str) -> Result<Vec<TaskEvent>> {
        self.with_conn(|conn| {
            require_task(conn, owner, task_id)?;
            let mut stmt = conn.prepare(
                "SELECT id, task_id, event, reason, timestamp FROM task_events
                 WHERE task_id = ?1 ORDER BY id",
            )?;
            let events = stmt
                .query_map(params![task_id], |row| {
                    Ok(TaskEvent {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        event: row.get(2)?,
                        reason: row.get(3)?,
                        timestamp: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
    }

    /// Completion instants (epoch ms) and priorities of an owner's tasks
    /// completed in `[from_ms, to_ms)`.
    pub fn completions_between(
        &self,
        owner: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<(i64, Priority)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT completed_at, priority FROM tasks
                 WHERE owner = ?1 AND completed_at IS NOT NULL
                   AND completed_at >= ?2 AND completed_at < ?3
                 ORDER BY completed_at",
            )?;
            let rows = stmt
                .query_map(params![owner, from_ms, to_ms], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Priority>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Owner-wide task counts as of `today`.
    pub fn task_summary(&self, owner: &str, today: NaiveDate) -> Result<TaskSummary> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, priority, category, due_date FROM tasks WHERE owner = ?1",
            )?;
            let rows = stmt.query_map(params![owner], |row| {
                Ok((
                    row.get::<_, TaskStatus>(0)?,
                    row.get::<_, Priority>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<NaiveDate>>(3)?,
                ))
            })?;

            let mut summary = TaskSummary::default();
            for row in rows {
                let (status, priority, category, due_date) = row?;
                summary.total += 1;
                *summary.by_status.entry(status.as_str().to_string()).or_default() += 1;
                *summary.by_priority.entry(priority).or_default() += 1;
                if let Some(category) = category {
                    *summary.by_category.entry(category).or_default() += 1;
                }
                if is_overdue(status, due_date, today) {
                    summary.overdue += 1;
                }
            }
            Ok(summary)
        })
    }

    /// Creation and completion activity over the UTC days `start..=end`.
    pub fn task_analytics(
        &self,
        owner: &str,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> Result<TaskAnalytics> {
        let (from_ms, to_ms) = day_range_ms(start, end);
        let summary = self.task_summary(owner, today)?;

        self.with_conn(|conn| {
            let created: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks
                 WHERE owner = ?1 AND created_at >= ?2 AND created_at < ?3",
                params![owner, from_ms, to_ms],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT priority, category, estimated_hours, actual_hours FROM tasks
                 WHERE owner = ?1 AND status = ?2
                   AND completed_at >= ?3 AND completed_at < ?4",
            )?;
            let rows = stmt.query_map(
                params![owner, TaskStatus::Completed, from_ms, to_ms],
                |row| {
                    Ok((
                        row.get::<_, Priority>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                    ))
                },
            )?;

            let mut analytics = TaskAnalytics {
                period_days: ((end - start).num_days() + 1) as u32,
                period_start: start,
                period_end: end,
                created,
                completed: 0,
                completion_rate: 0.0,
                total_estimated_hours: 0.0,
                total_actual_hours: 0.0,
                by_category: BTreeMap::new(),
                by_priority: BTreeMap::new(),
                by_status: summary.by_status,
                overdue: summary.overdue,
            };
            for row in rows {
                let (priority, category, estimated, actual) = row?;
                analytics.completed += 1;
                analytics.total_estimated_hours += estimated.unwrap_or(0.0);
                analytics.total_actual_hours += actual.unwrap_or(0.0);
                let category = category.unwrap_or_else(|| UNCATEGORIZED.to_string());
                *analytics.by_category.entry(category).or_default() += 1;
                *analytics.by_priority.entry(priority).or_default() += 1;
            }
            if created > 0 {
                analytics.completion_rate = analytics.completed as f64 / created as f64 * 100.0;
            }
            Ok(analytics)
        })
    }
}

fn is_overdue(status: TaskStatus, due_date: Option<NaiveDate>, today: NaiveDate) -> bool {
    !status.is_completed() && due_date.is_some_and(|due| due < today)
}
