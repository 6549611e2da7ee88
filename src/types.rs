//! Core types for the goal planner.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PlanError, PlanResult};

/// Task priority, 1 = highest, 5 = lowest.
pub type Priority = i32;

pub const PRIORITY_HIGHEST: Priority = 1;
pub const PRIORITY_LOWEST: Priority = 5;
pub const PRIORITY_DEFAULT: Priority = 3;

/// Longest accepted goal or task title, in characters.
pub const MAX_TITLE_LEN: usize = 500;

/// Time-scale classification of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Horizon {
    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::Weekly => "weekly",
            Horizon::Monthly => "monthly",
            Horizon::Quarterly => "quarterly",
            Horizon::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "weekly" => Some(Horizon::Weekly),
            "monthly" => Some(Horizon::Monthly),
            "quarterly" => Some(Horizon::Quarterly),
            "yearly" => Some(Horizon::Yearly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Completed,
    OnHold,
    Cancelled,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Completed => "completed",
            GoalStatus::OnHold => "on_hold",
            GoalStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(GoalStatus::Active),
            "completed" => Some(GoalStatus::Completed),
            "on_hold" => Some(GoalStatus::OnHold),
            "cancelled" => Some(GoalStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "blocked" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

/// A user-declared objective. Goals form a per-owner tree via `parent_goal_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub owner: String,
    pub parent_goal_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub horizon: Horizon,
    pub target_date: Option<NaiveDate>,
    pub status: GoalStatus,
    /// Cached roll-up, always derivable from task and subgoal state.
    pub progress_percentage: u8,
    pub success_criteria: Option<String>,
    pub metrics: BTreeMap<String, f64>,
    /// Optimistic concurrency version, bumped on every write to the row.
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

/// A concrete unit of work, optionally attached to a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner: String,
    pub parent_goal_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub category: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub due_date: Option<NaiveDate>,
    /// Ids of tasks that must be completed before this one.
    pub dependencies: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

/// Input for creating a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGoal {
    pub title: String,
    pub description: Option<String>,
    pub horizon: Horizon,
    pub target_date: Option<NaiveDate>,
    pub parent_goal_id: Option<String>,
    pub success_criteria: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl NewGoal {
    pub fn new(title: impl Into<String>, horizon: Horizon) -> Self {
        Self {
            title: title.into(),
            description: None,
            horizon,
            target_date: None,
            parent_goal_id: None,
            success_criteria: None,
            metrics: BTreeMap::new(),
        }
    }
}

/// Partial goal update. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct GoalPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub horizon: Option<Horizon>,
    pub target_date: Option<Option<NaiveDate>>,
    pub status: Option<GoalStatus>,
    pub parent_goal_id: Option<Option<String>>,
    pub success_criteria: Option<Option<String>>,
    pub metrics: Option<BTreeMap<String, f64>>,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub parent_goal_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn under_goal(mut self, goal_id: impl Into<String>) -> Self {
        self.parent_goal_id = Some(goal_id.into());
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Partial task update. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub category: Option<Option<String>>,
    pub estimated_hours: Option<Option<f64>>,
    pub actual_hours: Option<Option<f64>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub parent_goal_id: Option<Option<String>>,
    pub dependencies: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<Option<String>>,
    /// Complete even when dependencies are unfinished (recorded as a warning).
    pub force: bool,
}

/// Filter for task listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub parent_goal_id: Option<String>,
    pub category: Option<String>,
}

/// An entry in a task's lifecycle log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: i64,
    pub task_id: String,
    pub event: String,
    pub reason: Option<String>,
    pub timestamp: i64,
}

/// Result of `complete_task`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompleteOutcome {
    Completed {
        task: Task,
        /// Unfinished dependencies that were overridden by `force`.
        overridden: Vec<String>,
    },
    AlreadyCompleted { task: Task },
}

impl CompleteOutcome {
    pub fn task(&self) -> &Task {
        match self {
            CompleteOutcome::Completed { task, .. } => task,
            CompleteOutcome::AlreadyCompleted { task } => task,
        }
    }
}

/// Result of `uncomplete_task`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UncompleteOutcome {
    Reopened { task: Task },
    NotCompleted { task: Task },
}

impl UncompleteOutcome {
    pub fn task(&self) -> &Task {
        match self {
            UncompleteOutcome::Reopened { task } => task,
            UncompleteOutcome::NotCompleted { task } => task,
        }
    }
}

/// A candidate task proposed by the reasoning engine, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownSuggestion {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub category: Option<String>,
    pub estimated_hours: Option<f64>,
    pub reasoning: Option<String>,
}

/// A single-use handle on a proposed set of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownToken {
    pub id: String,
    pub owner: String,
    pub goal_id: String,
    pub suggestions: Vec<BreakdownSuggestion>,
    pub reasoning: String,
    pub estimated_timeline: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub consumed: bool,
}

impl BreakdownToken {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Owner-wide goal statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalSummary {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_horizon: BTreeMap<String, i64>,
    /// Mean progress of active goals.
    pub average_progress: f64,
    /// Active goals at 80% or more.
    pub near_completion: i64,
}

/// Owner-wide task statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_priority: BTreeMap<Priority, i64>,
    /// Categorized tasks only.
    pub by_category: BTreeMap<String, i64>,
    /// Not completed and due before today.
    pub overdue: i64,
}

/// Category key for completed tasks without one.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Task throughput over the last `period_days` UTC calendar days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAnalytics {
    pub period_days: u32,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub created: i64,
    pub completed: i64,
    /// Completed over created in the period, as a percentage; 0 when nothing
    /// was created.
    pub completion_rate: f64,
    /// Hours of the tasks completed in the period.
    pub total_estimated_hours: f64,
    pub total_actual_hours: f64,
    /// Completed tasks in the period by category.
    pub by_category: BTreeMap<String, i64>,
    /// Completed tasks in the period by priority.
    pub by_priority: BTreeMap<Priority, i64>,
    /// Current status of all tasks.
    pub by_status: BTreeMap<String, i64>,
    pub overdue: i64,
}

// =============================================================================
// Shared field validation
// =============================================================================

pub fn validate_title(field: &str, title: &str) -> PlanResult<()> {
    if title.trim().is_empty() {
        return Err(PlanError::validation(field, "must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(PlanError::validation(
            field,
            format!("must be at most {} characters", MAX_TITLE_LEN),
        ));
    }
    Ok(())
}

pub fn validate_priority(priority: Priority) -> PlanResult<()> {
    if !(PRIORITY_HIGHEST..=PRIORITY_LOWEST).contains(&priority) {
        return Err(PlanError::validation(
            "priority",
            format!(
                "must be between {} and {}, got {}",
                PRIORITY_HIGHEST, PRIORITY_LOWEST, priority
            ),
        ));
    }
    Ok(())
}

pub fn validate_hours(field: &str, hours: Option<f64>) -> PlanResult<()> {
    match hours {
        Some(h) if !h.is_finite() || h < 0.0 => Err(PlanError::validation(
            field,
            "must be a non-negative number",
        )),
        _ => Ok(()),
    }
}

pub fn validate_metrics(metrics: &BTreeMap<String, f64>) -> PlanResult<()> {
    if let Some((key, _)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(PlanError::validation(
            "metrics",
            format!("value for '{}' must be a finite number", key),
        ));
    }
    Ok(())
}

/// Trim, drop empties, and dedupe tag input.
pub fn normalize_tags(tags: Vec<String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Blocked,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(GoalStatus::parse("ON_HOLD"), Some(GoalStatus::OnHold));
        assert_eq!(Horizon::parse("fortnightly"), None);
    }

    #[test]
    fn title_limits() {
        assert!(validate_title("title", "Ship it").is_ok());
        assert!(validate_title("title", "   ").is_err());
        assert!(validate_title("title", &"x".repeat(MAX_TITLE_LEN)).is_ok());
        assert!(validate_title("title", &"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn priority_and_hours_bounds() {
        assert!(validate_priority(1).is_ok());
        assert!(validate_priority(5).is_ok());
        assert!(validate_priority(0).is_err());
        assert!(validate_priority(6).is_err());
        assert!(validate_hours("estimated_hours", None).is_ok());
        assert!(validate_hours("estimated_hours", Some(0.0)).is_ok());
        assert!(validate_hours("estimated_hours", Some(-0.5)).is_err());
        assert!(validate_hours("estimated_hours", Some(f64::NAN)).is_err());
    }

    #[test]
    fn tags_are_trimmed_and_deduped() {
        let tags = normalize_tags(vec![" a ".into(), "a".into(), "".into(), "b".into()]);
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
