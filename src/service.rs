//! Caller-facing planner operations.
//!
//! `Planner` is the surface an API layer talks to. Every operation is scoped
//! to an owner and returns a typed value or a [`PlanError`].

use std::sync::Arc;

use crate::breakdown::{Decomposer, DecomposerSettings, HttpReasoningEngine, Proposal, ReasoningEngine};
use crate::config::{AnalyticsConfig, Config};
use crate::db::{Database, today_utc, utc_from_ms};
use crate::error::{PlanError, PlanResult};
use crate::forecast::{self, Forecast, RequiredVelocity};
use crate::types::{
    CompleteOutcome, Goal, GoalPatch, GoalStatus, GoalSummary, NewGoal, NewTask, Task,
    TaskAnalytics, TaskEvent, TaskFilter, TaskPatch, TaskSummary, UncompleteOutcome,
};
use crate::velocity::{self, Completion, VelocityReport};
use chrono::NaiveDate;

/// Longest accepted velocity window.
pub const MAX_WINDOW_DAYS: u32 = 3650;

/// Task analytics period when none is given, and its upper bound.
pub const DEFAULT_ANALYTICS_DAYS: u32 = 7;
pub const MAX_ANALYTICS_DAYS: u32 = 90;

pub struct Planner {
    db: Database,
    decomposer: Decomposer,
    analytics: AnalyticsConfig,
}

impl Planner {
    pub fn new(
        db: Database,
        engine: Arc<dyn ReasoningEngine>,
        settings: DecomposerSettings,
        analytics: AnalyticsConfig,
    ) -> Self {
        let decomposer = Decomposer::new(db.clone(), engine, settings);
        Self {
            db,
            decomposer,
            analytics,
        }
    }

    /// Open the configured database and reasoning engine.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.ensure_db_dir()?;
        let db = Database::open(&config.store.db_path)?
            .with_conflict_retries(config.progress.max_retries);
        let engine = Arc::new(HttpReasoningEngine::new(&config.reasoning)?);
        Ok(Self::new(
            db,
            engine,
            DecomposerSettings::from_config(config),
            config.analytics.clone(),
        ))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // Goals

    pub fn create_goal(&self, owner: &str, input: &NewGoal) -> PlanResult<Goal> {
        Ok(self.db.create_goal(owner, input)?)
    }

    pub fn get_goal(&self, owner: &str, goal_id: &str) -> PlanResult<Goal> {
        Ok(self.db.get_goal(owner, goal_id)?)
    }

    pub fn list_goals(&self, owner: &str) -> PlanResult<Vec<Goal>> {
        Ok(self.db.list_goals(owner)?)
    }

    pub fn update_goal(&self, owner: &str, goal_id: &str, patch: &GoalPatch) -> PlanResult<Goal> {
        Ok(self.db.update_goal(owner, goal_id, patch)?)
    }

    pub fn delete_goal(&self, owner: &str, goal_id: &str) -> PlanResult<()> {
        Ok(self.db.delete_goal(owner, goal_id)?)
    }

    /// Recompute a goal's progress (and its ancestors') from current state.
    pub fn recompute_progress(&self, owner: &str, goal_id: &str) -> PlanResult<u8> {
        Ok(self.db.recompute_goal(owner, goal_id)?)
    }

    pub fn goal_summary(&self, owner: &str) -> PlanResult<GoalSummary> {
        Ok(self.db.goal_summary(owner)?)
    }

    // Tasks

    pub fn create_task(&self, owner: &str, input: &NewTask) -> PlanResult<Task> {
        Ok(self.db.create_task(owner, input)?)
    }

    pub fn get_task(&self, owner: &str, task_id: &str) -> PlanResult<Task> {
        Ok(self.db.get_task(owner, task_id)?)
    }

    pub fn list_tasks(&self, owner: &str, filter: &TaskFilter) -> PlanResult<Vec<Task>> {
        Ok(self.db.list_tasks(owner, filter)?)
    }

    pub fn update_task(&self, owner: &str, task_id: &str, patch: &TaskPatch) -> PlanResult<Task> {
        Ok(self.db.update_task(owner, task_id, patch)?)
    }

    pub fn complete_task(&self, owner: &str, task_id: &str, force: bool) -> PlanResult<CompleteOutcome> {
        Ok(self.db.complete_task(owner, task_id, force)?)
    }

    /// Complete a task and record the hours spent on it.
    pub fn complete_task_with_hours(
        &self,
        owner: &str,
        task_id: &str,
        force: bool,
        actual_hours: Option<f64>,
    ) -> PlanResult<CompleteOutcome> {
        Ok(self
            .db
            .complete_task_with_hours(owner, task_id, force, actual_hours)?)
    }

    pub fn uncomplete_task(&self, owner: &str, task_id: &str) -> PlanResult<UncompleteOutcome> {
        Ok(self.db.uncomplete_task(owner, task_id)?)
    }

    pub fn delete_task(&self, owner: &str, task_id: &str) -> PlanResult<()> {
        Ok(self.db.delete_task(owner, task_id)?)
    }

    pub fn task_history(&self, owner: &str, task_id: &str) -> PlanResult<Vec<TaskEvent>> {
        Ok(self.db.task_history(owner, task_id)?)
    }

    /// Task counts by status, priority and category, with overdue tasks as of today (UTC).
    pub fn task_summary(&self, owner: &str) -> PlanResult<TaskSummary> {
        Ok(self.db.task_summary(owner, today_utc())?)
    }

    // Breakdown

    pub async fn propose_breakdown(&self, owner: &str, goal_id: &str) -> PlanResult<Proposal> {
        self.decomposer.propose(owner, goal_id).await
    }

    pub fn accept_breakdown(&self, owner: &str, token_id: &str, indices: &[usize]) -> PlanResult<Vec<Task>> {
        self.decomposer.accept(owner, token_id, indices)
    }

    // Analytics

    fn window(&self, window_days: Option<u32>) -> PlanResult<u32> {
        let days = window_days.unwrap_or(self.analytics.default_window_days);
        if days == 0 || days > MAX_WINDOW_DAYS {
            return Err(PlanError::validation(
                "window_days",
                format!("must be between 1 and {}", MAX_WINDOW_DAYS),
            ));
        }
        Ok(days)
    }

    /// Velocity over the window ending today (UTC).
    pub fn get_velocity(&self, owner: &str, window_days: Option<u32>) -> PlanResult<VelocityReport> {
        self.velocity_on(owner, window_days, today_utc())
    }

    /// Velocity over the window ending on `today`.
    pub fn velocity_on(
        &self,
        owner: &str,
        window_days: Option<u32>,
        today: NaiveDate,
    ) -> PlanResult<VelocityReport> {
        let window_days = self.window(window_days)?;
        let (from, to) = velocity::query_range(window_days, today);
        let completions: Vec<Completion> = self
            .db
            .completions_between(owner, from, to)?
            .into_iter()
            .map(|(ms, priority)| Completion {
                completed_at: utc_from_ms(ms),
                priority,
            })
            .collect();

        Ok(velocity::analyze(
            &completions,
            window_days,
            today,
            self.analytics.trend_threshold,
        ))
    }

    /// Task activity over the period ending today (UTC).
    pub fn get_task_analytics(&self, owner: &str, period_days: Option<u32>) -> PlanResult<TaskAnalytics> {
        self.task_analytics_on(owner, period_days, today_utc())
    }

    /// Task activity over the `period_days` calendar days ending on `today`.
    pub fn task_analytics_on(
        &self,
        owner: &str,
        period_days: Option<u32>,
        today: NaiveDate,
    ) -> PlanResult<TaskAnalytics> {
        let days = period_days.unwrap_or(DEFAULT_ANALYTICS_DAYS);
        if days == 0 || days > MAX_ANALYTICS_DAYS {
            return Err(PlanError::validation(
                "period_days",
                format!("must be between 1 and {}", MAX_ANALYTICS_DAYS),
            ));
        }
        let (start, end) = velocity::window_dates(days, today);
        Ok(self.db.task_analytics(owner, start, end, today)?)
    }

    /// Projected completion date of a goal at the owner's default-window velocity.
    pub fn get_forecast(&self, owner: &str, goal_id: &str) -> PlanResult<Forecast> {
        let today = today_utc();
        let goal = self.db.get_goal(owner, goal_id)?;
        let remaining = self.db.remaining_units(owner, goal_id)?;
        let report = self.velocity_on(owner, None, today)?;

        Ok(forecast::forecast(
            &goal.id,
            remaining,
            report.tasks_per_day,
            report.window_days,
            goal.target_date,
            today,
        ))
    }

    /// Forecasts for every active goal of the owner, oldest goal first.
    /// Velocity is measured once and shared by all of them.
    pub fn get_all_forecasts(&self, owner: &str) -> PlanResult<Vec<Forecast>> {
        let today = today_utc();
        let report = self.velocity_on(owner, None, today)?;

        let mut forecasts = Vec::new();
        for goal in self.db.list_goals(owner)? {
            if goal.status != GoalStatus::Active {
                continue;
            }
            let remaining = self.db.remaining_units(owner, &goal.id)?;
            forecasts.push(forecast::forecast(
                &goal.id,
                remaining,
                report.tasks_per_day,
                report.window_days,
                goal.target_date,
                today,
            ));
        }
        Ok(forecasts)
    }

    /// Velocity needed to meet the goal's target date.
    pub fn get_required_velocity(&self, owner: &str, goal_id: &str) -> PlanResult<RequiredVelocity> {
        let today = today_utc();
        let goal = self.db.get_goal(owner, goal_id)?;
        let remaining = self.db.remaining_units(owner, goal_id)?;
        let report = self.velocity_on(owner, None, today)?;

        forecast::required_velocity(
            &goal.id,
            goal.target_date,
            remaining,
            report.tasks_per_day,
            today,
            self.analytics.at_risk_multiple,
        )
    }
}
