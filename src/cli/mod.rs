//! CLI command definitions for goal-planner
//!
//! This module defines the CLI structure using clap's derive macros and
//! dispatches each subcommand to a [`Planner`] operation. Every command
//! produces a JSON value.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use crate::error::{PlanError, PlanResult};
use crate::service::Planner;
use crate::types::{
    GoalPatch, GoalStatus, Horizon, NewGoal, NewTask, Priority, TaskFilter, TaskPatch, TaskStatus,
};

/// Goal planning, progress roll-up and forecasting
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Owner whose goals and tasks are addressed
    #[arg(short, long, global = true, default_value = "default")]
    pub user: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage goals
    #[command(subcommand)]
    Goal(GoalCommand),

    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),

    /// Propose and accept goal breakdowns
    #[command(subcommand)]
    Breakdown(BreakdownCommand),

    /// Completion throughput over a trailing window
    Velocity {
        /// Window length in days (default from config)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Projected completion date of a goal, or of every active goal
    Forecast { goal_id: Option<String> },

    /// Velocity needed to meet a goal's target date
    Required { goal_id: String },
}

#[derive(Subcommand, Debug)]
pub enum GoalCommand {
    Create(GoalCreateArgs),
    List,
    Show { id: String },
    Update(GoalUpdateArgs),
    Delete { id: String },
    /// Recompute cached progress from tasks and subgoals
    Recompute { id: String },
    /// Counts and progress statistics
    Stats,
}

#[derive(Args, Debug)]
pub struct GoalCreateArgs {
    pub title: String,

    #[arg(long, value_parser = parse_horizon, default_value = "monthly")]
    pub horizon: Horizon,

    #[arg(long)]
    pub description: Option<String>,

    /// Target date (YYYY-MM-DD)
    #[arg(long)]
    pub target_date: Option<NaiveDate>,

    #[arg(long)]
    pub parent: Option<String>,

    #[arg(long)]
    pub criteria: Option<String>,
}

#[derive(Args, Debug)]
pub struct GoalUpdateArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long, value_parser = parse_horizon)]
    pub horizon: Option<Horizon>,

    #[arg(long, value_parser = parse_goal_status)]
    pub status: Option<GoalStatus>,

    #[arg(long)]
    pub target_date: Option<NaiveDate>,

    #[arg(long)]
    pub parent: Option<String>,

    /// Make this a top-level goal
    #[arg(long, conflicts_with = "parent")]
    pub clear_parent: bool,

    #[arg(long, conflicts_with = "target_date")]
    pub clear_target_date: bool,

    #[arg(long)]
    pub criteria: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    Create(TaskCreateArgs),
    List {
        #[arg(long, value_parser = parse_task_status)]
        status: Option<TaskStatus>,
        #[arg(long)]
        goal: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    Show { id: String },
    Update(TaskUpdateArgs),
    Complete {
        id: String,
        /// Complete even if dependencies are unfinished
        #[arg(long)]
        force: bool,
        /// Hours actually spent
        #[arg(long)]
        actual_hours: Option<f64>,
    },
    /// Return a completed task to pending
    Reopen { id: String },
    Delete { id: String },
    /// Lifecycle events of a task
    History { id: String },
    /// Counts by status, priority and category
    Stats,
    /// Completion rate and hours over recent days
    Analytics {
        /// Period length in days (1-90)
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Args, Debug)]
pub struct TaskCreateArgs {
    pub title: String,

    #[arg(long)]
    pub goal: Option<String>,

    /// 1 (highest) to 5 (lowest)
    #[arg(long)]
    pub priority: Option<Priority>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub estimate: Option<f64>,

    #[arg(long)]
    pub due: Option<NaiveDate>,

    /// Task ids this task depends on
    #[arg(long = "depends-on", value_delimiter = ',')]
    pub depends_on: Vec<String>,

    #[arg(long = "tag", value_delimiter = ',')]
    pub tags: Vec<String>,
}

#[derive(Args, Debug)]
pub struct TaskUpdateArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub priority: Option<Priority>,

    #[arg(long, value_parser = parse_task_status)]
    pub status: Option<TaskStatus>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub actual: Option<f64>,

    #[arg(long)]
    pub due: Option<NaiveDate>,

    #[arg(long)]
    pub goal: Option<String>,

    /// Replace the dependency set (comma separated; empty clears)
    #[arg(long = "depends-on", value_delimiter = ',', num_args = 0..)]
    pub depends_on: Option<Vec<String>>,

    /// Allow completing with unfinished dependencies
    #[arg(long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum BreakdownCommand {
    /// Ask the reasoning engine for candidate tasks
    Propose { goal_id: String },
    /// Create tasks from selected suggestions of a token
    Accept {
        token_id: String,
        #[arg(required = true, value_delimiter = ',')]
        indices: Vec<usize>,
    },
}

fn parse_horizon(s: &str) -> Result<Horizon, String> {
    Horizon::parse(s).ok_or_else(|| format!("unknown horizon '{}'", s))
}

fn parse_goal_status(s: &str) -> Result<GoalStatus, String> {
    GoalStatus::parse(s).ok_or_else(|| format!("unknown goal status '{}'", s))
}

fn parse_task_status(s: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse(s).ok_or_else(|| format!("unknown task status '{}'", s))
}

fn to_json<T: Serialize>(value: T) -> PlanResult<Value> {
    serde_json::to_value(value).map_err(|e| PlanError::Internal(e.to_string()))
}

/// Run one command for `owner`.
pub async fn run(planner: &Planner, owner: &str, command: Command) -> PlanResult<Value> {
    match command {
        Command::Goal(cmd) => run_goal(planner, owner, cmd),
        Command::Task(cmd) => run_task(planner, owner, cmd),
        Command::Breakdown(BreakdownCommand::Propose { goal_id }) => {
            to_json(planner.propose_breakdown(owner, &goal_id).await?)
        }
        Command::Breakdown(BreakdownCommand::Accept { token_id, indices }) => {
            to_json(planner.accept_breakdown(owner, &token_id, &indices)?)
        }
        Command::Velocity { days } => to_json(planner.get_velocity(owner, days)?),
        Command::Forecast { goal_id: Some(goal_id) } => to_json(planner.get_forecast(owner, &goal_id)?),
        Command::Forecast { goal_id: None } => to_json(planner.get_all_forecasts(owner)?),
        Command::Required { goal_id } => to_json(planner.get_required_velocity(owner, &goal_id)?),
    }
}

fn run_goal(planner: &Planner, owner: &str, cmd: GoalCommand) -> PlanResult<Value> {
    match cmd {
        GoalCommand::Create(args) => {
            let input = NewGoal {
                description: args.description,
                target_date: args.target_date,
                parent_goal_id: args.parent,
                success_criteria: args.criteria,
                ..NewGoal::new(args.title, args.horizon)
            };
            to_json(planner.create_goal(owner, &input)?)
        }
        GoalCommand::List => to_json(planner.list_goals(owner)?),
        GoalCommand::Show { id } => to_json(planner.get_goal(owner, &id)?),
        GoalCommand::Update(args) => {
            let patch = GoalPatch {
                title: args.title,
                description: args.description.map(Some),
                horizon: args.horizon,
                target_date: if args.clear_target_date {
                    Some(None)
                } else {
                    args.target_date.map(Some)
                },
                status: args.status,
                parent_goal_id: if args.clear_parent {
                    Some(None)
                } else {
                    args.parent.map(Some)
                },
                success_criteria: args.criteria.map(Some),
                metrics: None,
            };
            to_json(planner.update_goal(owner, &args.id, &patch)?)
        }
        GoalCommand::Delete { id } => {
            planner.delete_goal(owner, &id)?;
            to_json(serde_json::json!({ "deleted": id }))
        }
        GoalCommand::Recompute { id } => {
            let progress = planner.recompute_progress(owner, &id)?;
            to_json(serde_json::json!({ "goal_id": id, "progress_percentage": progress }))
        }
        GoalCommand::Stats => to_json(planner.goal_summary(owner)?),
    }
}

fn run_task(planner: &Planner, owner: &str, cmd: TaskCommand) -> PlanResult<Value> {
    match cmd {
        TaskCommand::Create(args) => {
            let input = NewTask {
                title: args.title,
                description: args.description,
                priority: args.priority,
                category: args.category,
                estimated_hours: args.estimate,
                due_date: args.due,
                parent_goal_id: args.goal,
                dependencies: args.depends_on,
                tags: args.tags,
                ..Default::default()
            };
            to_json(planner.create_task(owner, &input)?)
        }
        TaskCommand::List {
            status,
            goal,
            category,
        } => {
            let filter = TaskFilter {
                status,
                parent_goal_id: goal,
                category,
            };
            to_json(planner.list_tasks(owner, &filter)?)
        }
        TaskCommand::Show { id } => to_json(planner.get_task(owner, &id)?),
        TaskCommand::Update(args) => {
            let patch = TaskPatch {
                title: args.title,
                priority: args.priority,
                status: args.status,
                category: args.category.map(Some),
                actual_hours: args.actual.map(Some),
                due_date: args.due.map(Some),
                parent_goal_id: args.goal.map(Some),
                dependencies: args.depends_on,
                force: args.force,
                ..Default::default()
            };
            to_json(planner.update_task(owner, &args.id, &patch)?)
        }
        TaskCommand::Complete {
            id,
            force,
            actual_hours,
        } => to_json(planner.complete_task_with_hours(owner, &id, force, actual_hours)?),
        TaskCommand::Reopen { id } => to_json(planner.uncomplete_task(owner, &id)?),
        TaskCommand::Delete { id } => {
            planner.delete_task(owner, &id)?;
            to_json(serde_json::json!({ "deleted": id }))
        }
        TaskCommand::History { id } => to_json(planner.task_history(owner, &id)?),
        TaskCommand::Stats => to_json(planner.task_summary(owner)?),
        TaskCommand::Analytics { days } => to_json(planner.get_task_analytics(owner, days)?),
    }
}
