//! Breakdown request prompt.

use chrono::NaiveDate;
use serde::Serialize;

use crate::types::{Goal, Horizon};

/// Everything the engine is told about a goal.
#[derive(Debug, Clone, Serialize)]
pub struct BreakdownContext {
    pub title: String,
    pub description: Option<String>,
    pub success_criteria: Option<String>,
    pub horizon: Horizon,
    pub target_date: Option<NaiveDate>,
    /// Titles of tasks already under the goal.
    pub existing_tasks: Vec<String>,
    pub max_suggestions: usize,
}

impl BreakdownContext {
    pub fn new(goal: &Goal, existing_tasks: Vec<String>, max_suggestions: usize) -> Self {
        Self {
            title: goal.title.clone(),
            description: goal.description.clone(),
            success_criteria: goal.success_criteria.clone(),
            horizon: goal.horizon,
            target_date: goal.target_date,
            existing_tasks,
            max_suggestions,
        }
    }
}

pub fn build_prompt(ctx: &BreakdownContext) -> String {
    let mut prompt = format!(
        "You are a planning assistant. Break down the following goal into at most {} \
         concrete, actionable tasks.\n\n\
         Goal: {}\n\
         Horizon: {}\n\
         Description: {}\n\
         Success Criteria: {}\n\
         Target Date: {}\n",
        ctx.max_suggestions,
        ctx.title,
        ctx.horizon.as_str(),
        ctx.description.as_deref().unwrap_or("No description provided"),
        ctx.success_criteria.as_deref().unwrap_or("Not specified"),
        ctx.target_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "None".to_string()),
    );

    if !ctx.existing_tasks.is_empty() {
        prompt.push_str("\nTasks that already exist for this goal (do not repeat them):\n");
        for title in &ctx.existing_tasks {
            prompt.push_str("- ");
            prompt.push_str(title);
            prompt.push('\n');
        }
    }

    prompt.push_str(
        "\nFor each task provide a clear action-oriented title, a one or two sentence \
         description, a priority (1 = highest, 5 = lowest), estimated hours if applicable, \
         a category, and a short reason for including it.\n\n\
         Respond with JSON only, in this shape:\n\
         {\n\
         \x20 \"tasks\": [\n\
         \x20   {\"title\": \"...\", \"description\": \"...\", \"priority\": 1, \
         \"estimated_hours\": 2.5, \"category\": \"...\", \"reasoning\": \"...\"}\n\
         \x20 ],\n\
         \x20 \"reasoning\": \"overall breakdown strategy\",\n\
         \x20 \"estimated_timeline\": \"e.g. 3 weeks\"\n\
         }\n",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(existing: Vec<String>) -> BreakdownContext {
        BreakdownContext {
            title: "Launch newsletter".into(),
            description: None,
            success_criteria: Some("500 subscribers".into()),
            horizon: Horizon::Quarterly,
            target_date: NaiveDate::from_ymd_opt(2026, 6, 30),
            existing_tasks: existing,
            max_suggestions: 8,
        }
    }

    #[test]
    fn prompt_carries_goal_context() {
        let prompt = build_prompt(&ctx(vec![]));
        assert!(prompt.contains("at most 8"));
        assert!(prompt.contains("Goal: Launch newsletter"));
        assert!(prompt.contains("Horizon: quarterly"));
        assert!(prompt.contains("Success Criteria: 500 subscribers"));
        assert!(prompt.contains("Target Date: 2026-06-30"));
        assert!(!prompt.contains("already exist"));
    }

    #[test]
    fn prompt_lists_existing_tasks() {
        let prompt = build_prompt(&ctx(vec!["Pick a platform".into()]));
        assert!(prompt.contains("- Pick a platform\n"));
    }
}
