//! Goal completion forecasts from observed velocity.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};

/// Remaining work at or below this is treated as done.
const UNIT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForecastOutcome {
    /// Nothing outstanding under the goal.
    AlreadySatisfied,
    Predicted {
        completion_date: NaiveDate,
        days_remaining: i64,
    },
    /// Work remains but nothing has been completed in the window.
    Unpredictable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub goal_id: String,
    #[serde(flatten)]
    pub outcome: ForecastOutcome,
    pub remaining_units: f64,
    pub velocity_used: f64,
    pub window_days: u32,
    pub target_date: Option<NaiveDate>,
    /// Whether the predicted date meets the target. Unknown without both.
    pub on_track: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredVelocity {
    pub goal_id: String,
    pub target_date: NaiveDate,
    /// Calendar days from today to the target; zero or negative when overdue.
    pub days_until_target: i64,
    pub overdue: bool,
    pub remaining_units: f64,
    pub required_velocity: f64,
    pub current_velocity: f64,
    pub velocity_gap: f64,
    pub at_risk: bool,
}

/// Project a completion date for `remaining_units` at `velocity` tasks/day.
pub fn forecast(
    goal_id: &str,
    remaining_units: f64,
    velocity: f64,
    window_days: u32,
    target_date: Option<NaiveDate>,
    today: NaiveDate,
) -> Forecast {
    let outcome = if remaining_units <= UNIT_EPSILON {
        ForecastOutcome::AlreadySatisfied
    } else if velocity <= 0.0 {
        ForecastOutcome::Unpredictable
    } else {
        let days_remaining = (remaining_units / velocity).ceil() as i64;
        let completion_date = today
            .checked_add_days(Days::new(days_remaining.max(0) as u64))
            .unwrap_or(NaiveDate::MAX);
        ForecastOutcome::Predicted {
            completion_date,
            days_remaining,
        }
    };

    let on_track = match (&outcome, target_date) {
        (ForecastOutcome::AlreadySatisfied, Some(_)) => Some(true),
        (ForecastOutcome::Predicted { completion_date, .. }, Some(target)) => {
            Some(*completion_date <= target)
        }
        _ => None,
    };

    Forecast {
        goal_id: goal_id.to_string(),
        outcome,
        remaining_units: remaining_units.max(0.0),
        velocity_used: velocity,
        window_days,
        target_date,
        on_track,
    }
}

/// Rate needed to finish by the goal's target date, and whether it exceeds
/// `at_risk_multiple` times the current rate.
pub fn required_velocity(
    goal_id: &str,
    target_date: Option<NaiveDate>,
    remaining_units: f64,
    current_velocity: f64,
    today: NaiveDate,
    at_risk_multiple: f64,
) -> PlanResult<RequiredVelocity> {
    let target_date = target_date
        .ok_or_else(|| PlanError::validation("target_date", format!("goal {} has no target date", goal_id)))?;

    let remaining_units = remaining_units.max(0.0);
    let days_until_target = (target_date - today).num_days();
    let required = if remaining_units <= UNIT_EPSILON {
        0.0
    } else {
        remaining_units / days_until_target.max(1) as f64
    };

    Ok(RequiredVelocity {
        goal_id: goal_id.to_string(),
        target_date,
        days_until_target,
        overdue: days_until_target <= 0 && remaining_units > UNIT_EPSILON,
        remaining_units,
        required_velocity: required,
        current_velocity,
        velocity_gap: required - current_velocity,
        at_risk: required > at_risk_multiple * current_velocity,
    })
}
