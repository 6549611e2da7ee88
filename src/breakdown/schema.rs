//! Validation of reasoning engine output and selection of accepted suggestions.
//!
//! The engine's reply is untrusted text. The envelope must be JSON with a
//! `tasks` array or the whole reply is rejected; each item is then checked on
//! its own and dropped (with a warning) if it does not conform.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

use crate::error::{PlanError, PlanResult};
use crate::types::{
    BreakdownSuggestion, Goal, NewTask, Priority, validate_hours, validate_priority,
    validate_title,
};

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    tasks: Vec<Value>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    estimated_timeline: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSuggestion {
    title: String,
    #[serde(default)]
    description: Option<String>,
    priority: Priority,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    estimated_hours: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// A suggestion removed during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedSuggestion {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ParsedBreakdown {
    pub suggestions: Vec<BreakdownSuggestion>,
    pub reasoning: String,
    pub estimated_timeline: String,
    pub dropped: Vec<DroppedSuggestion>,
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    // language tag, e.g. ```json
    let tag_len = after
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after.len());
    let body = &after[tag_len..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn check_suggestion(raw: RawSuggestion) -> PlanResult<BreakdownSuggestion> {
    validate_title("title", &raw.title)?;
    validate_priority(raw.priority)?;
    validate_hours("estimated_hours", raw.estimated_hours)?;

    Ok(BreakdownSuggestion {
        title: raw.title.trim().to_string(),
        description: raw.description.filter(|d| !d.trim().is_empty()),
        priority: raw.priority,
        category: raw.category.filter(|c| !c.trim().is_empty()),
        estimated_hours: raw.estimated_hours,
        reasoning: raw.reasoning.filter(|r| !r.trim().is_empty()),
    })
}

/// Parse and validate an engine reply.
///
/// Items that fail the schema or duplicate an existing title (or an earlier
/// item) are dropped; at most `max_suggestions` survivors are kept.
pub fn parse_response(
    text: &str,
    existing_titles: &[String],
    max_suggestions: usize,
) -> PlanResult<ParsedBreakdown> {
    // Fences are only stripped from replies that do not parse as they stand,
    // so backticks inside string values survive.
    let envelope = serde_json::from_str::<RawEnvelope>(text.trim())
        .or_else(|_| serde_json::from_str(strip_fences(text)))
        .map_err(|e| PlanError::UpstreamInvalidResponse {
            reason: format!("expected a JSON object with a tasks array: {}", e),
        })?;

    let mut seen: HashSet<String> = existing_titles
        .iter()
        .map(|t| normalize_title(t))
        .filter(|t| !t.is_empty())
        .collect();

    let mut suggestions = Vec::new();
    let mut dropped = Vec::new();

    for (index, item) in envelope.tasks.into_iter().enumerate() {
        let checked = serde_json::from_value::<RawSuggestion>(item)
            .map_err(|e| e.to_string())
            .and_then(|raw| check_suggestion(raw).map_err(|e| e.to_string()));

        let reason = match checked {
            Ok(suggestion) => {
                let key = normalize_title(&suggestion.title);
                if key.is_empty() || seen.insert(key) {
                    if suggestions.len() < max_suggestions {
                        suggestions.push(suggestion);
                        continue;
                    }
                    format!("beyond the limit of {} suggestions", max_suggestions)
                } else {
                    format!("duplicate of existing task '{}'", suggestion.title)
                }
            }
            Err(reason) => reason,
        };

        warn!(index, reason = %reason, "Dropping breakdown suggestion");
        dropped.push(DroppedSuggestion { index, reason });
    }

    Ok(ParsedBreakdown {
        suggestions,
        reasoning: envelope
            .reasoning
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "No reasoning provided".to_string()),
        estimated_timeline: envelope
            .estimated_timeline
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Not estimated".to_string()),
        dropped,
    })
}

/// Resolve selected indices against a token's suggestions, in the order
/// given. Repeated indices select once.
pub fn select_suggestions<'a>(
    suggestions: &'a [BreakdownSuggestion],
    indices: &[usize],
) -> PlanResult<Vec<&'a BreakdownSuggestion>> {
    if indices.is_empty() {
        return Err(PlanError::validation(
            "indices",
            "select at least one suggestion",
        ));
    }

    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for &index in indices {
        let suggestion = suggestions.get(index).ok_or(PlanError::IndexOutOfRange {
            index,
            len: suggestions.len(),
        })?;
        if seen.insert(index) {
            selected.push(suggestion);
        }
    }
    Ok(selected)
}

/// Due dates for `count` tasks spread evenly from `today` to `target`.
/// Task `i` is due `today + floor(days * (i + 1) / count)`; a target that is
/// not in the future yields no due dates.
pub fn spread_due_dates(today: NaiveDate, target: Option<NaiveDate>, count: usize) -> Vec<Option<NaiveDate>> {
    let Some(target) = target.filter(|t| *t > today) else {
        return vec![None; count];
    };
    let days = (target - today).num_days() as u64;
    let n = count.max(1) as u64;
    (0..count as u64)
        .map(|i| today.checked_add_days(Days::new(days * (i + 1) / n)))
        .collect()
}

/// Task inputs for the selected suggestions of a token on `goal`.
pub fn plan_accepted_tasks(
    suggestions: &[BreakdownSuggestion],
    indices: &[usize],
    goal: &Goal,
    today: NaiveDate,
) -> PlanResult<Vec<NewTask>> {
    let selected = select_suggestions(suggestions, indices)?;
    let due_dates = spread_due_dates(today, goal.target_date, selected.len());

    Ok(selected
        .into_iter()
        .zip(due_dates)
        .map(|(s, due_date)| NewTask {
            title: s.title.clone(),
            description: s.description.clone(),
            priority: Some(s.priority),
            category: s.category.clone(),
            estimated_hours: s.estimated_hours,
            due_date,
            parent_goal_id: Some(goal.id.clone()),
            notes: s.reasoning.clone(),
            ..Default::default()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(title: &str) -> BreakdownSuggestion {
        BreakdownSuggestion {
            title: title.into(),
            description: None,
            priority: 3,
            category: None,
            estimated_hours: None,
            reasoning: None,
        }
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("Here you go:\n```\n[1]\n```\nthanks"), "[1]");
        assert_eq!(strip_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn backticks_inside_valid_json_are_kept() {
        let reply = r#"{"tasks":[{"title":"Document the ```config``` block","priority":2}],"reasoning":"r"}"#;
        let parsed = parse_response(reply, &[], 10).unwrap();
        assert_eq!(parsed.suggestions.len(), 1);
        assert_eq!(parsed.suggestions[0].title, "Document the ```config``` block");
        assert_eq!(parsed.reasoning, "r");
    }

    #[test]
    fn fenced_reply_still_parses() {
        let reply = "Sure:\n```json\n{\"tasks\":[{\"title\":\"Write intro\",\"priority\":1}]}\n```";
        let parsed = parse_response(reply, &[], 10).unwrap();
        assert_eq!(parsed.suggestions[0].title, "Write intro");
    }

    #[test]
    fn titles_normalize_for_comparison() {
        assert_eq!(normalize_title("  Set up   CI/CD!! "), "set up ci cd");
        assert_eq!(normalize_title("Write the README."), normalize_title("write the readme"));
    }

    #[test]
    fn invalid_items_are_dropped_individually() {
        let reply = r#"{
            "tasks": [
                {"title": "Draft outline", "priority": 1, "estimated_hours": 2},
                {"title": "", "priority": 2},
                {"title": "Too urgent", "priority": 0},
                {"title": "Negative", "priority": 3, "estimated_hours": -1},
                {"title": "No priority"},
                {"title": "Extra field", "priority": 2, "owner": "someone"},
                {"title": "Review draft", "priority": 2, "category": "writing"}
            ],
            "reasoning": "outline first",
            "estimated_timeline": "2 weeks"
        }"#;

        let parsed = parse_response(reply, &[], 10).unwrap();
        let titles: Vec<_> = parsed.suggestions.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Draft outline", "Review draft"]);
        assert_eq!(parsed.dropped.len(), 5);
        assert_eq!(parsed.reasoning, "outline first");
        assert_eq!(parsed.estimated_timeline, "2 weeks");
    }

    #[test]
    fn duplicates_of_existing_and_batch_titles_are_dropped() {
        let reply = r#"{"tasks": [
            {"title": "Set up CI", "priority": 2},
            {"title": "Write docs", "priority": 3},
            {"title": "write DOCS!", "priority": 3}
        ]}"#;
        let parsed = parse_response(reply, &["set up ci.".to_string()], 10).unwrap();
        let titles: Vec<_> = parsed.suggestions.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Write docs"]);
        assert_eq!(parsed.dropped.len(), 2);
    }

    #[test]
    fn surplus_suggestions_are_truncated() {
        let reply = r#"{"tasks": [
            {"title": "A", "priority": 1},
            {"title": "B", "priority": 1},
            {"title": "C", "priority": 1}
        ]}"#;
        let parsed = parse_response(reply, &[], 2).unwrap();
        assert_eq!(parsed.suggestions.len(), 2);
        assert_eq!(parsed.dropped[0].index, 2);
    }

    #[test]
    fn unparseable_reply_is_invalid_response() {
        for reply in ["I cannot help with that", "{\"steps\": []}", "[1, 2]"] {
            let err = parse_response(reply, &[], 10).unwrap_err();
            assert_eq!(err.code(), crate::error::ErrorCode::UpstreamInvalidResponse);
        }
    }

    #[test]
    fn selection_checks_range_and_dedupes() {
        let all = vec![suggestion("a"), suggestion("b")];
        let picked = select_suggestions(&all, &[1, 0, 1]).unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].title, "b");

        match select_suggestions(&all, &[0, 2]).unwrap_err() {
            PlanError::IndexOutOfRange { index, len } => assert_eq!((index, len), (2, 2)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(select_suggestions(&all, &[]).is_err());
    }

    #[test]
    fn due_dates_spread_to_target() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let target = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let dates = spread_due_dates(today, Some(target), 3);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2026, 1, 11),
                NaiveDate::from_ymd_opt(2026, 1, 21),
                Some(target),
            ]
        );
        assert_eq!(spread_due_dates(today, None, 2), vec![None, None]);
        assert_eq!(spread_due_dates(target, Some(today), 1), vec![None]);
    }
}
