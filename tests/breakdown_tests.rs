//! Integration tests for goal breakdown proposals and token acceptance.
//!
//! The reasoning engine is replaced by a scripted double that replays a fixed
//! sequence of replies, failures and stalls.

use async_trait::async_trait;
use chrono::{Days, Utc};
use goal_planner::breakdown::{
    DecomposerSettings, EngineError, EngineErrorKind, Proposal, ReasoningEngine,
};
use goal_planner::config::AnalyticsConfig;
use goal_planner::db::Database;
use goal_planner::error::ErrorCode;
use goal_planner::service::Planner;
use goal_planner::types::{BreakdownToken, Horizon, NewGoal, NewTask, TaskFilter};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const OWNER: &str = "owner-1";

enum Step {
    Reply(String),
    Fail(EngineErrorKind),
    Stall,
}

struct ScriptedEngine {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Fail(kind)) => Err(EngineError::new(kind, "scripted failure")),
            Some(Step::Stall) => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Err(EngineError::new(EngineErrorKind::Other, "stalled"))
            }
            None => Err(EngineError::new(EngineErrorKind::Other, "script exhausted")),
        }
    }
}

fn settings() -> DecomposerSettings {
    DecomposerSettings {
        timeout: Duration::from_millis(50),
        max_retries: 2,
        retry_base_delay: Duration::from_millis(1),
        token_ttl: Duration::from_secs(900),
        max_suggestions: 10,
    }
}

fn setup(steps: Vec<Step>, settings: DecomposerSettings) -> (Planner, Arc<ScriptedEngine>) {
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let engine = ScriptedEngine::new(steps);
    let planner = Planner::new(db, engine.clone(), settings, AnalyticsConfig::default());
    (planner, engine)
}

fn create_goal(planner: &Planner) -> String {
    planner
        .create_goal(OWNER, &NewGoal::new("Launch newsletter", Horizon::Quarterly))
        .unwrap()
        .id
}

fn three_tasks() -> String {
    r#"```json
{
  "tasks": [
    {"title": "Pick a platform", "description": "Compare hosts", "priority": 1, "estimated_hours": 2, "category": "research", "reasoning": "Everything else depends on it"},
    {"title": "Write first issue", "priority": 2, "estimated_hours": 4},
    {"title": "Announce launch", "priority": 3}
  ],
  "reasoning": "Platform first, then content, then promotion",
  "estimated_timeline": "3 weeks"
}
```"#
    .to_string()
}

async fn propose_token(planner: &Planner, goal_id: &str) -> BreakdownToken {
    match planner.propose_breakdown(OWNER, goal_id).await.unwrap() {
        Proposal::Token { token, .. } => token,
        other => panic!("expected a token, got {other:?}"),
    }
}

mod propose_tests {
    use super::*;

    #[tokio::test]
    async fn valid_reply_yields_stored_token() {
        let (planner, engine) = setup(vec![Step::Reply(three_tasks())], settings());
        let goal_id = create_goal(&planner);

        let token = propose_token(&planner, &goal_id).await;

        assert_eq!(engine.calls(), 1);
        assert_eq!(token.goal_id, goal_id);
        assert_eq!(token.suggestions.len(), 3);
        assert_eq!(token.suggestions[0].title, "Pick a platform");
        assert_eq!(token.suggestions[0].estimated_hours, Some(2.0));
        assert_eq!(token.estimated_timeline, "3 weeks");
        assert!(!token.consumed);

        let stored = planner.db().get_breakdown_token(OWNER, &token.id).unwrap();
        assert_eq!(stored.suggestions, token.suggestions);
    }

    #[tokio::test]
    async fn prompt_lists_existing_tasks_and_duplicates_are_dropped() {
        let reply = r#"{"tasks": [
            {"title": "set up CI!", "priority": 2},
            {"title": "Write docs", "priority": 3}
        ], "reasoning": "r"}"#;
        let (planner, engine) = setup(vec![Step::Reply(reply.to_string())], settings());
        let goal_id = create_goal(&planner);
        planner
            .create_task(OWNER, &NewTask::new("Set up CI").under_goal(&goal_id))
            .unwrap();

        let proposal = planner.propose_breakdown(OWNER, &goal_id).await.unwrap();

        assert!(engine.last_prompt().contains("- Set up CI"));
        match proposal {
            Proposal::Token { token, dropped } => {
                assert_eq!(token.suggestions.len(), 1);
                assert_eq!(token.suggestions[0].title, "Write docs");
                assert_eq!(dropped.len(), 1);
                assert_eq!(dropped[0].index, 0);
            }
            other => panic!("expected a token, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_invalid_suggestions_is_explicit_outcome() {
        let reply = r#"{"tasks": [{"title": "", "priority": 1}, {"title": "x", "priority": 9}]}"#;
        let (planner, _engine) = setup(vec![Step::Reply(reply.to_string())], settings());
        let goal_id = create_goal(&planner);

        match planner.propose_breakdown(OWNER, &goal_id).await.unwrap() {
            Proposal::NoValidSuggestions { goal_id: id, dropped, .. } => {
                assert_eq!(id, goal_id);
                assert_eq!(dropped.len(), 2);
            }
            other => panic!("expected no valid suggestions, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_reply_fails_fast() {
        let (planner, engine) = setup(
            vec![Step::Reply("I'd suggest starting small.".into())],
            settings(),
        );
        let goal_id = create_goal(&planner);

        let err = planner.propose_breakdown(OWNER, &goal_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UpstreamInvalidResponse);
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_engine_reply_is_not_retried() {
        let (planner, engine) = setup(vec![Step::Fail(EngineErrorKind::Malformed)], settings());
        let goal_id = create_goal(&planner);

        let err = planner.propose_breakdown(OWNER, &goal_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UpstreamInvalidResponse);
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_is_retried_then_succeeds() {
        let (planner, engine) = setup(
            vec![Step::Stall, Step::Fail(EngineErrorKind::Server), Step::Reply(three_tasks())],
            settings(),
        );
        let goal_id = create_goal(&planner);

        let token = propose_token(&planner, &goal_id).await;
        assert_eq!(token.suggestions.len(), 3);
        assert_eq!(engine.calls(), 3);
    }

    #[tokio::test]
    async fn repeated_timeouts_surface_as_upstream_timeout() {
        let (planner, engine) = setup(vec![Step::Stall, Step::Stall, Step::Stall], settings());
        let goal_id = create_goal(&planner);

        let err = planner.propose_breakdown(OWNER, &goal_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UpstreamTimeout);
        assert_eq!(engine.calls(), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_unavailable_without_retry() {
        let (planner, engine) = setup(vec![Step::Fail(EngineErrorKind::Auth)], settings());
        let goal_id = create_goal(&planner);

        let err = planner.propose_breakdown(OWNER, &goal_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn other_owners_goal_is_not_found_and_engine_untouched() {
        let (planner, engine) = setup(vec![Step::Reply(three_tasks())], settings());
        let goal_id = create_goal(&planner);

        let err = planner.propose_breakdown("someone-else", &goal_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(engine.calls(), 0);
    }
}

mod accept_tests {
    use super::*;

    #[tokio::test]
    async fn accept_is_idempotent_per_token() {
        let (planner, _engine) = setup(vec![Step::Reply(three_tasks())], settings());
        let goal_id = create_goal(&planner);
        let token = propose_token(&planner, &goal_id).await;

        let created = planner.accept_breakdown(OWNER, &token.id, &[0, 1]).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].title, "Pick a platform");
        assert_eq!(created[0].priority, 1);
        assert_eq!(created[0].category.as_deref(), Some("research"));
        assert_eq!(created[0].parent_goal_id.as_deref(), Some(goal_id.as_str()));

        let err = planner.accept_breakdown(OWNER, &token.id, &[0, 1]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenAlreadyConsumed);

        let filter = TaskFilter {
            parent_goal_id: Some(goal_id.clone()),
            ..Default::default()
        };
        assert_eq!(planner.list_tasks(OWNER, &filter).unwrap().len(), 2);
        assert!(planner.db().get_breakdown_token(OWNER, &token.id).unwrap().consumed);
    }

    #[tokio::test]
    async fn concurrent_accepts_create_tasks_once() {
        let (planner, _engine) = setup(vec![Step::Reply(three_tasks())], settings());
        let goal_id = create_goal(&planner);
        let token = propose_token(&planner, &goal_id).await;

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| planner.accept_breakdown(OWNER, &token.id, &[0, 1, 2])))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(err.code(), ErrorCode::TokenAlreadyConsumed);
        }
        let filter = TaskFilter {
            parent_goal_id: Some(goal_id),
            ..Default::default()
        };
        assert_eq!(planner.list_tasks(OWNER, &filter).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn out_of_range_index_creates_nothing() {
        let (planner, _engine) = setup(vec![Step::Reply(three_tasks())], settings());
        let goal_id = create_goal(&planner);
        let token = propose_token(&planner, &goal_id).await;

        let err = planner.accept_breakdown(OWNER, &token.id, &[0, 3]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexOutOfRange);
        assert!(planner.list_tasks(OWNER, &TaskFilter::default()).unwrap().is_empty());

        // Token is still usable after the rejected call.
        let created = planner.accept_breakdown(OWNER, &token.id, &[2]).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "Announce launch");
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let expiring = DecomposerSettings {
            token_ttl: Duration::ZERO,
            ..settings()
        };
        let (planner, _engine) = setup(vec![Step::Reply(three_tasks())], expiring);
        let goal_id = create_goal(&planner);
        let token = propose_token(&planner, &goal_id).await;

        let err = planner.accept_breakdown(OWNER, &token.id, &[0]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenExpired);
        assert!(planner.list_tasks(OWNER, &TaskFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_token_and_foreign_owner_are_not_found() {
        let (planner, _engine) = setup(vec![Step::Reply(three_tasks())], settings());
        let goal_id = create_goal(&planner);
        let token = propose_token(&planner, &goal_id).await;

        let err = planner.accept_breakdown(OWNER, "missing", &[0]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        let err = planner.accept_breakdown("someone-else", &token.id, &[0]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn accepted_tasks_get_spread_due_dates_and_progress() {
        let (planner, _engine) = setup(vec![Step::Reply(three_tasks())], settings());
        let today = Utc::now().date_naive();
        let target = today.checked_add_days(Days::new(30)).unwrap();
        let goal = planner
            .create_goal(
                OWNER,
                &NewGoal {
                    target_date: Some(target),
                    ..NewGoal::new("Launch newsletter", Horizon::Monthly)
                },
            )
            .unwrap();
        let token = propose_token(&planner, &goal.id).await;

        let created = planner.accept_breakdown(OWNER, &token.id, &[0, 1, 2]).unwrap();
        let due: Vec<_> = created.iter().map(|t| t.due_date).collect();
        assert_eq!(
            due,
            vec![
                today.checked_add_days(Days::new(10)),
                today.checked_add_days(Days::new(20)),
                Some(target),
            ]
        );

        planner.complete_task(OWNER, &created[0].id, false).unwrap();
        assert_eq!(planner.get_goal(OWNER, &goal.id).unwrap().progress_percentage, 33);

        let history = planner.task_history(OWNER, &created[1].id).unwrap();
        assert_eq!(history[0].event, "created");
        assert_eq!(
            history[0].reason.as_deref(),
            Some(format!("breakdown token {}", token.id).as_str())
        );
    }

    #[tokio::test]
    async fn deleted_goal_leaves_token_unconsumed() {
        let (planner, _engine) = setup(vec![Step::Reply(three_tasks())], settings());
        let goal_id = create_goal(&planner);
        let token = propose_token(&planner, &goal_id).await;
        planner.delete_goal(OWNER, &goal_id).unwrap();

        let err = planner.accept_breakdown(OWNER, &token.id, &[0]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(!planner.db().get_breakdown_token(OWNER, &token.id).unwrap().consumed);
    }
}
