//! Goal decomposition: ask the reasoning engine for candidate tasks, keep the
//! valid ones behind a single-use token, and turn accepted ones into tasks.

pub mod engine;
pub mod prompt;
pub mod schema;

pub use engine::{EngineError, EngineErrorKind, HttpReasoningEngine, ReasoningEngine};
pub use prompt::{BreakdownContext, build_prompt};
pub use schema::{DroppedSuggestion, ParsedBreakdown, parse_response, plan_accepted_tasks};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{Database, now_ms, today_utc};
use crate::error::{PlanError, PlanResult};
use crate::types::{BreakdownToken, Task};

/// Tunables for proposing breakdowns.
#[derive(Debug, Clone)]
pub struct DecomposerSettings {
    /// Bound on a single engine call.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub token_ttl: Duration,
    pub max_suggestions: usize,
}

impl DecomposerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.reasoning.timeout(),
            max_retries: config.reasoning.max_retries,
            retry_base_delay: config.reasoning.retry_base_delay(),
            token_ttl: Duration::from_secs(config.breakdown.token_ttl_secs),
            max_suggestions: config.breakdown.max_suggestions.max(1),
        }
    }
}

impl Default for DecomposerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Upper bound on the wait between engine attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Wait before retry `attempt` (1-based): `base * 2^(attempt - 1)`, capped.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

/// Result of a proposal.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Proposal {
    Token {
        token: BreakdownToken,
        dropped: Vec<DroppedSuggestion>,
    },
    /// The engine answered but every suggestion was rejected. No token is stored.
    NoValidSuggestions {
        goal_id: String,
        reasoning: String,
        dropped: Vec<DroppedSuggestion>,
    },
}

pub struct Decomposer {
    db: Database,
    engine: Arc<dyn ReasoningEngine>,
    settings: DecomposerSettings,
}

impl Decomposer {
    pub fn new(db: Database, engine: Arc<dyn ReasoningEngine>, settings: DecomposerSettings) -> Self {
        Self {
            db,
            engine,
            settings,
        }
    }

    pub fn settings(&self) -> &DecomposerSettings {
        &self.settings
    }

    /// Propose tasks for a goal.
    ///
    /// Goal context is read up front and no transaction is open while the
    /// engine is awaited; the token is written only after the reply validates.
    pub async fn propose(&self, owner: &str, goal_id: &str) -> PlanResult<Proposal> {
        let (goal, existing) = self.db.goal_with_task_titles(owner, goal_id)?;
        let ctx = BreakdownContext::new(&goal, existing, self.settings.max_suggestions);
        let prompt = build_prompt(&ctx);

        let reply = self.call_engine(&prompt).await?;
        let parsed = parse_response(&reply, &ctx.existing_tasks, self.settings.max_suggestions)?;

        if parsed.suggestions.is_empty() {
            warn!(
                goal_id,
                dropped = parsed.dropped.len(),
                "Breakdown produced no valid suggestions"
            );
            return Ok(Proposal::NoValidSuggestions {
                goal_id: goal.id,
                reasoning: parsed.reasoning,
                dropped: parsed.dropped,
            });
        }

        let created_at = now_ms();
        let token = BreakdownToken {
            id: Uuid::now_v7().to_string(),
            owner: owner.to_string(),
            goal_id: goal.id,
            suggestions: parsed.suggestions,
            reasoning: parsed.reasoning,
            estimated_timeline: parsed.estimated_timeline,
            created_at,
            expires_at: created_at + self.settings.token_ttl.as_millis() as i64,
            consumed: false,
        };
        self.db.store_breakdown_token(&token)?;

        info!(
            token_id = %token.id,
            goal_id = %token.goal_id,
            suggestions = token.suggestions.len(),
            dropped = parsed.dropped.len(),
            "Breakdown proposed"
        );
        Ok(Proposal::Token {
            token,
            dropped: parsed.dropped,
        })
    }

    /// Call the engine with a per-attempt timeout, retrying timeouts and
    /// transient failures with exponential backoff.
    async fn call_engine(&self, prompt: &str) -> PlanResult<String> {
        let attempts = self.settings.max_retries.saturating_add(1);
        let mut last_error: Option<EngineError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(self.settings.retry_base_delay, attempt)).await;
            }

            let error = match tokio::time::timeout(self.settings.timeout, self.engine.complete(prompt)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => e,
                Err(_) => EngineError::new(
                    EngineErrorKind::Timeout,
                    format!("no reply within {:?}", self.settings.timeout),
                ),
            };

            match error.kind {
                EngineErrorKind::Malformed => {
                    return Err(PlanError::UpstreamInvalidResponse {
                        reason: error.message,
                    });
                }
                _ if !error.is_retryable() => {
                    return Err(PlanError::UpstreamUnavailable {
                        reason: error.to_string(),
                    });
                }
                _ => {
                    warn!(attempt = attempt + 1, attempts, "Reasoning engine call failed: {}", error);
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(e) if e.kind != EngineErrorKind::Timeout => Err(PlanError::UpstreamUnavailable {
                reason: e.to_string(),
            }),
            _ => Err(PlanError::UpstreamTimeout { attempts }),
        }
    }

    /// Turn selected suggestions of a token into tasks under its goal.
    pub fn accept(&self, owner: &str, token_id: &str, indices: &[usize]) -> PlanResult<Vec<Task>> {
        Ok(self
            .db
            .accept_breakdown_token(owner, token_id, indices, today_utc())?)
    }
}
