//! Configuration loading and management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Planner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub reasoning: ReasoningConfig,

    #[serde(default)]
    pub breakdown: BreakdownConfig,

    #[serde(default)]
    pub analytics: AnalyticsConfig,

    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".goal-planner/planner.db")
}

/// Reasoning engine endpoint (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key. The key itself is never
    /// read from the config file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for timeouts and transient failures.
    #[serde(default = "default_engine_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_engine_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ReasoningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "GOAL_PLANNER_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_engine_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_max_tokens() -> u32 {
    2000
}

/// Breakdown proposal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownConfig {
    /// Lifetime of a proposal token in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Most suggestions requested from and kept per proposal.
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

impl Default for BreakdownConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
            max_suggestions: default_max_suggestions(),
        }
    }
}

fn default_token_ttl() -> u64 {
    900 // 15 minutes
}

fn default_max_suggestions() -> usize {
    10
}

/// Velocity and forecast settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,

    /// Relative change between window halves that counts as a trend.
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,

    /// Required/current velocity ratio above which a goal is at risk.
    #[serde(default = "default_at_risk_multiple")]
    pub at_risk_multiple: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
            trend_threshold: default_trend_threshold(),
            at_risk_multiple: default_at_risk_multiple(),
        }
    }
}

fn default_window_days() -> u32 {
    30
}

fn default_trend_threshold() -> f64 {
    0.10
}

fn default_at_risk_multiple() -> f64 {
    2.0
}

/// Progress propagation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Re-runs of a write transaction that lost a concurrent update.
    #[serde(default = "default_progress_retries")]
    pub max_retries: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            max_retries: default_progress_retries(),
        }
    }
}

fn default_progress_retries() -> u32 {
    3
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from default locations or return defaults, then
    /// apply environment overrides.
    pub fn load_or_default() -> Self {
        let mut candidates = vec![PathBuf::from(".goal-planner/config.yaml")];
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".goal-planner").join("config.yaml"));
        }

        let mut config = Self::default();
        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load(&path) {
                Ok(loaded) => {
                    debug!(path = %path.display(), "Loaded config");
                    config = loaded;
                    break;
                }
                Err(e) => warn!(path = %path.display(), "Ignoring unreadable config: {}", e),
            }
        }

        config.apply_env();
        config
    }

    /// Apply `GOAL_PLANNER_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(db_path) = std::env::var("GOAL_PLANNER_DB_PATH") {
            self.store.db_path = PathBuf::from(db_path);
        }

        if let Ok(model) = std::env::var("GOAL_PLANNER_MODEL") {
            self.reasoning.model = model;
        }

        if let Ok(base_url) = std::env::var("GOAL_PLANNER_BASE_URL") {
            self.reasoning.base_url = base_url;
        }

        if let Ok(timeout) = std::env::var("GOAL_PLANNER_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse() {
                self.reasoning.timeout_secs = timeout;
            }
        }

        if let Ok(ttl) = std::env::var("GOAL_PLANNER_TOKEN_TTL_SECS") {
            if let Ok(ttl) = ttl.parse() {
                self.breakdown.token_ttl_secs = ttl;
            }
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.store.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
