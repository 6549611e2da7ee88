//! Reasoning engine client.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::ReasoningConfig;

/// Why an engine call failed, so the caller can pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// 401/403: bad API key or permissions.
    Auth,
    /// 429: rate limited.
    RateLimit,
    /// 408 or the request took too long.
    Timeout,
    /// Connection refused, DNS failure, reset.
    Network,
    /// 500/502/503/504.
    Server,
    /// 2xx with a body that is not a chat completion.
    Malformed,
    Other,
}

#[derive(Debug, Clone)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => EngineErrorKind::Auth,
            408 => EngineErrorKind::Timeout,
            429 => EngineErrorKind::RateLimit,
            500 | 502 | 503 | 504 => EngineErrorKind::Server,
            _ => EngineErrorKind::Other,
        };
        Self {
            kind,
            status: Some(status),
            message: truncate(body, 300).to_string(),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            EngineErrorKind::Timeout
        } else {
            EngineErrorKind::Network
        };
        Self::new(kind, err.to_string())
    }

    /// Whether the same request is worth sending again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            EngineErrorKind::RateLimit
                | EngineErrorKind::Timeout
                | EngineErrorKind::Network
                | EngineErrorKind::Server
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{:?} (HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for EngineError {}

/// Opaque text-completion service used to propose breakdowns.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError>;
}

/// Truncate at a char boundary.
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Validate the base URL: HTTPS for remote hosts, plain HTTP only for localhost.
fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("Invalid base_url '{}': {}", base_url, e))?;

    let scheme = parsed.scheme();
    let host = parsed.host_str().unwrap_or("");

    match scheme {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                warn!(
                    "Using unencrypted HTTP for local reasoning engine at '{}'",
                    base_url
                );
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'); use HTTPS",
                    base_url
                ))
            }
        }
        _ => Err(format!(
            "Unsupported URL scheme '{}' in base_url '{}'",
            scheme, base_url
        )),
    }
}

/// Engine backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpReasoningEngine {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl HttpReasoningEngine {
    pub fn new(config: &ReasoningConfig) -> anyhow::Result<Self> {
        validate_base_url(&config.base_url).map_err(anyhow::Error::msg)?;

        // Outer per-attempt timeout is applied by the caller; this one only
        // bounds a stuck connection.
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "No API key set for reasoning engine");
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ReasoningEngine for HttpReasoningEngine {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let url = format!("{}/chat/completions", self.base_url);
        info!(model = %self.model, url = %url, "Calling reasoning engine");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let resp = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                error!("HTTP request failed: {}", e);
                return Err(EngineError::network(&e));
            }
        };

        let status = resp.status();
        let text = resp.text().await.map_err(|e| EngineError::network(&e))?;

        if !status.is_success() {
            error!(status = %status, "Reasoning engine error: {}", truncate(&text, 300));
            return Err(EngineError::from_status(status.as_u16(), &text));
        }
        debug!("Reasoning engine response: {}", truncate(&text, 2000));

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| EngineError::new(EngineErrorKind::Malformed, e.to_string()))?;
        data["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .map(str::to_string)
            .ok_or_else(|| EngineError::new(EngineErrorKind::Malformed, "No message content in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_rules() {
        assert!(validate_base_url("https://api.example.com/v1").is_ok());
        assert!(validate_base_url("http://localhost:11434/v1").is_ok());
        assert!(validate_base_url("http://127.0.0.1:8080").is_ok());
        assert!(validate_base_url("http://api.example.com/v1").is_err());
        assert!(validate_base_url("ftp://localhost").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn status_classification() {
        assert_eq!(EngineError::from_status(503, "").kind, EngineErrorKind::Server);
        assert_eq!(EngineError::from_status(401, "").kind, EngineErrorKind::Auth);
        assert!(EngineError::from_status(429, "").is_retryable());
        assert!(!EngineError::from_status(400, "bad").is_retryable());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
