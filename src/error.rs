//! Structured error types for planner operations.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    ValidationError,

    // Not found errors
    NotFound,

    // Conflict errors
    DependencyCycle,
    DependencyNotFound,
    DependencyNotSatisfied,
    TokenExpired,
    TokenAlreadyConsumed,
    IndexOutOfRange,
    ConcurrencyConflict,

    // Upstream errors
    UpstreamTimeout,
    UpstreamInvalidResponse,
    UpstreamUnavailable,

    // Internal errors
    DatabaseError,
    InternalError,
}

/// Kind of entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Goal,
    Task,
    BreakdownToken,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Goal => write!(f, "Goal"),
            EntityKind::Task => write!(f, "Task"),
            EntityKind::BreakdownToken => write!(f, "Breakdown token"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Dependencies of {task_id} would create a cycle: {}", .cycle.join(" -> "))]
    DependencyCycle { task_id: String, cycle: Vec<String> },

    #[error("Task {task_id} depends on unknown task(s): {}", .missing.join(", "))]
    DependencyNotFound { task_id: String, missing: Vec<String> },

    #[error("Task {task_id} blocked by: {}", .blockers.join(", "))]
    DependencyNotSatisfied {
        task_id: String,
        blockers: Vec<String>,
    },

    #[error("Breakdown token {token_id} has expired")]
    TokenExpired { token_id: String },

    #[error("Breakdown token {token_id} was already accepted")]
    TokenAlreadyConsumed { token_id: String },

    #[error("Suggestion index {index} out of range (token holds {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Reasoning engine timed out after {attempts} attempt(s)")]
    UpstreamTimeout { attempts: u32 },

    #[error("Reasoning engine returned an unusable response: {reason}")]
    UpstreamInvalidResponse { reason: String },

    #[error("Reasoning engine unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("Concurrent writes to {scope} kept conflicting after {attempts} attempt(s)")]
    ConcurrencyConflict { scope: String, attempts: u32 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlanError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PlanError::Validation { .. } => ErrorCode::ValidationError,
            PlanError::NotFound { .. } => ErrorCode::NotFound,
            PlanError::DependencyCycle { .. } => ErrorCode::DependencyCycle,
            PlanError::DependencyNotFound { .. } => ErrorCode::DependencyNotFound,
            PlanError::DependencyNotSatisfied { .. } => ErrorCode::DependencyNotSatisfied,
            PlanError::TokenExpired { .. } => ErrorCode::TokenExpired,
            PlanError::TokenAlreadyConsumed { .. } => ErrorCode::TokenAlreadyConsumed,
            PlanError::IndexOutOfRange { .. } => ErrorCode::IndexOutOfRange,
            PlanError::UpstreamTimeout { .. } => ErrorCode::UpstreamTimeout,
            PlanError::UpstreamInvalidResponse { .. } => ErrorCode::UpstreamInvalidResponse,
            PlanError::UpstreamUnavailable { .. } => ErrorCode::UpstreamUnavailable,
            PlanError::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            PlanError::Database(_) => ErrorCode::DatabaseError,
            PlanError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Serializable form for the calling layer.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
        }
    }

    // Convenience constructors

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        PlanError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn goal_not_found(id: &str) -> Self {
        PlanError::NotFound {
            kind: EntityKind::Goal,
            id: id.to_string(),
        }
    }

    pub fn task_not_found(id: &str) -> Self {
        PlanError::NotFound {
            kind: EntityKind::Task,
            id: id.to_string(),
        }
    }

    pub fn token_not_found(id: &str) -> Self {
        PlanError::NotFound {
            kind: EntityKind::BreakdownToken,
            id: id.to_string(),
        }
    }

    /// A lost optimistic-version race; the transaction can be re-run.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, PlanError::ConcurrencyConflict { .. })
    }
}

/// Stable error payload handed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl From<rusqlite::Error> for PlanError {
    fn from(err: rusqlite::Error) -> Self {
        PlanError::Database(err.to_string())
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for PlanError {
    fn from(err: anyhow::Error) -> Self {
        // Try to downcast to PlanError first
        match err.downcast::<PlanError>() {
            Ok(plan_err) => plan_err,
            Err(err) => match err.downcast::<rusqlite::Error>() {
                Ok(db_err) => PlanError::from(db_err),
                Err(err) => PlanError::Internal(err.to_string()),
            },
        }
    }
}

/// Result type for planner operations.
pub type PlanResult<T> = std::result::Result<T, PlanError>;
