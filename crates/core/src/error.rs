use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::SubmitAction;

pub type RetentionResult<T> = Result<T, RetentionError>;

#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Too many {action} attempts. Please try again later.")]
    RateLimited {
        action: SubmitAction,
        reset_at: DateTime<Utc>,
    },

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Flow error: {0}")]
    Flow(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RetentionError {
    /// Per-field messages for validation failures, or the display string for
    /// everything else. This is what a form shows above its submit button.
    pub fn user_messages(&self) -> Vec<String> {
        match self {
            RetentionError::Validation(errors) => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}
