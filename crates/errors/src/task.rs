//! Unit-of-work execution error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

/// Failure reported by a unit of work, carried unchanged back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TaskError {
    #[error("task failed: {message}")]
    Failed { message: String },

    #[error("task panicked: {message}")]
    Panicked { message: String },

    /// The job was discarded without running: its result channel closed
    /// before a worker picked it up, as when a pool is torn down while a
    /// queued job has no live worker left to take it.
    #[error("task was dropped before it produced a result")]
    Abandoned,
}

impl TaskError {
    /// Create a failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl UserFacingError for TaskError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Abandoned)
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Failed { .. } => "task.failed",
            Self::Panicked { .. } => "task.panicked",
            Self::Abandoned => "task.abandoned",
        };
        Some(code)
    }
}
