//! Thread pool, queue and request-scope error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ConcurrencyError {
    #[error("invalid sizing for pool {pool}: {message}")]
    InvalidSizing { pool: String, message: String },

    #[error("task rejected by pool {pool}: {reason}")]
    Rejected { pool: String, reason: String },

    #[error("pool {pool} is shut down")]
    ShutDown { pool: String },

    #[error("failed to spawn worker for pool {pool}: {message}")]
    SpawnFailed { pool: String, message: String },

    #[error("request variable accessed outside of a request scope")]
    RequestContextMissing,
}

impl UserFacingError for ConcurrencyError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidSizing { .. } => {
                Some("Check core_size and maximum_size in the [pool] configuration section.")
            }
            Self::Rejected { .. } => {
                Some("Increase max_queue_size or maximum_size, or submit less work at once.")
            }
            Self::RequestContextMissing => {
                Some("Enter a request scope before reading request variables.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::SpawnFailed { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::InvalidSizing { .. } => "concurrency.invalid_sizing",
            Self::Rejected { .. } => "concurrency.rejected",
            Self::ShutDown { .. } => "concurrency.shut_down",
            Self::SpawnFailed { .. } => "concurrency.spawn_failed",
            Self::RequestContextMissing => "concurrency.request_context_missing",
        };
        Some(code)
    }
}
