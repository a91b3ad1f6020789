//! CLI error handling

use std::fmt;

use strand_errors::UserFacingError;

/// CLI-specific error type
#[derive(Debug)]
pub enum CliError {
    /// Configuration error
    Config(strand_errors::ConfigError),
    /// Library error
    Strand(strand_errors::Error),
    /// I/O error
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {e}"),
            CliError::Strand(e) => {
                let message = e.user_message();
                write!(f, "{message}")?;
                if let Some(code) = e.user_code() {
                    write!(f, "\n  Code: {code}")?;
                }
                if let Some(hint) = e.user_hint() {
                    write!(f, "\n  Hint: {hint}")?;
                }
                if e.is_retryable() {
                    write!(f, "\n  Retry: safe to retry this operation.")?;
                }
                Ok(())
            }
            CliError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Strand(e) => Some(e),
            CliError::Io(e) => Some(e),
        }
    }
}

impl From<strand_errors::ConfigError> for CliError {
    fn from(e: strand_errors::ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<strand_errors::Error> for CliError {
    fn from(e: strand_errors::Error) -> Self {
        match e {
            strand_errors::Error::Config(e) => CliError::Config(e),
            other => CliError::Strand(other),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<tokio::task::JoinError> for CliError {
    fn from(e: tokio::task::JoinError) -> Self {
        CliError::Strand(strand_errors::Error::internal(format!(
            "blocking run did not complete: {e}"
        )))
    }
}
