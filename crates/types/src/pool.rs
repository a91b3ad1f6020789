//! Thread pool identity and sizing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use strand_errors::ConfigError;

/// Name identifying a thread pool
///
/// Worker threads of a pool are named after its key, so the key also shows up
/// in thread dumps and log lines emitted from worker threads.
///
/// Keys read from outside the program (`FromStr`, `TryFrom<String>`,
/// deserialization) are trimmed and must not be blank. [`ThreadPoolKey::new`]
/// and `From<&str>` take the name as given and are meant for names fixed in
/// code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThreadPoolKey(String);

impl ThreadPoolKey {
    /// Create a key from a name without validating it
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The pool name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadPoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadPoolKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl FromStr for ThreadPoolKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "pool key".to_string(),
                value: s.to_string(),
            });
        }
        Ok(Self::new(trimmed))
    }
}

impl TryFrom<String> for ThreadPoolKey {
    type Error = ConfigError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<ThreadPoolKey> for String {
    fn from(key: ThreadPoolKey) -> Self {
        key.0
    }
}

/// Sizing properties of a thread pool
///
/// `max_queue_size == 0` selects a synchronous hand-off queue: a submission is
/// only accepted when a worker is idle and waiting for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPoolSizing {
    pub core_size: usize,
    pub maximum_size: usize,
    /// Idle time after which workers above `core_size` exit
    pub keep_alive: Duration,
    pub max_queue_size: usize,
    /// Queue length at which a bounded queue starts rejecting submissions,
    /// even before it reaches `max_queue_size`
    pub queue_size_rejection_threshold: usize,
    pub allow_maximum_size_to_diverge_from_core_size: bool,
}

impl ThreadPoolSizing {
    pub const DEFAULT_CORE_SIZE: usize = 10;
    pub const DEFAULT_MAXIMUM_SIZE: usize = 10;
    pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
    pub const DEFAULT_QUEUE_SIZE_REJECTION_THRESHOLD: usize = 5;

    /// Sizing for a fixed number of workers with a synchronous hand-off queue
    #[must_use]
    pub fn fixed(size: usize) -> Self {
        Self {
            core_size: size,
            maximum_size: size,
            ..Self::default()
        }
    }

    /// Use a bounded queue of the given capacity
    #[must_use]
    pub fn with_queue(mut self, max_queue_size: usize, rejection_threshold: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self.queue_size_rejection_threshold = rejection_threshold;
        self
    }

    /// Allow the pool to grow past `core_size` up to `maximum_size`
    #[must_use]
    pub fn with_maximum(mut self, maximum_size: usize) -> Self {
        self.maximum_size = maximum_size;
        self.allow_maximum_size_to_diverge_from_core_size = true;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Whether submissions are handed directly to an idle worker
    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.max_queue_size == 0
    }
}

impl Default for ThreadPoolSizing {
    fn default() -> Self {
        Self {
            core_size: Self::DEFAULT_CORE_SIZE,
            maximum_size: Self::DEFAULT_MAXIMUM_SIZE,
            keep_alive: Self::DEFAULT_KEEP_ALIVE,
            max_queue_size: 0,
            queue_size_rejection_threshold: Self::DEFAULT_QUEUE_SIZE_REJECTION_THRESHOLD,
            allow_maximum_size_to_diverge_from_core_size: false,
        }
    }
}
