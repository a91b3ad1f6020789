//! Work queues feeding thread pools

use crossbeam::channel::{self, Receiver, Sender};
use std::fmt;

/// Job as seen by a worker thread
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queue between submitters and the workers of a pool
///
/// A queue with capacity `0` is a synchronous hand-off: an offer only
/// succeeds when a worker is blocked waiting for work.
pub struct WorkQueue {
    pub(crate) sender: Sender<Job>,
    pub(crate) receiver: Receiver<Job>,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue for the given maximum size (`0` = synchronous hand-off)
    #[must_use]
    pub fn new(max_queue_size: usize) -> Self {
        if max_queue_size == 0 {
            Self::synchronous()
        } else {
            Self::bounded(max_queue_size)
        }
    }

    /// Queue holding at most `capacity` pending jobs
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Hand-off queue with no buffering
    #[must_use]
    pub fn synchronous() -> Self {
        let (sender, receiver) = channel::bounded(0);
        Self {
            sender,
            receiver,
            capacity: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.capacity == 0
    }

    /// Number of jobs waiting for a worker
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
