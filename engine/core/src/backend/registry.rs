//! Task Registry
//!
//! Tracks the background task spawned for each streaming request so it
//! can be reaped on completion, torn down when a conversation switch or
//! clear supersedes it, and aborted wholesale at shutdown.
//!
//! Teardown is best-effort only. Token gating is what makes a superseded
//! task's events inert; the abort just stops it from draining a stream
//! nobody will look at.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::RequestId;

/// Registry of in-flight request tasks.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<RequestId, JoinHandle<()>>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a spawned request task.
    pub fn register(&self, id: RequestId, handle: JoinHandle<()>) {
        debug!(request_id = %id, "task registered");
        self.tasks.write().insert(id, handle);
    }

    /// Forget a task that has run to completion.
    pub fn deregister(&self, id: RequestId) {
        if self.tasks.write().remove(&id).is_some() {
            debug!(request_id = %id, "task deregistered");
        }
    }

    /// Abort and forget one superseded task, best-effort.
    ///
    /// The abort lands at the task's next await point, never mid-lock.
    pub fn abort(&self, id: RequestId) {
        if let Some(handle) = self.tasks.write().remove(&id) {
            debug!(request_id = %id, "aborting superseded task");
            handle.abort();
        }
    }

    /// Abort and forget every tracked task.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.write();
        for (id, handle) in tasks.drain() {
            debug!(request_id = %id, "aborting task at shutdown");
            handle.abort();
        }
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Whether no tasks are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}
