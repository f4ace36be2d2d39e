use std::fmt;
use std::time::Duration;

use crate::message::Message;
use crate::Result;

/// Names a queue in a [`QueueService`]. Returned by `create_queue`, but any
/// handle built from the same name refers to the same queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueHandle(String);

impl QueueHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time message counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Pushed, never delivered.
    pub unclaimed: usize,
    /// Delivered at least once and not yet deleted, visible or not.
    pub claimed: usize,
}

/// Create/push/pull/delete over named queues with a per-queue visibility
/// timeout.
///
/// `pull` hands out the oldest claimed message whose timeout has lapsed, or
/// else the oldest unclaimed one. The returned message stays on the queue
/// until `delete` is called with it.
pub trait QueueService: Send + Sync {
    /// Idempotent. An existing queue keeps its original timeout.
    fn create_queue(&self, name: &str, visibility_timeout: Duration) -> Result<QueueHandle>;

    fn push(&self, queue: &QueueHandle, body: &[u8]) -> Result<()>;

    /// `Ok(None)` when nothing is currently deliverable.
    fn pull(&self, queue: &QueueHandle) -> Result<Option<Message>>;

    /// `Ok(false)` when the message was never pulled or is already gone.
    fn delete(&self, queue: &QueueHandle, message: &Message) -> Result<bool>;

    fn stats(&self, queue: &QueueHandle) -> Result<QueueStats>;
}
