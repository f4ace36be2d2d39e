//! Process-local queues.
//!
//! Each queue pairs a lock-free FIFO of unclaimed messages with a mutex-guarded
//! FIFO of claimed ones. Only the claimed side needs mutual exclusion: a
//! redelivery peeks the head and moves it to the tail, and a delete must not
//! interleave with that move. Locks are per queue, so queues never contend
//! with each other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::message::{Message, ReceiptToken};
use crate::service::{QueueHandle, QueueService, QueueStats};
use crate::{Error, Result};

struct MemoryQueue {
    visibility_timeout: Duration,
    unclaimed: SegQueue<Message>,
    // Ordered by visible_at: the timeout is fixed per queue and entries are
    // stamped while this lock is held.
    claimed: Mutex<VecDeque<Message>>,
}

impl MemoryQueue {
    fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            unclaimed: SegQueue::new(),
            claimed: Mutex::new(VecDeque::new()),
        }
    }

    fn claimed(&self) -> Result<MutexGuard<'_, VecDeque<Message>>> {
        self.claimed
            .lock()
            .map_err(|_| Error::Poisoned("claimed queue"))
    }
}

pub struct InMemoryQueueService {
    queues: DashMap<String, Arc<MemoryQueue>>,
    clock: Box<dyn Clock>,
}

impl Default for InMemoryQueueService {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl InMemoryQueueService {
    pub fn new(clock: impl Clock) -> Self {
        Self {
            queues: DashMap::new(),
            clock: Box::new(clock),
        }
    }

    fn queue(&self, handle: &QueueHandle) -> Result<Arc<MemoryQueue>> {
        self.queues
            .get(handle.name())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::QueueNotFound(handle.name().to_string()))
    }
}

impl QueueService for InMemoryQueueService {
    fn create_queue(&self, name: &str, visibility_timeout: Duration) -> Result<QueueHandle> {
        self.queues.entry(name.to_string()).or_insert_with(|| {
            log::debug!(
                "created in-memory queue {name:?} (visibility timeout {}ms)",
                visibility_timeout.as_millis()
            );
            Arc::new(MemoryQueue::new(visibility_timeout))
        });
        Ok(QueueHandle::new(name))
    }

    fn push(&self, queue: &QueueHandle, body: &[u8]) -> Result<()> {
        let state = self.queue(queue)?;
        state.unclaimed.push(Message::new(body));
        log::trace!("push {queue}: {} bytes", body.len());
        Ok(())
    }

    fn pull(&self, queue: &QueueHandle) -> Result<Option<Message>> {
        let state = self.queue(queue)?;

        {
            let mut claimed = state.claimed()?;
            if let Some(mut message) = claimed.pop_front() {
                let now = self.clock.now();
                if message.is_visible(now) {
                    message.refresh_visibility(now, state.visibility_timeout);
                    claimed.push_back(message.clone());
                    log::debug!("redelivered message on {queue}");
                    return Ok(Some(message));
                }
                claimed.push_front(message);
            }
        }

        // Guard first: a poisoned lock must fail before anything is popped.
        let mut claimed = state.claimed()?;
        let Some(mut message) = state.unclaimed.pop() else {
            return Ok(None);
        };
        message.claim(
            ReceiptToken::generate(),
            self.clock.now(),
            state.visibility_timeout,
        );
        claimed.push_back(message.clone());
        log::trace!("pull {queue}: first delivery");
        Ok(Some(message))
    }

    fn delete(&self, queue: &QueueHandle, message: &Message) -> Result<bool> {
        let state = self.queue(queue)?;
        let Some(token) = message.receipt() else {
            return Ok(false);
        };
        let mut claimed = state.claimed()?;
        match claimed.iter().position(|entry| entry.same_receipt(token)) {
            Some(index) => {
                claimed.remove(index);
                log::trace!("delete {queue}: removed {token}");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stats(&self, queue: &QueueHandle) -> Result<QueueStats> {
        let state = self.queue(queue)?;
        let claimed = state.claimed()?.len();
        Ok(QueueStats {
            unclaimed: state.unclaimed.len(),
            claimed,
        })
    }
}
