//! Queues persisted under a shared home directory.
//!
//! Every process pointed at the same home sees the same queues. Layout:
//!
//! ```text
//! <home>/<blake3(name)>/queue.meta   name + visibility timeout, written once
//!                      /primary      unclaimed records, FIFO
//!                      /secondary    claimed records, ordered by visible_at
//!                      /.lock/       mkdir marker held during every mutation
//! ```
//!
//! Hashing the name keeps arbitrary queue names out of path components.
//! All reads and writes of `primary`/`secondary` happen under the marker, and
//! every change is either a whole-line append or a temp-file rewrite followed
//! by a rename, so a crash leaves each file in its before or after state.

mod lock;
mod meta;
mod record;
mod store;

pub use lock::LockOwner;
pub use meta::QueueMeta;

use std::iter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::message::{timeout_ms, Message, ReceiptToken};
use crate::service::{QueueHandle, QueueService, QueueStats};
use crate::{Error, Result};

use lock::LockGuard;

const META_FILE: &str = "queue.meta";
const PRIMARY_FILE: &str = "primary";
const SECONDARY_FILE: &str = "secondary";
const LOCK_DIR: &str = ".lock";

/// Tuning for [`FileQueueService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileQueueConfig {
    /// Sleep between attempts to take a queue's lock marker.
    /// Default: 20 ms
    pub lock_backoff_ms: u64,

    /// Log a warning, naming the holder, once a single lock wait exceeds this.
    /// Default: 5 s
    pub lock_warn_after_ms: u64,

    /// fsync record files before they are renamed into place or after appends.
    /// Default: true
    pub sync_writes: bool,
}

impl Default for FileQueueConfig {
    fn default() -> Self {
        Self {
            lock_backoff_ms: 20,
            lock_warn_after_ms: 5_000,
            sync_writes: true,
        }
    }
}

impl FileQueueConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|_| Error::Corrupt("queue config is not valid json"))
    }

    pub fn lock_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_backoff_ms)
    }

    pub fn lock_warn_after(&self) -> Duration {
        Duration::from_millis(self.lock_warn_after_ms)
    }
}

struct FileQueue {
    lock: PathBuf,
    primary: PathBuf,
    secondary: PathBuf,
    visibility_timeout: Duration,
}

impl FileQueue {
    fn new(dir: &Path, meta: &QueueMeta) -> Self {
        Self {
            lock: dir.join(LOCK_DIR),
            primary: dir.join(PRIMARY_FILE),
            secondary: dir.join(SECONDARY_FILE),
            visibility_timeout: Duration::from_millis(meta.visibility_timeout_ms),
        }
    }
}

pub struct FileQueueService {
    home: PathBuf,
    config: FileQueueConfig,
    // Queues this instance has already resolved; the directory is the
    // source of truth.
    queues: DashMap<String, Arc<FileQueue>>,
    clock: Box<dyn Clock>,
}

impl FileQueueService {
    pub fn new(home: impl Into<PathBuf>, clock: impl Clock) -> Self {
        Self::with_config(home, clock, FileQueueConfig::default())
    }

    pub fn with_config(home: impl Into<PathBuf>, clock: impl Clock, config: FileQueueConfig) -> Self {
        Self {
            home: home.into(),
            config,
            queues: DashMap::new(),
            clock: Box::new(clock),
        }
    }

    /// A service over `home` using the wall clock and default tuning.
    pub fn open(home: impl Into<PathBuf>) -> Self {
        Self::new(home, SystemClock)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config(&self) -> &FileQueueConfig {
        &self.config
    }

    /// Directory holding the files of the queue called `name`.
    pub fn queue_dir(&self, name: &str) -> PathBuf {
        self.home.join(blake3::hash(name.as_bytes()).to_hex().as_str())
    }

    /// Persisted metadata of a queue, if it exists on disk.
    pub fn queue_meta(&self, queue: &QueueHandle) -> Result<Option<QueueMeta>> {
        meta::load(&self.queue_dir(queue.name()).join(META_FILE))
    }

    /// Current holder of the queue's lock marker, if any.
    pub fn lock_owner(&self, queue: &QueueHandle) -> Result<Option<LockOwner>> {
        let state = self.queue(queue)?;
        LockOwner::read(&state.lock)
    }

    fn queue(&self, handle: &QueueHandle) -> Result<Arc<FileQueue>> {
        if let Some(entry) = self.queues.get(handle.name()) {
            return Ok(Arc::clone(entry.value()));
        }

        // Possibly created by another process sharing this home.
        let dir = self.queue_dir(handle.name());
        let meta = meta::load(&dir.join(META_FILE))?
            .ok_or_else(|| Error::QueueNotFound(handle.name().to_string()))?;
        check_name(&meta, handle.name())?;
        log::debug!("opened file queue {handle} at {}", dir.display());
        Ok(self.cache(handle.name(), FileQueue::new(&dir, &meta)))
    }

    fn cache(&self, name: &str, queue: FileQueue) -> Arc<FileQueue> {
        let entry = self
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(queue));
        Arc::clone(entry.value())
    }

    fn lock(&self, queue: &FileQueue) -> Result<LockGuard> {
        LockGuard::acquire(
            &queue.lock,
            self.config.lock_backoff(),
            self.config.lock_warn_after(),
            || self.clock.now(),
        )
    }

    /// Head of `claimed`, refreshed and moved to the tail, if its timeout has
    /// lapsed.
    fn redeliver(&self, queue: &FileQueue, now: u64) -> Result<Option<Message>> {
        let claimed = store::read_lines(&queue.secondary)?;
        let Some(head) = claimed.first() else {
            return Ok(None);
        };
        let mut message = record::decode(head)?;
        if !message.is_visible(now) {
            return Ok(None);
        }
        message.refresh_visibility(now, queue.visibility_timeout);
        let moved = record::encode(&message);
        store::rewrite(
            &queue.secondary,
            claimed
                .iter()
                .skip(1)
                .map(String::as_str)
                .chain(iter::once(moved.as_str())),
            self.config.sync_writes,
        )?;
        Ok(Some(message))
    }

    /// Head of `unclaimed`, claimed and appended to `claimed`.
    fn deliver_first(&self, queue: &FileQueue, now: u64) -> Result<Option<Message>> {
        let unclaimed = store::read_lines(&queue.primary)?;
        let Some(head) = unclaimed.first() else {
            return Ok(None);
        };
        let mut message = record::decode(head)?;
        message.claim(ReceiptToken::generate(), now, queue.visibility_timeout);

        // Claimed side first: a crash in between redelivers, never loses.
        store::append_line(
            &queue.secondary,
            &record::encode(&message),
            self.config.sync_writes,
        )?;
        store::rewrite(
            &queue.primary,
            unclaimed.iter().skip(1).map(String::as_str),
            self.config.sync_writes,
        )?;
        Ok(Some(message))
    }
}

fn check_name(meta: &QueueMeta, name: &str) -> Result<()> {
    if meta.name != name {
        return Err(Error::Corrupt("queue.meta belongs to a different queue"));
    }
    Ok(())
}

impl QueueService for FileQueueService {
    fn create_queue(&self, name: &str, visibility_timeout: Duration) -> Result<QueueHandle> {
        let handle = QueueHandle::new(name);
        if self.queues.contains_key(name) {
            return Ok(handle);
        }

        let dir = self.queue_dir(name);
        std::fs::create_dir_all(&dir)?;
        meta::sweep_orphaned_temps(&dir)?;
        let meta_path = dir.join(META_FILE);
        let meta = match meta::load(&meta_path)? {
            Some(meta) => meta,
            None => {
                let fresh = QueueMeta {
                    name: name.to_string(),
                    visibility_timeout_ms: timeout_ms(visibility_timeout),
                    created_at_ms: self.clock.now(),
                };
                let meta = meta::publish(&meta_path, &fresh, self.config.sync_writes)?;
                if meta == fresh {
                    log::debug!(
                        "created file queue {name:?} at {} (visibility timeout {}ms)",
                        dir.display(),
                        meta.visibility_timeout_ms
                    );
                }
                meta
            }
        };
        check_name(&meta, name)?;
        self.cache(name, FileQueue::new(&dir, &meta));
        Ok(handle)
    }

    fn push(&self, queue: &QueueHandle, body: &[u8]) -> Result<()> {
        let state = self.queue(queue)?;
        let line = record::encode(&Message::new(body));
        let _guard = self.lock(&state)?;
        store::append_line(&state.primary, &line, self.config.sync_writes)?;
        log::trace!("push {queue}: {} bytes", body.len());
        Ok(())
    }

    fn pull(&self, queue: &QueueHandle) -> Result<Option<Message>> {
        let state = self.queue(queue)?;
        let _guard = self.lock(&state)?;
        let now = self.clock.now();

        if let Some(message) = self.redeliver(&state, now)? {
            log::debug!("redelivered message on {queue}");
            return Ok(Some(message));
        }
        let message = self.deliver_first(&state, now)?;
        if message.is_some() {
            log::trace!("pull {queue}: first delivery");
        }
        Ok(message)
    }

    fn delete(&self, queue: &QueueHandle, message: &Message) -> Result<bool> {
        let state = self.queue(queue)?;
        let Some(token) = message.receipt() else {
            return Ok(false);
        };
        if !state.secondary.exists() {
            return Ok(false);
        }

        let _guard = self.lock(&state)?;
        let claimed = store::read_lines(&state.secondary)?;
        let mut found = false;
        let kept: Vec<&str> = claimed
            .iter()
            .map(String::as_str)
            .filter(|line| {
                if !found && record::receipt_of(line) == token.as_str() {
                    found = true;
                    return false;
                }
                true
            })
            .collect();
        if found {
            store::rewrite(&state.secondary, kept, self.config.sync_writes)?;
            log::trace!("delete {queue}: removed {token}");
        }
        Ok(found)
    }

    fn stats(&self, queue: &QueueHandle) -> Result<QueueStats> {
        let state = self.queue(queue)?;
        let _guard = self.lock(&state)?;
        Ok(QueueStats {
            unclaimed: store::count_lines(&state.primary)?,
            claimed: store::count_lines(&state.secondary)?,
        })
    }
}
