//! Dual-queue message queue with visibility timeouts.
//!
//! Each queue keeps two FIFOs: messages never delivered (unclaimed) and
//! messages delivered but not yet deleted (claimed). A pull first redelivers
//! the head of the claimed side if its visibility timeout has lapsed, and
//! otherwise claims the head of the unclaimed side. A delete needs the receipt
//! token handed out by the pull.
//!
//! Two backends implement [`QueueService`]: [`InMemoryQueueService`] for a
//! single process and, with the `file` feature, [`FileQueueService`] for
//! processes sharing a directory on one host.

pub mod clock;
pub mod error;
#[cfg(feature = "file")]
pub mod file;
pub mod memory;
pub mod message;
pub mod service;

pub use clock::{Clock, ManualClock, QuantaClock, SystemClock};
pub use error::{Error, Result};
#[cfg(feature = "file")]
pub use file::{FileQueueConfig, FileQueueService, LockOwner, QueueMeta};
pub use memory::InMemoryQueueService;
pub use message::{Message, ReceiptToken};
pub use service::{QueueHandle, QueueService, QueueStats};
