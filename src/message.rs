//! The unit of data moved through a queue.
//!
//! A `Message` starts unclaimed (no receipt token). Pulling it calls
//! [`Message::claim`], which assigns the token and starts the visibility
//! timeout; redelivery calls [`Message::refresh_visibility`]. Only claimed
//! messages carry a token, and only a token can authorize a delete.

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

/// Identifier handed out on pull; required to delete the claimed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptToken(String);

impl ReceiptToken {
    /// A fresh token, unique across processes on this host.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a token previously obtained from a pull, e.g. one read back from
    /// the command line. No validation is done; unknown tokens simply never
    /// match a claimed message.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whole milliseconds in `timeout`, saturating at `u64::MAX`.
pub(crate) fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    receipt: Option<ReceiptToken>,
    visible_at: u64,
}

impl Message {
    /// A never-pulled message. Deleting it always fails.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            receipt: None,
            visible_at: 0,
        }
    }

    /// A bodiless delete handle carrying only a receipt from an earlier pull,
    /// e.g. one passed around out of band.
    pub fn with_receipt(receipt: ReceiptToken) -> Self {
        Self {
            body: Vec::new(),
            receipt: Some(receipt),
            visible_at: 0,
        }
    }

    /// Rebuilds a message from its persisted parts.
    pub(crate) fn from_parts(body: Vec<u8>, receipt: Option<ReceiptToken>, visible_at: u64) -> Self {
        Self {
            body,
            receipt,
            visible_at,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body as UTF-8, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn receipt(&self) -> Option<&ReceiptToken> {
        self.receipt.as_ref()
    }

    /// Timestamp (ms) after which the message may be redelivered. Zero until
    /// the first pull.
    pub fn visible_at(&self) -> u64 {
        self.visible_at
    }

    pub fn is_claimed(&self) -> bool {
        self.receipt.is_some()
    }

    /// A claimed message becomes visible again once `now` reaches `visible_at`.
    pub fn is_visible(&self, now: u64) -> bool {
        now >= self.visible_at
    }

    /// First delivery: assign the receipt token and hide the message until
    /// `now + timeout`.
    pub(crate) fn claim(&mut self, receipt: ReceiptToken, now: u64, timeout: Duration) {
        self.receipt = Some(receipt);
        self.refresh_visibility(now, timeout);
    }

    /// Redelivery: keep the token, push the deadline out again.
    pub(crate) fn refresh_visibility(&mut self, now: u64, timeout: Duration) {
        self.visible_at = now.saturating_add(timeout_ms(timeout));
    }

    /// True when this message carries `token`.
    pub(crate) fn same_receipt(&self, token: &ReceiptToken) -> bool {
        self.receipt.as_ref() == Some(token)
    }
}
