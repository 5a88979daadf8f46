//! Cancel token for cooperative stop handling.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// A token polled by step bodies to observe a stop request.
///
/// Cancellation is idempotent; only the first reason is kept. The runtime
/// binds one token to each execution and the coordinator cancels it when a
/// stop request moves the execution to `Stopping`. Step bodies are expected
/// to poll at I/O or chunk boundaries and return early; nothing is ever
/// interrupted forcibly.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl CancelToken {
    /// Creates a new, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason. The first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.into());
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}
