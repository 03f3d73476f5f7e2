//! Shared cancellation flag for the AI call.
//!
//! Wraps a `tokio_util` token so the invocation can await cancellation instead of
//! polling. A token cannot be un-cancelled, so `reset()` swaps in a fresh one at
//! the start of every invocation; the cancel handler always hits whichever token
//! is current.

use log::info;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct AiCancellation {
    current: Mutex<CancellationToken>,
}

impl AiCancellation {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// Clears any earlier request and returns the token the new invocation observes.
    pub fn reset(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = fresh.clone();
        fresh
    }

    /// Requests cancellation of the in-flight invocation, if any.
    pub fn cancel(&self) {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        current.cancel();
        info!("AI processing cancellation request received");
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.current
            .lock()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}

impl Default for AiCancellation {
    fn default() -> Self {
        Self::new()
    }
}
