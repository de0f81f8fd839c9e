//! Stop request shared between the signal listener and the watch loop.
//!
//! The loop never aborts a signer run on a stop request. It finishes the job
//! in hand, then returns at the next cycle boundary or idle slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once by SIGINT/SIGTERM (or Ctrl+C on windows), read by the loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop. Repeated requests are harmless.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_and_loop_share_the_request() {
        let loop_side = ShutdownSignal::new();
        let listener_side = loop_side.clone();
        assert!(!loop_side.is_requested());

        listener_side.request();
        listener_side.request();
        assert!(loop_side.is_requested());
    }
}
