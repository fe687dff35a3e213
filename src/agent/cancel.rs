//! Cooperative cancellation for an in-flight agent run.
//!
//! The first cancel lets the driver finish forwarding the current
//! inflight event before it returns `Cancelled`; a second cancel while
//! the first is still pending is immediate.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const NONE: u8 = 0;
const REQUESTED: u8 = 1;
const FORCE: u8 = 2;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicU8>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicU8::new(NONE)))
    }

    /// Request cancellation. Returns true if this is the second (force) request.
    pub fn cancel(&self) -> bool {
        let prev = self.0.swap(REQUESTED, Ordering::SeqCst);
        if prev == REQUESTED {
            self.0.store(FORCE, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst) != NONE
    }

    pub fn is_forced(&self) -> bool {
        self.0.load(Ordering::SeqCst) == FORCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cancel_is_not_force() {
        let token = CancelToken::new();
        assert!(!token.cancel());
        assert!(token.is_requested());
        assert!(!token.is_forced());
    }

    #[test]
    fn second_cancel_is_force() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.cancel());
        assert!(token.is_forced());
    }
}
