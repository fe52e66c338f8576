//! Cooperative cancellation for long-running operations
//!
//! Bulk ingestion, optimize, and reindex check the token between
//! batches; cancellation rolls back partial documents and leaves the
//! last reindex checkpoint valid for resumption.

use crate::error::{RagError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag shared between an operation and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; observed at the next batch boundary
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Bail out with [`RagError::Cancelled`] if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RagError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        assert!(token.check().is_ok());
        clone.cancel();

        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(RagError::Cancelled)));
    }
}
