//! Maintenance operations over the cache and the vector store
//!
//! All operations are idempotent. Reindex publishes live progress over
//! a watch channel so an external UI can render current/total and the
//! batch being worked on.

use crate::cancel::CancelToken;
use crate::embedding::{EmbeddingCacheStats, EmbeddingService};
use crate::error::Result;
use crate::store::{OptimizeReport, ReindexProfile, ReindexProgress, ReindexReport, VectorStore};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Cache state before and after a clear
#[derive(Debug, Clone, Serialize)]
pub struct ClearCacheReport {
    pub before: EmbeddingCacheStats,
    pub after: EmbeddingCacheStats,
}

/// Out-of-band maintenance over a knowledge base's resources
pub struct Maintenance {
    embeddings: Arc<EmbeddingService>,
    store: Arc<VectorStore>,
    progress_tx: watch::Sender<ReindexProgress>,
    progress_rx: watch::Receiver<ReindexProgress>,
}

impl Maintenance {
    pub fn new(embeddings: Arc<EmbeddingService>, store: Arc<VectorStore>) -> Self {
        let (progress_tx, progress_rx) = watch::channel(ReindexProgress::default());
        Self {
            embeddings,
            store,
            progress_tx,
            progress_rx,
        }
    }

    /// Embedding cache counters
    pub fn cache_stats(&self) -> EmbeddingCacheStats {
        self.embeddings.stats()
    }

    /// Drop both cache tiers, reporting the state on each side
    pub fn clear_cache(&self) -> Result<ClearCacheReport> {
        let before = self.embeddings.stats();
        self.embeddings.clear()?;
        let after = self.embeddings.stats();
        info!(
            "Cache cleared ({} memory entries dropped)",
            before.memory_size
        );
        Ok(ClearCacheReport { before, after })
    }

    /// Collection statistics
    pub async fn store_stats(&self) -> Result<crate::store::StoreStats> {
        self.store.stats().await
    }

    /// Reorganize on-disk storage; dispatches to the incremental
    /// variant automatically on large collections
    pub async fn optimize_store(&self) -> Result<OptimizeReport> {
        self.store.optimize().await
    }

    /// Rebuild indices under the given profile; resumable from the last
    /// checkpoint after a failure or cancellation
    pub async fn reindex_store(
        &self,
        profile: ReindexProfile,
        cancel: &CancelToken,
    ) -> Result<ReindexReport> {
        self.store
            .reindex(profile, cancel, Some(&self.progress_tx))
            .await
    }

    /// Live progress feed for the current (or last) reindex
    pub fn reindex_progress(&self) -> watch::Receiver<ReindexProgress> {
        self.progress_rx.clone()
    }
}
