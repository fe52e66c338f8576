//! Embedding service with a two-tier cache
//!
//! Lookup order: in-memory LRU, then one-file-per-key disk tier, then
//! the provider. Results are written through to both tiers. Concurrent
//! requests for the same key coalesce into a single provider call. A
//! failing disk tier degrades the entry to memory-only caching.

pub mod cache;
pub mod provider;

pub use provider::{build_provider, EmbeddingProvider, OllamaEmbedder, OpenAiCompatEmbedder};

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::text::normalize;
use cache::{DiskTier, MemoryTier};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Cache performance counters
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingCacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub memory_size: usize,
    pub memory_capacity: usize,
    pub disk_path: PathBuf,
}

type InflightMap = Mutex<HashMap<String, Arc<OnceCell<Arc<Vec<f32>>>>>>;

/// Embedding service: provider + memory LRU + disk tier
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    memory: MemoryTier,
    disk: DiskTier,
    inflight: InflightMap,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    total_requests: AtomicU64,
}

impl EmbeddingService {
    pub fn new(config: &EmbeddingConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let disk = DiskTier::new(config.cache_dir.clone())?;

        info!(
            "Embedding service ready: {} (cache at {:?}, memory capacity {})",
            provider.identity(),
            config.cache_dir,
            config.memory_cache_capacity
        );

        Ok(Self {
            provider,
            memory: MemoryTier::new(config.memory_cache_capacity),
            disk,
            inflight: Mutex::new(HashMap::new()),
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
        })
    }

    /// The provider behind this service
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// `provider:model` identity string
    pub fn identity(&self) -> String {
        self.provider.identity()
    }

    /// Cache key: hash of provider, model, and normalized text
    fn cache_key(&self, normalized_text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.provider_id().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.provider.model().as_bytes());
        hasher.update([0x1f]);
        hasher.update(normalized_text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Embed one text, consulting the cache tiers first
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let normalized = normalize(text);
        let key = self.cache_key(&normalized);

        if let Some(vector) = self.lookup_tiers(&key) {
            return Ok(vector.as_ref().clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let vector = self.compute_coalesced(key, normalized).await?;
        Ok(vector.as_ref().clone())
    }

    /// Embed a batch, order-preserving. Cached entries are served from
    /// the tiers; the rest go to the provider in a single call.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.total_requests
            .fetch_add(texts.len() as u64, Ordering::Relaxed);

        let normalized: Vec<String> = texts.iter().map(|t| normalize(t)).collect();
        let keys: Vec<String> = normalized.iter().map(|t| self.cache_key(t)).collect();

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut uncached: Vec<usize> = Vec::new();

        for (i, key) in keys.iter().enumerate() {
            match self.lookup_tiers(key) {
                Some(vector) => results[i] = Some(vector.as_ref().clone()),
                None => uncached.push(i),
            }
        }

        if !uncached.is_empty() {
            self.misses.fetch_add(uncached.len() as u64, Ordering::Relaxed);

            // Identical texts inside one batch collapse to one request
            let mut unique: Vec<usize> = Vec::new();
            let mut first_occurrence: HashMap<&str, usize> = HashMap::new();
            for &i in &uncached {
                if !first_occurrence.contains_key(keys[i].as_str()) {
                    first_occurrence.insert(keys[i].as_str(), i);
                    unique.push(i);
                }
            }

            let batch: Vec<String> = unique.iter().map(|&i| normalized[i].clone()).collect();
            debug!(
                "Embedding batch: {} cached, {} to compute",
                texts.len() - uncached.len(),
                batch.len()
            );

            let vectors = self.provider.embed_batch(&batch).await?;

            let mut computed: HashMap<&str, Arc<Vec<f32>>> = HashMap::new();
            for (&i, vector) in unique.iter().zip(vectors.into_iter()) {
                let vector = Arc::new(vector);
                self.store_tiers(&keys[i], &vector);
                computed.insert(keys[i].as_str(), vector);
            }

            for &i in &uncached {
                let vector = computed
                    .get(keys[i].as_str())
                    .expect("every uncached key was computed");
                results[i] = Some(vector.as_ref().clone());
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.expect("every slot is filled"))
            .collect())
    }

    /// Cache statistics across both tiers
    pub fn stats(&self) -> EmbeddingCacheStats {
        EmbeddingCacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            memory_size: self.memory.len(),
            memory_capacity: self.memory.capacity(),
            disk_path: self.disk.path().to_path_buf(),
        }
    }

    /// Drop both tiers; vectors are recomputed on next request
    pub fn clear(&self) -> Result<()> {
        self.memory.clear();
        let removed = self.disk.clear()?;
        info!("Cleared embedding cache ({} disk entries)", removed);
        Ok(())
    }

    fn lookup_tiers(&self, key: &str) -> Option<Arc<Vec<f32>>> {
        if let Some(vector) = self.memory.get(key) {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(vector);
        }

        match self.disk.read(key) {
            Ok(Some(vector)) => {
                self.disk_hits.fetch_add(1, Ordering::Relaxed);
                let vector = Arc::new(vector);
                self.memory.insert(key.to_string(), vector.clone());
                Some(vector)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Disk cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    fn store_tiers(&self, key: &str, vector: &Arc<Vec<f32>>) {
        if let Err(e) = self.disk.write(key, vector) {
            // Degrade to memory-only caching for this entry
            warn!("Disk cache write failed, keeping memory-only: {}", e);
        }
        self.memory.insert(key.to_string(), vector.clone());
    }

    /// Compute one vector, coalescing concurrent requests for the same key
    async fn compute_coalesced(&self, key: String, normalized: String) -> Result<Arc<Vec<f32>>> {
        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(key.clone()).or_default().clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                let vectors = self.provider.embed_batch(&[normalized]).await?;
                let vector = vectors
                    .into_iter()
                    .next()
                    .ok_or_else(|| crate::error::EmbeddingError::BackendUnavailable(
                        "provider returned no vectors".to_string(),
                    ))?;
                let vector = Arc::new(vector);
                self.store_tiers(&key, &vector);
                Ok::<_, RagError>(vector)
            })
            .await
            .cloned();

        let mut inflight = self.inflight.lock().await;
        inflight.remove(&key);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Deterministic provider counting its calls
    struct CountingProvider {
        dim: usize,
        calls: AtomicUsize,
        texts_seen: AtomicUsize,
    }

    impl CountingProvider {
        fn new(dim: usize) -> Self {
            Self {
                dim,
                calls: AtomicUsize::new(0),
                texts_seen: AtomicUsize::new(0),
            }
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            (0..self.dim)
                .map(|i| digest[i % digest.len()] as f32 / 255.0)
                .collect()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }

        fn provider_id(&self) -> &str {
            "stub"
        }

        fn model(&self) -> &str {
            "counting"
        }
    }

    fn service_with(dir: &std::path::Path, capacity: usize) -> (EmbeddingService, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider::new(16));
        let config = EmbeddingConfig {
            cache_dir: dir.to_path_buf(),
            memory_cache_capacity: capacity,
            ..EmbeddingConfig::default()
        };
        let service = EmbeddingService::new(&config, provider.clone()).unwrap();
        (service, provider)
    }

    #[tokio::test]
    async fn test_miss_then_memory_hit() {
        let dir = tempfile::tempdir().unwrap();
        let (service, provider) = service_with(dir.path(), 8);

        let first = service.embed("titanium melts at 1668 C").await.unwrap();
        let second = service.embed("titanium melts at 1668 C").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let stats = service.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.total_requests, 2);
    }

    #[tokio::test]
    async fn test_disk_tier_survives_memory_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let (service, provider) = service_with(dir.path(), 1);

        let first = service.embed("alpha").await.unwrap();
        // Evicts "alpha" from the single-slot memory tier
        service.embed("beta").await.unwrap();

        let again = service.embed("alpha").await.unwrap();
        assert_eq!(first, again);
        // Two unique texts, two provider calls; the re-read came from disk
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.stats().disk_hits, 1);
    }

    #[tokio::test]
    async fn test_normalization_unifies_keys() {
        let dir = tempfile::tempdir().unwrap();
        let (service, provider) = service_with(dir.path(), 8);

        service.embed("hello   world").await.unwrap();
        service.embed("hello world").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_partitions_cached_and_uncached() {
        let dir = tempfile::tempdir().unwrap();
        let (service, provider) = service_with(dir.path(), 8);

        service.embed("known text").await.unwrap();
        provider.texts_seen.store(0, Ordering::SeqCst);

        let texts = vec![
            "fresh one".to_string(),
            "known text".to_string(),
            "fresh two".to_string(),
        ];
        let vectors = service.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        // Only the two fresh texts hit the provider, in one call
        assert_eq!(provider.texts_seen.load(Ordering::SeqCst), 2);

        // Order is preserved: the cached slot matches a direct embed
        let direct = service.embed("known text").await.unwrap();
        assert_eq!(vectors[1], direct);
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let (service, provider) = service_with(dir.path(), 8);
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.embed("same key every time").await.unwrap()
            }));
        }

        let mut vectors = Vec::new();
        for handle in handles {
            vectors.push(handle.await.unwrap());
        }

        assert!(vectors.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(
            provider.calls.load(Ordering::SeqCst),
            1,
            "concurrent embeds of one key must coalesce"
        );
    }

    #[tokio::test]
    async fn test_clear_then_recompute_same_vector() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _provider) = service_with(dir.path(), 8);

        let before = service.embed("stable text").await.unwrap();
        service.clear().unwrap();
        assert_eq!(service.stats().memory_size, 0);

        let after = service.embed("stable text").await.unwrap();
        assert_eq!(before, after);
    }
}
