//! Persistent vector store on SQLite
//!
//! One collection per database file; the physical collection name is
//! the configured base name suffixed with the embedding provider and
//! model, so switching models can never mix vectors of different
//! dimensions. Search is an exact cosine scan over rowid-paged batches
//! with the metadata filter applied during the scan.

pub mod filter;
pub mod maintenance;

pub use filter::MetadataFilter;
pub use maintenance::{OptimizeReport, ReindexProfile, ReindexProgress, ReindexReport};

use crate::config::StoreConfig;
use crate::embedding::cache::{decode_vector, encode_vector};
use crate::error::{Result, StoreError};
use crate::types::{Chunk, ChunkMetadata};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Rows examined per scan batch; bounds resident memory during search
const SCAN_BATCH: i64 = 1024;

/// A search hit: the stored chunk and its cosine distance to the query
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Cosine distance in [0, 2]; smaller is closer
    pub distance: f32,
}

/// Collection statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub dimension: Option<usize>,
    pub by_file_type: HashMap<String, u64>,
    pub by_processing_method: HashMap<String, u64>,
    pub titles_total: u64,
    pub tables_total: u64,
    pub lists_total: u64,
    pub avg_titles_per_chunk: f64,
    pub avg_tables_per_chunk: f64,
    pub avg_lists_per_chunk: f64,
}

/// Persistent collection of (id, text, embedding, metadata)
pub struct VectorStore {
    pool: SqlitePool,
    config: StoreConfig,
    collection: String,
    db_path: PathBuf,
    /// Single-writer / multi-reader gate; reindex holds the write half
    gate: RwLock<()>,
}

/// Physical collection name: base + provider/model suffix, reduced to
/// filesystem- and identifier-safe characters
pub fn collection_name(base: &str, provider_identity: &str) -> String {
    let suffix: String = provider_identity
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let base: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{base}-{suffix}")
}

impl VectorStore {
    /// Open (or create) the collection for the given provider identity
    pub async fn open(config: StoreConfig, provider_identity: &str) -> Result<Self> {
        let collection = collection_name(&config.collection_name, provider_identity);

        std::fs::create_dir_all(&config.db_dir)?;
        let db_path = config.db_dir.join(format!("{collection}.sqlite3"));

        info!("Opening vector store collection {collection} at {:?}", db_path);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        // auto_vacuum must be set before the first table is created for
        // the incremental optimize path to work
        sqlx::query("PRAGMA auto_vacuum = INCREMENTAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                norm REAL NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_created_at ON chunks(created_at)")
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            config,
            collection,
            db_path,
            gate: RwLock::new(()),
        })
    }

    /// The physical collection name
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embedding dimension of the collection, if it holds any vectors
    pub async fn dimension(&self) -> Result<Option<usize>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT length(embedding) FROM chunks LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(len,)| len as usize / 4))
    }

    /// Number of chunks in the collection
    pub async fn count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    /// Insert or replace a batch of chunks in one transaction.
    ///
    /// The batch is atomic: on any failure nothing is visible to
    /// readers. All embeddings must share the collection's dimension.
    pub async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let _write = self.gate.write().await;

        let expected = match self.dimension().await? {
            Some(dim) => dim,
            None => chunks[0].embedding.len(),
        };
        for chunk in chunks {
            if chunk.embedding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: chunk.embedding.len(),
                }
                .into());
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let blob = encode_vector(&chunk.embedding);
            let norm = vector_norm(&chunk.embedding) as f64;
            let metadata = serde_json::to_string(&chunk.metadata)?;

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO chunks (id, content, embedding, norm, metadata, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.text)
            .bind(&blob)
            .bind(norm)
            .bind(&metadata)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("Upserted {} chunks into {}", chunks.len(), self.collection);
        Ok(())
    }

    /// Nearest-neighbor search, optionally filtered by metadata.
    /// Results are sorted by ascending cosine distance.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        self.search_with_threshold(query_embedding, k, f32::MAX, filter)
            .await
    }

    /// Like [`search`](Self::search) but discards hits above `max_distance`
    pub async fn search_with_threshold(
        &self,
        query_embedding: &[f32],
        k: usize,
        max_distance: f32,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let _read = self.gate.read().await;

        if k == 0 {
            return Ok(Vec::new());
        }

        if let Some(expected) = self.dimension().await? {
            if query_embedding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: query_embedding.len(),
                }
                .into());
            }
        }

        let query_norm = vector_norm(query_embedding);
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        // Paged scan keeps resident memory bounded on large collections
        let mut candidates: Vec<(String, f32)> = Vec::new();
        let mut last_rowid: i64 = 0;

        loop {
            let rows = sqlx::query(
                r#"
                SELECT rowid, id, embedding, norm, metadata
                FROM chunks
                WHERE rowid > ?1
                ORDER BY rowid
                LIMIT ?2
                "#,
            )
            .bind(last_rowid)
            .bind(SCAN_BATCH)
            .fetch_all(&self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            for row in &rows {
                last_rowid = row.get("rowid");

                if let Some(filter) = filter {
                    let metadata_json: String = row.get("metadata");
                    let metadata: serde_json::Value =
                        serde_json::from_str(&metadata_json).unwrap_or_default();
                    if !filter.matches(&metadata) {
                        continue;
                    }
                }

                let blob: Vec<u8> = row.get("embedding");
                let norm: f64 = row.get("norm");
                let embedding = decode_vector(&blob);

                let distance = cosine_distance(query_embedding, query_norm, &embedding, norm as f32);
                if distance <= max_distance {
                    let id: String = row.get("id");
                    candidates.push((id, distance));
                }
            }

            // Keep only the best k between batches
            candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(k);
        }

        let mut results = Vec::with_capacity(candidates.len());
        for (id, distance) in candidates {
            if let Some(chunk) = self.fetch_chunk(&id).await? {
                results.push(SearchResult { chunk, distance });
            }
        }

        debug!(
            "Search returned {} results (k={}, max_distance={})",
            results.len(),
            k,
            max_distance
        );
        Ok(results)
    }

    async fn fetch_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT id, content, embedding, metadata FROM chunks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata_json: String = row.get("metadata");
        let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
            .map_err(|e| StoreError::StorageFailed(format!("bad metadata for {id}: {e}")))?;
        let blob: Vec<u8> = row.get("embedding");

        Ok(Some(Chunk {
            id: row.get("id"),
            text: row.get("content"),
            embedding: decode_vector(&blob),
            metadata,
        }))
    }

    /// All chunk ids, sorted
    pub async fn chunk_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM chunks ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Dump the whole collection ordered by id, e.g. for backups or to
    /// verify that a reorganization preserved every chunk
    pub async fn export_chunks(&self) -> Result<Vec<Chunk>> {
        let _read = self.gate.read().await;

        let ids = self.chunk_ids().await?;
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = self.fetch_chunk(&id).await? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Path of the collection's database file
    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    /// Distinct sources with their chunk counts, alphabetical
    pub async fn list_sources(&self) -> Result<Vec<(String, u64)>> {
        let _read = self.gate.read().await;

        let rows: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT json_extract(metadata, '$.source') AS s, COUNT(*) AS n \
             FROM chunks GROUP BY s ORDER BY s",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(s, n)| s.map(|s| (s, n as u64)))
            .collect())
    }

    /// Remove every chunk belonging to one source. Returns the number
    /// of chunks removed; an unknown source removes nothing.
    pub async fn delete_source(&self, source: &str) -> Result<u64> {
        let _write = self.gate.write().await;

        let result = sqlx::query(
            "DELETE FROM chunks WHERE json_extract(metadata, '$.source') = ?1",
        )
        .bind(source)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected();
        info!("Removed {removed} chunks for source {source}");
        Ok(removed)
    }

    /// Aggregate statistics over the collection
    pub async fn stats(&self) -> Result<StoreStats> {
        let _read = self.gate.read().await;

        let total = self.count().await?;
        let dimension = self.dimension().await?;

        let by_file_type = self.group_counts("$.file_type").await?;
        let by_processing_method = self.group_counts("$.processing_method").await?;

        let (titles_total, avg_titles_per_chunk) =
            self.sum_and_avg("$.structural_info_titles_count").await?;
        let (tables_total, avg_tables_per_chunk) =
            self.sum_and_avg("$.structural_info_tables_count").await?;
        let (lists_total, avg_lists_per_chunk) =
            self.sum_and_avg("$.structural_info_lists_count").await?;

        Ok(StoreStats {
            total,
            dimension,
            by_file_type,
            by_processing_method,
            titles_total,
            tables_total,
            lists_total,
            avg_titles_per_chunk,
            avg_tables_per_chunk,
            avg_lists_per_chunk,
        })
    }

    async fn group_counts(&self, json_path: &str) -> Result<HashMap<String, u64>> {
        let sql = format!(
            "SELECT json_extract(metadata, '{json_path}') AS k, COUNT(*) AS n \
             FROM chunks GROUP BY k"
        );
        let rows: Vec<(Option<String>, i64)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .filter_map(|(k, n)| k.map(|k| (k, n as u64)))
            .collect())
    }

    async fn sum_and_avg(&self, json_path: &str) -> Result<(u64, f64)> {
        let sql = format!(
            "SELECT COALESCE(SUM(json_extract(metadata, '{json_path}')), 0), \
                    COALESCE(AVG(json_extract(metadata, '{json_path}')), 0.0) \
             FROM chunks"
        );
        let row: (i64, f64) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok((row.0.max(0) as u64, row.1))
    }
}

/// Euclidean norm
fn vector_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine distance (1 - cosine similarity), clamped to [0, 2]
fn cosine_distance(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a.len() != b.len() || a_norm == 0.0 || b_norm == 0.0 {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (1.0 - dot / (a_norm * b_norm)).clamp(0.0, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ProcessingMethod;
    use crate::types::chunk_id;

    pub(crate) fn test_chunk(source: &str, index: usize, total: usize, embedding: Vec<f32>) -> Chunk {
        let text = format!("chunk {index} of {source}");
        Chunk {
            id: chunk_id(source, index, &text),
            text,
            embedding,
            metadata: ChunkMetadata {
                source: source.to_string(),
                file_path: None,
                file_type: ".txt".to_string(),
                processed_date: "2025-06-01T00:00:00Z".to_string(),
                processing_method: ProcessingMethod::Enhanced,
                chunk_index: index,
                chunk_total: total,
                structural_info_titles_count: 0,
                structural_info_tables_count: 0,
                structural_info_lists_count: 0,
                oversized_table: false,
            },
        }
    }

    pub(crate) async fn open_test_store(dir: &std::path::Path) -> VectorStore {
        let config = StoreConfig {
            db_dir: dir.to_path_buf(),
            checkpoint_dir: dir.join("checkpoints"),
            ..StoreConfig::default()
        };
        VectorStore::open(config, "stub:test-model").await.unwrap()
    }

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        let n = vector_norm(&v);
        for x in &mut v {
            *x /= n;
        }
        v
    }

    #[test]
    fn test_collection_name_isolates_providers() {
        let a = collection_name("knowledge", "ollama:nomic-embed-text");
        let b = collection_name("knowledge", "openai:text-embedding-3-small");
        assert_ne!(a, b);
        assert!(a.starts_with("knowledge-"));
        assert!(!a.contains(':'));
    }

    #[test]
    fn test_cosine_distance_bounds() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let c = [-1.0f32, 0.0];

        let na = vector_norm(&a);
        assert!((cosine_distance(&a, na, &a, na)).abs() < 1e-6);
        assert!((cosine_distance(&a, na, &b, vector_norm(&b)) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&a, na, &c, vector_norm(&c)) - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_test_store(dir.path()).await;

        let mut base = vec![0.0f32; 8];
        base[0] = 1.0;
        let mut near = vec![0.05f32; 8];
        near[0] = 1.0;
        let mut far = vec![0.0f32; 8];
        far[7] = 1.0;

        store
            .upsert(&[
                test_chunk("a.txt", 0, 2, unit(base.clone())),
                test_chunk("a.txt", 1, 2, unit(near)),
                test_chunk("b.txt", 0, 1, unit(far)),
            ])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(store.dimension().await.unwrap(), Some(8));

        let results = store.search(&unit(base), 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].distance <= results[1].distance);
        assert_eq!(results[0].chunk.metadata.source, "a.txt");
    }

    #[tokio::test]
    async fn test_threshold_discards_far_hits() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_test_store(dir.path()).await;

        let mut base = vec![0.0f32; 4];
        base[0] = 1.0;
        let mut far = vec![0.0f32; 4];
        far[3] = 1.0;

        store
            .upsert(&[
                test_chunk("near.txt", 0, 1, base.clone()),
                test_chunk("far.txt", 0, 1, far),
            ])
            .await
            .unwrap();

        let results = store
            .search_with_threshold(&base, 10, 0.3, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.metadata.source, "near.txt");
    }

    #[tokio::test]
    async fn test_top_k_over_random_vectors() {
        use rand::Rng;

        let dir = tempfile::tempdir().unwrap();
        let store = open_test_store(dir.path()).await;

        let mut rng = rand::rng();
        let chunks: Vec<Chunk> = (0..200)
            .map(|i| {
                let v: Vec<f32> = (0..8).map(|_| rng.random::<f32>() - 0.5).collect();
                test_chunk(&format!("doc{i}.txt"), 0, 1, v)
            })
            .collect();
        store.upsert(&chunks).await.unwrap();

        let query: Vec<f32> = (0..8).map(|_| rng.random::<f32>() - 0.5).collect();
        let results = store.search(&query, 7, None).await.unwrap();

        assert_eq!(results.len(), 7);
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        for r in &results {
            assert!((0.0..=2.0).contains(&r.distance));
        }
    }

    #[tokio::test]
    async fn test_k_larger_than_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_test_store(dir.path()).await;

        store
            .upsert(&[test_chunk("only.txt", 0, 1, vec![1.0, 0.0])])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 50, None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_filter_with_no_matches_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_test_store(dir.path()).await;

        store
            .upsert(&[test_chunk("a.txt", 0, 1, vec![1.0, 0.0])])
            .await
            .unwrap();

        let filter = MetadataFilter::parse(&serde_json::json!({"file_type": ".pdf"})).unwrap();
        let results = store.search(&[1.0, 0.0], 5, Some(&filter)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_test_store(dir.path()).await;

        store
            .upsert(&[test_chunk("a.txt", 0, 1, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let err = store
            .upsert(&[test_chunk("b.txt", 0, 1, vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::RagError::Storage(StoreError::DimensionMismatch { .. })
        ));

        // A failed upsert leaves the count unchanged
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_test_store(dir.path()).await;

        let chunks = vec![
            test_chunk("doc.txt", 0, 2, vec![1.0, 0.0]),
            test_chunk("doc.txt", 1, 2, vec![0.0, 1.0]),
        ];

        store.upsert(&chunks).await.unwrap();
        let count_first = store.count().await.unwrap();

        store.upsert(&chunks).await.unwrap();
        assert_eq!(store.count().await.unwrap(), count_first);
    }

    #[tokio::test]
    async fn test_stats_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_test_store(dir.path()).await;

        let mut with_tables = test_chunk("t.csv", 0, 1, vec![1.0, 0.0]);
        with_tables.metadata.file_type = ".csv".to_string();
        with_tables.metadata.structural_info_tables_count = 2;

        store
            .upsert(&[with_tables, test_chunk("p.txt", 0, 1, vec![0.0, 1.0])])
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.dimension, Some(2));
        assert_eq!(stats.by_file_type.get(".csv"), Some(&1));
        assert_eq!(stats.by_file_type.get(".txt"), Some(&1));
        assert_eq!(stats.tables_total, 2);
        assert!((stats.avg_tables_per_chunk - 1.0).abs() < 1e-9);
        assert_eq!(
            stats.by_processing_method.get("enhanced"),
            Some(&2)
        );
    }
}
