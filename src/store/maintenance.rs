//! Store maintenance: optimize and incremental reindex
//!
//! Reindex rebuilds the collection into a shadow table in bounded
//! batches, recomputing norms and re-validating dimensions, then swaps
//! the tables atomically. A checkpoint file is written periodically so
//! a failure (or cancellation) resumes from the last checkpoint instead
//! of starting over. Collections at or above the configured threshold
//! take this incremental path automatically; smaller ones run it as a
//! single batch.

use super::VectorStore;
use crate::cancel::CancelToken;
use crate::embedding::cache::decode_vector;
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Index rebuild profile; `Auto` picks by collection size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexProfile {
    Small,
    Medium,
    Large,
    Auto,
}

impl ReindexProfile {
    /// Map `Auto` to a concrete profile by collection size
    pub fn resolve(self, count: u64) -> ReindexProfile {
        match self {
            ReindexProfile::Auto => {
                if count < 1_000 {
                    ReindexProfile::Small
                } else if count < 50_000 {
                    ReindexProfile::Medium
                } else {
                    ReindexProfile::Large
                }
            }
            other => other,
        }
    }

    /// Rebuild parameters: scan batch plus SQLite page-cache and mmap
    /// budgets, scaled with the expected collection size
    fn params(self, batch_default: u64) -> ProfileParams {
        match self {
            ReindexProfile::Small => ProfileParams {
                batch_size: batch_default.min(500),
                cache_kib: 2_048,
                mmap_bytes: 0,
            },
            ReindexProfile::Medium => ProfileParams {
                batch_size: batch_default,
                cache_kib: 8_192,
                mmap_bytes: 64 * 1024 * 1024,
            },
            ReindexProfile::Large | ReindexProfile::Auto => ProfileParams {
                batch_size: batch_default,
                cache_kib: 32_768,
                mmap_bytes: 256 * 1024 * 1024,
            },
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "small" => Some(ReindexProfile::Small),
            "medium" => Some(ReindexProfile::Medium),
            "large" => Some(ReindexProfile::Large),
            "auto" => Some(ReindexProfile::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ProfileParams {
    batch_size: u64,
    cache_kib: i64,
    mmap_bytes: i64,
}

/// Live reindex progress, published through a watch channel
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexProgress {
    pub current: u64,
    pub total: u64,
    pub batch_id: u64,
    pub done: bool,
}

/// Persisted reindex state; valid for resumption after a failure
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Checkpoint {
    collection: String,
    profile: ReindexProfile,
    last_rowid: i64,
    processed: u64,
    batch_id: u64,
    started_at: String,
}

/// Result of an optimize pass
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    pub collection: String,
    pub total: u64,
    pub incremental: bool,
    pub freelist_before: i64,
    pub freelist_after: i64,
    pub duration_ms: u128,
}

/// Result of a reindex pass
#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    pub collection: String,
    pub profile: ReindexProfile,
    pub total: u64,
    pub processed: u64,
    pub batches: u64,
    pub resumed_from_checkpoint: bool,
    pub duration_ms: u128,
}

impl VectorStore {
    /// Reorganize on-disk storage for faster queries. Non-destructive:
    /// search results are identical before and after.
    pub async fn optimize(&self) -> Result<OptimizeReport> {
        let _write = self.gate.write().await;
        let started = Instant::now();

        let total = self.count().await?;
        let incremental = total >= self.config.large_db_threshold;

        let freelist_before = self.freelist_count().await?;

        if incremental {
            info!(
                "Optimizing {} incrementally ({} chunks)",
                self.collection, total
            );
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&self.pool)
                .await?;

            // Reclaim freelist pages in slices instead of one long VACUUM
            let mut previous = i64::MAX;
            loop {
                sqlx::query("PRAGMA incremental_vacuum(500)")
                    .execute(&self.pool)
                    .await?;
                let remaining = self.freelist_count().await?;
                if remaining == 0 || remaining >= previous {
                    break;
                }
                previous = remaining;
                if let Some(rss) = resident_memory_bytes() {
                    if rss > self.config.memory_cap_mib * 1024 * 1024 {
                        sqlx::query("PRAGMA shrink_memory").execute(&self.pool).await?;
                    }
                }
            }
        } else {
            debug!("Optimizing {} with full VACUUM", self.collection);
            sqlx::query("VACUUM").execute(&self.pool).await?;
        }

        sqlx::query("ANALYZE").execute(&self.pool).await?;
        sqlx::query("PRAGMA optimize").execute(&self.pool).await?;

        let freelist_after = self.freelist_count().await?;

        Ok(OptimizeReport {
            collection: self.collection.clone(),
            total,
            incremental,
            freelist_before,
            freelist_after,
            duration_ms: started.elapsed().as_millis(),
        })
    }

    /// Rebuild the collection's physical layout batch by batch.
    ///
    /// Pure reorganization: the set of (id, vector, metadata) is
    /// preserved exactly. Cancellation stops at the last checkpoint,
    /// which stays valid; a later call resumes from it.
    pub async fn reindex(
        &self,
        profile: ReindexProfile,
        cancel: &CancelToken,
        progress: Option<&watch::Sender<ReindexProgress>>,
    ) -> Result<ReindexReport> {
        let _write = self.gate.write().await;
        let started = Instant::now();

        let total = self.count().await?;
        let resolved = profile.resolve(total);
        let incremental = total >= self.config.large_db_threshold;
        let params = if incremental {
            resolved.params(self.config.incremental_batch_size)
        } else {
            // Small collections rebuild in one pass
            ProfileParams {
                batch_size: total.max(1),
                ..resolved.params(self.config.incremental_batch_size)
            }
        };

        info!(
            "Reindexing {} ({} chunks, profile {:?}, batch {})",
            self.collection, total, resolved, params.batch_size
        );

        sqlx::query(&format!("PRAGMA cache_size = -{}", params.cache_kib))
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!("PRAGMA mmap_size = {}", params.mmap_bytes))
            .execute(&self.pool)
            .await?;

        let expected_dim = self.dimension().await?;

        // Resume from a checkpoint when one matches this run
        let checkpoint_path = self.checkpoint_path();
        let mut state = match self.load_checkpoint(&checkpoint_path, resolved) {
            Some(cp) => {
                info!(
                    "Resuming reindex of {} from checkpoint (batch {}, {} processed)",
                    self.collection, cp.batch_id, cp.processed
                );
                // The shadow table survives the failed run; recreate it
                // only if a crash lost it after the swap
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chunks_rebuild (
                        id TEXT PRIMARY KEY,
                        content TEXT NOT NULL,
                        embedding BLOB NOT NULL,
                        norm REAL NOT NULL,
                        metadata TEXT NOT NULL DEFAULT '{}',
                        created_at TEXT NOT NULL
                    )
                    "#,
                )
                .execute(&self.pool)
                .await?;
                cp
            }
            None => {
                sqlx::query("DROP TABLE IF EXISTS chunks_rebuild")
                    .execute(&self.pool)
                    .await?;
                sqlx::query(
                    r#"
                    CREATE TABLE chunks_rebuild (
                        id TEXT PRIMARY KEY,
                        content TEXT NOT NULL,
                        embedding BLOB NOT NULL,
                        norm REAL NOT NULL,
                        metadata TEXT NOT NULL DEFAULT '{}',
                        created_at TEXT NOT NULL
                    )
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Checkpoint {
                    collection: self.collection.clone(),
                    profile: resolved,
                    last_rowid: 0,
                    processed: 0,
                    batch_id: 0,
                    started_at: chrono::Utc::now().to_rfc3339(),
                }
            }
        };
        let resumed = state.processed > 0;
        let mut last_checkpointed = state.processed;

        loop {
            cancel.check()?;

            let rows = sqlx::query(
                r#"
                SELECT rowid, id, content, embedding, metadata, created_at
                FROM chunks
                WHERE rowid > ?1
                ORDER BY rowid
                LIMIT ?2
                "#,
            )
            .bind(state.last_rowid)
            .bind(params.batch_size as i64)
            .fetch_all(&self.pool)
            .await?;

            if rows.is_empty() {
                break;
            }

            let mut tx = self.pool.begin().await?;
            for row in &rows {
                state.last_rowid = row.get("rowid");
                let id: String = row.get("id");
                let blob: Vec<u8> = row.get("embedding");

                let embedding = decode_vector(&blob);
                if let Some(expected) = expected_dim {
                    if embedding.len() != expected {
                        return Err(StoreError::IndexCorrupted(format!(
                            "chunk {id} has dimension {}, collection has {expected}",
                            embedding.len()
                        ))
                        .into());
                    }
                }
                let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt() as f64;

                let content: String = row.get("content");
                let metadata: String = row.get("metadata");
                let created_at: String = row.get("created_at");

                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO chunks_rebuild
                        (id, content, embedding, norm, metadata, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .bind(&id)
                .bind(&content)
                .bind(&blob)
                .bind(norm)
                .bind(&metadata)
                .bind(&created_at)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;

            state.processed += rows.len() as u64;
            state.batch_id += 1;

            if let Some(progress) = progress {
                let _ = progress.send(ReindexProgress {
                    current: state.processed,
                    total,
                    batch_id: state.batch_id,
                    done: false,
                });
            }

            if state.processed - last_checkpointed >= self.config.checkpoint_every {
                self.write_checkpoint(&checkpoint_path, &state)?;
                last_checkpointed = state.processed;
                debug!(
                    "Reindex checkpoint: {}/{} (batch {})",
                    state.processed, total, state.batch_id
                );
            }

            if let Some(rss) = resident_memory_bytes() {
                if rss > self.config.memory_cap_mib * 1024 * 1024 {
                    warn!(
                        "Resident memory {} MiB above cap, flushing",
                        rss / (1024 * 1024)
                    );
                    sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
                        .execute(&self.pool)
                        .await?;
                    sqlx::query("PRAGMA shrink_memory").execute(&self.pool).await?;
                }
            }
        }

        // Atomic swap: readers either see the old table or the new one
        let mut tx = self.pool.begin().await?;
        sqlx::query("DROP TABLE chunks").execute(&mut *tx).await?;
        sqlx::query("ALTER TABLE chunks_rebuild RENAME TO chunks")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_created_at ON chunks(created_at)")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if checkpoint_path.exists() {
            let _ = std::fs::remove_file(&checkpoint_path);
        }

        if let Some(progress) = progress {
            let _ = progress.send(ReindexProgress {
                current: state.processed,
                total,
                batch_id: state.batch_id,
                done: true,
            });
        }

        info!(
            "Reindexed {} ({} chunks in {} batches)",
            self.collection, state.processed, state.batch_id
        );

        Ok(ReindexReport {
            collection: self.collection.clone(),
            profile: resolved,
            total,
            processed: state.processed,
            batches: state.batch_id,
            resumed_from_checkpoint: resumed,
            duration_ms: started.elapsed().as_millis(),
        })
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.config
            .checkpoint_dir
            .join(format!("{}.json", self.collection))
    }

    fn load_checkpoint(&self, path: &PathBuf, profile: ReindexProfile) -> Option<Checkpoint> {
        let content = std::fs::read_to_string(path).ok()?;
        let checkpoint: Checkpoint = match serde_json::from_str(&content) {
            Ok(cp) => cp,
            Err(e) => {
                warn!("Discarding unreadable reindex checkpoint: {}", e);
                let _ = std::fs::remove_file(path);
                return None;
            }
        };

        if checkpoint.collection != self.collection || checkpoint.profile != profile {
            warn!("Discarding reindex checkpoint for a different run");
            let _ = std::fs::remove_file(path);
            return None;
        }

        Some(checkpoint)
    }

    fn write_checkpoint(&self, path: &PathBuf, state: &Checkpoint) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, path).map_err(|e| {
            StoreError::CheckpointInvalid(format!("{}: {e}", path.display()))
        })?;
        Ok(())
    }

    async fn freelist_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("PRAGMA freelist_count")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

/// Resident set size of this process, if the platform reports it
fn resident_memory_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = sysinfo::System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(|p| p.memory())
}
