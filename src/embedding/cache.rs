//! Cache tiers for the embedding service
//!
//! The memory tier is a bounded LRU; the disk tier is one file per key
//! holding the raw little-endian f32 bytes, written atomically via a
//! temp file and rename so readers never observe a torn vector.

use crate::error::CacheError;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Bounded in-memory LRU tier
pub(crate) struct MemoryTier {
    entries: Mutex<LruCache<String, Arc<Vec<f32>>>>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is non-zero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up and promote; no suspension on this path
    pub fn get(&self, key: &str) -> Option<Arc<Vec<f32>>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn insert(&self, key: String, vector: Arc<Vec<f32>>) {
        self.entries.lock().put(key, vector);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// One-file-per-key disk tier
pub(crate) struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    pub fn new(dir: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| CacheError::WriteFailed(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.vec"))
    }

    pub fn read(&self, key: &str) -> Result<Option<Vec<f32>>, CacheError> {
        let path = self.entry_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::ReadFailed(format!("{}: {e}", path.display()))),
        };

        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(CacheError::Corrupted(path.display().to_string()));
        }

        Ok(Some(decode_vector(&bytes)))
    }

    /// Write-through with temp file + rename so concurrent readers of
    /// the same key never see a partial entry
    pub fn write(&self, key: &str, vector: &[f32]) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let tmp = self.dir.join(format!("{key}.tmp.{}", std::process::id()));

        let bytes = encode_vector(vector);
        std::fs::write(&tmp, &bytes)
            .map_err(|e| CacheError::WriteFailed(format!("{}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            CacheError::WriteFailed(format!("{}: {e}", path.display()))
        })?;

        Ok(())
    }

    pub fn clear(&self) -> Result<usize, CacheError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| CacheError::ReadFailed(format!("{}: {e}", self.dir.display())))?;

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("vec") {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }

        debug!("Cleared {} disk cache entries", removed);
        Ok(removed)
    }
}

/// Serialize a vector as little-endian f32 bytes
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector
        .iter()
        .flat_map(|f| f.to_le_bytes().to_vec())
        .collect()
}

/// Deserialize little-endian f32 bytes
pub(crate) fn decode_vector(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_encoding_roundtrip() {
        let vector = vec![1.5, -2.3, 0.0, 42.1];
        let encoded = encode_vector(&vector);
        let decoded = decode_vector(&encoded);

        assert_eq!(vector.len(), decoded.len());
        for (orig, deser) in vector.iter().zip(decoded.iter()) {
            assert!((orig - deser).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_memory_tier_lru_eviction() {
        let tier = MemoryTier::new(2);
        tier.insert("a".to_string(), Arc::new(vec![1.0]));
        tier.insert("b".to_string(), Arc::new(vec![2.0]));

        // Touch "a" so "b" is the eviction candidate
        assert!(tier.get("a").is_some());
        tier.insert("c".to_string(), Arc::new(vec![3.0]));

        assert!(tier.get("a").is_some());
        assert!(tier.get("b").is_none());
        assert!(tier.get("c").is_some());
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_disk_tier_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::new(dir.path().to_path_buf()).unwrap();

        assert!(tier.read("deadbeef").unwrap().is_none());

        tier.write("deadbeef", &[0.25, -1.0]).unwrap();
        let read = tier.read("deadbeef").unwrap().unwrap();
        assert_eq!(read, vec![0.25, -1.0]);

        let removed = tier.clear().unwrap();
        assert_eq!(removed, 1);
        assert!(tier.read("deadbeef").unwrap().is_none());
    }

    #[test]
    fn test_disk_tier_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::new(dir.path().to_path_buf()).unwrap();

        std::fs::write(dir.path().join("bad.vec"), [1u8, 2, 3]).unwrap();
        assert!(matches!(tier.read("bad"), Err(CacheError::Corrupted(_))));
    }
}
