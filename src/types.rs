//! Core data types shared across ingestion, storage, and retrieval

use crate::document::{ProcessingMethod, StructuralInfo};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata stored with each chunk.
///
/// Structural counters are flattened to top-level numeric fields so the
/// store's filter language can range over them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Logical name of the originating document
    pub source: String,

    /// Absolute path when the source was a file
    pub file_path: Option<String>,

    /// Extension (".pdf"), or "manual_input" / "url"
    pub file_type: String,

    /// ISO-8601 timestamp shared by every chunk of one ingestion
    pub processed_date: String,

    /// Which extraction path produced the text
    pub processing_method: ProcessingMethod,

    /// Position of this chunk within the document
    pub chunk_index: usize,

    /// Number of chunks the document produced
    pub chunk_total: usize,

    pub structural_info_titles_count: usize,
    pub structural_info_tables_count: usize,
    pub structural_info_lists_count: usize,

    /// Set when a table larger than the chunk size was emitted whole
    #[serde(default)]
    pub oversized_table: bool,
}

impl ChunkMetadata {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("chunk metadata serializes")
    }
}

/// A text fragment with its embedding, the unit of retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable fingerprint of (source, chunk_index, text)
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Stable chunk fingerprint: identical content at the same position in
/// the same source always maps to the same id.
pub fn chunk_id(source: &str, chunk_index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0x1f]);
    hasher.update(chunk_index.to_le_bytes());
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Summary returned by every ingestion operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSummary {
    pub source: String,
    pub file_type: String,
    pub processing_method: ProcessingMethod,
    pub chunk_count: usize,
    pub structural_info: StructuralInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_stable() {
        let a = chunk_id("doc.txt", 0, "hello world");
        let b = chunk_id("doc.txt", 0, "hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_chunk_id_varies_with_inputs() {
        let base = chunk_id("doc.txt", 0, "hello");
        assert_ne!(base, chunk_id("doc.txt", 1, "hello"));
        assert_ne!(base, chunk_id("other.txt", 0, "hello"));
        assert_ne!(base, chunk_id("doc.txt", 0, "hello!"));
    }

    #[test]
    fn test_metadata_flattens_to_numbers() {
        let meta = ChunkMetadata {
            source: "a.pdf".into(),
            file_path: None,
            file_type: ".pdf".into(),
            processed_date: "2025-01-01T00:00:00Z".into(),
            processing_method: ProcessingMethod::Enhanced,
            chunk_index: 0,
            chunk_total: 3,
            structural_info_titles_count: 2,
            structural_info_tables_count: 1,
            structural_info_lists_count: 0,
            oversized_table: false,
        };

        let value = meta.to_value();
        assert_eq!(value["structural_info_tables_count"], 1);
        assert_eq!(value["processing_method"], "enhanced");
    }
}
