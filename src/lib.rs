//! Recall: a personal retrieval-augmented knowledge base
//!
//! The pipeline ingests heterogeneous documents, splits them into
//! structure-aware chunks, embeds them through a two-tier cache, and
//! stores them in a persistent vector collection. Queries retrieve the
//! closest chunks (optionally filtered by metadata) and compose a
//! grounded answer with source attribution; when nothing relevant is
//! found the model is never called.
//!
//! # Example
//!
//! ```rust,no_run
//! use recall::{KnowledgeBase, QueryEngine, RagConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RagConfig::from_env();
//!     let kb = KnowledgeBase::open(config).await?;
//!
//!     kb.learn_document("notes/titanium.pdf").await?;
//!
//!     let llm = recall::llm::build_client(&kb.config().llm);
//!     let engine = QueryEngine::for_knowledge_base(&kb, llm);
//!     let answer = engine.ask("What is the melting point of titanium?").await?;
//!
//!     println!("{}", answer.text);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod chunker;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod kb;
pub mod llm;
pub mod maintenance;
pub mod query;
pub mod store;
pub mod text;
pub mod types;

// Re-export main types
pub use cancel::CancelToken;
pub use chunker::{PendingChunk, SemanticChunker};
pub use config::{
    ChunkerConfig, EmbeddingConfig, IngestConfig, LlmConfig, ModelKind, RagConfig,
    RetrievalConfig, StoreConfig,
};
pub use document::{
    DocumentLoader, Element, ElementKind, LoadedDocument, ProcessingMethod, StructuralInfo,
};
pub use embedding::{EmbeddingCacheStats, EmbeddingProvider, EmbeddingService};
pub use error::{RagError, Result};
pub use kb::KnowledgeBase;
pub use llm::LlmClient;
pub use maintenance::Maintenance;
pub use query::{Answer, Confidence, QueryEngine, SourceAttribution, NO_INFORMATION_ANSWER};
pub use store::{
    MetadataFilter, OptimizeReport, ReindexProfile, ReindexProgress, ReindexReport, SearchResult,
    StoreStats, VectorStore,
};
pub use types::{Chunk, ChunkMetadata, IngestSummary};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
