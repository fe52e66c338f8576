//! Configuration management for the knowledge base

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Language model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Chunker configuration
    #[serde(default)]
    pub chunker: ChunkerConfig,

    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Which kind of model endpoint to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Local,
    Remote,
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Endpoint kind ("local" = Ollama, "remote" = OpenAI-compatible API)
    pub model_type: ModelKind,

    /// Ollama server URL
    pub local_url: String,

    /// Default local model for text generation
    pub local_model: String,

    /// Temperature for the local model
    pub local_temperature: f32,

    /// API key for the remote endpoint
    pub remote_api_key: Option<String>,

    /// Base URL for the remote endpoint
    pub remote_api_base: String,

    /// Model name on the remote endpoint
    pub remote_model: String,

    /// Temperature for the remote model
    pub remote_temperature: f32,

    /// Maximum tokens for generation
    pub max_tokens: u32,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Maximum concurrent LLM calls
    #[serde(default = "default_llm_concurrency")]
    pub max_concurrent: usize,
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider kind ("local" = Ollama, "remote" = OpenAI-compatible API)
    pub provider: ModelKind,

    /// Embedding model name
    pub model: String,

    /// Ollama server URL (local provider)
    pub local_url: String,

    /// API key for the remote provider
    pub remote_api_key: Option<String>,

    /// Base URL for the remote provider
    pub remote_api_base: String,

    /// Directory for the on-disk cache tier
    pub cache_dir: PathBuf,

    /// Capacity of the in-memory LRU tier
    pub memory_cache_capacity: usize,

    /// Request timeout in seconds
    pub timeout: u64,
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the vector DB files (one per collection)
    pub db_dir: PathBuf,

    /// Base collection name; the effective name is suffixed with
    /// the embedding provider and model
    pub collection_name: String,

    /// Directory for transient reindex checkpoints
    pub checkpoint_dir: PathBuf,

    /// Collections at or above this count use the incremental
    /// optimize/reindex paths
    pub large_db_threshold: u64,

    /// Batch size for incremental reindex
    pub incremental_batch_size: u64,

    /// Write a checkpoint after this many documents
    pub checkpoint_every: u64,

    /// Soft cap on resident memory during reindex (MiB)
    pub memory_cap_mib: u64,
}

/// Chunker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target maximum characters per chunk
    pub chunk_size: usize,

    /// Overlap carried into the next chunk; must be < chunk_size
    pub chunk_overlap: usize,

    /// Separators tried highest-priority first when breaking a chunk
    #[serde(default = "default_separators")]
    pub separator_priority: Vec<String>,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the LLM
    pub k: usize,

    /// Number of candidates fetched before source collapsing
    pub fetch_k: usize,

    /// Maximum cosine distance for a chunk to count as relevant
    pub max_distance: f32,
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Where to drop Markdown copies of processed documents; None disables
    pub converted_docs_dir: Option<PathBuf>,

    /// Timeout for URL fetches in seconds
    pub url_timeout: u64,

    /// Depth of the bounded queue between pipeline stages
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
}

fn default_llm_concurrency() -> usize {
    4
}

fn default_pipeline_depth() -> usize {
    4
}

fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", "! ", "? ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_type: ModelKind::Local,
            local_url: "http://localhost:11434".to_string(),
            local_model: "llama3.2".to_string(),
            local_temperature: 0.2,
            remote_api_key: None,
            remote_api_base: "https://api.openai.com/v1".to_string(),
            remote_model: "gpt-4o-mini".to_string(),
            remote_temperature: 0.2,
            max_tokens: 4096,
            timeout: 60,
            max_concurrent: default_llm_concurrency(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ModelKind::Local,
            model: "nomic-embed-text".to_string(),
            local_url: "http://localhost:11434".to_string(),
            remote_api_key: None,
            remote_api_base: "https://api.openai.com/v1".to_string(),
            cache_dir: PathBuf::from("embedding_cache"),
            memory_cache_capacity: 1024,
            timeout: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("vector_store"),
            collection_name: "knowledge".to_string(),
            checkpoint_dir: PathBuf::from("reindex_checkpoints"),
            large_db_threshold: 10_000,
            incremental_batch_size: 2_000,
            checkpoint_every: 5_000,
            memory_cap_mib: 2_048,
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separator_priority: default_separators(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 5,
            fetch_k: 10,
            max_distance: 0.3,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            converted_docs_dir: Some(PathBuf::from("converted_docs")),
            url_timeout: 30,
            pipeline_depth: default_pipeline_depth(),
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            chunker: ChunkerConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl RagConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay recognized environment variables onto defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let kind = |v: String| match v.to_lowercase().as_str() {
            "remote" => ModelKind::Remote,
            _ => ModelKind::Local,
        };

        if let Ok(v) = std::env::var("MODEL_TYPE") {
            config.llm.model_type = kind(v);
        }
        if let Ok(v) = std::env::var("LOCAL_MODEL") {
            config.llm.local_model = v;
        }
        if let Ok(v) = std::env::var("LOCAL_TEMPERATURE") {
            if let Ok(t) = v.parse() {
                config.llm.local_temperature = t;
            }
        }
        if let Ok(v) = std::env::var("REMOTE_API_KEY") {
            config.llm.remote_api_key = Some(v.clone());
            config.embedding.remote_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("REMOTE_API_BASE") {
            config.llm.remote_api_base = v.clone();
            config.embedding.remote_api_base = v;
        }
        if let Ok(v) = std::env::var("REMOTE_MODEL") {
            config.llm.remote_model = v;
        }
        if let Ok(v) = std::env::var("REMOTE_TEMPERATURE") {
            if let Ok(t) = v.parse() {
                config.llm.remote_temperature = t;
            }
        }
        if let Ok(v) = std::env::var("EMBEDDING_PROVIDER") {
            config.embedding.provider = kind(v);
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = v;
        }
        if let Ok(v) = std::env::var("COLLECTION_NAME") {
            config.store.collection_name = v;
        }
        if let Ok(v) = std::env::var("VECTOR_DB_PATH") {
            config.store.db_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CACHE_DIR") {
            config.embedding.cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CONVERTED_DOCS_DIR") {
            config.ingest.converted_docs_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                config.chunker.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("CHUNK_OVERLAP") {
            if let Ok(n) = v.parse() {
                config.chunker.chunk_overlap = n;
            }
        }
        if let Ok(v) = std::env::var("RETRIEVAL_K") {
            if let Ok(n) = v.parse() {
                config.retrieval.k = n;
            }
        }
        if let Ok(v) = std::env::var("RETRIEVAL_FETCH_K") {
            if let Ok(n) = v.parse() {
                config.retrieval.fetch_k = n;
            }
        }
        if let Ok(v) = std::env::var("RETRIEVAL_MAX_DISTANCE") {
            if let Ok(n) = v.parse() {
                config.retrieval.max_distance = n;
            }
        }
        if let Ok(v) = std::env::var("MEMORY_CACHE_CAPACITY") {
            if let Ok(n) = v.parse() {
                config.embedding.memory_cache_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("LARGE_DB_THRESHOLD") {
            if let Ok(n) = v.parse() {
                config.store.large_db_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("INCREMENTAL_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                config.store.incremental_batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("CHECKPOINT_EVERY") {
            if let Ok(n) = v.parse() {
                config.store.checkpoint_every = n;
            }
        }
        if let Ok(v) = std::env::var("MEMORY_CAP_MIB") {
            if let Ok(n) = v.parse() {
                config.store.memory_cap_mib = n;
            }
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.llm.local_url.starts_with("http") {
            return Err(anyhow::anyhow!("Invalid local LLM URL: {}", self.llm.local_url));
        }

        if self.llm.model_type == ModelKind::Remote && self.llm.remote_api_key.is_none() {
            return Err(anyhow::anyhow!(
                "REMOTE_API_KEY is required when MODEL_TYPE=remote"
            ));
        }

        if self.embedding.model.is_empty() {
            return Err(anyhow::anyhow!("Embedding model name cannot be empty"));
        }

        if self.embedding.provider == ModelKind::Remote && self.embedding.remote_api_key.is_none() {
            return Err(anyhow::anyhow!(
                "REMOTE_API_KEY is required when EMBEDDING_PROVIDER=remote"
            ));
        }

        if self.chunker.chunk_size == 0 {
            return Err(anyhow::anyhow!("chunk_size must be greater than 0"));
        }

        if self.chunker.chunk_overlap >= self.chunker.chunk_size {
            return Err(anyhow::anyhow!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunker.chunk_overlap,
                self.chunker.chunk_size
            ));
        }

        if !(0.0..=2.0).contains(&self.retrieval.max_distance) {
            return Err(anyhow::anyhow!(
                "max_distance must be within [0, 2] for cosine distance"
            ));
        }

        if self.retrieval.k == 0 || self.retrieval.fetch_k < self.retrieval.k {
            return Err(anyhow::anyhow!(
                "retrieval requires k >= 1 and fetch_k >= k"
            ));
        }

        if self.store.collection_name.is_empty() {
            return Err(anyhow::anyhow!("Collection name cannot be empty"));
        }

        if self.store.incremental_batch_size == 0 || self.store.checkpoint_every == 0 {
            return Err(anyhow::anyhow!(
                "incremental_batch_size and checkpoint_every must be greater than 0"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let mut config = RagConfig::default();
        config.chunker.chunk_overlap = config.chunker.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_requires_api_key() {
        let mut config = RagConfig::default();
        config.llm.model_type = ModelKind::Remote;
        assert!(config.validate().is_err());

        config.llm.remote_api_key = Some("sk-test".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_overlay() {
        std::env::set_var("EMBEDDING_MODEL", "all-minilm");
        std::env::set_var("CHUNK_SIZE", "512");
        std::env::set_var("RETRIEVAL_MAX_DISTANCE", "0.25");
        std::env::set_var("LARGE_DB_THRESHOLD", "5000");

        let config = RagConfig::from_env();
        assert_eq!(config.embedding.model, "all-minilm");
        assert_eq!(config.chunker.chunk_size, 512);
        assert!((config.retrieval.max_distance - 0.25).abs() < 1e-6);
        assert_eq!(config.store.large_db_threshold, 5000);

        std::env::remove_var("EMBEDDING_MODEL");
        std::env::remove_var("CHUNK_SIZE");
        std::env::remove_var("RETRIEVAL_MAX_DISTANCE");
        std::env::remove_var("LARGE_DB_THRESHOLD");
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = RagConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recall.toml");
        config.to_file(&path).unwrap();

        let loaded = RagConfig::from_file(&path).unwrap();
        assert_eq!(loaded.chunker.chunk_size, config.chunker.chunk_size);
        assert_eq!(loaded.store.collection_name, config.store.collection_name);
    }
}
