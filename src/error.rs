//! Error handling for the knowledge base

use thiserror::Error;

/// Result type alias for the knowledge base
pub type Result<T> = std::result::Result<T, RagError>;

/// Main error type for the knowledge base
#[derive(Error, Debug)]
pub enum RagError {
    #[error("input error: {0}")]
    Input(#[from] InputError),

    #[error("loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors in caller-supplied input
#[derive(Error, Debug)]
pub enum InputError {
    #[error("bad path: {0}")]
    BadPath(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("empty document: {0}")]
    EmptyDocument(String),

    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Errors raised while extracting document content
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("extraction failed for {path}: {reason}")]
    ExtractionFailed { path: String, reason: String },

    #[error("no extractor available for {format} documents")]
    ConverterMissing { format: String },
}

/// Errors from the embedding provider
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("embedding backend returned a malformed vector: expected dimension {expected}, got {actual}")]
    MalformedVector { expected: usize, actual: usize },

    #[error("embedding request timed out")]
    Timeout,
}

/// Errors from the vector store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("invalid reindex checkpoint: {0}")]
    CheckpointInvalid(String),

    #[error("storage failed: {0}")]
    StorageFailed(String),
}

/// Errors from the disk cache tier; callers degrade to memory-only caching
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache read failed: {0}")]
    ReadFailed(String),

    #[error("cache write failed: {0}")]
    WriteFailed(String),

    #[error("cache entry corrupted: {0}")]
    Corrupted(String),
}

/// Errors related to language model operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout: operation took too long")]
    Timeout,
}

impl RagError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Llm(LlmError::Timeout)
                | RagError::Llm(LlmError::ConnectionFailed(_))
                | RagError::Embedding(EmbeddingError::Timeout)
                | RagError::Embedding(EmbeddingError::BackendUnavailable(_))
                | RagError::Http(_)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            RagError::Input(_) => "input",
            RagError::Loader(_) => "loader",
            RagError::Embedding(_) => "embedding",
            RagError::Storage(_) => "storage",
            RagError::Cache(_) => "cache",
            RagError::Llm(_) => "llm",
            RagError::Config(_) => "config",
            RagError::Cancelled => "cancelled",
            RagError::Io(_) => "io",
            RagError::Serialization(_) => "serialization",
            RagError::Http(_) => "http",
            RagError::Database(_) => "database",
            RagError::Generic(_) => "generic",
        }
    }

    /// A remediation hint suitable for showing to the user
    pub fn hint(&self) -> &'static str {
        match self {
            RagError::Input(InputError::BadPath(_)) => "check that the file exists and is readable",
            RagError::Input(InputError::UnsupportedFormat(_)) => {
                "convert the file to one of the supported formats (pdf, html, md, txt, csv, json, yaml, eml)"
            }
            RagError::Input(InputError::EmptyDocument(_)) => {
                "the document contains no extractable text; if it is a scanned image, run OCR first"
            }
            RagError::Input(InputError::MalformedUrl(_)) => "check the URL spelling and scheme",
            RagError::Input(InputError::InvalidFilter(_)) => {
                "filters accept equality, $gte, $lte, $contains and $and clauses"
            }
            RagError::Loader(LoaderError::ConverterMissing { .. }) => {
                "install a document converter (e.g. libreoffice or an OCR toolchain) or convert the file to PDF"
            }
            RagError::Loader(_) => "the file may be corrupted; try re-exporting it",
            RagError::Embedding(_) => {
                "check that the embedding backend is running and the API key/model name are correct"
            }
            RagError::Storage(StoreError::DimensionMismatch { .. }) => {
                "the collection was built with a different embedding model; reindex or change EMBEDDING_MODEL back"
            }
            RagError::Storage(_) => "run `recall reindex` to rebuild the collection indices",
            RagError::Cache(_) => "check free disk space and permissions on the cache directory",
            RagError::Llm(_) => "check that the model endpoint is reachable and the API key is valid",
            RagError::Config(_) => "review the configuration file and environment variables",
            RagError::Cancelled => "the operation was cancelled; partial work was rolled back",
            RagError::Io(_) => "check file permissions and free disk space",
            RagError::Serialization(_) => "the on-disk state may be from an incompatible version",
            RagError::Http(_) => "check network connectivity and proxy settings",
            RagError::Database(_) => "check the vector store path and reduce the batch size",
            RagError::Generic(_) => "re-run with RUST_LOG=debug for details",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout_error = RagError::Llm(LlmError::Timeout);
        assert!(timeout_error.is_retryable());

        let config_error = RagError::Config("invalid config".to_string());
        assert!(!config_error.is_retryable());
    }

    #[test]
    fn test_error_category() {
        let llm_error = RagError::Llm(LlmError::Timeout);
        assert_eq!(llm_error.category(), "llm");

        let store_error = RagError::Storage(StoreError::DimensionMismatch {
            expected: 768,
            actual: 384,
        });
        assert_eq!(store_error.category(), "storage");
    }

    #[test]
    fn test_every_error_has_a_hint() {
        let errors = [
            RagError::Input(InputError::BadPath("x".into())),
            RagError::Loader(LoaderError::ConverterMissing {
                format: ".docx".into(),
            }),
            RagError::Embedding(EmbeddingError::Timeout),
            RagError::Cache(CacheError::WriteFailed("disk full".into())),
            RagError::Cancelled,
        ];
        for e in errors {
            assert!(!e.hint().is_empty());
        }
    }
}
