//! Knowledge base façade
//!
//! Single entry point for ingestion: text, documents, and URLs all run
//! through normalize → chunk → embed → upsert. The façade owns the
//! store's write path; query code holds a read-only handle. Upserts are
//! atomic per document, so a failure anywhere leaves the collection
//! exactly as it was.

use crate::cancel::CancelToken;
use crate::chunker::SemanticChunker;
use crate::config::RagConfig;
use crate::document::{
    loader, DocumentLoader, Element, LoadedDocument, ProcessingMethod, StructuralInfo,
};
use crate::embedding::{build_provider, EmbeddingProvider, EmbeddingService};
use crate::error::{InputError, Result};
use crate::store::VectorStore;
use crate::text::normalize;
use crate::types::{chunk_id, Chunk, ChunkMetadata, IngestSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extensions fetched from a URL and ingested as documents; everything
/// else is scraped as web text. Markup stays on the scrape path since a
/// saved page and a scraped page carry the same text.
fn downloadable_extension(ext: &str) -> bool {
    loader::is_supported_extension(ext)
        && !loader::MARKUP_EXTENSIONS.contains(&ext)
        && !loader::IMAGE_EXTENSIONS.contains(&ext)
}

/// Content types that force the download-and-ingest path
const DOWNLOADABLE_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument",
    "text/csv",
    "application/json",
];

/// How a URL should be ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlKind {
    Document,
    Web,
}

impl UrlKind {
    fn classify(url: &reqwest::Url, content_type: &str) -> Self {
        let path_ext = Path::new(url.path())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()));

        if let Some(ext) = path_ext {
            if downloadable_extension(&ext) {
                return UrlKind::Document;
            }
        }

        if DOWNLOADABLE_CONTENT_TYPES
            .iter()
            .any(|prefix| content_type.starts_with(prefix))
        {
            return UrlKind::Document;
        }

        UrlKind::Web
    }
}

/// End-to-end ingestion orchestrator
pub struct KnowledgeBase {
    config: RagConfig,
    loader: Arc<DocumentLoader>,
    chunker: SemanticChunker,
    embeddings: Arc<EmbeddingService>,
    store: Arc<VectorStore>,
    http: reqwest::Client,
}

impl KnowledgeBase {
    /// Open the knowledge base with the provider selected by the config
    pub async fn open(config: RagConfig) -> Result<Self> {
        let provider = build_provider(&config.embedding);
        Self::with_provider(config, provider).await
    }

    /// Open with an explicit embedding provider (stub providers in
    /// tests, custom backends in embedders)
    pub async fn with_provider(
        config: RagConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate().map_err(|e| crate::error::RagError::Config(e.to_string()))?;

        let embeddings = Arc::new(EmbeddingService::new(&config.embedding, provider)?);
        let store = Arc::new(
            VectorStore::open(config.store.clone(), &embeddings.identity()).await?,
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.ingest.url_timeout))
            .build()
            .expect("Failed to create HTTP client");

        info!(
            "Knowledge base ready (collection {})",
            store.collection()
        );

        Ok(Self {
            loader: Arc::new(DocumentLoader::new()),
            chunker: SemanticChunker::new(config.chunker.clone()),
            embeddings,
            store,
            http,
            config,
        })
    }

    /// Read-only handle to the vector store
    pub fn store(&self) -> Arc<VectorStore> {
        self.store.clone()
    }

    /// Handle to the embedding service
    pub fn embeddings(&self) -> Arc<EmbeddingService> {
        self.embeddings.clone()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Ingest a piece of text as one synthetic document
    pub async fn learn_text(&self, text: &str, source_name: Option<&str>) -> Result<IngestSummary> {
        let source = source_name.unwrap_or("manual_input").to_string();
        info!("Learning text under source {source}");

        let normalized = normalize(text);
        if normalized.is_empty() {
            return Err(InputError::EmptyDocument(source).into());
        }

        let elements = vec![Element::narrative(normalized, 0)];
        let structural_info = StructuralInfo::from_elements(&elements);

        self.ingest_elements(
            &source,
            None,
            "manual_input",
            ProcessingMethod::ManualText,
            &elements,
            &structural_info,
        )
        .await
    }

    /// Ingest a document from disk
    pub async fn learn_document(&self, path: impl AsRef<Path>) -> Result<IngestSummary> {
        let path = path.as_ref();
        info!("Learning document {:?}", path);

        let doc = {
            let loader = self.loader.clone();
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || loader.load(&path))
                .await
                .map_err(|e| crate::error::RagError::Config(format!("load task failed: {e}")))??
        };

        self.ingest_loaded(path, doc).await
    }

    /// Ingest many documents, pipelining loading/chunking against
    /// embedding/upserting over a bounded queue. Failures are logged
    /// and skipped; cancellation stops between documents.
    pub async fn learn_documents(
        &self,
        paths: Vec<PathBuf>,
        cancel: &CancelToken,
    ) -> Result<Vec<IngestSummary>> {
        cancel.check()?;

        let (tx, rx) = flume::bounded::<(PathBuf, Result<LoadedDocument>)>(
            self.config.ingest.pipeline_depth,
        );

        let loader = self.loader.clone();
        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            for path in paths {
                if producer_cancel.is_cancelled() {
                    break;
                }
                let loaded = {
                    let loader = loader.clone();
                    let path = path.clone();
                    tokio::task::spawn_blocking(move || loader.load(&path))
                        .await
                        .map_err(|e| {
                            crate::error::RagError::Config(format!("load task failed: {e}"))
                        })
                        .and_then(|r| r)
                };
                if tx.send_async((path, loaded)).await.is_err() {
                    break;
                }
            }
        });

        let mut summaries = Vec::new();
        while let Ok((path, loaded)) = rx.recv_async().await {
            if let Err(e) = cancel.check() {
                drop(rx);
                let _ = producer.await;
                return Err(e);
            }

            match loaded {
                Ok(doc) => match self.ingest_loaded(&path, doc).await {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => warn!("Ingest failed for {:?}: {} ({})", path, e, e.hint()),
                },
                Err(e) => warn!("Load failed for {:?}: {} ({})", path, e, e.hint()),
            }
        }

        let _ = producer.await;
        cancel.check()?;
        Ok(summaries)
    }

    /// Ingest a URL: downloadable documents are fetched and run through
    /// the document path, anything else is scraped as web text
    pub async fn learn_from_url(&self, url: &str) -> Result<IngestSummary> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| InputError::MalformedUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(InputError::MalformedUrl(format!("{url}: unsupported scheme")).into());
        }

        info!("Learning from URL {url}");

        let response = self.http.get(parsed.clone()).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        match UrlKind::classify(&parsed, &content_type) {
            UrlKind::Document => {
                let file_name = Path::new(parsed.path())
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("download.pdf")
                    .to_string();

                let dir = self
                    .config
                    .ingest
                    .converted_docs_dir
                    .clone()
                    .unwrap_or_else(std::env::temp_dir);
                std::fs::create_dir_all(&dir)?;
                let target = dir.join(&file_name);

                let bytes = response.bytes().await?;
                std::fs::write(&target, &bytes)?;
                debug!("Downloaded {url} to {:?}", target);

                self.learn_document(&target).await
            }
            UrlKind::Web => {
                let body = response.text().await?;

                let mut elements = crate::document::extract::html_elements(&body);
                if elements.is_empty() {
                    elements = crate::document::extract::html_text_fallback(&body);
                }
                if elements.is_empty() {
                    return Err(InputError::EmptyDocument(url.to_string()).into());
                }

                let elements = normalize_elements(elements);
                let structural_info = StructuralInfo::from_elements(&elements);

                self.ingest_elements(
                    url,
                    None,
                    "url",
                    ProcessingMethod::Web,
                    &elements,
                    &structural_info,
                )
                .await
            }
        }
    }

    /// Collection statistics
    pub async fn stats(&self) -> Result<crate::store::StoreStats> {
        self.store.stats().await
    }

    /// Distinct sources currently in the collection
    pub async fn sources(&self) -> Result<Vec<(String, u64)>> {
        self.store.list_sources().await
    }

    /// Drop every chunk ingested under the given source name
    pub async fn forget(&self, source: &str) -> Result<u64> {
        info!("Forgetting source {source}");
        self.store.delete_source(source).await
    }

    async fn ingest_loaded(&self, path: &Path, doc: LoadedDocument) -> Result<IngestSummary> {
        let source = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let file_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();
        let file_path = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();

        let elements = normalize_elements(doc.elements);

        let summary = self
            .ingest_elements(
                &source,
                Some(file_path),
                &file_type,
                doc.method,
                &elements,
                &doc.structural_info,
            )
            .await?;

        self.write_converted_copy(&source, doc.method, &elements);
        Ok(summary)
    }

    /// Shared tail of every ingestion: chunk, embed, upsert, summarize.
    /// The store write is one transaction, so a document lands in the
    /// collection entirely or not at all.
    async fn ingest_elements(
        &self,
        source: &str,
        file_path: Option<String>,
        file_type: &str,
        method: ProcessingMethod,
        elements: &[Element],
        structural_info: &StructuralInfo,
    ) -> Result<IngestSummary> {
        let pending = self.chunker.chunk_elements(elements);
        if pending.is_empty() {
            return Err(InputError::EmptyDocument(source.to_string()).into());
        }

        let processed_date = chrono::Utc::now().to_rfc3339();
        let chunk_total = pending.len();

        let texts: Vec<String> = pending.iter().map(|p| p.text.clone()).collect();
        let embeddings = self.embeddings.embed_batch(&texts).await?;

        let chunks: Vec<Chunk> = pending
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (p, embedding))| {
                let metadata = ChunkMetadata {
                    source: source.to_string(),
                    file_path: file_path.clone(),
                    file_type: file_type.to_string(),
                    processed_date: processed_date.clone(),
                    processing_method: method,
                    chunk_index: i,
                    chunk_total,
                    structural_info_titles_count: structural_info.titles_count,
                    structural_info_tables_count: structural_info.tables_count,
                    structural_info_lists_count: structural_info.lists_count,
                    oversized_table: p.oversized_table,
                };
                Chunk {
                    id: chunk_id(source, i, &p.text),
                    text: p.text.clone(),
                    embedding,
                    metadata,
                }
            })
            .collect();

        self.store.upsert(&chunks).await?;

        info!(
            "Ingested {source}: {chunk_total} chunks via {method} ({} titles, {} tables)",
            structural_info.titles_count, structural_info.tables_count
        );

        Ok(IngestSummary {
            source: source.to_string(),
            file_type: file_type.to_string(),
            processing_method: method,
            chunk_count: chunk_total,
            structural_info: structural_info.clone(),
        })
    }

    /// Best-effort Markdown copy of a processed document
    fn write_converted_copy(&self, source: &str, method: ProcessingMethod, elements: &[Element]) {
        let Some(dir) = &self.config.ingest.converted_docs_dir else {
            return;
        };

        let stem = Path::new(source)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(source);
        let target = dir.join(format!("{stem}_{method}.md"));

        let markdown = elements_to_markdown(elements);
        if let Err(e) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&target, markdown))
        {
            warn!("Could not write converted copy {:?}: {}", target, e);
        }
    }
}

/// Normalize every element's text, dropping those that normalize away
fn normalize_elements(elements: Vec<Element>) -> Vec<Element> {
    let mut out: Vec<Element> = Vec::with_capacity(elements.len());
    for mut element in elements {
        if element.kind == crate::document::ElementKind::PageBreak {
            element.order = out.len();
            out.push(element);
            continue;
        }
        let normalized = normalize(&element.text);
        if normalized.is_empty() {
            continue;
        }
        element.text = normalized;
        element.order = out.len();
        out.push(element);
    }
    out
}

fn elements_to_markdown(elements: &[Element]) -> String {
    use crate::document::ElementKind;

    let mut out = String::new();
    for element in elements {
        match element.kind {
            ElementKind::Title => {
                out.push_str("## ");
                out.push_str(&element.text);
            }
            ElementKind::ListItem => {
                out.push_str("- ");
                out.push_str(&element.text);
            }
            ElementKind::Table => {
                if let Some(cells) = &element.cells {
                    for row in cells {
                        out.push_str("| ");
                        out.push_str(&row.join(" | "));
                        out.push_str(" |\n");
                    }
                } else {
                    out.push_str(&element.text);
                }
            }
            ElementKind::PageBreak => {
                out.push_str("---");
            }
            _ => out.push_str(&element.text),
        }
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_classification() {
        let pdf = reqwest::Url::parse("https://example.com/papers/attention.pdf").unwrap();
        assert_eq!(UrlKind::classify(&pdf, "text/html"), UrlKind::Document);

        let page = reqwest::Url::parse("https://example.com/blog/post").unwrap();
        assert_eq!(UrlKind::classify(&page, "text/html"), UrlKind::Web);

        // Content type wins when the path has no extension
        assert_eq!(
            UrlKind::classify(&page, "application/pdf"),
            UrlKind::Document
        );

        let html = reqwest::Url::parse("https://example.com/index.html").unwrap();
        assert_eq!(UrlKind::classify(&html, "text/html"), UrlKind::Web);
    }

    #[test]
    fn test_elements_to_markdown() {
        let elements = vec![
            Element::title("Section", 0),
            Element::narrative("Body.", 1),
            Element::table(vec![vec!["a".to_string(), "b".to_string()]], 2),
        ];
        let md = elements_to_markdown(&elements);
        assert!(md.contains("## Section"));
        assert!(md.contains("| a | b |"));
    }

    #[test]
    fn test_normalize_elements_drops_empty() {
        let elements = vec![
            Element::narrative("  ", 0),
            Element::narrative("kept", 1),
        ];
        let normalized = normalize_elements(elements);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].order, 0);
        assert_eq!(normalized[0].text, "kept");
    }

    #[test]
    fn test_filter_json_shape_used_by_callers() {
        // The façade hands filters to the store verbatim; this pins the
        // shape the GUI sends.
        let filter = json!({"file_type": ".pdf", "structural_info_tables_count": {"$gte": 1}});
        assert!(crate::store::MetadataFilter::parse(&filter).is_ok());
    }
}
