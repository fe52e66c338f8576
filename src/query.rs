//! Retrieval-augmented answering with source attribution
//!
//! A query is normalized, embedded, and matched against the store. If
//! nothing relevant is found the engine returns a fixed no-information
//! answer without ever calling the model; that is the hallucination
//! guard. Otherwise the retrieved chunks are passed verbatim to the
//! model and the response is returned with collapsed, ranked sources.

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingService;
use crate::error::Result;
use crate::kb::KnowledgeBase;
use crate::llm::{system_message, user_message, LlmClient};
use crate::store::{MetadataFilter, SearchResult, VectorStore};
use crate::text::normalize;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Fixed answer returned when retrieval finds nothing; the LLM is not
/// consulted in that case
pub const NO_INFORMATION_ANSWER: &str =
    "I don't have any information about that in the knowledge base.";

/// Instructions constraining the model to the retrieved material
const GROUNDING_PROMPT: &str = "You are a careful assistant answering questions from a personal \
knowledge base. Answer using ONLY the provided context. If the context does not contain the \
answer, say that the knowledge base has no information about it. Be concise and factual.";

/// Coarse answer confidence derived from distinct contributing sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Limited,
    None,
}

impl Confidence {
    pub fn from_source_count(count: usize) -> Self {
        match count {
            0 => Confidence::None,
            1 => Confidence::Limited,
            2 => Confidence::Medium,
            _ => Confidence::High,
        }
    }
}

/// Structural counters carried along with a cited source
#[derive(Debug, Clone, Serialize)]
pub struct SourceStructure {
    pub titles_count: usize,
    pub tables_count: usize,
    pub lists_count: usize,
}

/// One cited source in an answer
#[derive(Debug, Clone, Serialize)]
pub struct SourceAttribution {
    pub source: String,
    pub file_path: Option<String>,
    pub file_type: String,
    pub processing_method: String,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub processed_date: String,
    pub excerpt: String,
    pub distance: f32,
    pub structural_info: Option<SourceStructure>,
}

/// A grounded answer with attribution
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceAttribution>,
    pub confidence: Confidence,
    pub filters_applied: Option<serde_json::Value>,
}

/// Query orchestrator; holds a read-only store handle
pub struct QueryEngine {
    llm: Arc<dyn LlmClient>,
    embeddings: Arc<EmbeddingService>,
    store: Arc<VectorStore>,
    retrieval: RetrievalConfig,
    llm_gate: Arc<Semaphore>,
}

impl QueryEngine {
    pub fn new(
        retrieval: RetrievalConfig,
        llm: Arc<dyn LlmClient>,
        embeddings: Arc<EmbeddingService>,
        store: Arc<VectorStore>,
        llm_concurrency: usize,
    ) -> Self {
        Self {
            llm,
            embeddings,
            store,
            retrieval,
            llm_gate: Arc::new(Semaphore::new(llm_concurrency.max(1))),
        }
    }

    /// Wire an engine against an opened knowledge base
    pub fn for_knowledge_base(kb: &KnowledgeBase, llm: Arc<dyn LlmClient>) -> Self {
        Self::new(
            kb.config().retrieval.clone(),
            llm,
            kb.embeddings(),
            kb.store(),
            kb.config().llm.max_concurrent,
        )
    }

    /// Answer a question from the knowledge base
    pub async fn ask(&self, query: &str) -> Result<Answer> {
        self.answer(query, None).await
    }

    /// Answer a question restricted to chunks matching a metadata filter
    pub async fn ask_filtered(&self, query: &str, filter: &serde_json::Value) -> Result<Answer> {
        self.answer(query, Some(filter)).await
    }

    async fn answer(&self, query: &str, filter_json: Option<&serde_json::Value>) -> Result<Answer> {
        let filter = filter_json.map(MetadataFilter::parse).transpose()?;

        let normalized = normalize(query);
        debug!("Answering query: {normalized}");

        let query_embedding = self.embeddings.embed(&normalized).await?;

        let hits = self
            .store
            .search_with_threshold(
                &query_embedding,
                self.retrieval.fetch_k,
                self.retrieval.max_distance,
                filter.as_ref(),
            )
            .await?;

        if hits.is_empty() {
            // Hallucination guard: no grounding, no generation
            info!("No relevant chunks for query; returning canned answer");
            return Ok(Answer {
                text: NO_INFORMATION_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: Confidence::None,
                filters_applied: filter_json.cloned(),
            });
        }

        let context: Vec<&SearchResult> = hits.iter().take(self.retrieval.k).collect();
        let prompt = build_prompt(query, &context);

        let text = {
            let _permit = self
                .llm_gate
                .acquire()
                .await
                .expect("llm semaphore never closes");
            self.llm.generate(&prompt).await?.text
        };

        let sources = collapse_sources(&context);
        let confidence = Confidence::from_source_count(sources.len());

        info!(
            "Answered with {} sources (confidence {:?})",
            sources.len(),
            confidence
        );

        Ok(Answer {
            text,
            sources,
            confidence,
            filters_applied: filter_json.cloned(),
        })
    }
}

/// Assemble the grounded prompt: retrieved chunks verbatim, then the question
fn build_prompt(query: &str, context: &[&SearchResult]) -> Vec<crate::llm::Message> {
    let mut body = String::from("Context:\n");
    for (i, hit) in context.iter().enumerate() {
        body.push_str(&format!(
            "\n[{}] (source: {})\n{}\n",
            i + 1,
            hit.chunk.metadata.source,
            hit.chunk.text
        ));
    }
    body.push_str(&format!("\nQuestion: {query}"));

    vec![system_message(GROUNDING_PROMPT), user_message(body)]
}

/// Collapse hits sharing a source into one attribution each, keeping
/// the lowest-distance chunk's excerpt, ordered by best distance
fn collapse_sources(hits: &[&SearchResult]) -> Vec<SourceAttribution> {
    let mut best: HashMap<&str, &SearchResult> = HashMap::new();
    for &hit in hits {
        let entry = best.entry(hit.chunk.metadata.source.as_str()).or_insert(hit);
        if hit.distance < entry.distance {
            *entry = hit;
        }
    }

    let mut collapsed: Vec<&SearchResult> = best.into_values().collect();
    collapsed.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    collapsed
        .into_iter()
        .map(|hit| {
            let m = &hit.chunk.metadata;
            SourceAttribution {
                source: m.source.clone(),
                file_path: m.file_path.clone(),
                file_type: m.file_type.clone(),
                processing_method: m.processing_method.to_string(),
                chunk_index: m.chunk_index,
                chunk_total: m.chunk_total,
                processed_date: m.processed_date.clone(),
                excerpt: excerpt(&hit.chunk.text, 240),
                distance: hit.distance,
                structural_info: Some(SourceStructure {
                    titles_count: m.structural_info_titles_count,
                    tables_count: m.structural_info_tables_count,
                    lists_count: m.structural_info_lists_count,
                }),
            }
        })
        .collect()
}

/// Head of the chunk text, cut on a char boundary
fn excerpt(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end].trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ProcessingMethod;
    use crate::types::{chunk_id, Chunk, ChunkMetadata};

    fn hit(source: &str, index: usize, distance: f32) -> SearchResult {
        let text = format!("text of {source} chunk {index}");
        SearchResult {
            chunk: Chunk {
                id: chunk_id(source, index, &text),
                text,
                embedding: vec![0.0; 4],
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    file_path: None,
                    file_type: ".txt".to_string(),
                    processed_date: "2025-06-01T00:00:00Z".to_string(),
                    processing_method: ProcessingMethod::Enhanced,
                    chunk_index: index,
                    chunk_total: index + 1,
                    structural_info_titles_count: 0,
                    structural_info_tables_count: 0,
                    structural_info_lists_count: 0,
                    oversized_table: false,
                },
            },
            distance,
        }
    }

    #[test]
    fn test_confidence_mapping() {
        assert_eq!(Confidence::from_source_count(0), Confidence::None);
        assert_eq!(Confidence::from_source_count(1), Confidence::Limited);
        assert_eq!(Confidence::from_source_count(2), Confidence::Medium);
        assert_eq!(Confidence::from_source_count(3), Confidence::High);
        assert_eq!(Confidence::from_source_count(7), Confidence::High);
    }

    #[test]
    fn test_collapse_keeps_best_chunk_per_source() {
        let hits = vec![
            hit("a.txt", 0, 0.2),
            hit("a.txt", 3, 0.05),
            hit("b.txt", 0, 0.1),
        ];
        let refs: Vec<&SearchResult> = hits.iter().collect();

        let sources = collapse_sources(&refs);
        assert_eq!(sources.len(), 2);
        // Ordered by best distance: a.txt (0.05) before b.txt (0.1)
        assert_eq!(sources[0].source, "a.txt");
        assert_eq!(sources[0].chunk_index, 3);
        assert_eq!(sources[1].source, "b.txt");
    }

    #[test]
    fn test_prompt_contains_chunks_verbatim() {
        let hits = vec![hit("notes.txt", 0, 0.1)];
        let refs: Vec<&SearchResult> = hits.iter().collect();

        let messages = build_prompt("what now?", &refs);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("text of notes.txt chunk 0"));
        assert!(messages[1].content.contains("Question: what now?"));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "é".repeat(300);
        let cut = excerpt(&text, 100);
        assert!(cut.len() <= 105);
        assert!(cut.ends_with('…'));

        assert_eq!(excerpt("short", 100), "short");
    }
}
