//! Structure-aware chunking
//!
//! Splits the element stream into chunks that respect structural
//! boundaries (titles flush, page breaks prefer a flush), stay within
//! the configured size, and carry overlap into the next chunk so
//! context survives the cut. Tables are never split; one larger than
//! the chunk size is emitted whole and flagged.

use crate::config::ChunkerConfig;
use crate::document::loader::floor_char_boundary;
use crate::document::{Element, ElementKind};
use tracing::debug;

/// A chunk of text before embedding and metadata assembly
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    pub text: String,
    pub oversized_table: bool,
}

impl PendingChunk {
    fn plain(text: String) -> Self {
        Self {
            text,
            oversized_table: false,
        }
    }
}

/// Structure-aware chunker
pub struct SemanticChunker {
    config: ChunkerConfig,
}

impl SemanticChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk a whole element sequence.
    ///
    /// Invariants: chunk texts concatenated (overlap removed) cover the
    /// element text in order; whitespace-only chunks are dropped.
    pub fn chunk_elements(&self, elements: &[Element]) -> Vec<PendingChunk> {
        let chunk_size = self.config.chunk_size;
        let mut chunks: Vec<PendingChunk> = Vec::new();
        let mut buf = String::new();

        for element in elements {
            match element.kind {
                ElementKind::PageBreak => {
                    // Weak boundary: flush early only when nearly full
                    if buf.len() >= chunk_size * 3 / 4 {
                        self.flush(&mut buf, &mut chunks);
                    }
                    continue;
                }
                ElementKind::Title => {
                    // Hard soft-boundary: a half-full chunk ends here
                    if buf.len() >= chunk_size / 2 {
                        self.flush(&mut buf, &mut chunks);
                    }
                    append_block(&mut buf, &element.rendered_text());
                }
                ElementKind::Table => {
                    let table_text = element.rendered_text();
                    if table_text.len() > chunk_size {
                        // Never split a table: emit it whole, flagged
                        self.flush(&mut buf, &mut chunks);
                        chunks.push(PendingChunk {
                            text: table_text,
                            oversized_table: true,
                        });
                        continue;
                    }
                    append_block(&mut buf, &table_text);
                }
                _ => {
                    append_block(&mut buf, &element.rendered_text());
                }
            }

            while buf.len() > chunk_size {
                self.split_once(&mut buf, &mut chunks);
            }
        }

        self.flush(&mut buf, &mut chunks);

        debug!(
            "Chunked {} elements into {} chunks",
            elements.len(),
            chunks.len()
        );
        chunks
    }

    /// Convenience for already-flat text (manual input, web pages)
    pub fn chunk_text(&self, text: &str) -> Vec<PendingChunk> {
        let element = Element::narrative(text, 0);
        self.chunk_elements(std::slice::from_ref(&element))
    }

    fn flush(&self, buf: &mut String, chunks: &mut Vec<PendingChunk>) {
        let text = buf.trim();
        if !text.is_empty() {
            chunks.push(PendingChunk::plain(text.to_string()));
        }
        buf.clear();
    }

    /// Emit one chunk from the front of the buffer, ending at the
    /// highest-priority separator within the last half of the window,
    /// then restart the buffer `chunk_overlap` before the cut.
    fn split_once(&self, buf: &mut String, chunks: &mut Vec<PendingChunk>) {
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let window_end = floor_char_boundary(buf, chunk_size);
        let window = &buf[..window_end];
        let search_from = floor_char_boundary(window, window_end.saturating_sub(chunk_size / 2));

        let mut cut = window_end;
        for separator in &self.config.separator_priority {
            if separator.is_empty() {
                break;
            }
            if let Some(pos) = window[search_from..].rfind(separator.as_str()) {
                cut = search_from + pos + separator.len();
                break;
            }
        }
        if cut == 0 {
            // Degenerate window (chunk_size below one char); take one char
            cut = buf.chars().next().map(|c| c.len_utf8()).unwrap_or(buf.len());
        }

        let emitted = buf[..cut].trim();
        if !emitted.is_empty() {
            chunks.push(PendingChunk::plain(emitted.to_string()));
        }

        // Restart with overlap, aligned forward to a separator when one
        // occurs inside the overlap window.
        let mut restart = floor_char_boundary(buf, cut.saturating_sub(overlap));
        if restart > 0 {
            let overlap_window = &buf[restart..cut];
            for separator in &self.config.separator_priority {
                if separator.is_empty() {
                    break;
                }
                if let Some(pos) = overlap_window.find(separator.as_str()) {
                    let aligned = restart + pos + separator.len();
                    if aligned < cut {
                        restart = aligned;
                    }
                    break;
                }
            }
        }

        // Always make progress even when the overlap window is empty
        if restart == 0 {
            restart = cut;
        }

        *buf = buf[restart..].to_string();
    }
}

fn append_block(buf: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push_str("\n\n");
    }
    buf.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunker(size: usize, overlap: usize) -> SemanticChunker {
        SemanticChunker::new(ChunkerConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            ..ChunkerConfig::default()
        })
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunker(1000, 200).chunk_text("A short note.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A short note.");
    }

    #[test]
    fn test_whitespace_only_discarded() {
        let chunks = chunker(1000, 200).chunk_text("   \n\n  ");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_long_text_respects_size() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let text = sentence.repeat(100);
        let chunks = chunker(200, 50).chunk_text(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 200, "chunk too long: {}", chunk.text.len());
        }
    }

    #[test]
    fn test_breaks_at_sentence_boundary() {
        let sentence = "Sentences end with a period. ";
        let text = sentence.repeat(20);
        let chunks = chunker(150, 30).chunk_text(&text);

        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with('.'),
                "expected sentence boundary, got: ...{:?}",
                &chunk.text[chunk.text.len().saturating_sub(20)..]
            );
        }
    }

    #[test]
    fn test_overlap_carries_context() {
        let sentence = "Alpha beta gamma delta epsilon zeta eta theta. ";
        let text = sentence.repeat(30);
        let chunks = chunker(200, 60).chunk_text(&text);

        assert!(chunks.len() > 1);
        // The head of each following chunk reappears near the tail of
        // the previous one.
        for pair in chunks.windows(2) {
            let head: String = pair[1].text.chars().take(10).collect();
            assert!(
                pair[0].text.contains(head.trim()),
                "no overlap between consecutive chunks"
            );
        }
    }

    #[test]
    fn test_title_forces_boundary() {
        let elements = vec![
            Element::narrative("x".repeat(600), 0),
            Element::title("Next Section", 1),
            Element::narrative("Section body.", 2),
        ];
        let chunks = chunker(1000, 100).chunk_elements(&elements);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("Next Section"));
    }

    #[test]
    fn test_oversized_table_never_split() {
        let rows: Vec<Vec<String>> = (0..100)
            .map(|i| vec![format!("row{i}"), "value".to_string()])
            .collect();
        let table = Element::table(rows, 0);
        assert!(table.text.len() > 500);

        let chunks = chunker(500, 100).chunk_elements(&[table]);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].oversized_table);
        assert!(chunks[0].text.len() > 500);
    }

    #[test]
    fn test_small_table_flows_with_text() {
        let elements = vec![
            Element::narrative("Before the table.", 0),
            Element::table(vec![vec!["a".to_string(), "b".to_string()]], 1),
            Element::narrative("After the table.", 2),
        ];
        let chunks = chunker(1000, 100).chunk_elements(&elements);

        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].oversized_table);
        assert!(chunks[0].text.contains("a | b"));
    }

    #[test]
    fn test_list_items_carry_bullets() {
        let elements = vec![
            Element::list_item("first", 0),
            Element::list_item("second", 1),
        ];
        let chunks = chunker(1000, 100).chunk_elements(&elements);
        assert!(chunks[0].text.contains("- first"));
        assert!(chunks[0].text.contains("- second"));
    }

    #[test]
    fn test_concatenation_covers_source_text() {
        let words: Vec<String> = (0..300).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let chunks = chunker(250, 50).chunk_text(&text);

        // Every source word appears in some chunk, in order of first
        // appearance.
        let mut chunk_iter = chunks.iter();
        let mut current = chunk_iter.next().unwrap().text.as_str();
        let mut pos = 0usize;
        for word in &words {
            loop {
                if let Some(found) = current[pos..].find(word.as_str()) {
                    pos += found + word.len();
                    break;
                }
                current = &chunk_iter
                    .next()
                    .unwrap_or_else(|| panic!("word {word} missing from chunks"))
                    .text;
                pos = 0;
            }
        }
    }

    proptest! {
        #[test]
        fn prop_chunks_never_exceed_size_without_table(
            words in proptest::collection::vec("[a-z]{1,12}", 1..400),
            size in 80usize..400,
        ) {
            let overlap = size / 5;
            let text = words.join(" ");
            let chunks = chunker(size, overlap).chunk_text(&text);

            for chunk in &chunks {
                prop_assert!(chunk.oversized_table || chunk.text.len() <= size);
            }
        }

        #[test]
        fn prop_no_empty_chunks(
            text in "[ a-z.\n]{0,600}",
        ) {
            let chunks = chunker(120, 30).chunk_text(&text);
            for chunk in &chunks {
                prop_assert!(!chunk.text.trim().is_empty());
            }
        }
    }
}
