//! Format-aware document loading with cascading extraction strategies
//!
//! Loading tries an enhanced, format-specific extractor first, then a
//! basic one, then a last-ditch fallback. The element shape is the same
//! for all three; only quality differs, and the winning strategy is
//! reported so it can be stored with every chunk.

use super::element::{Element, ElementKind, ProcessingMethod, StructuralInfo};
use super::extract;
use crate::error::{InputError, LoaderError, RagError, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Extraction effort requested from a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    HiRes,
    Fast,
    Default,
}

/// Per-format extraction options
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub strategy: ExtractionStrategy,
    pub include_metadata: bool,
    pub include_page_breaks: bool,
    /// Hard upper bound on a single element's length; longer elements are split
    pub max_partition: usize,
    /// Soft boundary used when splitting oversized elements
    pub new_after_n_chars: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            strategy: ExtractionStrategy::Default,
            include_metadata: true,
            include_page_breaks: false,
            max_partition: 4000,
            new_after_n_chars: 3000,
        }
    }
}

/// Office document extensions (need an external converter)
pub const OFFICE_EXTENSIONS: &[&str] = &[".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx"];
/// OpenDocument extensions (need an external converter)
pub const OPENDOCUMENT_EXTENSIONS: &[&str] = &[".odt", ".odp", ".ods"];
/// Web and markup extensions
pub const MARKUP_EXTENSIONS: &[&str] = &[".html", ".htm", ".md", ".xml"];
/// Plain text and tabular extensions
pub const TEXT_EXTENSIONS: &[&str] = &[".txt", ".csv", ".tsv"];
/// Structured data extensions
pub const DATA_EXTENSIONS: &[&str] = &[".json", ".yaml", ".yml"];
/// PDF
pub const PDF_EXTENSIONS: &[&str] = &[".pdf"];
/// Image extensions (need an OCR toolchain)
pub const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".tiff", ".bmp"];
/// Email extensions
pub const EMAIL_EXTENSIONS: &[&str] = &[".eml", ".msg"];

/// All recognized extensions
pub fn supported_extensions() -> Vec<&'static str> {
    let mut all = Vec::new();
    for class in [
        OFFICE_EXTENSIONS,
        OPENDOCUMENT_EXTENSIONS,
        MARKUP_EXTENSIONS,
        TEXT_EXTENSIONS,
        DATA_EXTENSIONS,
        PDF_EXTENSIONS,
        IMAGE_EXTENSIONS,
        EMAIL_EXTENSIONS,
    ] {
        all.extend_from_slice(class);
    }
    all
}

pub fn is_supported_extension(ext: &str) -> bool {
    supported_extensions().contains(&ext)
}

/// A loaded document: ordered elements, structural summary, and the
/// strategy that produced them
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub elements: Vec<Element>,
    pub structural_info: StructuralInfo,
    pub method: ProcessingMethod,
}

type StrategyFn<'a> = Box<dyn Fn() -> Result<Vec<Element>> + 'a>;

/// Format-aware loader with a per-extension options table
pub struct DocumentLoader {
    options: HashMap<&'static str, LoaderOptions>,
}

impl DocumentLoader {
    pub fn new() -> Self {
        let mut options: HashMap<&'static str, LoaderOptions> = HashMap::new();

        // PDFs get the high-resolution treatment with page breaks
        for ext in PDF_EXTENSIONS {
            options.insert(
                *ext,
                LoaderOptions {
                    strategy: ExtractionStrategy::HiRes,
                    include_page_breaks: true,
                    ..LoaderOptions::default()
                },
            );
        }
        // Office formats would too, if a converter produced their text
        for ext in OFFICE_EXTENSIONS.iter().chain(OPENDOCUMENT_EXTENSIONS) {
            options.insert(
                *ext,
                LoaderOptions {
                    strategy: ExtractionStrategy::HiRes,
                    ..LoaderOptions::default()
                },
            );
        }
        // Text-likes are cheap; use the fast path
        for ext in TEXT_EXTENSIONS.iter().chain(DATA_EXTENSIONS) {
            options.insert(
                *ext,
                LoaderOptions {
                    strategy: ExtractionStrategy::Fast,
                    ..LoaderOptions::default()
                },
            );
        }

        Self { options }
    }

    /// Options used for a given extension
    pub fn options_for(&self, ext: &str) -> LoaderOptions {
        self.options.get(ext).cloned().unwrap_or_default()
    }

    /// Load a file into ordered elements plus structural metadata.
    ///
    /// Strategies cascade: enhanced, then basic, then fallback. The
    /// first one that yields elements wins.
    pub fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let ext = normalized_extension(path)
            .ok_or_else(|| InputError::UnsupportedFormat(path.display().to_string()))?;

        if !is_supported_extension(&ext) {
            return Err(InputError::UnsupportedFormat(format!(
                "{} ({ext})",
                path.display()
            ))
            .into());
        }

        if !path.is_file() {
            return Err(InputError::BadPath(path.display().to_string()).into());
        }

        let opts = self.options_for(&ext);
        let (elements, method) = self.run_strategies(path, &ext, &opts)?;

        let elements = enforce_max_partition(elements, &opts);
        let structural_info = StructuralInfo::from_elements(&elements);

        info!(
            "Loaded {:?}: {} elements via {} strategy",
            path.file_name().unwrap_or_default(),
            elements.len(),
            method
        );

        Ok(LoadedDocument {
            elements,
            structural_info,
            method,
        })
    }

    fn run_strategies(
        &self,
        path: &Path,
        ext: &str,
        opts: &LoaderOptions,
    ) -> Result<(Vec<Element>, ProcessingMethod)> {
        // Formats without a native extractor are recognized but need
        // conversion before they can be ingested.
        if OFFICE_EXTENSIONS.contains(&ext)
            || OPENDOCUMENT_EXTENSIONS.contains(&ext)
            || IMAGE_EXTENSIONS.contains(&ext)
            || ext == ".msg"
        {
            return Err(LoaderError::ConverterMissing {
                format: ext.to_string(),
            }
            .into());
        }

        if PDF_EXTENSIONS.contains(&ext) {
            let include_breaks = opts.include_page_breaks;
            return try_strategies(
                path,
                vec![
                    (
                        ProcessingMethod::Enhanced,
                        Box::new(move || extract::pdf_elements(path, include_breaks))
                            as StrategyFn,
                    ),
                    (
                        ProcessingMethod::Basic,
                        Box::new(|| extract::pdf_text_fallback(path)),
                    ),
                    (
                        ProcessingMethod::Fallback,
                        Box::new(|| extract::pdf_whole_text(path)),
                    ),
                ],
            );
        }

        // Everything else is text on disk
        let content = std::fs::read_to_string(path)?;

        let strategies: Vec<(ProcessingMethod, StrategyFn)> = match ext {
            ".md" => vec![
                (
                    ProcessingMethod::Enhanced,
                    Box::new({
                        let content = content.clone();
                        move || Ok(extract::markdown_elements(&content))
                    }) as StrategyFn,
                ),
                (
                    ProcessingMethod::Basic,
                    Box::new({
                        let content = content.clone();
                        move || Ok(extract::plain_text_elements(&content))
                    }),
                ),
                (
                    ProcessingMethod::Fallback,
                    Box::new(move || Ok(extract::raw_text_elements(&content))),
                ),
            ],
            ".html" | ".htm" | ".xml" => vec![
                (
                    ProcessingMethod::Enhanced,
                    Box::new({
                        let content = content.clone();
                        move || Ok(extract::html_elements(&content))
                    }) as StrategyFn,
                ),
                (
                    ProcessingMethod::Basic,
                    Box::new({
                        let content = content.clone();
                        move || Ok(extract::html_text_fallback(&content))
                    }),
                ),
                (
                    ProcessingMethod::Fallback,
                    Box::new(move || Ok(extract::raw_text_elements(&content))),
                ),
            ],
            ".csv" | ".tsv" => {
                let delimiter = if ext == ".tsv" { '\t' } else { ',' };
                vec![
                    (
                        ProcessingMethod::Enhanced,
                        Box::new({
                            let content = content.clone();
                            move || Ok(extract::delimited_elements(&content, delimiter))
                        }) as StrategyFn,
                    ),
                    (
                        ProcessingMethod::Basic,
                        Box::new({
                            let content = content.clone();
                            move || Ok(extract::plain_text_elements(&content))
                        }),
                    ),
                    (
                        ProcessingMethod::Fallback,
                        Box::new(move || Ok(extract::raw_text_elements(&content))),
                    ),
                ]
            }
            ".json" => vec![
                (
                    ProcessingMethod::Enhanced,
                    Box::new({
                        let content = content.clone();
                        move || extract::json_elements(&content)
                    }) as StrategyFn,
                ),
                (
                    ProcessingMethod::Fallback,
                    Box::new(move || Ok(extract::raw_text_elements(&content))),
                ),
            ],
            ".yaml" | ".yml" => vec![
                (
                    ProcessingMethod::Enhanced,
                    Box::new({
                        let content = content.clone();
                        move || extract::yaml_elements(&content)
                    }) as StrategyFn,
                ),
                (
                    ProcessingMethod::Fallback,
                    Box::new(move || Ok(extract::raw_text_elements(&content))),
                ),
            ],
            ".eml" => vec![
                (
                    ProcessingMethod::Enhanced,
                    Box::new({
                        let content = content.clone();
                        move || Ok(extract::eml_elements(&content))
                    }) as StrategyFn,
                ),
                (
                    ProcessingMethod::Basic,
                    Box::new({
                        let content = content.clone();
                        move || Ok(extract::plain_text_elements(&content))
                    }),
                ),
                (
                    ProcessingMethod::Fallback,
                    Box::new(move || Ok(extract::raw_text_elements(&content))),
                ),
            ],
            // .txt and anything text-like without a richer structure
            _ => vec![
                (
                    ProcessingMethod::Enhanced,
                    Box::new({
                        let content = content.clone();
                        move || Ok(extract::plain_text_elements(&content))
                    }) as StrategyFn,
                ),
                (
                    ProcessingMethod::Fallback,
                    Box::new(move || Ok(extract::raw_text_elements(&content))),
                ),
            ],
        };

        try_strategies(path, strategies)
    }
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Run strategies in order; the first that returns a non-empty element
/// list wins. Errors feed the cascade instead of aborting it.
fn try_strategies(
    path: &Path,
    strategies: Vec<(ProcessingMethod, StrategyFn)>,
) -> Result<(Vec<Element>, ProcessingMethod)> {
    let mut failures: Vec<String> = Vec::new();
    let mut saw_empty = false;

    for (method, strategy) in strategies {
        match strategy() {
            Ok(elements) if !elements.is_empty() => {
                debug!("Strategy {} succeeded for {:?}", method, path);
                return Ok((elements, method));
            }
            Ok(_) => {
                debug!("Strategy {} produced no elements for {:?}", method, path);
                saw_empty = true;
            }
            Err(e) => {
                warn!("Strategy {} failed for {:?}: {}", method, path, e);
                failures.push(format!("{method}: {e}"));
            }
        }
    }

    if failures.is_empty() && saw_empty {
        return Err(InputError::EmptyDocument(path.display().to_string()).into());
    }

    Err(RagError::Loader(LoaderError::ExtractionFailed {
        path: path.display().to_string(),
        reason: failures.join("; "),
    }))
}

/// Lowercased extension with its leading dot
fn normalized_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
}

/// Split elements longer than `max_partition` and renumber the sequence
fn enforce_max_partition(elements: Vec<Element>, opts: &LoaderOptions) -> Vec<Element> {
    let mut out: Vec<Element> = Vec::with_capacity(elements.len());

    for element in elements {
        if element.text.len() <= opts.max_partition {
            push_renumbered(&mut out, element);
            continue;
        }

        match element.kind {
            ElementKind::Table => {
                // Tables split row-wise so no cell is ever cut
                let cells = element.cells.clone().unwrap_or_default();
                let mut group: Vec<Vec<String>> = Vec::new();
                let mut group_len = 0usize;
                for row in cells {
                    let row_len = row.iter().map(|c| c.len() + 3).sum::<usize>();
                    if group_len + row_len > opts.max_partition && !group.is_empty() {
                        let order = out.len();
                        let mut t = Element::table(std::mem::take(&mut group), order);
                        t.page = element.page;
                        out.push(t);
                        group_len = 0;
                    }
                    group_len += row_len;
                    group.push(row);
                }
                if !group.is_empty() {
                    let order = out.len();
                    let mut t = Element::table(group, order);
                    t.page = element.page;
                    out.push(t);
                }
            }
            _ => {
                for piece in split_text(&element.text, opts.new_after_n_chars, opts.max_partition) {
                    let mut e = element.clone();
                    e.text = piece;
                    e.cells = None;
                    push_renumbered(&mut out, e);
                }
            }
        }
    }

    out
}

fn push_renumbered(out: &mut Vec<Element>, mut element: Element) {
    element.order = out.len();
    out.push(element);
}

/// Split text into pieces around `soft_limit`, never exceeding `hard_limit`,
/// preferring sentence and word boundaries.
fn split_text(text: &str, soft_limit: usize, hard_limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;

    while rest.len() > hard_limit {
        let window_end = floor_char_boundary(rest, soft_limit.min(rest.len()));
        let window = &rest[..window_end];

        let cut = window
            .rfind("\n")
            .or_else(|| window.rfind(". "))
            .map(|p| p + 1)
            .or_else(|| window.rfind(' '))
            .filter(|&p| p > 0)
            .unwrap_or(window_end);

        let cut = floor_char_boundary(rest, cut.max(1));
        pieces.push(rest[..cut].trim().to_string());
        rest = &rest[cut..];
    }

    let tail = rest.trim();
    if !tail.is_empty() {
        pieces.push(tail.to_string());
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Largest index <= `i` that lies on a char boundary
pub(crate) fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut idx = i;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "binary.exe", "not a document");

        let loader = DocumentLoader::new();
        let err = loader.load(&path).unwrap_err();
        assert!(matches!(
            err,
            RagError::Input(InputError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let loader = DocumentLoader::new();
        let err = loader.load(Path::new("/nonexistent/report.txt")).unwrap_err();
        assert!(matches!(err, RagError::Input(InputError::BadPath(_))));
    }

    #[test]
    fn test_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.txt", "   \n\n   ");

        let loader = DocumentLoader::new();
        let err = loader.load(&path).unwrap_err();
        assert!(matches!(
            err,
            RagError::Input(InputError::EmptyDocument(_))
        ));
    }

    #[test]
    fn test_markdown_wins_enhanced() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "notes.md", "# Top\n\nBody text here.\n");

        let loader = DocumentLoader::new();
        let doc = loader.load(&path).unwrap();
        assert_eq!(doc.method, ProcessingMethod::Enhanced);
        assert_eq!(doc.structural_info.titles_count, 1);
        assert_eq!(doc.structural_info.narrative_blocks, 1);
    }

    #[test]
    fn test_office_needs_converter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "report.docx", "zip bytes pretend");

        let loader = DocumentLoader::new();
        let err = loader.load(&path).unwrap_err();
        assert!(matches!(
            err,
            RagError::Loader(LoaderError::ConverterMissing { .. })
        ));
        assert!(err.hint().contains("converter"));
    }

    #[test]
    fn test_max_partition_split_preserves_order() {
        let long = "word ".repeat(2000); // 10k chars
        let elements = vec![Element::narrative(long, 0)];
        let opts = LoaderOptions::default();

        let split = enforce_max_partition(elements, &opts);
        assert!(split.len() > 1);
        for (i, e) in split.iter().enumerate() {
            assert_eq!(e.order, i);
            assert!(e.text.len() <= opts.max_partition);
        }
    }

    #[test]
    fn test_oversized_table_splits_by_rows() {
        let rows: Vec<Vec<String>> = (0..500)
            .map(|i| vec![format!("row{i}"), "x".repeat(20)])
            .collect();
        let table = Element::table(rows, 0);
        let opts = LoaderOptions {
            max_partition: 1000,
            ..LoaderOptions::default()
        };

        let split = enforce_max_partition(vec![table], &opts);
        assert!(split.len() > 1);
        assert!(split.iter().all(|e| e.kind == ElementKind::Table));
        let total_rows: usize = split
            .iter()
            .map(|e| e.cells.as_ref().unwrap().len())
            .sum();
        assert_eq!(total_rows, 500);
    }
}
