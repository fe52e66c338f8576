//! Per-format extraction routines
//!
//! Each routine turns raw file content into ordered [`Element`]s. The
//! loader decides which routines to try and in which order; quality
//! differs between strategies but the element shape does not.

use super::element::Element;
use crate::error::{LoaderError, Result};
use scraper::{ElementRef, Html, Selector};
use std::path::Path;
use tracing::debug;

/// Markdown with headings, lists, tables, and fenced code preserved
pub fn markdown_elements(text: &str) -> Vec<Element> {
    let mut elements = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut table_rows: Vec<Vec<String>> = Vec::new();
    let mut in_code_fence = false;
    let mut code_lines: Vec<&str> = Vec::new();

    let flush_paragraph = |buf: &mut Vec<&str>, elements: &mut Vec<Element>| {
        if !buf.is_empty() {
            let text = buf.join(" ");
            if !text.trim().is_empty() {
                elements.push(Element::narrative(text.trim(), elements.len()));
            }
            buf.clear();
        }
    };

    let flush_table = |rows: &mut Vec<Vec<String>>, elements: &mut Vec<Element>| {
        if !rows.is_empty() {
            let order = elements.len();
            elements.push(Element::table(std::mem::take(rows), order));
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            if in_code_fence {
                let code = code_lines.join("\n");
                if !code.trim().is_empty() {
                    elements.push(Element::narrative(code, elements.len()));
                }
                code_lines.clear();
            } else {
                flush_paragraph(&mut paragraph, &mut elements);
                flush_table(&mut table_rows, &mut elements);
            }
            in_code_fence = !in_code_fence;
            continue;
        }
        if in_code_fence {
            code_lines.push(line);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix('#') {
            flush_paragraph(&mut paragraph, &mut elements);
            flush_table(&mut table_rows, &mut elements);
            let title = rest.trim_start_matches('#').trim();
            if !title.is_empty() {
                elements.push(Element::title(title, elements.len()));
            }
            continue;
        }

        if trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 1 {
            flush_paragraph(&mut paragraph, &mut elements);
            let cells: Vec<String> = trimmed
                .trim_matches('|')
                .split('|')
                .map(|c| c.trim().to_string())
                .collect();
            // Skip the |---|---| alignment row
            if !cells.iter().all(|c| {
                !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':' || ch == ' ')
            }) {
                table_rows.push(cells);
            }
            continue;
        }
        flush_table(&mut table_rows, &mut elements);

        if let Some(item) = strip_list_marker(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            elements.push(Element::list_item(item, elements.len()));
            continue;
        }

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut elements);
        } else {
            paragraph.push(trimmed);
        }
    }

    flush_paragraph(&mut paragraph, &mut elements);
    flush_table(&mut table_rows, &mut elements);
    elements
}

fn strip_list_marker(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() {
        let rest = &line[digits.len()..];
        if let Some(item) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(item.trim());
        }
    }
    None
}

/// Structural HTML extraction: headings, paragraphs, list items, tables
pub fn html_elements(html: &str) -> Vec<Element> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, table, pre")
        .expect("static selector is valid");
    let row_selector = Selector::parse("tr").expect("static selector is valid");
    let cell_selector = Selector::parse("th, td").expect("static selector is valid");

    let mut elements = Vec::new();

    for node in document.select(&selector) {
        let name = node.value().name();

        // Skip nodes nested inside another matched container so table
        // cells and list paragraphs are not emitted twice.
        if name != "table" && has_ancestor(&node, &["table"]) {
            continue;
        }
        if name == "p" && has_ancestor(&node, &["li"]) {
            continue;
        }

        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let text = collect_text(&node);
                if !text.is_empty() {
                    elements.push(Element::title(text, elements.len()));
                }
            }
            "li" => {
                let text = collect_text(&node);
                if !text.is_empty() {
                    elements.push(Element::list_item(text, elements.len()));
                }
            }
            "table" => {
                let mut rows = Vec::new();
                for row in node.select(&row_selector) {
                    let cells: Vec<String> = row
                        .select(&cell_selector)
                        .map(|c| collect_text(&c))
                        .collect();
                    if !cells.is_empty() {
                        rows.push(cells);
                    }
                }
                if !rows.is_empty() {
                    let order = elements.len();
                    elements.push(Element::table(rows, order));
                }
            }
            _ => {
                let text = collect_text(&node);
                if !text.is_empty() {
                    elements.push(Element::narrative(text, elements.len()));
                }
            }
        }
    }

    elements
}

fn collect_text(node: &ElementRef) -> String {
    node.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_ancestor(node: &ElementRef, names: &[&str]) -> bool {
    node.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| names.contains(&a.value().name()))
}

/// Tag-stripping HTML fallback when structural parsing yields nothing
pub fn html_text_fallback(html: &str) -> Vec<Element> {
    let re = regex::Regex::new(r"<[^>]*>").expect("static regex is valid");
    let without_scripts = strip_block(html, "script");
    let without_styles = strip_block(&without_scripts, "style");
    let text = re.replace_all(&without_styles, " ");

    let text = text
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    plain_text_elements(&text)
}

fn strip_block(html: &str, tag: &str) -> String {
    let re = regex::Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>"))
        .expect("static regex is valid");
    re.replace_all(html, " ").into_owned()
}

/// Enhanced PDF extraction: page breaks plus title/list heuristics
pub fn pdf_elements(path: &Path, include_page_breaks: bool) -> Result<Vec<Element>> {
    let text = extract_pdf_text(path)?;

    let pages: Vec<&str> = if text.contains('\u{c}') {
        text.split('\u{c}').collect()
    } else {
        vec![text.as_str()]
    };

    let mut elements = Vec::new();
    let page_count = pages.len();

    for (page_idx, page) in pages.into_iter().enumerate() {
        let page_no = page_idx as u32 + 1;
        for mut element in plain_text_elements(page) {
            element.order = elements.len();
            element.page = Some(page_no);
            elements.push(element);
        }
        if include_page_breaks && page_idx + 1 < page_count {
            elements.push(Element::page_break(elements.len(), page_no));
        }
    }

    debug!("Extracted {} elements from PDF {:?}", elements.len(), path);
    Ok(elements)
}

/// Plain PDF text, one narrative block per paragraph
pub fn pdf_text_fallback(path: &Path) -> Result<Vec<Element>> {
    let text = extract_pdf_text(path)?;
    let mut elements = Vec::new();
    for paragraph in text.split("\n\n") {
        let p = paragraph.trim();
        if !p.is_empty() {
            elements.push(Element::narrative(p, elements.len()));
        }
    }
    Ok(elements)
}

/// Last-ditch PDF path: the whole text as one narrative block
pub fn pdf_whole_text(path: &Path) -> Result<Vec<Element>> {
    let text = extract_pdf_text(path)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![Element::narrative(trimmed, 0)])
}

fn extract_pdf_text(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path).map_err(|e| {
        LoaderError::ExtractionFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Delimited text (CSV/TSV) as a single table element
pub fn delimited_elements(text: &str, delimiter: char) -> Vec<Element> {
    let rows: Vec<Vec<String>> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| split_delimited(l, delimiter))
        .collect();

    if rows.is_empty() {
        return Vec::new();
    }

    vec![Element::table(rows, 0)]
}

/// Quote-aware field splitting; doubled quotes inside a quoted field
/// are collapsed to one.
fn split_delimited(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                field.push('"');
                chars.next();
            } else {
                in_quotes = !in_quotes;
            }
        } else if c == delimiter && !in_quotes {
            fields.push(field.trim().to_string());
            field = String::new();
        } else {
            field.push(c);
        }
    }
    fields.push(field.trim().to_string());
    fields
}

/// JSON flattened to `path: value` lines, one element per top-level key
pub fn json_elements(text: &str) -> Result<Vec<Element>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(value_elements(&value))
}

/// YAML handled through the same flattening as JSON
pub fn yaml_elements(text: &str) -> Result<Vec<Element>> {
    let value: serde_json::Value = serde_yml::from_str(text)
        .map_err(|e| crate::error::RagError::Config(format!("invalid YAML: {e}")))?;
    Ok(value_elements(&value))
}

fn value_elements(value: &serde_json::Value) -> Vec<Element> {
    let mut elements = Vec::new();

    match value {
        serde_json::Value::Object(map) => {
            for (key, sub) in map {
                let mut lines = Vec::new();
                flatten_value(key, sub, &mut lines);
                if !lines.is_empty() {
                    elements.push(Element::narrative(lines.join("\n"), elements.len()));
                }
            }
        }
        other => {
            let mut lines = Vec::new();
            flatten_value("", other, &mut lines);
            if !lines.is_empty() {
                elements.push(Element::narrative(lines.join("\n"), 0));
            }
        }
    }

    elements
}

fn flatten_value(prefix: &str, value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, sub) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&path, sub, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(&format!("{prefix}[{i}]"), item, out);
            }
        }
        serde_json::Value::Null => {}
        scalar => {
            let rendered = match scalar {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if prefix.is_empty() {
                out.push(rendered);
            } else {
                out.push(format!("{prefix}: {rendered}"));
            }
        }
    }
}

/// Plain text with heading and bullet heuristics
pub fn plain_text_elements(text: &str) -> Vec<Element> {
    let mut elements = Vec::new();

    for block in text.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }

        let lines: Vec<&str> = block.lines().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();

        // A lone short line without terminal punctuation reads as a heading
        if lines.len() == 1 && looks_like_heading(lines[0]) {
            elements.push(Element::title(lines[0], elements.len()));
            continue;
        }

        let mut paragraph: Vec<&str> = Vec::new();
        for line in lines {
            if let Some(item) = strip_list_marker(line) {
                if !paragraph.is_empty() {
                    elements.push(Element::narrative(paragraph.join(" "), elements.len()));
                    paragraph.clear();
                }
                elements.push(Element::list_item(item, elements.len()));
            } else {
                paragraph.push(line);
            }
        }
        if !paragraph.is_empty() {
            elements.push(Element::narrative(paragraph.join(" "), elements.len()));
        }
    }

    elements
}

fn looks_like_heading(line: &str) -> bool {
    if line.len() > 80 || line.ends_with(['.', '!', '?', ',', ';']) {
        return false;
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 2 {
        return false;
    }
    if letters.iter().all(|c| c.is_uppercase()) {
        return true;
    }
    if line.ends_with(':') {
        return true;
    }
    // Title Case: every word starts uppercase
    let words: Vec<&str> = line.split_whitespace().collect();
    words.len() <= 8
        && words.iter().all(|w| {
            w.chars()
                .next()
                .map(|c| c.is_uppercase() || !c.is_alphabetic())
                .unwrap_or(false)
        })
}

/// RFC-822 style email: subject becomes the title, body is plain text
pub fn eml_elements(text: &str) -> Vec<Element> {
    let (headers, body) = match text.split_once("\n\n") {
        Some((h, b)) => (h, b),
        None => ("", text),
    };

    let mut elements = Vec::new();

    for line in headers.lines() {
        if let Some(subject) = line.strip_prefix("Subject:") {
            let subject = subject.trim();
            if !subject.is_empty() {
                elements.push(Element::title(subject, elements.len()));
            }
        } else if line.starts_with("From:") || line.starts_with("To:") || line.starts_with("Date:")
        {
            elements.push(Element::narrative(line.trim(), elements.len()));
        }
    }

    for mut element in plain_text_elements(body) {
        element.order = elements.len();
        elements.push(element);
    }

    elements
}

/// Whole file as narrative paragraphs, no interpretation at all
pub fn raw_text_elements(text: &str) -> Vec<Element> {
    let mut elements = Vec::new();
    for paragraph in text.split("\n\n") {
        let p = paragraph.trim();
        if !p.is_empty() {
            elements.push(Element::narrative(p, elements.len()));
        }
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::element::ElementKind;

    #[test]
    fn test_markdown_structure() {
        let md = "# Overview\n\nSome intro text.\n\n- first\n- second\n\n| a | b |\n|---|---|\n| 1 | 2 |\n";
        let elements = markdown_elements(md);

        assert_eq!(elements[0].kind, ElementKind::Title);
        assert_eq!(elements[0].text, "Overview");
        assert_eq!(elements[1].kind, ElementKind::NarrativeText);
        assert_eq!(elements[2].kind, ElementKind::ListItem);
        assert_eq!(elements[3].kind, ElementKind::ListItem);
        let table = elements.iter().find(|e| e.kind == ElementKind::Table).unwrap();
        assert_eq!(table.text, "a | b\n1 | 2");
    }

    #[test]
    fn test_markdown_ordered_list() {
        let elements = markdown_elements("1. one\n2. two\n");
        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|e| e.kind == ElementKind::ListItem));
        assert_eq!(elements[0].text, "one");
    }

    #[test]
    fn test_html_structure() {
        let html = r#"
            <html><body>
                <h1>Report</h1>
                <p>Quarterly summary.</p>
                <ul><li>point one</li><li>point two</li></ul>
                <table><tr><th>q</th><th>rev</th></tr><tr><td>q1</td><td>10</td></tr></table>
            </body></html>
        "#;
        let elements = html_elements(html);

        assert_eq!(elements[0].kind, ElementKind::Title);
        assert_eq!(elements[0].text, "Report");
        assert!(elements.iter().any(|e| e.kind == ElementKind::ListItem));
        let table = elements.iter().find(|e| e.kind == ElementKind::Table).unwrap();
        assert_eq!(table.text, "q | rev\nq1 | 10");
    }

    #[test]
    fn test_html_fallback_strips_tags() {
        let html = "<html><script>var x;</script><body><p>visible text</p></body></html>";
        let elements = html_text_fallback(html);
        let all: String = elements.iter().map(|e| e.text.as_str()).collect();
        assert!(all.contains("visible text"));
        assert!(!all.contains("var x"));
    }

    #[test]
    fn test_delimited_quotes() {
        let row = split_delimited(r#"a,"b, with comma","doubled """,d"#, ',');
        assert_eq!(row, vec!["a", "b, with comma", "doubled \"", "d"]);
    }

    #[test]
    fn test_csv_single_table() {
        let elements = delimited_elements("name,mp\ntitanium,1668\n", ',');
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].kind, ElementKind::Table);
        assert_eq!(elements[0].cells.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_json_flattening() {
        let elements = json_elements(r#"{"metal": {"name": "titanium", "mp": 1668}}"#).unwrap();
        assert_eq!(elements.len(), 1);
        assert!(elements[0].text.contains("metal.name: titanium"));
        assert!(elements[0].text.contains("metal.mp: 1668"));
    }

    #[test]
    fn test_plain_text_heading_heuristic() {
        let elements = plain_text_elements("INTRODUCTION\n\nThis is the body of the section.");
        assert_eq!(elements[0].kind, ElementKind::Title);
        assert_eq!(elements[1].kind, ElementKind::NarrativeText);
    }

    #[test]
    fn test_eml_subject_becomes_title() {
        let eml = "From: a@example.com\nSubject: Meeting notes\n\nWe agreed on the plan.";
        let elements = eml_elements(eml);
        assert_eq!(elements[0].kind, ElementKind::NarrativeText); // From:
        assert!(elements.iter().any(|e| e.kind == ElementKind::Title && e.text == "Meeting notes"));
    }
}
