//! Structural elements produced by the document loader

use serde::{Deserialize, Serialize};

/// Kind of a structural element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Title,
    NarrativeText,
    ListItem,
    Table,
    PageBreak,
    Other,
}

/// One structural unit extracted from a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub kind: ElementKind,
    /// Normalized text content; empty for page breaks
    pub text: String,
    /// Monotonically increasing index within the document
    pub order: usize,
    /// Page number when the source format has pages
    pub page: Option<u32>,
    /// Raw cells for table elements, row-major
    pub cells: Option<Vec<Vec<String>>>,
}

impl Element {
    pub fn title(text: impl Into<String>, order: usize) -> Self {
        Self {
            kind: ElementKind::Title,
            text: text.into(),
            order,
            page: None,
            cells: None,
        }
    }

    pub fn narrative(text: impl Into<String>, order: usize) -> Self {
        Self {
            kind: ElementKind::NarrativeText,
            text: text.into(),
            order,
            page: None,
            cells: None,
        }
    }

    pub fn list_item(text: impl Into<String>, order: usize) -> Self {
        Self {
            kind: ElementKind::ListItem,
            text: text.into(),
            order,
            page: None,
            cells: None,
        }
    }

    /// Build a table element; the text is the row-by-row plain-text
    /// rendering with cells joined by a single separator.
    pub fn table(cells: Vec<Vec<String>>, order: usize) -> Self {
        let text = cells
            .iter()
            .map(|row| row.join(" | "))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            kind: ElementKind::Table,
            text,
            order,
            page: None,
            cells: Some(cells),
        }
    }

    pub fn page_break(order: usize, page: u32) -> Self {
        Self {
            kind: ElementKind::PageBreak,
            text: String::new(),
            order,
            page: Some(page),
            cells: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Text as seen by the chunker: list items carry a bullet marker
    pub fn rendered_text(&self) -> String {
        match self.kind {
            ElementKind::ListItem => format!("- {}", self.text),
            _ => self.text.clone(),
        }
    }
}

/// Structural summary of a loaded document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuralInfo {
    pub total_elements: usize,
    pub titles_count: usize,
    pub tables_count: usize,
    pub lists_count: usize,
    pub narrative_blocks: usize,
    pub total_text_length: usize,
    pub avg_element_length: f64,
}

impl StructuralInfo {
    pub fn from_elements(elements: &[Element]) -> Self {
        let mut info = Self {
            total_elements: elements.len(),
            ..Default::default()
        };

        for element in elements {
            match element.kind {
                ElementKind::Title => info.titles_count += 1,
                ElementKind::Table => info.tables_count += 1,
                ElementKind::ListItem => info.lists_count += 1,
                ElementKind::NarrativeText => info.narrative_blocks += 1,
                ElementKind::PageBreak | ElementKind::Other => {}
            }
            info.total_text_length += element.text.len();
        }

        let textual = elements
            .iter()
            .filter(|e| e.kind != ElementKind::PageBreak)
            .count();
        if textual > 0 {
            info.avg_element_length = info.total_text_length as f64 / textual as f64;
        }

        info
    }
}

/// Which extraction path produced the document's text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    Enhanced,
    Basic,
    Fallback,
    ManualText,
    Web,
}

impl ProcessingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMethod::Enhanced => "enhanced",
            ProcessingMethod::Basic => "basic",
            ProcessingMethod::Fallback => "fallback",
            ProcessingMethod::ManualText => "manual_text",
            ProcessingMethod::Web => "web",
        }
    }
}

impl std::fmt::Display for ProcessingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_text_rendering() {
        let table = Element::table(
            vec![
                vec!["name".to_string(), "value".to_string()],
                vec!["titanium".to_string(), "1668".to_string()],
            ],
            0,
        );
        assert_eq!(table.text, "name | value\ntitanium | 1668");
    }

    #[test]
    fn test_list_item_rendering() {
        let item = Element::list_item("first point", 0);
        assert_eq!(item.rendered_text(), "- first point");
    }

    #[test]
    fn test_structural_info_counts() {
        let elements = vec![
            Element::title("Heading", 0),
            Element::narrative("Some prose here.", 1),
            Element::list_item("a point", 2),
            Element::table(vec![vec!["a".to_string(), "b".to_string()]], 3),
            Element::page_break(4, 1),
        ];

        let info = StructuralInfo::from_elements(&elements);
        assert_eq!(info.total_elements, 5);
        assert_eq!(info.titles_count, 1);
        assert_eq!(info.tables_count, 1);
        assert_eq!(info.lists_count, 1);
        assert_eq!(info.narrative_blocks, 1);
        assert!(info.avg_element_length > 0.0);
    }
}
