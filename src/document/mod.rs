//! Document loading: structural elements and the extraction cascade

pub mod element;
pub mod extract;
pub mod loader;

pub use element::{Element, ElementKind, ProcessingMethod, StructuralInfo};
pub use loader::{
    is_supported_extension, supported_extensions, DocumentLoader, ExtractionStrategy,
    LoadedDocument, LoaderOptions,
};
