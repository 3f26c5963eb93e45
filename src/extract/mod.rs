//! Source extractors: adapters that turn raw uploads into plain text or
//! structured rows ready for chunking and indexing.

pub mod document;
pub mod tabular;

pub use document::{DocumentKind, extract_document_text};
pub use tabular::{TabularData, parse_csv};
