//! JSON document persistence shared by the ledger, knowledge and FAQ stores
//!
//! Each store owns one JSON file. Writes go to a sibling temp file that is
//! renamed over the target, so a reader never sees a half-written document.

mod document;

pub use document::{write_text_atomic, DocumentStore};
