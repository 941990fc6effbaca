//! coderank - hybrid semantic code search
//!
//! Extracts named entities from source trees with tree-sitter, indexes them
//! in a BM25 lexical index and a cosine vector index, and answers natural
//! language queries through reciprocal rank fusion.

pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod search;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{CodeEntity, EntityKind, IndexingJob, Language, SearchQuery, SearchResult};
