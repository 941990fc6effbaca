//! Retrieval indices
//!
//! Two stores share the same entity payload: a lexical BM25 index and a
//! cosine vector index. Both support the same equality filters and per-repo
//! purge so a repository can be replaced as a unit.

pub mod bm25;
pub mod vector;

pub use bm25::Bm25Index;
pub use vector::{InMemoryVectorStore, QdrantStore, VectorStore};

use crate::models::{CodeEntity, EntityKind, Language};

/// Equality filters applied to both indices.
///
/// Filters are an AND of the present fields; an empty filter matches
/// everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub language: Option<Language>,
    pub entity_type: Option<EntityKind>,
    pub repo_name: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.entity_type.is_none() && self.repo_name.is_none()
    }

    pub fn matches(&self, entity: &CodeEntity) -> bool {
        if let Some(lang) = self.language {
            if entity.language != lang {
                return false;
            }
        }
        if let Some(kind) = self.entity_type {
            if entity.kind != kind {
                return false;
            }
        }
        if let Some(repo) = &self.repo_name {
            if &entity.repo_name != repo {
                return false;
            }
        }
        true
    }
}
