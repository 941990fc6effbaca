//! Core data model for the search engine
//!
//! `CodeEntity` is the unit of retrieval: one named declaration extracted
//! from a source file, normalized across languages. Entities are immutable
//! once indexed; re-indexing a repository replaces its whole snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use xxhash_rust::xxh3::xxh3_128;

// =============================================================================
// LANGUAGE
// =============================================================================

/// Supported source languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Typescript,
    Go,
    Rust,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a user-supplied language filter; unknown values yield None.
    pub fn parse_filter(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "python" => Some(Self::Python),
            "javascript" => Some(Self::Javascript),
            "typescript" => Some(Self::Typescript),
            "go" => Some(Self::Go),
            "rust" => Some(Self::Rust),
            _ => None,
        }
    }
}

// =============================================================================
// ENTITY KIND
// =============================================================================

/// Classification of indexed code entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Enum,
    Module,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Module => "module",
        }
    }

    /// Parse a user-supplied entity-type filter; unknown values yield None.
    pub fn parse_filter(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "class" => Some(Self::Class),
            "struct" => Some(Self::Struct),
            "interface" => Some(Self::Interface),
            "enum" => Some(Self::Enum),
            "module" => Some(Self::Module),
            _ => None,
        }
    }
}

// =============================================================================
// CODE ENTITY
// =============================================================================

/// A parsed code entity (function, class, struct, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntity {
    /// Stable unique identifier, deterministic per (repo, file, line, name, kind)
    pub id: String,
    /// Identifier text as written in the source
    pub name: String,
    #[serde(rename = "entity_type")]
    pub kind: EntityKind,
    pub language: Language,

    // Location
    pub file_path: String,
    pub repo_name: String,
    /// 1-based, inclusive
    pub start_line: u32,
    /// 1-based, inclusive
    pub end_line: u32,

    // Content
    pub source_code: String,
    pub docstring: Option<String>,
    pub signature: Option<String>,

    // Semantic info
    #[serde(default)]
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    #[serde(default)]
    pub decorators: Vec<String>,
    pub parent_class: Option<String>,

    // Metadata
    pub complexity: Option<u32>,
    pub loc: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CodeEntity {
    /// Deterministic entity id so that re-ingesting a repository upserts the
    /// same points instead of accumulating orphans. UUID-shaped because
    /// vector backends require point ids in that form.
    pub fn make_id(
        repo_name: &str,
        file_path: &str,
        start_line: u32,
        name: &str,
        kind: EntityKind,
    ) -> String {
        let key = format!(
            "{}\0{}\0{}\0{}\0{}",
            repo_name,
            file_path,
            start_line,
            name,
            kind.as_str()
        );
        uuid::Uuid::from_u128(xxh3_128(key.as_bytes())).to_string()
    }

    /// Textual projection used for embedding and lexical indexing.
    ///
    /// Pure and deterministic: concatenates name, a kind-tag word, signature,
    /// parameter names, the cleaned docstring, the return type, and the
    /// enclosing class, in that order.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.push(self.name.clone());

        match self.kind {
            EntityKind::Function | EntityKind::Method => parts.push("function".to_string()),
            EntityKind::Class => parts.push("class".to_string()),
            _ => {}
        }

        if let Some(sig) = &self.signature {
            parts.push(sig.clone());
        }

        if !self.parameters.is_empty() {
            parts.push(format!("parameters: {}", self.parameters.join(" ")));
        }

        if let Some(doc) = &self.docstring {
            let cleaned = doc.replace("\"\"\"", "").replace("'''", "");
            let cleaned = cleaned.trim();
            if !cleaned.is_empty() {
                parts.push(cleaned.to_string());
            }
        }

        if let Some(ret) = &self.return_type {
            parts.push(format!("returns {}", ret));
        }

        if let Some(parent) = &self.parent_class {
            parts.push(format!("method of {}", parent));
        }

        parts.join(" ")
    }

    /// Source code truncated to at most `max` bytes on a char boundary.
    pub fn truncated_source(&self, max: usize) -> String {
        if self.source_code.len() <= max {
            return self.source_code.clone();
        }
        let mut end = max;
        while end > 0 && !self.source_code.is_char_boundary(end) {
            end -= 1;
        }
        self.source_code[..end].to_string()
    }
}

// =============================================================================
// SEARCH TYPES
// =============================================================================

/// A single ranked search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub entity: CodeEntity,
    /// Fused (or single-source) relevance score
    pub score: f32,
    /// Raw cosine similarity from the vector index (0 if absent)
    pub semantic_score: f32,
    /// Raw BM25 score (0 if absent)
    pub bm25_score: f32,
    /// Docstring prefix and signature snippets
    pub highlights: Vec<String>,
}

/// Search request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub language: Option<Language>,
    pub entity_type: Option<EntityKind>,
    pub repo_filter: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Combine semantic + BM25 (false = semantic only)
    #[serde(default = "default_use_hybrid")]
    pub use_hybrid: bool,
    /// Weight for semantic vs BM25
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
}

fn default_limit() -> usize {
    crate::config::DEFAULT_LIMIT
}

fn default_use_hybrid() -> bool {
    true
}

fn default_semantic_weight() -> f32 {
    crate::search::weights::DEFAULT_SEMANTIC_WEIGHT
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            language: None,
            entity_type: None,
            repo_filter: None,
            limit: default_limit(),
            use_hybrid: true,
            semantic_weight: default_semantic_weight(),
        }
    }
}

// =============================================================================
// INDEXING JOB
// =============================================================================

/// A queued request to index one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingJob {
    #[serde(default = "new_job_id")]
    pub id: String,
    pub repo_url: String,
    pub repo_name: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Total-order hint, clamped to 0..=10
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

impl IndexingJob {
    pub fn new(repo_url: impl Into<String>, repo_name: impl Into<String>) -> Self {
        Self {
            id: new_job_id(),
            repo_url: repo_url.into(),
            repo_name: repo_name.into(),
            branch: default_branch(),
            priority: 0,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::entity;

    #[test]
    fn test_deterministic_id() {
        let a = CodeEntity::make_id("requests", "api.py", 10, "get", EntityKind::Function);
        let b = CodeEntity::make_id("requests", "api.py", 10, "get", EntityKind::Function);
        let c = CodeEntity::make_id("requests", "api.py", 11, "get", EntityKind::Function);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_searchable_text_ordering() {
        let mut e = entity("fetch_data", EntityKind::Method);
        e.signature = Some("def fetch_data(self, url) -> dict".to_string());
        e.parameters = vec!["self".to_string(), "url".to_string()];
        e.docstring = Some("\"\"\"Fetch JSON from a URL.\"\"\"".to_string());
        e.return_type = Some("dict".to_string());
        e.parent_class = Some("Client".to_string());

        let text = e.searchable_text();
        assert_eq!(
            text,
            "fetch_data function def fetch_data(self, url) -> dict \
             parameters: self url Fetch JSON from a URL. returns dict method of Client"
        );
    }

    #[test]
    fn test_searchable_text_is_pure() {
        let e = entity("run", EntityKind::Function);
        assert_eq!(e.searchable_text(), e.searchable_text());
    }

    #[test]
    fn test_class_kind_tag() {
        let e = entity("Parser", EntityKind::Class);
        assert!(e.searchable_text().starts_with("Parser class"));
    }

    #[test]
    fn test_struct_has_no_kind_tag() {
        let e = entity("Header", EntityKind::Struct);
        assert_eq!(e.searchable_text(), "Header");
    }

    #[test]
    fn test_truncated_source() {
        let mut e = entity("f", EntityKind::Function);
        e.source_code = "αβγδε".to_string(); // 10 bytes
        let cut = e.truncated_source(5);
        assert!(cut.len() <= 5);
        assert!(e.source_code.starts_with(&cut));
    }

    #[test]
    fn test_job_priority_clamped() {
        let job = IndexingJob::new("https://example.com/r.git", "r").with_priority(99);
        assert_eq!(job.priority, 10);
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!(Language::parse_filter("RUST"), Some(Language::Rust));
        assert_eq!(Language::parse_filter("cobol"), None);
        assert_eq!(EntityKind::parse_filter("Method"), Some(EntityKind::Method));
        assert_eq!(EntityKind::parse_filter("macro"), None);
    }

    #[test]
    fn test_entity_json_roundtrip() {
        let e = entity("main", EntityKind::Function);
        let json = serde_json::to_string(&e).unwrap();
        let back: CodeEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
