//! Entity extraction
//!
//! Each language module has two modes: a structured mode over the tree-sitter
//! syntax tree, and a line-anchored regex fallback used when the structured
//! parse is unavailable or fails. Traversal is DFS pre-order with explicit
//! stacks, so outer declarations precede inner ones and deep files cannot
//! overflow the call stack.

pub mod go;
pub mod javascript;
pub mod python;
pub mod registry;
pub mod rust;

pub use registry::ExtractorRegistry;

use crate::models::{CodeEntity, Language};
use std::path::Path;

// =============================================================================
// EXTRACTOR TRAIT
// =============================================================================

/// A language-specific entity extractor.
///
/// Extractors are long-lived and reused across files; they hold no per-file
/// state. A missing or unreadable file yields the empty sequence.
pub trait Extractor: Send + Sync {
    /// Primary language this extractor produces (TypeScript is selected by
    /// file extension inside the JavaScript extractor).
    fn language(&self) -> Language;

    /// File extensions (lowercase, with leading dot) handled by this extractor.
    fn extensions(&self) -> &'static [&'static str];

    /// Extract entities from source text, in declaration order.
    fn parse_content(&self, content: &str, file_path: &str, repo_name: &str) -> Vec<CodeEntity>;

    /// Read and extract a file on disk. Read errors are logged and yield
    /// an empty sequence so one bad file never fails a pipeline run.
    fn parse_path(&self, path: &Path, repo_name: &str) -> Vec<CodeEntity> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                self.parse_content(&content, &path.to_string_lossy(), repo_name)
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "failed to read file");
                Vec::new()
            }
        }
    }
}

// =============================================================================
// TREE HELPERS
// =============================================================================

/// Parse `source` with the given grammar. None when the parser cannot be
/// configured or bails out on the input.
pub(crate) fn parse_tree(
    source: &str,
    language: &tree_sitter::Language,
) -> Option<tree_sitter::Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(language).ok()?;
    parser.parse(source, None)
}

/// Text of a node, backed by the original source.
pub(crate) fn node_text<'s>(node: tree_sitter::Node, source: &'s str) -> &'s str {
    &source[node.byte_range()]
}

/// 1-based start line of a node.
pub(crate) fn start_line(node: tree_sitter::Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-based end line of a node.
pub(crate) fn end_line(node: tree_sitter::Node) -> u32 {
    node.end_position().row as u32 + 1
}

/// Approximate cyclomatic complexity: 1 + the number of descendant nodes
/// whose kind is in `branch_kinds`. Anonymous tokens ("&&", "||") count too.
pub(crate) fn complexity_of(node: tree_sitter::Node, branch_kinds: &[&str]) -> u32 {
    let mut complexity: u32 = 1;
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if n.id() != node.id() && branch_kinds.contains(&n.kind()) {
            complexity += 1;
        }
        for i in (0..n.child_count()).rev() {
            if let Some(child) = n.child(i) {
                stack.push(child);
            }
        }
    }
    complexity.max(1)
}

/// Lines of code for a node span (inclusive).
pub(crate) fn loc_of(node: tree_sitter::Node) -> u32 {
    end_line(node) - start_line(node) + 1
}
