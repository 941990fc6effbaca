//! Extractor registry
//!
//! Maps file extensions (case-insensitive) to long-lived extractor
//! instances. Files without a registered extractor parse to nothing.

use super::go::GoExtractor;
use super::javascript::JavaScriptExtractor;
use super::python::PythonExtractor;
use super::rust::RustExtractor;
use super::Extractor;
use crate::models::CodeEntity;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Registry with the built-in extractors registered.
    pub fn new() -> Self {
        let mut registry = Self {
            by_extension: HashMap::new(),
        };
        registry.register(Arc::new(PythonExtractor));
        registry.register(Arc::new(JavaScriptExtractor));
        registry.register(Arc::new(GoExtractor));
        registry.register(Arc::new(RustExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        for ext in extractor.extensions() {
            self.by_extension
                .insert(ext.to_lowercase(), Arc::clone(&extractor));
        }
    }

    /// Extractor for the given path, by extension.
    pub fn get(&self, path: &Path) -> Option<&Arc<dyn Extractor>> {
        let ext = path.extension()?.to_str()?;
        self.by_extension.get(&format!(".{}", ext.to_lowercase()))
    }

    /// Parse a file with the appropriate extractor; unsupported files yield
    /// the empty sequence.
    pub fn parse_path(&self, path: &Path, repo_name: &str) -> Vec<CodeEntity> {
        match self.get(path) {
            Some(extractor) => extractor.parse_path(path, repo_name),
            None => {
                tracing::debug!(file = %path.display(), "no extractor for file");
                Vec::new()
            }
        }
    }

    /// All registered extensions (lowercase, with leading dot).
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;
    use std::io::Write;

    #[test]
    fn test_extension_dispatch() {
        let registry = ExtractorRegistry::new();
        assert_eq!(
            registry.get(Path::new("a.py")).unwrap().language(),
            Language::Python
        );
        assert_eq!(
            registry.get(Path::new("a.PY")).unwrap().language(),
            Language::Python
        );
        assert_eq!(
            registry.get(Path::new("a.tsx")).unwrap().language(),
            Language::Javascript
        );
        assert_eq!(
            registry.get(Path::new("a.go")).unwrap().language(),
            Language::Go
        );
        assert_eq!(
            registry.get(Path::new("a.rs")).unwrap().language(),
            Language::Rust
        );
        assert!(registry.get(Path::new("a.rb")).is_none());
        assert!(registry.get(Path::new("Makefile")).is_none());
    }

    #[test]
    fn test_supported_extensions() {
        let registry = ExtractorRegistry::new();
        let exts = registry.supported_extensions();
        for ext in [".py", ".pyw", ".js", ".jsx", ".mjs", ".cjs", ".ts", ".tsx", ".go", ".rs"] {
            assert!(exts.contains(&ext.to_string()), "missing {}", ext);
        }
        assert_eq!(exts.len(), 10);
    }

    #[test]
    fn test_missing_file_yields_empty() {
        let registry = ExtractorRegistry::new();
        let entities = registry.parse_path(Path::new("/nonexistent/zzz.py"), "repo");
        assert!(entities.is_empty());
    }

    #[test]
    fn test_parse_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.py");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "def greet(name):\n    return name").unwrap();

        let registry = ExtractorRegistry::new();
        let entities = registry.parse_path(&path, "repo");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "greet");
        assert_eq!(entities[0].repo_name, "repo");
    }
}
