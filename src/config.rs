//! Configuration management
//!
//! All settings come from `CODERANK_*` environment variables with sensible
//! defaults, so the engine runs out of the box against a local Qdrant and a
//! local index directory.

use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Vector store host
    pub vector_host: String,
    /// Vector store HTTP port
    pub vector_port: u16,
    /// Vector collection name
    pub collection: String,
    /// Embedding model identifier
    pub embedding_model: String,
    /// Embedding vector dimension
    pub embedding_dimension: usize,
    /// Entities per embedding batch
    pub batch_size: usize,
    /// Directory holding the persisted BM25 index
    pub index_path: PathBuf,
    /// Directory holding acquired source trees
    pub repos_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vector_host: "localhost".to_string(),
            vector_port: 6333,
            collection: "code_embeddings".to_string(),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dimension: 384,
            batch_size: 32,
            index_path: PathBuf::from("./data/index"),
            repos_path: PathBuf::from("./data/repos"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            vector_host: env_or("CODERANK_VECTOR_HOST", defaults.vector_host),
            vector_port: env_parse("CODERANK_VECTOR_PORT", defaults.vector_port),
            collection: env_or("CODERANK_COLLECTION", defaults.collection),
            embedding_model: env_or("CODERANK_EMBEDDING_MODEL", defaults.embedding_model),
            embedding_dimension: env_parse(
                "CODERANK_EMBEDDING_DIMENSION",
                defaults.embedding_dimension,
            ),
            batch_size: env_parse("CODERANK_BATCH_SIZE", defaults.batch_size),
            index_path: env_or("CODERANK_INDEX_PATH", defaults.index_path),
            repos_path: env_or("CODERANK_REPOS_PATH", defaults.repos_path),
        }
    }

    /// Base URL of the vector store REST endpoint.
    pub fn vector_url(&self) -> String {
        format!("http://{}:{}", self.vector_host, self.vector_port)
    }
}

fn env_or<T: From<String>>(key: &str, default: T) -> T {
    std::env::var(key).map(T::from).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Default result limit for searches
pub const DEFAULT_LIMIT: usize = 20;
/// Hard cap on caller-supplied result limits
pub const MAX_LIMIT: usize = 100;
/// Maximum file size considered for extraction (bytes)
pub const MAX_FILE_SIZE: u64 = 1_048_576; // 1MB
/// Source code stored per vector payload (bytes)
pub const MAX_PAYLOAD_SOURCE: usize = 10_000;
/// Source code returned per search response entry (chars)
pub const MAX_RESPONSE_SOURCE: usize = 2_000;
/// Docstring prefix length used for highlights (chars)
pub const HIGHLIGHT_DOC_LEN: usize = 200;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.vector_port, 6333);
        assert_eq!(config.embedding_dimension, 384);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.vector_url(), "http://localhost:6333");
    }
}
