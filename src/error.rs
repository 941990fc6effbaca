//! Error types for coderank

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using coderank's Error
pub type Result<T> = std::result::Result<T, Error>;

/// coderank error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Index error: {message}")]
    IndexError { message: String },

    #[error("Search error: {message}")]
    SearchError { message: String },

    #[error("Extraction error in {file}: {message}")]
    ExtractError { file: String, message: String },

    #[error("Embedding error: {message}")]
    EmbeddingError { message: String },

    #[error("Vector backend error: {message}")]
    VectorBackend { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Malformed job payload: {message}")]
    MalformedJob { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// True for faults worth retrying at the vector-store boundary.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::VectorBackend { .. } | Error::Http(_))
    }
}
