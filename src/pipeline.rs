//! Indexing pipeline
//!
//! Walks a source tree, extracts entities, embeds them in batches, and
//! upserts both indices. Re-running for the same repository purges its prior
//! snapshot first, so the pipeline is idempotent per repo. Failures inside
//! the file loop are isolated; failures at the storage boundary fail the run
//! and are reported in the outcome rather than thrown.

use crate::config::MAX_FILE_SIZE;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::extract::ExtractorRegistry;
use crate::index::{Bm25Index, VectorStore};
use crate::models::CodeEntity;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Directory names never descended into.
pub const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "venv",
    ".venv",
    "__pycache__",
    ".git",
    "dist",
    "build",
    "target",
    ".tox",
    ".pytest_cache",
    "vendor",
    "third_party",
    "external",
];

/// Outcome of one indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub success: bool,
    pub repo_name: String,
    pub entities_found: usize,
    pub entities_indexed: usize,
    pub files_processed: usize,
    pub duration_seconds: f64,
    pub languages: HashMap<String, usize>,
    pub error: Option<String>,
}

impl IndexReport {
    fn failure(repo_name: &str, started: Instant, error: String) -> Self {
        Self {
            success: false,
            repo_name: repo_name.to_string(),
            entities_found: 0,
            entities_indexed: 0,
            files_processed: 0,
            duration_seconds: started.elapsed().as_secs_f64(),
            languages: HashMap::new(),
            error: Some(error),
        }
    }
}

/// Repository name from a clone URL: the basename with `.git` stripped.
pub fn repo_name_from_url(url: &str) -> String {
    let name = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    name.strip_suffix(".git").unwrap_or(name).to_string()
}

pub struct IndexingPipeline {
    registry: ExtractorRegistry,
    vector_store: Arc<dyn VectorStore>,
    bm25: Arc<Bm25Index>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    cancel: Arc<AtomicBool>,
}

impl IndexingPipeline {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        bm25: Arc<Bm25Index>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Self {
        Self {
            registry: ExtractorRegistry::new(),
            vector_store,
            bm25,
            embedder,
            batch_size,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between files; setting it stops the current run after
    /// the file in progress. Partial writes are overwritten by the next run.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Index every supported file under `directory` as repository
    /// `repo_name`, replacing any prior snapshot of that repository.
    pub fn index_directory(&self, directory: &Path, repo_name: &str) -> IndexReport {
        let started = Instant::now();
        tracing::info!(repo = repo_name, dir = %directory.display(), "starting index run");

        match self.run(directory, repo_name, started) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(repo = repo_name, error = %e, "indexing failed");
                IndexReport::failure(repo_name, started, e.to_string())
            }
        }
    }

    fn run(&self, directory: &Path, repo_name: &str, started: Instant) -> Result<IndexReport> {
        if !directory.is_dir() {
            return Err(Error::DirectoryNotFound {
                path: directory.to_path_buf(),
            });
        }

        let files = self.collect_files(directory);
        let (entities, files_processed, languages) = self.extract_all(&files, repo_name);

        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::IndexError {
                message: "indexing cancelled".to_string(),
            });
        }

        tracing::info!(
            repo = repo_name,
            files = files_processed,
            entities = entities.len(),
            "parsing complete"
        );

        if entities.is_empty() {
            return Ok(IndexReport {
                success: true,
                repo_name: repo_name.to_string(),
                entities_found: 0,
                entities_indexed: 0,
                files_processed,
                duration_seconds: started.elapsed().as_secs_f64(),
                languages,
                error: None,
            });
        }

        // Replace the prior snapshot. Between here and the final add the
        // repo appears partially indexed; queries stay safe throughout.
        self.vector_store.delete_by_repo(repo_name)?;
        self.bm25.remove_by_repo(repo_name);

        tracing::info!(count = entities.len(), "generating embeddings");
        let embeddings = self.embedder.embed_entities(&entities, self.batch_size);

        let indexed = self.vector_store.insert(&entities, &embeddings)?;

        self.bm25.add_entities(&entities);
        self.bm25.save()?;

        let duration_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            repo = repo_name,
            entities = indexed,
            duration_seconds,
            "repo indexed"
        );

        Ok(IndexReport {
            success: true,
            repo_name: repo_name.to_string(),
            entities_found: entities.len(),
            entities_indexed: indexed,
            files_processed,
            duration_seconds,
            languages,
            error: None,
        })
    }

    /// Supported files under the root, skipping excluded directories and
    /// oversized files.
    fn collect_files(&self, root: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .map(|name| EXCLUDED_DIRS.contains(&name))
                        .unwrap_or(false))
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .metadata()
                    .map(|m| m.len() <= MAX_FILE_SIZE)
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .filter(|path| self.registry.is_supported(path))
            .collect()
    }

    /// Extract entities from every file, in parallel. Per-file failures are
    /// already isolated inside the extractors; here only the tallies are
    /// kept. Entity order follows the file list so runs are reproducible.
    fn extract_all(
        &self,
        files: &[PathBuf],
        repo_name: &str,
    ) -> (Vec<CodeEntity>, usize, HashMap<String, usize>) {
        let per_file: Vec<Vec<CodeEntity>> = files
            .par_iter()
            .map(|path| {
                if self.cancel.load(Ordering::Relaxed) {
                    return Vec::new();
                }
                self.registry.parse_path(path, repo_name)
            })
            .collect();

        let mut entities = Vec::new();
        let mut languages: HashMap<String, usize> = HashMap::new();
        let files_processed = per_file.len();
        for file_entities in per_file {
            if let Some(first) = file_entities.first() {
                *languages.entry(first.language.as_str().to_string()).or_insert(0) +=
                    file_entities.len();
            }
            entities.extend(file_entities);
        }
        (entities, files_processed, languages)
    }
}

// =============================================================================
// TESTS
// =============================================================================
