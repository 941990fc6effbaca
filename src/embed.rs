//! Embedding generation
//!
//! The engine treats the model as a pure function from text to a unit vector
//! of fixed dimension. `FastEmbedder` runs a local fastembed model;
//! `HashEmbedder` produces deterministic pseudo-embeddings for tests and
//! offline indexing. A failed batch degrades to zero vectors so the affected
//! entities stay reachable through BM25.

use crate::error::{Error, Result};
use crate::models::CodeEntity;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64_with_seed;

// =============================================================================
// TRAIT
// =============================================================================

pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed the searchable text of each entity, in batches. A batch that
    /// fails is logged and replaced with zero vectors.
    fn embed_entities(&self, entities: &[CodeEntity], batch_size: usize) -> Vec<Vec<f32>> {
        let texts: Vec<String> = entities.iter().map(|e| e.searchable_text()).collect();
        let batch_size = batch_size.max(1);

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            match self.embed_batch(batch) {
                Ok(embeddings) => all.extend(embeddings),
                Err(e) => {
                    tracing::error!(error = %e, batch = batch.len(), "embedding batch failed");
                    all.extend(batch.iter().map(|_| vec![0.0; self.dimension()]));
                }
            }
        }
        all
    }
}

// =============================================================================
// FASTEMBED BACKEND
// =============================================================================

pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    dimension: usize,
}

impl FastEmbedder {
    /// Load a local model by name. Unrecognized names fall back to MiniLM.
    pub fn new(model_name: &str, dimension: usize) -> Result<Self> {
        let model_kind = match model_name {
            "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
                EmbeddingModel::AllMiniLML6V2
            }
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            other => {
                tracing::warn!(model = other, "unknown embedding model, using MiniLM");
                EmbeddingModel::AllMiniLML6V2
            }
        };

        let options = InitOptions::new(model_kind).with_show_download_progress(false);
        let model = TextEmbedding::try_new(options).map_err(|e| Error::EmbeddingError {
            message: e.to_string(),
        })?;
        Ok(Self {
            model: Mutex::new(model),
            dimension,
        })
    }
}

impl Embedder for FastEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(std::slice::from_ref(&text.to_string()))?;
        embeddings.pop().ok_or_else(|| Error::EmbeddingError {
            message: "model returned no embedding".to_string(),
        })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.model
            .lock()
            .embed(texts.to_vec(), None)
            .map_err(|e| Error::EmbeddingError {
                message: e.to_string(),
            })
    }
}

// =============================================================================
// HASH BACKEND
// =============================================================================

/// Deterministic embedder: each component is derived from a seeded hash of
/// the text, the result normalized to a unit vector. Identical texts map to
/// identical vectors, so ranking stays reproducible without a model.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let bytes = text.as_bytes();
        let mut embedding: Vec<f32> = (0..self.dimension)
            .map(|i| {
                let h = xxh3_64_with_seed(bytes, i as u64);
                (h as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in embedding.iter_mut() {
                *x /= norm;
            }
        }
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_text(t)).collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use crate::testutil::entity;

    #[test]
    fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed_text("send http request").unwrap();
        let b = embedder.embed_text("send http request").unwrap();
        let c = embedder.embed_text("parse json").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_embedder_unit_norm() {
        let embedder = HashEmbedder::new(32);
        let v = embedder.embed_text("anything").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embed_entities_batches() {
        let embedder = HashEmbedder::new(16);
        let entities: Vec<_> = (0..5)
            .map(|i| entity(&format!("f{}", i), EntityKind::Function))
            .collect();
        let embeddings = embedder.embed_entities(&entities, 2);
        assert_eq!(embeddings.len(), 5);
        assert!(embeddings.iter().all(|e| e.len() == 16));
    }

    #[test]
    fn test_failing_batch_yields_zero_vectors() {
        struct FailingEmbedder;
        impl Embedder for FailingEmbedder {
            fn dimension(&self) -> usize {
                4
            }
            fn embed_text(&self, _: &str) -> Result<Vec<f32>> {
                Err(Error::EmbeddingError {
                    message: "down".to_string(),
                })
            }
            fn embed_batch(&self, _: &[String]) -> Result<Vec<Vec<f32>>> {
                Err(Error::EmbeddingError {
                    message: "down".to_string(),
                })
            }
        }

        let entities = vec![
            entity("a", EntityKind::Function),
            entity("b", EntityKind::Function),
        ];
        let embeddings = FailingEmbedder.embed_entities(&entities, 32);
        assert_eq!(embeddings, vec![vec![0.0; 4], vec![0.0; 4]]);
    }

    #[test]
    fn test_empty_batch() {
        let embedder = HashEmbedder::new(8);
        assert!(embedder.embed_batch(&[]).unwrap().is_empty());
    }
}
