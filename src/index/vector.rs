//! Vector index
//!
//! Cosine nearest-neighbor store behind the `VectorStore` trait. Two
//! backends: an in-memory store for tests and local mode, and a Qdrant REST
//! backend. Upserts retry with exponential backoff on transient faults; a
//! missing collection is treated as an empty corpus, not an error.

use super::SearchFilters;
use crate::config::MAX_PAYLOAD_SOURCE;
use crate::error::{Error, Result};
use crate::models::{CodeEntity, EntityKind, Language};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

/// Upsert attempts before giving up on the backend
const MAX_RETRIES: u32 = 3;
/// First backoff delay; doubles per attempt
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

// =============================================================================
// TRAIT
// =============================================================================

/// Collection diagnostics
#[derive(Debug, Clone, Default, Serialize)]
pub struct VectorStats {
    pub total_points: usize,
    pub status: String,
}

/// Abstract cosine-similarity store with payload filtering.
pub trait VectorStore: Send + Sync {
    /// Idempotently create the collection (cosine distance, dimension `D`)
    /// with keyword payload indices on language, entity_type and repo_name.
    fn create_collection(&self, recreate: bool) -> Result<()>;

    /// Upsert entities with their embeddings by id. Lengths must match and
    /// every embedding must have the collection dimension.
    fn insert(&self, entities: &[CodeEntity], embeddings: &[Vec<f32>]) -> Result<usize>;

    /// Nearest neighbors of the query embedding, most similar first. Scores
    /// are cosine similarities in [-1, 1].
    fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(CodeEntity, f32)>>;

    /// Delete every point of a repository. Returns the count removed.
    fn delete_by_repo(&self, repo_name: &str) -> Result<usize>;

    fn count(&self) -> Result<usize>;

    fn get_stats(&self) -> Result<VectorStats> {
        Ok(VectorStats {
            total_points: self.count()?,
            status: "ok".to_string(),
        })
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Entity fields persisted per point. `source_code` is truncated on write.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointPayload {
    name: String,
    entity_type: EntityKind,
    language: Language,
    file_path: String,
    repo_name: String,
    start_line: u32,
    end_line: u32,
    source_code: String,
    docstring: Option<String>,
    signature: Option<String>,
    #[serde(default)]
    parameters: Vec<String>,
    return_type: Option<String>,
    #[serde(default)]
    decorators: Vec<String>,
    parent_class: Option<String>,
    complexity: Option<u32>,
    #[serde(default)]
    loc: u32,
}

impl PointPayload {
    fn from_entity(entity: &CodeEntity) -> Self {
        Self {
            name: entity.name.clone(),
            entity_type: entity.kind,
            language: entity.language,
            file_path: entity.file_path.clone(),
            repo_name: entity.repo_name.clone(),
            start_line: entity.start_line,
            end_line: entity.end_line,
            source_code: entity.truncated_source(MAX_PAYLOAD_SOURCE),
            docstring: entity.docstring.clone(),
            signature: entity.signature.clone(),
            parameters: entity.parameters.clone(),
            return_type: entity.return_type.clone(),
            decorators: entity.decorators.clone(),
            parent_class: entity.parent_class.clone(),
            complexity: entity.complexity,
            loc: entity.loc,
        }
    }

    fn into_entity(self, id: String) -> CodeEntity {
        CodeEntity {
            id,
            name: self.name,
            kind: self.entity_type,
            language: self.language,
            file_path: self.file_path,
            repo_name: self.repo_name,
            start_line: self.start_line,
            end_line: self.end_line,
            source_code: self.source_code,
            docstring: self.docstring,
            signature: self.signature,
            parameters: self.parameters,
            return_type: self.return_type,
            decorators: self.decorators,
            parent_class: self.parent_class,
            complexity: self.complexity,
            loc: self.loc,
            created_at: Utc::now(),
        }
    }
}

fn validate_batch(entities: &[CodeEntity], embeddings: &[Vec<f32>], dimension: usize) -> Result<()> {
    if entities.len() != embeddings.len() {
        return Err(Error::InvalidArgument {
            message: format!(
                "entity count {} does not match embedding count {}",
                entities.len(),
                embeddings.len()
            ),
        });
    }
    for embedding in embeddings {
        if embedding.len() != dimension {
            return Err(Error::InvalidArgument {
                message: format!(
                    "embedding dimension {} does not match collection dimension {}",
                    embedding.len(),
                    dimension
                ),
            });
        }
    }
    Ok(())
}

/// Run `op` up to MAX_RETRIES times with doubling delays between transient
/// failures.
fn with_retry<T>(label: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay = RETRY_BASE_DELAY;
    let mut last_err = None;
    for attempt in 1..=MAX_RETRIES {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                tracing::warn!(op = label, attempt, error = %e, "retrying after transient fault");
                std::thread::sleep(delay);
                delay *= 2;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::VectorBackend {
        message: format!("{} failed after {} attempts", label, MAX_RETRIES),
    }))
}

// =============================================================================
// IN-MEMORY BACKEND
// =============================================================================

/// Exact cosine store kept in memory. The behavioral reference for trait
/// semantics and the backend used by tests and local mode.
pub struct InMemoryVectorStore {
    dimension: usize,
    state: RwLock<Option<HashMap<String, (CodeEntity, Vec<f32>)>>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(None),
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

impl VectorStore for InMemoryVectorStore {
    fn create_collection(&self, recreate: bool) -> Result<()> {
        let mut state = self.state.write();
        if state.is_none() || recreate {
            *state = Some(HashMap::new());
        }
        Ok(())
    }

    fn insert(&self, entities: &[CodeEntity], embeddings: &[Vec<f32>]) -> Result<usize> {
        validate_batch(entities, embeddings, self.dimension)?;
        if entities.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write();
        let points = state.get_or_insert_with(HashMap::new);
        for (entity, embedding) in entities.iter().zip(embeddings) {
            // round-trip through the payload so truncation matches the
            // remote backend
            let stored =
                PointPayload::from_entity(entity).into_entity(entity.id.clone());
            points.insert(entity.id.clone(), (stored, embedding.clone()));
        }
        Ok(entities.len())
    }

    fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(CodeEntity, f32)>> {
        let state = self.state.read();
        let Some(points) = state.as_ref() else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(CodeEntity, f32)> = points
            .values()
            .filter(|(entity, _)| filters.matches(entity))
            .map(|(entity, embedding)| (entity.clone(), cosine(query_embedding, embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn delete_by_repo(&self, repo_name: &str) -> Result<usize> {
        let mut state = self.state.write();
        let Some(points) = state.as_mut() else {
            return Ok(0);
        };
        let before = points.len();
        points.retain(|_, (entity, _)| entity.repo_name != repo_name);
        Ok(before - points.len())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.state.read().as_ref().map_or(0, |p| p.len()))
    }
}

// =============================================================================
// QDRANT REST BACKEND
// =============================================================================

/// Qdrant backend over its REST API.
pub struct QdrantStore {
    base_url: String,
    collection: String,
    dimension: usize,
    client: reqwest::blocking::Client,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: base_url.into(),
            collection: collection.into(),
            dimension,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn collection_exists(&self) -> Result<bool> {
        let response = self.client.get(self.collection_url()).send()?;
        Ok(response.status().is_success())
    }

    fn backend_error(context: &str, response: reqwest::blocking::Response) -> Error {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        Error::VectorBackend {
            message: format!("{} failed with {}: {}", context, status, body),
        }
    }

    fn filter_json(filters: &SearchFilters) -> Option<serde_json::Value> {
        let mut must = Vec::new();
        if let Some(lang) = filters.language {
            must.push(json!({"key": "language", "match": {"value": lang.as_str()}}));
        }
        if let Some(kind) = filters.entity_type {
            must.push(json!({"key": "entity_type", "match": {"value": kind.as_str()}}));
        }
        if let Some(repo) = &filters.repo_name {
            must.push(json!({"key": "repo_name", "match": {"value": repo}}));
        }
        if must.is_empty() {
            None
        } else {
            Some(json!({ "must": must }))
        }
    }

    fn count_by_repo(&self, repo_name: &str) -> Result<usize> {
        let body = json!({
            "exact": true,
            "filter": {"must": [{"key": "repo_name", "match": {"value": repo_name}}]}
        });
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&body)
            .send()?;
        if !response.status().is_success() {
            return Err(Self::backend_error("count", response));
        }
        let parsed: serde_json::Value = response.json()?;
        Ok(parsed["result"]["count"].as_u64().unwrap_or(0) as usize)
    }
}

impl VectorStore for QdrantStore {
    fn create_collection(&self, recreate: bool) -> Result<()> {
        if self.collection_exists()? {
            if !recreate {
                tracing::info!(collection = %self.collection, "collection already exists");
                return Ok(());
            }
            tracing::info!(collection = %self.collection, "deleting existing collection");
            let response = self.client.delete(self.collection_url()).send()?;
            if !response.status().is_success() {
                return Err(Self::backend_error("delete collection", response));
            }
        }

        let body = json!({
            "vectors": {"size": self.dimension, "distance": "Cosine"},
            "on_disk_payload": true
        });
        let response = self.client.put(self.collection_url()).json(&body).send()?;
        if !response.status().is_success() {
            return Err(Self::backend_error("create collection", response));
        }

        for field in ["language", "entity_type", "repo_name"] {
            let body = json!({"field_name": field, "field_schema": "keyword"});
            let response = self
                .client
                .put(format!("{}/index", self.collection_url()))
                .json(&body)
                .send()?;
            if !response.status().is_success() {
                return Err(Self::backend_error("create payload index", response));
            }
        }

        tracing::info!(collection = %self.collection, "created collection");
        Ok(())
    }

    fn insert(&self, entities: &[CodeEntity], embeddings: &[Vec<f32>]) -> Result<usize> {
        validate_batch(entities, embeddings, self.dimension)?;
        if entities.is_empty() {
            return Ok(0);
        }

        let points: Vec<serde_json::Value> = entities
            .iter()
            .zip(embeddings)
            .map(|(entity, embedding)| {
                json!({
                    "id": entity.id,
                    "vector": embedding,
                    "payload": PointPayload::from_entity(entity),
                })
            })
            .collect();
        let body = json!({ "points": points });

        with_retry("upsert", || {
            let response = self
                .client
                .put(format!("{}/points?wait=true", self.collection_url()))
                .json(&body)
                .send()?;
            if !response.status().is_success() {
                return Err(Self::backend_error("upsert", response));
            }
            Ok(())
        })?;

        tracing::debug!(count = entities.len(), "inserted entities");
        Ok(entities.len())
    }

    fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(CodeEntity, f32)>> {
        match self.collection_exists() {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(collection = %self.collection, "collection does not exist");
                return Ok(Vec::new());
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to check collection");
                return Ok(Vec::new());
            }
        }

        let mut body = json!({
            "vector": query_embedding,
            "limit": limit,
            "with_payload": true,
            "score_threshold": 0.0
        });
        if let Some(filter) = Self::filter_json(filters) {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()?;
        if !response.status().is_success() {
            return Err(Self::backend_error("search", response));
        }

        let parsed: serde_json::Value = response.json()?;
        let mut results = Vec::new();
        for hit in parsed["result"].as_array().unwrap_or(&Vec::new()) {
            let id = match &hit["id"] {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            // cosine backends report similarity; a distance field means the
            // backend inverted it
            let score = if let Some(distance) = hit["distance"].as_f64() {
                1.0 - distance as f32
            } else {
                hit["score"].as_f64().unwrap_or(0.0) as f32
            };
            let payload: PointPayload = match serde_json::from_value(hit["payload"].clone()) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "skipping point with bad payload");
                    continue;
                }
            };
            results.push((payload.into_entity(id), score));
        }
        Ok(results)
    }

    fn delete_by_repo(&self, repo_name: &str) -> Result<usize> {
        let count_before = self.count_by_repo(repo_name).unwrap_or(0);

        let body = json!({
            "filter": {"must": [{"key": "repo_name", "match": {"value": repo_name}}]}
        });
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&body)
            .send()?;
        if !response.status().is_success() {
            return Err(Self::backend_error("delete", response));
        }

        tracing::info!(repo = repo_name, count = count_before, "deleted entities");
        Ok(count_before)
    }

    fn count(&self) -> Result<usize> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({"exact": true}))
            .send()?;
        if !response.status().is_success() {
            return Err(Self::backend_error("count", response));
        }
        let parsed: serde_json::Value = response.json()?;
        Ok(parsed["result"]["count"].as_u64().unwrap_or(0) as usize)
    }

    fn get_stats(&self) -> Result<VectorStats> {
        let response = self.client.get(self.collection_url()).send()?;
        if !response.status().is_success() {
            return Err(Self::backend_error("stats", response));
        }
        let parsed: serde_json::Value = response.json()?;
        Ok(VectorStats {
            total_points: parsed["result"]["points_count"].as_u64().unwrap_or(0) as usize,
            status: parsed["result"]["status"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
