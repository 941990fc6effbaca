//! Search engines
//!
//! `SearchEngine` answers queries from the vector index alone.
//! `HybridSearchEngine` adds BM25 retrieval and fuses both result lists with
//! weighted reciprocal rank fusion, rewriting the query for the embedding
//! model and applying domain boosts afterwards. The query path never fails
//! the caller: downstream faults degrade to fewer (or zero) results.

use super::boost::BoostTable;
use super::weights;
use crate::config::{HIGHLIGHT_DOC_LEN, MAX_LIMIT, MAX_RESPONSE_SOURCE};
use crate::embed::Embedder;
use crate::index::{Bm25Index, SearchFilters, VectorStore};
use crate::models::{CodeEntity, SearchQuery, SearchResult};
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// SEMANTIC ENGINE
// =============================================================================

/// Vector-only search engine.
pub struct SearchEngine {
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl SearchEngine {
    pub fn new(vector_store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            vector_store,
            embedder,
        }
    }

    /// Semantic search with no rewriting, boosting, or fusion.
    pub fn search(&self, query: &str, limit: usize, filters: &SearchFilters) -> Vec<SearchResult> {
        let limit = clamp_limit(limit);
        let query_embedding = match self.embedder.embed_text(query) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "query embedding failed");
                return Vec::new();
            }
        };

        let results = match self.vector_store.search(&query_embedding, limit, filters) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "vector search failed");
                return Vec::new();
            }
        };

        results
            .into_iter()
            .map(|(entity, score)| make_result(entity, score, score, 0.0))
            .collect()
    }
}

// =============================================================================
// HYBRID ENGINE
// =============================================================================

/// Semantic + BM25 engine with reciprocal rank fusion.
pub struct HybridSearchEngine {
    semantic: SearchEngine,
    bm25: Arc<Bm25Index>,
    semantic_weight: f32,
    boost: BoostTable,
}

impl HybridSearchEngine {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        bm25: Arc<Bm25Index>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            semantic: SearchEngine::new(vector_store, embedder),
            bm25,
            semantic_weight: weights::DEFAULT_SEMANTIC_WEIGHT,
            boost: BoostTable::http_default(),
        }
    }

    pub fn with_semantic_weight(mut self, weight: f32) -> Self {
        self.semantic_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn with_boost_table(mut self, boost: BoostTable) -> Self {
        self.boost = boost;
        self
    }

    pub fn search(&self, query: &SearchQuery) -> Vec<SearchResult> {
        let filters = SearchFilters {
            language: query.language,
            entity_type: query.entity_type,
            repo_name: query.repo_filter.clone(),
        };

        if !query.use_hybrid {
            return self.semantic.search(&query.query, query.limit, &filters);
        }

        let limit = clamp_limit(query.limit);
        let candidates = limit * weights::CANDIDATE_FACTOR;
        let weight = query.semantic_weight.clamp(0.0, 1.0);

        // The rewritten query feeds the embedding model only; BM25 and the
        // boost rules see the original.
        let enhanced = enhance_query(&query.query);
        let semantic_results = match self.semantic.embedder.embed_text(&enhanced) {
            Ok(embedding) => self
                .semantic
                .vector_store
                .search(&embedding, candidates, &filters)
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "vector search failed");
                    Vec::new()
                }),
            Err(e) => {
                tracing::error!(error = %e, "query embedding failed");
                Vec::new()
            }
        };

        let bm25_results = self.bm25.search(&query.query, candidates, &filters);

        let fused = reciprocal_rank_fusion(
            semantic_results,
            bm25_results,
            weight,
            &query.query,
            &self.boost,
        );

        fused
            .into_iter()
            .take(limit)
            .map(|f| make_result(f.entity, f.combined, f.semantic_raw, f.bm25_raw))
            .collect()
    }
}

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIMIT)
}

// =============================================================================
// QUERY ENHANCEMENT
// =============================================================================

/// Rewrite the query to steer the embedding model toward code intent. Each
/// query falls into exactly one bucket, checked in priority order.
pub fn enhance_query(query: &str) -> String {
    let q = query.to_lowercase();
    let contains_any =
        |terms: &[&str]| -> bool { terms.iter().any(|t| q.contains(t)) };

    if contains_any(&["http", "request", "api", "url", "web"]) {
        // "handle http requests" usually means send/make, unless context
        // points at processing responses
        if q.contains("handle")
            && !contains_any(&["redirect", "response", "error", "exception", "cookie", "process"])
        {
            "function that sends makes HTTP requests GET POST PUT DELETE PATCH".to_string()
        } else if contains_any(&["make", "send", "perform", "execute", "do"]) {
            format!("function that sends or makes HTTP requests: {}", query)
        } else {
            format!("HTTP request function: {}", query)
        }
    } else if contains_any(&["json", "parse", "decode"]) {
        format!("JSON parsing function: {}", query)
    } else if contains_any(&["auth", "login", "token"]) {
        format!("authentication function: {}", query)
    } else if contains_any(&["download", "file", "save"]) {
        format!("file handling function: {}", query)
    } else {
        format!("function or method that {}", query)
    }
}

// =============================================================================
// FUSION
// =============================================================================

struct FusedScore {
    entity: CodeEntity,
    semantic_rrf: f32,
    semantic_raw: f32,
    bm25_rrf: f32,
    bm25_raw: f32,
    combined: f32,
}

/// Weighted RRF over both result lists, with adaptive weighting when dense
/// scores collapse and domain boosts applied after fusion. Ordering is
/// deterministic: ties keep first-seen order (semantic list, then BM25).
fn reciprocal_rank_fusion(
    semantic_results: Vec<(CodeEntity, f32)>,
    bm25_results: Vec<(CodeEntity, f32)>,
    semantic_weight: f32,
    query: &str,
    boost: &BoostTable,
) -> Vec<FusedScore> {
    let mut semantic_weight = semantic_weight;

    if !semantic_results.is_empty() {
        let max = semantic_results
            .iter()
            .map(|(_, s)| *s)
            .fold(f32::NEG_INFINITY, f32::max);
        let min = semantic_results
            .iter()
            .map(|(_, s)| *s)
            .fold(f32::INFINITY, f32::min);
        if max - min < weights::SCORE_SPREAD_FLOOR {
            semantic_weight = weights::COLLAPSED_SEMANTIC_WEIGHT;
            tracing::debug!(
                spread = max - min,
                "low semantic score diversity, reducing semantic weight"
            );
        }
    }
    let bm25_weight = 1.0 - semantic_weight;

    // insertion-ordered accumulation keeps tie-breaking stable
    let mut order: Vec<FusedScore> = Vec::new();
    let mut rows: HashMap<String, usize> = HashMap::new();

    for (rank, (entity, score)) in semantic_results.into_iter().enumerate() {
        let rrf = 1.0 / (weights::RRF_K + rank as f32 + 1.0);
        let id = entity.id.clone();
        rows.insert(id, order.len());
        order.push(FusedScore {
            entity,
            semantic_rrf: rrf * semantic_weight,
            semantic_raw: score,
            bm25_rrf: 0.0,
            bm25_raw: 0.0,
            combined: 0.0,
        });
    }

    for (rank, (entity, score)) in bm25_results.into_iter().enumerate() {
        let rrf = 1.0 / (weights::RRF_K + rank as f32 + 1.0);
        if let Some(&row) = rows.get(&entity.id) {
            order[row].bm25_rrf = rrf * bm25_weight;
            order[row].bm25_raw = score;
        } else {
            let id = entity.id.clone();
            rows.insert(id, order.len());
            order.push(FusedScore {
                entity,
                semantic_rrf: 0.0,
                semantic_raw: 0.0,
                bm25_rrf: rrf * bm25_weight,
                bm25_raw: score,
                combined: 0.0,
            });
        }
    }

    let boosting = boost.applies_to(query);
    for fused in order.iter_mut() {
        let multiplier = if boosting {
            boost.multiplier(&fused.entity.file_path, &fused.entity.name)
        } else {
            1.0
        };
        fused.combined = (fused.semantic_rrf + fused.bm25_rrf) * multiplier;
    }

    order.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

// =============================================================================
// RESULTS
// =============================================================================

fn make_result(
    mut entity: CodeEntity,
    score: f32,
    semantic_score: f32,
    bm25_score: f32,
) -> SearchResult {
    entity.source_code = entity.truncated_source(MAX_RESPONSE_SOURCE);
    let highlights = extract_highlights(&entity);
    SearchResult {
        entity,
        score,
        semantic_score,
        bm25_score,
        highlights,
    }
}

/// Docstring prefix and signature, when present.
fn extract_highlights(entity: &CodeEntity) -> Vec<String> {
    let mut highlights = Vec::new();
    if let Some(doc) = &entity.docstring {
        highlights.push(doc.chars().take(HIGHLIGHT_DOC_LEN).collect());
    }
    if let Some(sig) = &entity.signature {
        highlights.push(sig.clone());
    }
    highlights
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::index::InMemoryVectorStore;
    use crate::models::EntityKind;
    use crate::testutil::{entity_in, entity_with_doc};

    fn engine_with(
        entities: Vec<CodeEntity>,
        embeddings: Vec<Vec<f32>>,
    ) -> (HybridSearchEngine, Arc<Bm25Index>) {
        let store = Arc::new(InMemoryVectorStore::new(4));
        store.create_collection(false).unwrap();
        store.insert(&entities, &embeddings).unwrap();

        let bm25 = Arc::new(Bm25Index::new(tempfile::tempdir().unwrap().path()));
        bm25.add_entities(&entities);

        let embedder = Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0, 0.0]));
        (
            HybridSearchEngine::new(store, Arc::clone(&bm25), embedder),
            bm25,
        )
    }

    /// Embedder returning a constant vector, so vector scores are controlled
    /// entirely by the stored embeddings.
    struct FixedEmbedder(Vec<f32>);
    impl Embedder for FixedEmbedder {
        fn dimension(&self) -> usize {
            self.0.len()
        }
        fn embed_text(&self, _: &str) -> crate::error::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        fn embed_batch(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    #[test]
    fn test_enhance_query_buckets() {
        assert_eq!(
            enhance_query("handle http requests"),
            "function that sends makes HTTP requests GET POST PUT DELETE PATCH"
        );
        assert_eq!(
            enhance_query("handle http error responses"),
            "HTTP request function: handle http error responses"
        );
        assert_eq!(
            enhance_query("send a request"),
            "function that sends or makes HTTP requests: send a request"
        );
        assert_eq!(
            enhance_query("decode payload"),
            "JSON parsing function: decode payload"
        );
        assert_eq!(
            enhance_query("login with token"),
            "authentication function: login with token"
        );
        assert_eq!(
            enhance_query("save to disk"),
            "file handling function: save to disk"
        );
        assert_eq!(
            enhance_query("sorts a list"),
            "function or method that sorts a list"
        );
    }

    #[test]
    fn test_enhancement_priority_order() {
        // HTTP bucket wins over the json bucket even when both trigger
        assert_eq!(
            enhance_query("parse api response"),
            "HTTP request function: parse api response"
        );
    }

    #[test]
    fn test_hybrid_search_fuses_both_sources() {
        let entities = vec![
            entity_with_doc("send_request", "Send an HTTP request to the server."),
            entity_with_doc("parse_config", "Read configuration from a file."),
        ];
        let embeddings = vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]];
        let (engine, _bm25) = engine_with(entities, embeddings);

        let results = engine.search(&SearchQuery::new("send request"));
        assert!(!results.is_empty());
        assert_eq!(results[0].entity.name, "send_request");
        assert!(results[0].semantic_score > 0.0);
        assert!(results[0].bm25_score > 0.0);
    }

    #[test]
    fn test_limit_and_filters_respected() {
        let mut entities = Vec::new();
        let mut embeddings = Vec::new();
        for i in 0..10 {
            entities.push(entity_with_doc(&format!("fn_{}", i), "shared words here"));
            embeddings.push(vec![1.0, 0.0, 0.0, i as f32 * 0.01]);
        }
        let (engine, _bm25) = engine_with(entities, embeddings);

        let mut query = SearchQuery::new("shared words");
        query.limit = 3;
        let results = engine.search(&query);
        assert!(results.len() <= 3);

        query.repo_filter = Some("no-such-repo".to_string());
        assert!(engine.search(&query).is_empty());
    }

    #[test]
    fn test_semantic_only_mode() {
        let entities = vec![entity_with_doc("alpha", "does alpha things")];
        let embeddings = vec![vec![1.0, 0.0, 0.0, 0.0]];
        let (engine, _bm25) = engine_with(entities, embeddings);

        let mut query = SearchQuery::new("alpha");
        query.use_hybrid = false;
        let results = engine.search(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].bm25_score, 0.0);
        assert_eq!(results[0].score, results[0].semantic_score);
    }

    #[test]
    fn test_http_boost_ranks_send_over_handler() {
        // scenario: send in sessions.py vs handle_request in views.py, with
        // identical embeddings and similar lexical evidence
        let mut send = entity_in("requests", "requests/sessions.py", "send", EntityKind::Method);
        send.docstring = Some("Send a PreparedRequest over HTTP.".to_string());
        send.signature = Some("def send(self, request)".to_string());
        let mut handler = entity_in("app", "app/views.py", "handle_request", EntityKind::Function);
        handler.docstring = Some("Send the HTTP request to a handler chain.".to_string());
        handler.signature = Some("def handle_request(request)".to_string());

        let embeddings = vec![vec![1.0, 0.0, 0.0, 0.0], vec![1.0, 0.0, 0.0, 0.0]];
        let (engine, _bm25) = engine_with(vec![handler, send], embeddings);

        let results = engine.search(&SearchQuery::new("send HTTP request"));
        assert_eq!(results[0].entity.name, "send");
        assert!(results
            .iter()
            .any(|r| r.entity.name == "handle_request"));
    }

    #[test]
    fn test_no_boost_without_http_terms() {
        let mut handler = entity_in("app", "app/views.py", "handle_request", EntityKind::Function);
        handler.docstring = Some("unique marker words".to_string());
        handler.signature = Some("def handle_request()".to_string());
        let embeddings = vec![vec![1.0, 0.0, 0.0, 0.0]];
        let (engine, _bm25) = engine_with(vec![handler], embeddings);

        // no http/request/api trigger in the query
        let results = engine.search(&SearchQuery::new("unique marker words"));
        assert!(!results.is_empty());
    }

    #[test]
    fn test_adaptive_weighting_lifts_bm25_winner() {
        // all cosine scores collapse into [0.82, 0.83]; the BM25 winner must
        // surface in the top 3 at the default semantic weight
        let mut entities = Vec::new();
        let mut embeddings = Vec::new();
        for i in 0..8 {
            entities.push(entity_with_doc(
                &format!("irrelevant_{}", i),
                "nothing in common",
            ));
            // cosine with the [1,0,0,0] query in a narrow band around 0.825
            let angle = 0.82_f32 + (i as f32) * 0.001;
            let y = (1.0 - angle * angle).sqrt();
            embeddings.push(vec![angle, y, 0.0, 0.0]);
        }
        let mut winner = entity_with_doc("lexical_winner", "frobnicate the widget gadget");
        winner.signature = Some("def lexical_winner()".to_string());
        entities.push(winner);
        // dense-last but still inside the collapsed band
        let angle = 0.8195_f32;
        embeddings.push(vec![angle, (1.0 - angle * angle).sqrt(), 0.0, 0.0]);

        let (engine, _bm25) = engine_with(entities, embeddings);
        let results = engine.search(&SearchQuery::new("frobnicate widget gadget"));

        let position = results
            .iter()
            .position(|r| r.entity.name == "lexical_winner")
            .expect("winner missing from results");
        assert!(position < 3, "bm25 winner at position {}", position);
    }

    #[test]
    fn test_deterministic_ordering() {
        let entities = vec![
            entity_with_doc("one", "alpha beta"),
            entity_with_doc("two", "alpha beta"),
            entity_with_doc("three", "alpha beta"),
        ];
        let embeddings = vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0, 0.0],
            vec![0.8, 0.2, 0.0, 0.0],
        ];
        let (engine, _bm25) = engine_with(entities, embeddings);

        let query = SearchQuery::new("alpha beta");
        let first: Vec<String> = engine
            .search(&query)
            .into_iter()
            .map(|r| r.entity.id)
            .collect();
        for _ in 0..5 {
            let again: Vec<String> = engine
                .search(&query)
                .into_iter()
                .map(|r| r.entity.id)
                .collect();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_highlights_have_doc_prefix_and_signature() {
        let mut e = entity_with_doc("documented", &"x".repeat(400));
        e.signature = Some("def documented()".to_string());
        let embeddings = vec![vec![1.0, 0.0, 0.0, 0.0]];
        let (engine, _bm25) = engine_with(vec![e], embeddings);

        let results = engine.search(&SearchQuery::new("documented"));
        let highlights = &results[0].highlights;
        assert_eq!(highlights.len(), 2);
        assert_eq!(highlights[0].chars().count(), HIGHLIGHT_DOC_LEN);
        assert_eq!(highlights[1], "def documented()");
    }

    #[test]
    fn test_result_source_truncated() {
        let mut e = entity_with_doc("big_source", "some doc");
        e.source_code = "y".repeat(MAX_RESPONSE_SOURCE + 100);
        let embeddings = vec![vec![1.0, 0.0, 0.0, 0.0]];
        let (engine, _bm25) = engine_with(vec![e], embeddings);

        let results = engine.search(&SearchQuery::new("big source"));
        assert!(results[0].entity.source_code.len() <= MAX_RESPONSE_SOURCE);
    }

    #[test]
    fn test_rrf_math() {
        let a = entity_with_doc("a", "first");
        let b = entity_with_doc("b", "second");
        let fused = reciprocal_rank_fusion(
            vec![(a.clone(), 0.9), (b.clone(), 0.2)],
            vec![(b.clone(), 5.0)],
            0.7,
            "plain query",
            &BoostTable::http_default(),
        );

        // spread 0.7 >= 0.05, so weights stay 0.7 / 0.3
        let a_expected = 0.7 / 61.0;
        let b_expected = 0.7 / 62.0 + 0.3 / 61.0;
        let a_row = fused.iter().find(|f| f.entity.id == a.id).unwrap();
        let b_row = fused.iter().find(|f| f.entity.id == b.id).unwrap();
        assert!((a_row.combined - a_expected).abs() < 1e-6);
        assert!((b_row.combined - b_expected).abs() < 1e-6);
        assert_eq!(b_row.bm25_raw, 5.0);
        assert_eq!(fused[0].entity.id, a.id);
    }

    #[test]
    fn test_search_engine_uses_hash_embedder() {
        // end to end with the deterministic embedder: matching text embeds
        // to the same vector and comes back first
        let store = Arc::new(InMemoryVectorStore::new(32));
        store.create_collection(false).unwrap();
        let embedder = Arc::new(HashEmbedder::new(32));

        let e = entity_with_doc("target", "unmistakable phrase");
        let emb = embedder.embed_text(&e.searchable_text()).unwrap();
        store.insert(&[e.clone()], &[emb]).unwrap();

        let engine = SearchEngine::new(store, embedder);
        let results = engine.search(&e.searchable_text(), 5, &SearchFilters::default());
        assert_eq!(results[0].entity.id, e.id);
        assert!(results[0].semantic_score > 0.99);
    }
}
