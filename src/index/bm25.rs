//! BM25 lexical index
//!
//! Okapi BM25 over entity documents with a code-aware tokenizer. The index
//! is single-writer / multi-reader: mutations take the write lock for the
//! whole rebuild so a reader never sees a corpus inconsistent with the
//! ranking parameters.

use super::SearchFilters;
use crate::error::Result;
use crate::models::CodeEntity;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Okapi k1
const K1: f64 = 1.5;
/// Okapi b
const B: f64 = 0.75;
/// Floor factor for negative idf terms, as in Okapi implementations
const EPSILON: f64 = 0.25;
/// Results below this fraction of the best score are dropped (only when the
/// best score is positive; a non-positive maximum keeps everything, which
/// matters when idf goes negative on very small corpora)
const SCORE_FLOOR_RATIO: f64 = 0.01;

/// Persisted file name inside the index directory
const INDEX_FILE: &str = "bm25_index.json";

// =============================================================================
// TOKENIZER
// =============================================================================

static CAMEL_LOWER_UPPER: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());
static CAMEL_UPPER_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").unwrap());

/// Code-aware tokenizer applied to both documents and queries.
///
/// Case boundaries are split before lowercasing, so `parseJSONData` becomes
/// `parse json data` rather than `parsejsondata`.
pub fn tokenize(text: &str) -> Vec<String> {
    let text = CAMEL_LOWER_UPPER.replace_all(text, "$1 $2");
    let text = CAMEL_UPPER_RUN.replace_all(&text, "$1 $2");
    let text = text.to_lowercase();

    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '_' | '-' | '.' | '/' | '\\' => cleaned.push(' '),
            'a'..='z' | '0'..='9' => cleaned.push(c),
            c if c.is_whitespace() => cleaned.push(' '),
            _ => cleaned.push(' '),
        }
    }

    cleaned
        .split_whitespace()
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

/// BM25 document text for an entity: name, signature, docstring, parameter
/// names, parent class, and return type.
fn entity_document(entity: &CodeEntity) -> String {
    let params = entity.parameters.join(" ");
    let parts: [&str; 6] = [
        entity.name.as_str(),
        entity.signature.as_deref().unwrap_or(""),
        entity.docstring.as_deref().unwrap_or(""),
        params.as_str(),
        entity.parent_class.as_deref().unwrap_or(""),
        entity.return_type.as_deref().unwrap_or(""),
    ];
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// OKAPI MODEL
// =============================================================================

/// Ranking parameters rebuilt from the corpus after every mutation.
struct OkapiModel {
    /// term -> idf
    idf: HashMap<String, f64>,
    /// per-document term frequencies, parallel to the corpus
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
}

impl OkapiModel {
    fn build(corpus: &[Vec<String>]) -> Option<Self> {
        if corpus.is_empty() {
            return None;
        }

        let corpus_size = corpus.len() as f64;
        let doc_lens: Vec<usize> = corpus.iter().map(|d| d.len()).collect();
        let total: usize = doc_lens.iter().sum();
        let avg_doc_len = total as f64 / corpus_size;

        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut term_freqs = Vec::with_capacity(corpus.len());
        for doc in corpus {
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in doc {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        // Standard Okapi idf; terms appearing in most documents go negative
        // and get floored at epsilon times the average idf.
        let mut idf: HashMap<String, f64> = HashMap::new();
        let mut idf_sum = 0.0;
        let mut negative_terms: Vec<String> = Vec::new();
        for (term, df) in &doc_freq {
            let value = (corpus_size - *df as f64 + 0.5).ln() - (*df as f64 + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative_terms.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }
        let average_idf = idf_sum / idf.len() as f64;
        let eps = EPSILON * average_idf;
        for term in negative_terms {
            idf.insert(term, eps);
        }

        Some(Self {
            idf,
            term_freqs,
            doc_lens,
            avg_doc_len,
        })
    }

    /// BM25 score of every document for the query tokens.
    fn scores(&self, query_tokens: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0; self.term_freqs.len()];
        for token in query_tokens {
            let Some(idf) = self.idf.get(token) else {
                continue;
            };
            for (row, freqs) in self.term_freqs.iter().enumerate() {
                let f = *freqs.get(token).unwrap_or(&0) as f64;
                if f == 0.0 {
                    continue;
                }
                let dl = self.doc_lens[row] as f64;
                let denom = f + K1 * (1.0 - B + B * dl / self.avg_doc_len);
                scores[row] += idf * (f * (K1 + 1.0)) / denom;
            }
        }
        scores
    }
}

// =============================================================================
// INDEX
// =============================================================================

#[derive(Default)]
struct Bm25State {
    entities: Vec<CodeEntity>,
    corpus: Vec<Vec<String>>,
    /// entity id -> row
    id_rows: HashMap<String, usize>,
    model: Option<OkapiModel>,
}

impl Bm25State {
    fn rebuild(&mut self) {
        self.model = OkapiModel::build(&self.corpus);
    }
}

/// Persisted form of the index: entities, tokenized corpus, and id map,
/// together forming the full public state.
#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedIndex {
    entities: Vec<CodeEntity>,
    corpus: Vec<Vec<String>>,
    entity_ids: HashMap<String, usize>,
}

/// BM25 index over code entities with filterable search and per-repo purge.
pub struct Bm25Index {
    index_path: PathBuf,
    state: RwLock<Bm25State>,
}

impl Bm25Index {
    /// Create an empty index rooted at `index_path` (created if missing).
    pub fn new(index_path: impl AsRef<Path>) -> Self {
        let index_path = index_path.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&index_path) {
            tracing::warn!(path = %index_path.display(), error = %e, "could not create index dir");
        }
        Self {
            index_path,
            state: RwLock::new(Bm25State::default()),
        }
    }

    /// Add entities, skipping ids already present. Returns the number added.
    pub fn add_entities(&self, entities: &[CodeEntity]) -> usize {
        let mut state = self.state.write();
        let mut added = 0;

        for entity in entities {
            if state.id_rows.contains_key(&entity.id) {
                continue;
            }
            let tokens = tokenize(&entity_document(entity));
            let row = state.entities.len();
            state.id_rows.insert(entity.id.clone(), row);
            state.entities.push(entity.clone());
            state.corpus.push(tokens);
            added += 1;
        }

        if added > 0 {
            state.rebuild();
        }
        tracing::debug!(count = added, "added entities to BM25 index");
        added
    }

    /// Search the index. Empty query tokens yield no results; documents
    /// scoring below the floor relative to the best hit are dropped.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Vec<(CodeEntity, f32)> {
        let state = self.state.read();
        let Some(model) = &state.model else {
            return Vec::new();
        };

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let scores = model.scores(&query_tokens);
        let max_score = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_score = if max_score > 0.0 {
            max_score * SCORE_FLOOR_RATIO
        } else {
            f64::NEG_INFINITY
        };

        let mut results: Vec<(CodeEntity, f32)> = Vec::new();
        for (row, score) in scores.iter().enumerate() {
            if *score < min_score {
                continue;
            }
            let entity = &state.entities[row];
            if !filters.matches(entity) {
                continue;
            }
            results.push((entity.clone(), *score as f32));
        }

        // stable sort keeps insertion order on ties
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        results
    }

    /// Remove every entity of a repository and rebuild. Returns the count
    /// removed.
    pub fn remove_by_repo(&self, repo_name: &str) -> usize {
        let mut state = self.state.write();

        let keep: Vec<bool> = state
            .entities
            .iter()
            .map(|e| e.repo_name != repo_name)
            .collect();
        let removed = keep.iter().filter(|k| !**k).count();
        if removed == 0 {
            return 0;
        }

        let old_entities = std::mem::take(&mut state.entities);
        let old_corpus = std::mem::take(&mut state.corpus);
        let mut entities = Vec::with_capacity(old_entities.len() - removed);
        let mut corpus = Vec::with_capacity(old_corpus.len() - removed);
        let mut id_rows = HashMap::new();
        for (i, (entity, tokens)) in old_entities.into_iter().zip(old_corpus).enumerate() {
            if keep[i] {
                id_rows.insert(entity.id.clone(), entities.len());
                entities.push(entity);
                corpus.push(tokens);
            }
        }

        state.entities = entities;
        state.corpus = corpus;
        state.id_rows = id_rows;
        state.rebuild();

        tracing::info!(repo = repo_name, count = removed, "removed entities from BM25");
        removed
    }

    /// Write the index to its directory as a single JSON blob.
    pub fn save(&self) -> Result<()> {
        let state = self.state.write();
        let persisted = PersistedIndex {
            entities: state.entities.clone(),
            corpus: state.corpus.clone(),
            entity_ids: state.id_rows.clone(),
        };
        let file = std::fs::File::create(self.index_file())?;
        serde_json::to_writer(std::io::BufWriter::new(file), &persisted)?;
        tracing::info!(
            path = %self.index_file().display(),
            count = state.entities.len(),
            "saved BM25 index"
        );
        Ok(())
    }

    /// Load the index from disk. Best effort: a missing or malformed file
    /// leaves the index empty and returns false.
    pub fn load(&self) -> bool {
        let path = self.index_file();
        if !path.exists() {
            tracing::debug!("no BM25 index file found");
            return false;
        }

        let persisted: PersistedIndex = match std::fs::File::open(&path)
            .map_err(crate::error::Error::from)
            .and_then(|f| {
                serde_json::from_reader(std::io::BufReader::new(f)).map_err(Into::into)
            }) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load BM25 index");
                return false;
            }
        };

        let mut state = self.state.write();
        state.entities = persisted.entities;
        state.corpus = persisted.corpus;
        state.id_rows = persisted.entity_ids;
        state.rebuild();
        tracing::info!(count = state.entities.len(), "loaded BM25 index");
        true
    }

    pub fn count(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Drop all indexed data.
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = Bm25State::default();
    }

    fn index_file(&self) -> PathBuf {
        self.index_path.join(INDEX_FILE)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, Language};
    use crate::testutil::{entity, entity_in, entity_with_doc};
    use std::collections::HashSet;

    fn index() -> Bm25Index {
        Bm25Index::new(tempfile::tempdir().unwrap().path())
    }

    #[test]
    fn test_tokenize_camel_case() {
        let tokens = tokenize("parseJSONData");
        assert_eq!(tokens, vec!["parse", "json", "data"]);
    }

    #[test]
    fn test_tokenize_snake_and_separators() {
        assert_eq!(tokenize("http_client.send"), vec!["http", "client", "send"]);
        assert_eq!(tokenize("a/b\\c-d"), Vec::<String>::new());
        assert_eq!(tokenize("req2resp"), vec!["req2resp"]);
    }

    #[test]
    fn test_tokenize_drops_short_tokens() {
        assert_eq!(tokenize("a of x it"), vec!["of", "it"]);
    }

    #[test]
    fn test_tokenize_idempotent_as_multiset() {
        let original = tokenize("parseJSONData send_request HTTPServer");
        let rejoined = tokenize(&original.join(" "));
        let a: HashSet<_> = original.iter().collect();
        let b: HashSet<_> = rejoined.iter().collect();
        assert_eq!(a, b);
        assert_eq!(original.len(), rejoined.len());
    }

    #[test]
    fn test_add_and_search() {
        let index = index();
        index.add_entities(&[
            entity_with_doc("send_request", "Send an HTTP request to a server."),
            entity_with_doc("parse_config", "Parse the configuration file."),
        ]);

        let results = index.search("http request", 10, &SearchFilters::default());
        assert!(!results.is_empty());
        assert_eq!(results[0].0.name, "send_request");
    }

    #[test]
    fn test_duplicate_ids_skipped() {
        let index = index();
        let e = entity("dup", EntityKind::Function);
        assert_eq!(index.add_entities(&[e.clone()]), 1);
        assert_eq!(index.add_entities(&[e]), 0);
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let index = index();
        index.add_entities(&[entity("f", EntityKind::Function)]);
        assert!(index.search("", 10, &SearchFilters::default()).is_empty());
        assert!(index.search("a !", 10, &SearchFilters::default()).is_empty());
    }

    #[test]
    fn test_single_doc_negative_idf_still_returned() {
        // With one document every query term has negative raw idf; the floor
        // must stay at -inf so the document is not silently dropped.
        let index = index();
        index.add_entities(&[entity_with_doc("only", "fetch remote data")]);
        let results = index.search("fetch data", 10, &SearchFilters::default());
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_filters_applied() {
        let index = index();
        let mut py = entity_with_doc("handler", "process the queue");
        py.language = Language::Python;
        let mut rs = entity_in("other", "src/lib.rs", "handler2", EntityKind::Function);
        rs.language = Language::Rust;
        rs.docstring = Some("process the queue".to_string());
        index.add_entities(&[py, rs]);

        let filters = SearchFilters {
            language: Some(Language::Rust),
            ..Default::default()
        };
        let results = index.search("queue", 10, &filters);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.language, Language::Rust);

        let filters = SearchFilters {
            repo_name: Some("other".to_string()),
            ..Default::default()
        };
        let results = index.search("queue", 10, &filters);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.repo_name, "other");
    }

    #[test]
    fn test_limit_respected() {
        let index = index();
        let entities: Vec<_> = (0..20)
            .map(|i| entity_with_doc(&format!("worker_{}", i), "drain the queue"))
            .collect();
        index.add_entities(&entities);
        let results = index.search("queue", 5, &SearchFilters::default());
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn test_remove_by_repo() {
        let index = index();
        index.add_entities(&[
            entity_in("alpha", "a.py", "one", EntityKind::Function),
            entity_in("beta", "b.py", "two", EntityKind::Function),
            entity_in("alpha", "c.py", "three", EntityKind::Function),
        ]);
        assert_eq!(index.remove_by_repo("alpha"), 2);
        assert_eq!(index.count(), 1);

        let results = index.search("one two three", 10, &SearchFilters::default());
        assert!(results.iter().all(|(e, _)| e.repo_name != "alpha"));
        // idempotent
        assert_eq!(index.remove_by_repo("alpha"), 0);
    }

    #[test]
    fn test_clear() {
        let index = index();
        index.add_entities(&[entity("f", EntityKind::Function)]);
        index.clear();
        assert_eq!(index.count(), 0);
        assert!(index.search("f", 10, &SearchFilters::default()).is_empty());
    }

    #[test]
    fn test_save_load_roundtrip_preserves_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let index = Bm25Index::new(dir.path());
        index.add_entities(&[
            entity_with_doc("send_request", "Send an HTTP request."),
            entity_with_doc("get_json", "Download and parse JSON."),
            entity_with_doc("save_file", "Write bytes to disk."),
        ]);
        let before = index.search("send http request", 10, &SearchFilters::default());
        index.save().unwrap();

        let fresh = Bm25Index::new(dir.path());
        assert!(fresh.load());
        let after = fresh.search("send http request", 10, &SearchFilters::default());

        assert_eq!(before.len(), after.len());
        for ((e1, s1), (e2, s2)) in before.iter().zip(after.iter()) {
            assert_eq!(e1.id, e2.id);
            assert!((s1 - s2).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = Bm25Index::new(dir.path());
        assert!(!index.load());
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), b"not json").unwrap();
        let index = Bm25Index::new(dir.path());
        assert!(!index.load());
        assert_eq!(index.count(), 0);
    }
}
