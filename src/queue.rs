//! Indexing job queue
//!
//! Transport-neutral model of the job contract: at-least-once delivery in
//! priority order, bounded redelivery, and a dead-letter sink for malformed
//! or repeatedly failing payloads. The in-memory queue stands in for a
//! broker; the worker consumes one message at a time (prefetch 1).

use crate::error::{Error, Result};
use crate::models::IndexingJob;
use crate::pipeline::{IndexReport, IndexingPipeline};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Redeliveries before a failing message is dead-lettered.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// =============================================================================
// QUEUE
// =============================================================================

/// A delivered message. Payloads stay opaque bytes until the consumer parses
/// them, as they would coming off a broker.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub payload: String,
    pub priority: u8,
    pub attempts: u32,
    seq: u64,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for QueuedMessage {}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, FIFO within a priority
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A message that will not be redelivered.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub payload: String,
    pub reason: String,
}

/// In-memory priority queue with dead-letter sink.
pub struct InMemoryJobQueue {
    heap: Mutex<BinaryHeap<QueuedMessage>>,
    dead: Mutex<Vec<DeadLetter>>,
    seq: AtomicU64,
    max_attempts: u32,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            dead: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Serialize and enqueue a job.
    pub fn publish(&self, job: &IndexingJob) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        self.publish_raw(payload, job.priority);
        Ok(())
    }

    /// Enqueue a raw payload, as a broker would accept it.
    pub fn publish_raw(&self, payload: String, priority: u8) {
        let message = QueuedMessage {
            payload,
            priority: priority.min(10),
            attempts: 0,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
        };
        self.heap.lock().push(message);
    }

    /// Next message in priority order, or None when the queue is drained.
    pub fn dequeue(&self) -> Option<QueuedMessage> {
        self.heap.lock().pop()
    }

    /// Positive acknowledgment: the message is done and dropped.
    pub fn ack(&self, _message: QueuedMessage) {}

    /// Negative acknowledgment. With `requeue` the message is redelivered
    /// until the attempt budget runs out; without it (or past the budget) it
    /// goes to the dead-letter sink.
    pub fn nack(&self, mut message: QueuedMessage, requeue: bool, reason: &str) {
        message.attempts += 1;
        if requeue && message.attempts < self.max_attempts {
            tracing::warn!(
                attempts = message.attempts,
                reason,
                "requeueing failed message"
            );
            self.heap.lock().push(message);
        } else {
            tracing::warn!(reason, "dead-lettering message");
            self.dead.lock().push(DeadLetter {
                payload: message.payload,
                reason: reason.to_string(),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().clone()
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// Consumes indexing jobs and drives the pipeline.
///
/// The working directory for a job is `repos_path/<repo_name>`, populated by
/// an external acquire step. Malformed payloads are dead-lettered without
/// requeue; processing failures are requeued up to the queue's attempt
/// budget.
pub struct IndexingWorker {
    queue: Arc<InMemoryJobQueue>,
    pipeline: Arc<IndexingPipeline>,
    repos_path: PathBuf,
}

impl IndexingWorker {
    pub fn new(
        queue: Arc<InMemoryJobQueue>,
        pipeline: Arc<IndexingPipeline>,
        repos_path: PathBuf,
    ) -> Self {
        Self {
            queue,
            pipeline,
            repos_path,
        }
    }

    /// Process a single message. Returns false when the queue was empty.
    pub fn run_once(&self) -> bool {
        let Some(message) = self.queue.dequeue() else {
            return false;
        };

        let job: IndexingJob = match serde_json::from_str(&message.payload) {
            Ok(job) => job,
            Err(e) => {
                let err = Error::MalformedJob {
                    message: e.to_string(),
                };
                tracing::error!(error = %err, "rejecting malformed job");
                self.queue.nack(message, false, &err.to_string());
                return true;
            }
        };

        tracing::info!(job_id = %job.id, repo = %job.repo_name, "processing job");
        let report = self.process(&job);
        if report.success {
            tracing::info!(job_id = %job.id, "job completed");
            self.queue.ack(message);
        } else {
            let reason = report.error.unwrap_or_else(|| "indexing failed".to_string());
            self.queue.nack(message, true, &reason);
        }
        true
    }

    /// Drain the queue. Returns the number of messages processed.
    pub fn run_until_empty(&self) -> usize {
        let mut processed = 0;
        while self.run_once() {
            processed += 1;
        }
        processed
    }

    fn process(&self, job: &IndexingJob) -> IndexReport {
        let workdir = self.repos_path.join(&job.repo_name);
        self.pipeline.index_directory(&workdir, &job.repo_name)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::index::{Bm25Index, InMemoryVectorStore, VectorStore};
    use std::fs;

    fn job(repo: &str, priority: u8) -> IndexingJob {
        IndexingJob::new(format!("https://example.com/{}.git", repo), repo)
            .with_priority(priority)
    }

    #[test]
    fn test_priority_ordering() {
        let queue = InMemoryJobQueue::new();
        queue.publish(&job("low", 1)).unwrap();
        queue.publish(&job("high", 9)).unwrap();
        queue.publish(&job("mid", 5)).unwrap();

        let order: Vec<u8> = std::iter::from_fn(|| queue.dequeue())
            .map(|m| m.priority)
            .collect();
        assert_eq!(order, vec![9, 5, 1]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = InMemoryJobQueue::new();
        queue.publish_raw("first".to_string(), 5);
        queue.publish_raw("second".to_string(), 5);

        assert_eq!(queue.dequeue().unwrap().payload, "first");
        assert_eq!(queue.dequeue().unwrap().payload, "second");
    }

    #[test]
    fn test_nack_requeue_bounded() {
        let queue = InMemoryJobQueue::with_max_attempts(2);
        queue.publish_raw("flaky".to_string(), 0);

        let m = queue.dequeue().unwrap();
        queue.nack(m, true, "transient");
        assert_eq!(queue.len(), 1);

        let m = queue.dequeue().unwrap();
        assert_eq!(m.attempts, 1);
        queue.nack(m, true, "transient again");

        assert!(queue.is_empty());
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, "flaky");
    }

    #[test]
    fn test_nack_without_requeue_dead_letters() {
        let queue = InMemoryJobQueue::new();
        queue.publish_raw("bad".to_string(), 0);
        let m = queue.dequeue().unwrap();
        queue.nack(m, false, "malformed");
        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters().len(), 1);
    }

    fn worker_fixture(repos: &std::path::Path, index: &std::path::Path) -> IndexingWorker {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new(8));
        store.create_collection(false).unwrap();
        let bm25 = Arc::new(Bm25Index::new(index));
        let pipeline = Arc::new(IndexingPipeline::new(
            store,
            bm25,
            Arc::new(HashEmbedder::new(8)),
            4,
        ));
        IndexingWorker::new(
            Arc::new(InMemoryJobQueue::new()),
            pipeline,
            repos.to_path_buf(),
        )
    }

    #[test]
    fn test_worker_acks_successful_job() {
        let repos = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        fs::create_dir_all(repos.path().join("demo")).unwrap();
        fs::write(
            repos.path().join("demo/app.py"),
            "def handler():\n    pass\n",
        )
        .unwrap();

        let worker = worker_fixture(repos.path(), index.path());
        worker.queue.publish(&job("demo", 5)).unwrap();

        assert_eq!(worker.run_until_empty(), 1);
        assert!(worker.queue.is_empty());
        assert!(worker.queue.dead_letters().is_empty());
    }

    #[test]
    fn test_worker_dead_letters_malformed_payload() {
        let repos = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let worker = worker_fixture(repos.path(), index.path());

        worker.queue.publish_raw("{not json".to_string(), 0);
        assert!(worker.run_once());

        assert!(worker.queue.is_empty());
        let dead = worker.queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].reason.contains("Malformed"));
    }

    #[test]
    fn test_worker_requeues_then_dead_letters_missing_repo() {
        let repos = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let worker = worker_fixture(repos.path(), index.path());

        // no working directory for this repo, so every attempt fails
        worker.queue.publish(&job("absent", 0)).unwrap();
        let processed = worker.run_until_empty();

        assert_eq!(processed, DEFAULT_MAX_ATTEMPTS as usize);
        assert!(worker.queue.is_empty());
        assert_eq!(worker.queue.dead_letters().len(), 1);
    }
}
