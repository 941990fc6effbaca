use clap::{Parser, Subcommand};
use coderank::config::Config;
use coderank::embed::{Embedder, FastEmbedder, HashEmbedder};
use coderank::index::{Bm25Index, QdrantStore, VectorStore};
use coderank::models::{EntityKind, IndexingJob, Language, SearchQuery};
use coderank::pipeline::{repo_name_from_url, IndexingPipeline};
use coderank::queue::{InMemoryJobQueue, IndexingWorker};
use coderank::search::HybridSearchEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coderank", version, about = "Hybrid semantic code search")]
struct Cli {
    /// Use the deterministic hash embedder instead of a local model
    #[arg(long, global = true)]
    hash_embedding: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a local source tree
    Index {
        /// Directory to index
        directory: PathBuf,
        /// Repository name (defaults to the directory basename)
        #[arg(long)]
        repo: Option<String>,
        /// Drop and recreate the vector collection first
        #[arg(long)]
        recreate: bool,
    },
    /// Search indexed entities
    Search {
        /// Natural language query
        query: String,
        #[arg(long, default_value_t = coderank::config::DEFAULT_LIMIT)]
        limit: usize,
        /// Filter by language (python, javascript, typescript, go, rust)
        #[arg(long)]
        language: Option<String>,
        /// Filter by entity type (function, method, class, ...)
        #[arg(long = "type")]
        entity_type: Option<String>,
        /// Filter by repository name
        #[arg(long)]
        repo: Option<String>,
        /// Disable BM25 fusion (semantic only)
        #[arg(long)]
        no_hybrid: bool,
        #[arg(long, default_value_t = coderank::search::weights::DEFAULT_SEMANTIC_WEIGHT)]
        semantic_weight: f32,
        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show index statistics
    Stats,
    /// Drain a batch of indexing jobs from a JSON file
    Worker {
        /// File containing a JSON array of indexing jobs
        #[arg(long)]
        jobs: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    if let Err(e) = run(cli, config) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn make_embedder(config: &Config, hash: bool) -> coderank::Result<Arc<dyn Embedder>> {
    if hash {
        Ok(Arc::new(HashEmbedder::new(config.embedding_dimension)))
    } else {
        Ok(Arc::new(FastEmbedder::new(
            &config.embedding_model,
            config.embedding_dimension,
        )?))
    }
}

fn run(cli: Cli, config: Config) -> coderank::Result<()> {
    let vector_store: Arc<dyn VectorStore> = Arc::new(QdrantStore::new(
        config.vector_url(),
        config.collection.clone(),
        config.embedding_dimension,
    ));
    let bm25 = Arc::new(Bm25Index::new(&config.index_path));

    match cli.command {
        Command::Index {
            directory,
            repo,
            recreate,
        } => {
            let repo_name = repo.unwrap_or_else(|| {
                directory
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "local".to_string())
            });

            vector_store.create_collection(recreate)?;
            bm25.load();

            let embedder = make_embedder(&config, cli.hash_embedding)?;
            let pipeline =
                IndexingPipeline::new(vector_store, bm25, embedder, config.batch_size);
            let report = pipeline.index_directory(&directory, &repo_name);

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                std::process::exit(1);
            }
        }
        Command::Search {
            query,
            limit,
            language,
            entity_type,
            repo,
            no_hybrid,
            semantic_weight,
            json,
        } => {
            let query = query.trim().to_string();
            if query.is_empty() {
                return Err(coderank::Error::InvalidArgument {
                    message: "query must not be empty".to_string(),
                });
            }

            bm25.load();
            let embedder = make_embedder(&config, cli.hash_embedding)?;
            let engine = HybridSearchEngine::new(vector_store, bm25, embedder);

            // unknown filter values are ignored, not errors
            let search_query = SearchQuery {
                query,
                language: language.as_deref().and_then(Language::parse_filter),
                entity_type: entity_type.as_deref().and_then(EntityKind::parse_filter),
                repo_filter: repo,
                limit,
                use_hybrid: !no_hybrid,
                semantic_weight: semantic_weight.clamp(0.0, 1.0),
            };
            let results = engine.search(&search_query);

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for (i, result) in results.iter().enumerate() {
                    let e = &result.entity;
                    println!(
                        "{:2}. {} [{} {}] {}:{}-{} (score {:.4})",
                        i + 1,
                        e.name,
                        e.language.as_str(),
                        e.kind.as_str(),
                        e.file_path,
                        e.start_line,
                        e.end_line,
                        result.score
                    );
                    if let Some(sig) = &e.signature {
                        println!("      {}", sig);
                    }
                }
                if results.is_empty() {
                    println!("no results");
                }
            }
        }
        Command::Stats => {
            bm25.load();
            println!("bm25 entities: {}", bm25.count());
            match vector_store.get_stats() {
                Ok(stats) => println!(
                    "vector points: {} (status: {})",
                    stats.total_points, stats.status
                ),
                Err(e) => println!("vector store unavailable: {}", e),
            }
        }
        Command::Worker { jobs } => {
            let payload = std::fs::read_to_string(&jobs)?;
            let jobs: Vec<IndexingJob> = serde_json::from_str(&payload)?;

            vector_store.create_collection(false)?;
            bm25.load();
            let embedder = make_embedder(&config, cli.hash_embedding)?;
            let pipeline = Arc::new(IndexingPipeline::new(
                vector_store,
                bm25,
                embedder,
                config.batch_size,
            ));

            let queue = Arc::new(InMemoryJobQueue::new());
            for mut job in jobs {
                if job.repo_name.is_empty() {
                    job.repo_name = repo_name_from_url(&job.repo_url);
                }
                queue.publish(&job)?;
            }

            let worker = IndexingWorker::new(
                Arc::clone(&queue),
                pipeline,
                config.repos_path.clone(),
            );
            let processed = worker.run_until_empty();
            println!(
                "processed {} message(s), {} dead-lettered",
                processed,
                queue.dead_letters().len()
            );
        }
    }
    Ok(())
}
