//! Command-line wrapper around the knowledge base
//!
//! Emits a JSON summary on stdout for every successful operation; exit
//! codes map to the error categories so scripts can react to failures.

use recall::llm::build_client;
use recall::store::ReindexProfile;
use recall::{CancelToken, KnowledgeBase, Maintenance, QueryEngine, RagConfig, RagError};
use std::path::PathBuf;
use tracing::error;

const USAGE: &str = "\
recall: personal retrieval-augmented knowledge base

USAGE:
    recall learn-text <text> [source]
    recall learn <path> [path...]
    recall learn-url <url>
    recall ask <question>
    recall ask-filtered <filter-json> <question>
    recall sources
    recall forget <source>
    recall stats
    recall cache-stats
    recall clear-cache
    recall optimize
    recall reindex [small|medium|large|auto]

Configuration comes from RECALL_CONFIG (a json/toml/yaml file) or the
documented environment variables (MODEL_TYPE, EMBEDDING_PROVIDER, ...).";

fn exit_code(err: &RagError) -> i32 {
    match err.category() {
        "input" => 2,
        "loader" => 3,
        "embedding" => 4,
        "storage" | "database" => 5,
        "cache" => 6,
        "llm" => 7,
        "config" => 8,
        "cancelled" => 9,
        _ => 1,
    }
}

fn load_config() -> anyhow::Result<RagConfig> {
    match std::env::var("RECALL_CONFIG") {
        Ok(path) => RagConfig::from_file(path),
        Err(_) => Ok(RagConfig::from_env()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Could not serialize result: {}", e),
    }
}

async fn run(args: Vec<String>) -> recall::Result<()> {
    let config = load_config().map_err(|e| RagError::Config(e.to_string()))?;

    let command = args.first().map(String::as_str).unwrap_or("");
    let kb = KnowledgeBase::open(config).await?;

    match command {
        "learn-text" => {
            let text = args.get(1).ok_or_else(|| {
                RagError::Config("learn-text requires the text argument".to_string())
            })?;
            let summary = kb.learn_text(text, args.get(2).map(String::as_str)).await?;
            print_json(&summary);
        }
        "learn" => {
            if args.len() < 2 {
                return Err(RagError::Config("learn requires at least one path".to_string()));
            }
            let paths: Vec<PathBuf> = args[1..].iter().map(PathBuf::from).collect();

            let cancel = CancelToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c_cancel.cancel();
                }
            });

            let summaries = kb.learn_documents(paths, &cancel).await?;
            print_json(&summaries);
        }
        "learn-url" => {
            let url = args.get(1).ok_or_else(|| {
                RagError::Config("learn-url requires the url argument".to_string())
            })?;
            let summary = kb.learn_from_url(url).await?;
            print_json(&summary);
        }
        "ask" => {
            let question = args.get(1).ok_or_else(|| {
                RagError::Config("ask requires the question argument".to_string())
            })?;
            let engine = QueryEngine::for_knowledge_base(&kb, build_client(&kb.config().llm));
            let answer = engine.ask(question).await?;
            print_json(&answer);
        }
        "ask-filtered" => {
            let filter_raw = args.get(1).ok_or_else(|| {
                RagError::Config("ask-filtered requires the filter argument".to_string())
            })?;
            let question = args.get(2).ok_or_else(|| {
                RagError::Config("ask-filtered requires the question argument".to_string())
            })?;
            let filter: serde_json::Value = serde_json::from_str(filter_raw)?;

            let engine = QueryEngine::for_knowledge_base(&kb, build_client(&kb.config().llm));
            let answer = engine.ask_filtered(question, &filter).await?;
            print_json(&answer);
        }
        "sources" => {
            let sources = kb.sources().await?;
            print_json(&sources);
        }
        "forget" => {
            let source = args.get(1).ok_or_else(|| {
                RagError::Config("forget requires the source argument".to_string())
            })?;
            let removed = kb.forget(source).await?;
            print_json(&serde_json::json!({ "source": source, "chunks_removed": removed }));
        }
        "stats" => {
            let stats = kb.stats().await?;
            print_json(&stats);
        }
        "cache-stats" => {
            let maintenance = Maintenance::new(kb.embeddings(), kb.store());
            print_json(&maintenance.cache_stats());
        }
        "clear-cache" => {
            let maintenance = Maintenance::new(kb.embeddings(), kb.store());
            let report = maintenance.clear_cache()?;
            print_json(&report);
        }
        "optimize" => {
            let maintenance = Maintenance::new(kb.embeddings(), kb.store());
            let report = maintenance.optimize_store().await?;
            print_json(&report);
        }
        "reindex" => {
            let profile = match args.get(1) {
                Some(raw) => ReindexProfile::parse(raw).ok_or_else(|| {
                    RagError::Config(format!("unknown reindex profile: {raw}"))
                })?,
                None => ReindexProfile::Auto,
            };

            let maintenance = Maintenance::new(kb.embeddings(), kb.store());
            let cancel = CancelToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c_cancel.cancel();
                }
            });

            let mut progress = maintenance.reindex_progress();
            let reporter = tokio::spawn(async move {
                while progress.changed().await.is_ok() {
                    let p = progress.borrow().clone();
                    if p.done {
                        break;
                    }
                    eprintln!("reindex: {}/{} (batch {})", p.current, p.total, p.batch_id);
                }
            });

            let report = maintenance.reindex_store(profile, &cancel).await?;
            reporter.abort();
            print_json(&report);
        }
        _ => {
            eprintln!("{USAGE}");
            return Err(RagError::Config("unknown command".to_string()));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("recall=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if let Err(e) = run(args).await {
        error!("{} ({})", e, e.hint());
        std::process::exit(exit_code(&e));
    }
}
