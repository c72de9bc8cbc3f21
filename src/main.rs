//! # docchat CLI
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Create the SQLite database and schema |
//! | `docchat submit --tenant <id> <file>` | Store an upload as a pending document |
//! | `docchat ingest <document-id>` | Process one pending document |
//! | `docchat ingest-pending` | Process pending documents concurrently |
//! | `docchat ask --tenant <id> "<question>"` | Answer a question from the tenant's documents |
//! | `docchat usage --tenant <id>` | Show the tenant's usage ledger for a day |
//! | `docchat delete-document --tenant <id> <document-id>` | Remove a document and its passages |
//! | `docchat models` | List models installed in the local Ollama |
//! | `docchat check "<question>"` | Run the injection guard on a question |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use docchat::answer::AnswerService;
use docchat::config::{self, Config};
use docchat::embedding::{list_local_models, EmbeddingRouter};
use docchat::generation::GenerationRouter;
use docchat::ingest::{self, IngestOutcome};
use docchat::sqlite_store::SqliteStore;
use docchat::upstream::normalize_failure;
use docchat::{db, governor, migrate, upload};
use docchat_core::guard::{GuardVerdict, InjectionGuard};
use docchat_core::models::Tenant;
use docchat_core::store::Store;

/// docchat: answer questions from a tenant's own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(name = "docchat", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init {
        /// Also create this tenant with default settings if it does not exist.
        #[arg(long)]
        tenant: Option<String>,
        /// Display name for `--tenant`.
        #[arg(long, requires = "tenant")]
        name: Option<String>,
    },

    /// Copy a file into the upload directory and queue it for ingestion.
    Submit {
        #[arg(long)]
        tenant: String,
        file: PathBuf,
        /// Name to record instead of the file name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Ingest one pending document.
    Ingest { document_id: String },

    /// Ingest pending documents.
    IngestPending {
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },

    /// Ask a question as a visitor of the tenant's chat widget.
    Ask {
        #[arg(long)]
        tenant: String,
        question: String,
        /// Print the answer record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the usage ledger row for a day (default: today, UTC).
    Usage {
        #[arg(long)]
        tenant: String,
        /// Day as YYYY-MM-DD.
        #[arg(long)]
        day: Option<String>,
    },

    /// Delete a document, its passages and its stored file.
    DeleteDocument {
        #[arg(long)]
        tenant: String,
        document_id: String,
    },

    /// List models installed in the local Ollama.
    Models,

    /// Run the injection guard on a question without answering it.
    Check { question: String },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn Store>> {
    let pool = db::connect(cfg).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Check { question } = &cli.command {
        let guard = InjectionGuard::new()?;
        match guard.check(question) {
            GuardVerdict::Pass => println!("pass"),
            GuardVerdict::Reject { category, reason } => println!("reject ({category}): {reason}"),
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { tenant, name } => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
            if let Some(id) = tenant {
                let store = open_store(&cfg).await?;
                if store.get_tenant(&id).await?.is_some() {
                    println!("Tenant {id} already exists.");
                } else {
                    let display = name.unwrap_or_else(|| id.clone());
                    store.create_tenant(&Tenant::new(id.as_str(), display)).await?;
                    println!("Tenant {id} created.");
                }
            }
        }
        Commands::Submit { tenant, file, name } => {
            let store = open_store(&cfg).await?;
            let doc = upload::submit_document(store.as_ref(), &cfg, &tenant, &file, name.as_deref())
                .await?;
            println!("{}  {}  {} bytes  pending", doc.id, doc.name, doc.size_bytes);
        }
        Commands::Ingest { document_id } => {
            let store = open_store(&cfg).await?;
            let embedder = EmbeddingRouter::new(&cfg.embedding)?;
            match ingest::ingest_document(store.as_ref(), &embedder, &cfg, &document_id).await? {
                IngestOutcome::Done { chunks } => println!("done: {chunks} chunks"),
                IngestOutcome::Failed { error } => println!("error: {error}"),
                IngestOutcome::Skipped => println!("skipped: document is not pending"),
            }
        }
        Commands::IngestPending { limit, concurrency } => {
            let store = open_store(&cfg).await?;
            let embedder = Arc::new(EmbeddingRouter::new(&cfg.embedding)?);
            let summary =
                ingest::ingest_pending(store, embedder, Arc::new(cfg), limit, concurrency).await?;
            println!("ingest pending");
            println!("  done: {}", summary.done);
            println!("  failed: {}", summary.failed);
            println!("  skipped: {}", summary.skipped);
            println!("  chunks written: {}", summary.chunks);
        }
        Commands::Ask {
            tenant,
            question,
            json,
        } => {
            let store = open_store(&cfg).await?;
            let service = AnswerService::new(
                store,
                Arc::new(EmbeddingRouter::new(&cfg.embedding)?),
                Arc::new(GenerationRouter::new(&cfg.generation)?),
                &cfg,
            )?;
            let answer = service.ask(&tenant, &question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.text);
                if !answer.sources.is_empty() {
                    println!();
                    for (i, source) in answer.sources.iter().enumerate() {
                        println!("[{}] {} ({})", i + 1, source.document_name, source.passage_id);
                    }
                }
                println!();
                println!(
                    "tokens: {} in / {} out, cost: ${:.6}, corpus: {}",
                    answer.usage.input, answer.usage.output, answer.cost_usd, answer.corpus_mode
                );
            }
        }
        Commands::Usage { tenant, day } => {
            let day = match day {
                Some(d) => NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .with_context(|| format!("invalid day '{d}', expected YYYY-MM-DD"))?,
                None => governor::today(),
            };
            let store = open_store(&cfg).await?;
            match store.usage_for_day(&tenant, day).await? {
                Some(row) => {
                    println!("usage {} {}", tenant, day);
                    println!("  queries: {}", row.query_count);
                    println!("  input tokens: {}", row.input_tokens);
                    println!("  output tokens: {}", row.output_tokens);
                    println!("  embedding tokens: {}", row.embedding_tokens);
                    println!("  cost: ${:.6}", row.cost_usd);
                }
                None => println!("No usage recorded for {tenant} on {day}."),
            }
        }
        Commands::DeleteDocument {
            tenant,
            document_id,
        } => {
            let store = open_store(&cfg).await?;
            let doc = upload::delete_document(store.as_ref(), &cfg, &tenant, &document_id).await?;
            println!("Deleted {} ({}).", doc.id, doc.name);
        }
        Commands::Models => {
            let timeout = Duration::from_secs(cfg.embedding.metadata_timeout_secs);
            match list_local_models(&cfg.embedding.ollama_url, timeout).await {
                Ok(models) if models.is_empty() => println!("No local models installed."),
                Ok(models) => {
                    for model in models {
                        println!("ollama:{model}");
                    }
                }
                Err(failure) => {
                    let err = normalize_failure("ollama", failure);
                    eprintln!("warning: cannot list local models: {err}");
                }
            }
        }
        Commands::Check { .. } => {}
    }

    Ok(())
}
