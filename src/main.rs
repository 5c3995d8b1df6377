//! # Knowledge Harness CLI (`kh`)
//!
//! ## Usage
//!
//! ```bash
//! kh --config ./config/kh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kh init` | Create the SQLite database and run schema migrations |
//! | `kh containers` | List containers offered by the source |
//! | `kh import <KEY>...` | Full import of one or more containers |
//! | `kh update` | Incremental sync of every imported container |
//! | `kh search "<query>"` | Nearest documents for a query |
//! | `kh query "<question>"` | Access-filtered answer context for a question |
//! | `kh stats` | Record store and index overview |

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

use knowledge_harness::access::{AccessPolicy, AllowAll, AllowList};
use knowledge_harness::app::Harness;
use knowledge_harness::models::ContainerStatus;
use knowledge_harness::{config, logging, migrate, stats};

/// Knowledge Harness CLI: keep a document store and its vector index in
/// sync with a source, and query it.
#[derive(Parser)]
#[command(
    name = "kh",
    about = "Knowledge Harness: synchronized document store and access-filtered semantic retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List containers offered by the document source.
    Containers {
        /// Show archived containers instead of current ones.
        #[arg(long)]
        archived: bool,
    },

    /// Fully import containers by key.
    ///
    /// Keys the source does not offer as current containers are skipped.
    /// A container with any inaccessible document is not imported at all.
    Import {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Pull updates for every previously imported container.
    Update,

    /// Print the documents nearest to a query, most relevant first.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Build the answer context for a question.
    Query {
        question: String,

        /// Restrict visible documents to these ids. Without it every
        /// document is visible.
        #[arg(long = "allow", value_delimiter = ',')]
        allow: Option<Vec<String>>,

        /// Context budget in characters.
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Show record store and index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let harness = Harness::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Containers { archived } => {
            let status = if archived {
                ContainerStatus::Archived
            } else {
                ContainerStatus::Current
            };
            let containers = harness.source()?.list_containers(status).await?;
            println!("{:<16} NAME", "KEY");
            for c in containers {
                println!("{:<16} {}", c.key, c.name);
            }
        }
        Commands::Import { keys } => {
            let engine = harness.sync_engine()?;
            let available: HashMap<String, String> = engine
                .source()
                .list_containers(ContainerStatus::Current)
                .await?
                .into_iter()
                .map(|c| (c.key, c.name))
                .collect();

            for key in keys {
                let Some(name) = available.get(&key) else {
                    tracing::warn!(container = %key, "unknown container, skipping");
                    eprintln!("Skipping unknown container: {}", key);
                    continue;
                };
                let report = engine.import_container(&key, name).await?;
                println!(
                    "Imported {} ({} documents)",
                    report.container, report.documents
                );
            }
        }
        Commands::Update => {
            let report = harness.sync_engine()?.pull_updates().await?;
            println!("Synced:    {}", report.containers_synced.join(", "));
            println!("Deleted:   {}", report.containers_deleted.join(", "));
            println!("Skipped:   {}", report.containers_skipped.join(", "));
            println!("Upserted:  {} documents", report.documents_upserted);
            println!("Removed:   {} documents", report.documents_deleted);
        }
        Commands::Search { query, limit } => {
            let k = limit.unwrap_or(harness.config.retrieval.context_documents);
            let docs = harness.knowledge.retrieve_relevant(&query, k).await?;
            if docs.is_empty() {
                println!("No results.");
            }
            for (rank, doc) in docs.iter().enumerate() {
                println!(
                    "{}. [{}] {} ({})",
                    rank + 1,
                    doc.container_key,
                    doc.title,
                    doc.id
                );
            }
        }
        Commands::Query {
            question,
            allow,
            budget,
        } => {
            let policy: Box<dyn AccessPolicy> = match allow {
                Some(ids) => Box::new(AllowList::new(ids)),
                None => Box::new(AllowAll),
            };
            let budget = budget.unwrap_or(harness.config.retrieval.context_budget);
            let context = harness
                .knowledge
                .query(&question, policy.as_ref(), budget)
                .await?;
            println!("{}", context);
        }
        Commands::Stats => {
            let collected = stats::collect(&harness.knowledge).await?;
            stats::print_stats(&harness.config, &collected);
        }
    }

    harness.close().await;
    Ok(())
}
