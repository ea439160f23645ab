//! # RAG Code Assistant CLI (`rca`)
//!
//! ## Usage
//!
//! ```bash
//! rca --config ./config/rca.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rca init` | Create the SQLite index and run schema migrations |
//! | `rca ingest <dir>` | Scan, chunk, embed, and index a source tree |
//! | `rca ask "<question>"` | Answer one question about the indexed code |
//! | `rca chat` | Interactive multi-turn session on stdin |
//! | `rca search "<query>"` | Show the closest chunks with scores |
//! | `rca info` | Model settings and index statistics |
//! | `rca clear-index` | Remove every indexed entry |
//! | `rca health` | Health summary as JSON |
//! | `rca serve` | Start the HTTP API |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rag_code_assistant::app::{App, DEFAULT_SESSION};
use rag_code_assistant::config::{self, Config};
use rag_code_assistant::models::AnswerResponse;
use rag_code_assistant::{db, migrate, server};

/// Retrieval-augmented question answering over a local codebase.
#[derive(Parser)]
#[command(name = "rca", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rca.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index file and its tables. Safe to run repeatedly.
    Init,

    /// Index a directory of source files.
    ///
    /// Unchanged files are skipped by content hash; files deleted since
    /// the last recursive ingest are dropped from the index.
    Ingest {
        /// Directory to scan.
        dir: PathBuf,

        /// Only index the directory's direct children.
        #[arg(long)]
        no_recursive: bool,
    },

    /// Ask a single question.
    Ask {
        question: String,

        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Start an interactive session. Type `clear` to reset history, `exit` to quit.
    Chat {
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Similarity search without calling the language model.
    Search {
        query: String,

        /// Number of results.
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },

    /// Show model settings and index statistics.
    Info {
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Remove every entry from the index.
    ClearIndex,

    /// Print a health summary.
    Health,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_answer(response: &AnswerResponse) {
    println!("{}", response.answer);
    if let Some(err) = &response.error {
        println!("(error: {})", err);
    }
    if !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "  {}. {} (chunk {})",
                i + 1,
                source.metadata.file_path,
                source.metadata.chunk_index
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.index.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Index initialized at {}", cfg.index.path.display());
        }
        Commands::Ingest { dir, no_recursive } => {
            let app = App::from_config(&cfg).await?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupted; finishing the current file...");
                    on_interrupt.cancel();
                }
            });

            let report = app
                .ingest(&dir, !no_recursive, &cancel)
                .await
                .with_context(|| format!("Failed to ingest {}", dir.display()))?;

            println!("{}", report.message);
            println!("  files processed:  {}", report.files_processed);
            println!("  chunks written:   {}", report.documents_created);
            println!("  files unchanged:  {}", report.files_unchanged);
            println!("  files skipped:    {}", report.files_skipped);
            println!("  files failed:     {}", report.files_failed);
            println!("  files removed:    {}", report.files_removed);
        }
        Commands::Ask { question, session } => {
            let app = App::from_config(&cfg).await?;
            let response = app.ask(&question, &session).await?;
            print_answer(&response);
        }
        Commands::Chat { session } => {
            let app = App::from_config(&cfg).await?;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            println!("Ask about your codebase. Type `clear` to reset, `exit` to quit.");

            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                match line {
                    "" => continue,
                    "exit" | "quit" => break,
                    "clear" => {
                        app.clear_history(&session);
                        println!("History cleared.");
                    }
                    question => match app.ask(question, &session).await {
                        Ok(response) => print_answer(&response),
                        Err(e) => println!("{}", e),
                    },
                }
                println!();
            }
        }
        Commands::Search { query, k } => {
            let app = App::from_config(&cfg).await?;
            let hits = app.search(&query, k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let first_line = hit.text.lines().next().unwrap_or_default();
                println!(
                    "{}. [{:.3}] {} #{}",
                    i + 1,
                    hit.score,
                    hit.metadata.file_path,
                    hit.metadata.chunk_index
                );
                println!("    {}", first_line);
            }
        }
        Commands::Info { session } => {
            let app = App::from_config(&cfg).await?;
            let info = app.system_info(&session).await?;
            println!("model:          {}", info.model_name);
            println!("temperature:    {}", info.temperature);
            println!("max tokens:     {}", info.max_tokens);
            println!("collection:     {}", info.index_stats.collection);
            println!("location:       {}", info.index_stats.location);
            println!("entries:        {}", info.index_stats.total_entries);
            println!("files:          {}", info.index_stats.total_files);
            println!("history length: {}", info.conversation_length);
        }
        Commands::ClearIndex => {
            let app = App::from_config(&cfg).await?;
            app.clear_index().await?;
            println!("Index cleared.");
        }
        Commands::Health => {
            let app = App::from_config(&cfg).await?;
            let health = app.health_check().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
