//! # docrag CLI
//!
//! ```bash
//! docrag --config ./config/docrag.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docrag init` | Create the SQLite database and run schema migrations |
//! | `docrag ingest <file> --owner <id>` | Extract, chunk, embed, and index a document |
//! | `docrag ask <doc-id> "<question>" --owner <id>` | Answer a question from a document |
//! | `docrag stats <doc-id> --owner <id>` | Show whether a document is indexed |
//! | `docrag list --owner <id>` | List an owner's indexed documents |
//! | `docrag delete <doc-id> --owner <id>` | Remove a document's index |
//!
//! `OPENAI_API_KEY` must be set for commands that call the embedding or
//! chat service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use docrag::config::{self, Config};
use docrag::embedding::{create_backend, EmbeddingClient};
use docrag::generate::{AnswerGenerator, OpenAiChat};
use docrag::index_sqlite::SqliteIndex;
use docrag::models::ConversationTurn;
use docrag::{db, logging, migrate, RagPipeline};

/// docrag: ask questions about a document.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docrag.example.toml`.
#[derive(Parser)]
#[command(name = "docrag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docrag.toml")]
    config: PathBuf,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init {
        /// Also send a test request to the embedding service.
        #[arg(long)]
        check: bool,
    },

    /// Ingest a TXT, PDF, or DOCX file.
    Ingest {
        file: PathBuf,

        #[arg(long)]
        owner: String,

        /// Document ID to use; a new UUID when omitted. Re-using an ID
        /// replaces that document's index.
        #[arg(long)]
        doc_id: Option<String>,
    },

    /// Ask a question about an ingested document.
    Ask {
        doc_id: String,

        question: String,

        #[arg(long)]
        owner: String,

        /// Earlier turns as alternating user/assistant messages.
        #[arg(long = "turn")]
        turns: Vec<String>,
    },

    /// Delete a document's index.
    Delete {
        doc_id: String,

        #[arg(long)]
        owner: String,
    },

    /// Show indexing status for a document.
    Stats {
        doc_id: String,

        #[arg(long)]
        owner: String,
    },

    /// List the owner's indexed documents.
    List {
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init { check } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
            if check {
                let backend = create_backend(&cfg.embedding)?;
                let client = EmbeddingClient::new(backend, &cfg.embedding);
                client
                    .check()
                    .await
                    .context("embedding service check failed")?;
                println!("Embedding service OK ({})", client.model_name());
            }
        }
        Commands::Ingest {
            file,
            owner,
            doc_id,
        } => {
            let pipeline = build_pipeline(&cfg).await?;
            let report = pipeline
                .ingest_file(&owner, &file, doc_id.as_deref())
                .await?;
            emit(cli.json, &report, || {
                println!(
                    "Ingested {} as {}: {} chunks in {} ms",
                    report.file.filename,
                    report.document_id,
                    report.chunk_count,
                    report.processing_time_ms
                );
            })?;
        }
        Commands::Ask {
            doc_id,
            question,
            owner,
            turns,
        } => {
            let pipeline = build_pipeline(&cfg).await?;
            let history = history_from_turns(&turns);
            let outcome = pipeline
                .query(&owner, &doc_id, &question, &history)
                .await?;
            emit(cli.json, &outcome, || match &outcome.answer {
                Some(answer) => {
                    println!("{answer}");
                    println!();
                    println!(
                        "({} chunks, {} ms)",
                        outcome.found_chunks, outcome.total_time_ms
                    );
                }
                None => println!("No relevant information found in the document."),
            })?;
        }
        Commands::Delete { doc_id, owner } => {
            let pipeline = build_pipeline(&cfg).await?;
            let deleted = pipeline.delete(&owner, &doc_id).await?;
            if deleted {
                println!("Deleted {doc_id}");
            } else {
                println!("No index found for {doc_id}");
            }
        }
        Commands::Stats { doc_id, owner } => {
            let pipeline = build_pipeline(&cfg).await?;
            let stats = pipeline.stats(&owner, &doc_id).await?;
            emit(cli.json, &stats, || {
                println!(
                    "{}: {} ({} chunks)",
                    stats.document_id,
                    if stats.indexed { "indexed" } else { "not indexed" },
                    stats.chunk_count
                );
            })?;
        }
        Commands::List { owner } => {
            let pipeline = build_pipeline(&cfg).await?;
            let documents = pipeline.list_documents(&owner).await?;
            emit(cli.json, &documents, || {
                if documents.is_empty() {
                    println!("No documents.");
                }
                for id in &documents {
                    println!("{id}");
                }
            })?;
        }
    }

    Ok(())
}

async fn build_pipeline(cfg: &Config) -> anyhow::Result<RagPipeline> {
    ensure_db_exists(&cfg.db.path)?;
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let index = Arc::new(SqliteIndex::new(pool));
    let embedder = Arc::new(EmbeddingClient::new(
        create_backend(&cfg.embedding)?,
        &cfg.embedding,
    ));
    let generator = Arc::new(AnswerGenerator::new(
        Arc::new(OpenAiChat::new(&cfg.generation)?),
        &cfg.generation,
    ));
    Ok(RagPipeline::new(index, embedder, generator, cfg)?)
}

fn ensure_db_exists(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!(
            "database not found at {}; run `docrag init` first",
            path.display()
        );
    }
    Ok(())
}

/// `--turn` values alternate user, assistant, user, ...
fn history_from_turns(turns: &[String]) -> Vec<ConversationTurn> {
    turns
        .iter()
        .enumerate()
        .map(|(i, content)| {
            if i % 2 == 0 {
                ConversationTurn::user(content.as_str())
            } else {
                ConversationTurn::assistant(content.as_str())
            }
        })
        .collect()
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce()) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}
