//! # Lexify CLI (`lex`)
//!
//! The `lex` binary is the thin client over the Lexify pipeline. It provides
//! commands for database initialization, corpus ingestion, embedding
//! management, retrieval inspection, and question answering.
//!
//! ## Usage
//!
//! ```bash
//! lex --config ./config/lexify.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lex init` | Create the SQLite database and run schema migrations |
//! | `lex ingest` | Chunk and embed the corpus folder into the index |
//! | `lex embed pending` | Backfill missing or stale embeddings |
//! | `lex embed rebuild` | Delete and regenerate all embeddings |
//! | `lex search "<query>"` | Inspect retrieval for a query |
//! | `lex ask "<question>"` | Answer one informal legal question |
//! | `lex chat` | Interactive question loop with session history |
//! | `lex get <id>` | Show a document and its chunks |
//! | `lex stats` | Show index counters |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use lexify::models::{EmbedSummary, IndexSummary, QueryHistory, QueryRecord};
use lexify::pipeline::QueryOutcome;
use lexify::{config, db, embedding, generation, get, index, migrate, pipeline, retrieve, stats};

/// Lexify — retrieval-augmented question answering over Indian legal
/// statutes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with the corpus folder, chunking, retrieval, embedding, and
/// generation settings.
#[derive(Parser)]
#[command(
    name = "lex",
    about = "Lexify — retrieval-augmented question answering over Indian legal statutes",
    version,
    long_about = "Lexify ingests a folder of legal documents, chunks and embeds them into a \
    SQLite-backed vector index, and answers informal questions through a two-stage pipeline: \
    query reformulation followed by context-grounded answer generation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lexify.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Ingest the corpus folder into the index.
    ///
    /// Scans the configured folder, extracts text, chunks it, embeds the
    /// chunks (when an embedding provider is configured), and stores
    /// everything. Per-document and per-chunk failures are reported in the
    /// summary without aborting the pass.
    Ingest {
        /// Show file and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of corpus files to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Inspect retrieval for a query (no answer generation).
    Search {
        /// The search query string.
        query: String,

        /// Number of chunks to return.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Answer one informal legal question.
    Ask {
        /// The question, in plain English.
        question: String,

        /// Number of context chunks to retrieve.
        #[arg(short, long)]
        k: Option<usize>,

        /// Also print the retrieved context chunks.
        #[arg(long)]
        show_context: bool,
    },

    /// Interactive question loop. Type `exit` or `quit` to leave.
    Chat {
        /// Number of context chunks to retrieve per question.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Show a document and its chunks, by UUID or corpus-relative path.
    Get {
        /// Document UUID or source path.
        id: String,
    },

    /// Show index counters.
    Stats,
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dry_run, limit } => {
            if dry_run {
                let (files, chunks) = index::estimate_ingest(&cfg, limit).await?;
                println!("ingest corpus (dry-run)");
                println!("  files found: {}", files);
                println!("  estimated chunks: {}", chunks);
            } else {
                let summary = index::run_ingest(&cfg, limit).await?;
                print_index_summary(&cfg, &summary);
            }
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit } => {
                let summary = index::run_embed_pending(&cfg, limit).await?;
                print_embed_summary("embed pending", &summary);
            }
            EmbedAction::Rebuild => {
                let summary = index::run_embed_rebuild(&cfg).await?;
                print_embed_summary("embed rebuild", &summary);
            }
        },
        Commands::Search { query, k } => {
            let k = k.unwrap_or(cfg.retrieval.top_k);
            let embedder = embedding::create_embedder(&cfg.embedding)?;
            let pool = db::connect(&cfg).await?;
            let results =
                retrieve::retrieve(&pool, embedder.as_ref(), &cfg.retrieval, &query, k).await;
            pool.close().await;

            let results = results?;
            if results.is_empty() {
                println!("No results.");
            } else {
                for (i, chunk) in results.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] {} #{}",
                        i + 1,
                        chunk.score,
                        chunk.source_id,
                        chunk.chunk_index
                    );
                    println!("    excerpt: \"{}\"", excerpt(&chunk.text, 160));
                }
            }
        }
        Commands::Ask {
            question,
            k,
            show_context,
        } => {
            let outcome = run_ask(&cfg, &question, k).await?;
            print_outcome(&outcome, show_context);
        }
        Commands::Chat { k } => {
            run_chat(&cfg, k).await?;
        }
        Commands::Get { id } => match get::get_document(&cfg, &id).await? {
            Some(view) => {
                println!("id: {}", view.document.id);
                println!("source: {}", view.document.source_id);
                println!("title: {}", view.document.title);
                println!("chunks: {}", view.chunks.len());
                for chunk in &view.chunks {
                    println!("  #{}: \"{}\"", chunk.chunk_index, excerpt(&chunk.text, 120));
                }
            }
            None => println!("Document not found: {}", id),
        },
        Commands::Stats => {
            let stats = stats::collect_stats(&cfg).await?;
            println!("documents: {}", stats.documents);
            println!("chunks: {}", stats.chunks);
            println!("embedded: {}", stats.embedded);
            println!("pending embeddings: {}", stats.pending);
        }
    }

    Ok(())
}

async fn run_ask(cfg: &config::Config, question: &str, k: Option<usize>) -> Result<QueryOutcome> {
    let k = k.unwrap_or(cfg.retrieval.top_k);
    let embedder = embedding::create_embedder(&cfg.embedding)?;
    let generator = generation::create_generator(&cfg.generation)?;
    let pool = db::connect(cfg).await?;

    let outcome = pipeline::ask(
        &pool,
        embedder.as_ref(),
        generator.as_ref(),
        &cfg.retrieval,
        question,
        k,
    )
    .await;
    pool.close().await;

    Ok(outcome?)
}

async fn run_chat(cfg: &config::Config, k: Option<usize>) -> Result<()> {
    // Session history is owned here, by the UI layer, and nowhere else.
    let mut history = QueryHistory::new();
    let stdin = std::io::stdin();

    loop {
        print!("Ask a legal question: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        // A failed request aborts only itself; the session continues.
        match run_ask(cfg, question, k).await {
            Ok(outcome) => {
                print_outcome(&outcome, false);
                history.push(QueryRecord {
                    raw_text: outcome.raw_text,
                    reformulated_text: outcome.reformulated_text,
                    answer: outcome.answer,
                });
            }
            Err(e) => eprintln!("Error: {}", e),
        }
        println!();
    }

    println!("{} question(s) this session.", history.len());
    Ok(())
}

fn print_outcome(outcome: &QueryOutcome, show_context: bool) {
    println!("Legal interpretation: {}", outcome.reformulated_text);

    if show_context {
        println!();
        println!("Context ({} chunks):", outcome.retrieved.len());
        for chunk in &outcome.retrieved {
            println!(
                "  [{:.3}] {} #{}: \"{}\"",
                chunk.score,
                chunk.source_id,
                chunk.chunk_index,
                excerpt(&chunk.text, 120)
            );
        }
    }

    println!();
    match &outcome.answer.sections {
        Some(sections) => {
            println!("1. Relevant Laws");
            println!("   {}", sections.relevant_laws);
            println!("2. Legal Reasoning");
            println!("   {}", sections.legal_reasoning);
            println!("3. Potential Remedies or Actions");
            println!("   {}", sections.remedies);
            println!("4. Conclusion");
            println!("   {}", sections.conclusion);
        }
        None => println!("{}", outcome.answer.text),
    }

    if !outcome.answer.grounded {
        println!("(the indexed corpus does not cover this question)");
    }
}

fn print_index_summary(cfg: &config::Config, summary: &IndexSummary) {
    println!("ingest corpus");
    println!("  documents indexed: {}", summary.documents_indexed);
    println!("  documents failed: {}", summary.documents_failed);
    println!("  chunks written: {}", summary.chunks_written);
    if cfg.embedding.is_enabled() {
        println!("  chunks embedded: {}", summary.chunks_embedded);
        println!("  chunks failed: {}", summary.chunks_failed);
    }
    print_failures(&summary.failures);
    println!("{}", if summary.is_partial() { "partial" } else { "ok" });
}

fn print_embed_summary(label: &str, summary: &EmbedSummary) {
    println!("{}", label);
    println!("  chunks pending: {}", summary.pending);
    println!("  embedded: {}", summary.embedded);
    println!("  failed: {}", summary.failed);
    print_failures(&summary.failures);
    println!("{}", if summary.failed > 0 { "partial" } else { "ok" });
}

fn print_failures(failures: &[lexify::models::IndexFailure]) {
    const MAX_SHOWN: usize = 20;
    for failure in failures.iter().take(MAX_SHOWN) {
        match failure.chunk_index {
            Some(idx) => println!("  failed {} #{}: {}", failure.source_id, idx, failure.error),
            None => println!("  failed {}: {}", failure.source_id, failure.error),
        }
    }
    if failures.len() > MAX_SHOWN {
        println!("  ... and {} more", failures.len() - MAX_SHOWN);
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        flat.to_string()
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}
