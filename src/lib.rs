//! # Lexify
//!
//! Retrieval-augmented question answering over a corpus of Indian legal
//! documents (IPC, CrPC, Labour Law, and related statutes).
//!
//! Lexify ingests a folder of statute files, chunks and embeds them into a
//! SQLite-backed vector index, and answers informal questions through a
//! two-stage pipeline: the question is first reformulated into a formal
//! legal query, then the retrieved context and reformulated query produce
//! one structured, grounded answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────┐
//! │  Corpus   │──▶│   Pipeline    │──▶│  SQLite   │
//! │ PDF/text │   │ Chunk + Embed │   │  vectors  │
//! └──────────┘   └───────────────┘   └─────┬─────┘
//!                                          │ retrieval (MMR)
//!             question ──▶ reformulate ────┴──▶ grounded answer
//! ```
//!
//! ## Quick start
//!
//! ```bash
//! lex init                        # create the database
//! lex ingest                      # chunk + embed the corpus folder
//! lex ask "Can my boss reduce my salary randomly?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed pipeline error kinds |
//! | [`models`] | Core data types |
//! | [`chunk`] | Separator-priority text chunking with overlap |
//! | [`extract`] | PDF and plain-text extraction |
//! | [`corpus`] | Corpus folder scanning |
//! | [`embedding`] | Embedding provider abstraction and vector utilities |
//! | [`generation`] | Generative-model abstraction |
//! | [`prompt`] | Prompt templates and rendering |
//! | [`index`] | Corpus indexing and embedding backfill |
//! | [`retrieve`] | Similarity search with MMR re-ranking |
//! | [`pipeline`] | Reformulate → retrieve → answer orchestration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod get;
pub mod index;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod retrieve;
pub mod retry;
pub mod stats;
