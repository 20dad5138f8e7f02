//! Core data models used throughout Lexify.
//!
//! These types represent the documents, chunks, and answers that flow
//! through the indexing and question-answering pipeline.

/// Normalized corpus document stored in SQLite.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// Path of the source file, relative to the corpus root.
    pub source_id: String,
    pub title: String,
    pub body: String,
    pub ingested_at: i64,
    pub dedup_hash: String,
}

/// A chunk of a document's body text.
///
/// Chunks from the same document, ordered by `chunk_index`, reconstruct the
/// document body modulo the configured overlap. Created once during
/// ingestion, immutable thereafter.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from retrieval, ranked most relevant/diverse first.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f32,
}

/// The four-section structured answer format.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSections {
    pub relevant_laws: String,
    pub legal_reasoning: String,
    pub remedies: String,
    pub conclusion: String,
}

/// A generated answer.
///
/// `grounded` is false exactly when the generator (or the pipeline itself,
/// for empty context) signalled insufficient context with the sentinel
/// "I don't know." — in that case `text` is the sentinel verbatim and
/// `sections` is `None`.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sections: Option<AnswerSections>,
    pub grounded: bool,
}

/// A single failed item from an indexing pass.
#[derive(Debug, Clone)]
pub struct IndexFailure {
    pub source_id: String,
    /// `None` for document-level failures (extraction, chunking).
    pub chunk_index: Option<i64>,
    pub error: String,
}

/// Accumulated result of an indexing pass.
///
/// Indexing never aborts on a per-item failure; everything that went wrong
/// is collected here and reported as a partial-success summary.
#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    pub documents_indexed: u64,
    pub documents_failed: u64,
    pub chunks_written: u64,
    pub chunks_embedded: u64,
    pub chunks_failed: u64,
    pub failures: Vec<IndexFailure>,
}

impl IndexSummary {
    pub fn record_document_failure(&mut self, source_id: &str, error: impl ToString) {
        self.documents_failed += 1;
        self.failures.push(IndexFailure {
            source_id: source_id.to_string(),
            chunk_index: None,
            error: error.to_string(),
        });
    }

    pub fn record_chunk_failure(&mut self, source_id: &str, chunk_index: i64, error: impl ToString) {
        self.chunks_failed += 1;
        self.failures.push(IndexFailure {
            source_id: source_id.to_string(),
            chunk_index: Some(chunk_index),
            error: error.to_string(),
        });
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Result of an embedding backfill or rebuild pass.
#[derive(Debug, Clone, Default)]
pub struct EmbedSummary {
    pub pending: u64,
    pub embedded: u64,
    pub failed: u64,
    pub failures: Vec<IndexFailure>,
}

/// One completed question/answer interaction.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub raw_text: String,
    pub reformulated_text: String,
    pub answer: Answer,
}

/// Caller-owned append log of past interactions for one session.
///
/// Owned explicitly by the UI layer (the `lex chat` loop) and passed where
/// needed — there is no ambient session state.
#[derive(Debug, Default)]
pub struct QueryHistory {
    records: Vec<QueryRecord>,
}

impl QueryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: QueryRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[QueryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
