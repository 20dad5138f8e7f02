//! Corpus indexing pipeline.
//!
//! Coordinates the offline phase: corpus scan → extraction → chunking →
//! embedding → storage. Per-document and per-chunk failures are accumulated
//! into an [`IndexSummary`] and reported, never aborting the pass; only
//! configuration problems (bad chunking parameters, missing credentials)
//! are fatal.
//!
//! Embedding batches run concurrently, bounded by
//! `embedding.max_concurrency`; all index writes happen serialized on the
//! ingest task, each batch inside its own transaction, so a crash mid-pass
//! never leaves a vector without its metadata.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::corpus;
use crate::db;
use crate::embedding::{self, Embedder};
use crate::error::{PipelineError, Result};
use crate::extract;
use crate::models::{Chunk, EmbedSummary, IndexFailure, IndexSummary};

/// Ingest the configured corpus folder into the index.
pub async fn run_ingest(config: &Config, limit: Option<usize>) -> Result<IndexSummary> {
    let embedder: Option<Arc<dyn Embedder>> = if config.embedding.is_enabled() {
        Some(Arc::from(embedding::create_embedder(&config.embedding)?))
    } else {
        None
    };
    run_ingest_with(config, embedder, limit).await
}

/// Ingest with an explicit embedder (or none, leaving embeddings pending).
pub async fn run_ingest_with(
    config: &Config,
    embedder: Option<Arc<dyn Embedder>>,
    limit: Option<usize>,
) -> Result<IndexSummary> {
    let pool = db::connect(config).await?;

    let mut files = corpus::scan_corpus(config)?;
    if let Some(lim) = limit {
        files.truncate(lim);
    }

    let mut summary = IndexSummary::default();

    for file in &files {
        let body = match extract::extract_file(&file.path) {
            Ok(body) => body,
            Err(e) => {
                summary.record_document_failure(&file.source_id, e);
                continue;
            }
        };

        let doc_id = upsert_document(&pool, &file.source_id, &file.title, &body).await?;
        let chunks = chunk_document(&doc_id, &body, &config.chunking)?;
        replace_chunks(&pool, &doc_id, &chunks).await?;

        summary.documents_indexed += 1;
        summary.chunks_written += chunks.len() as u64;

        if let Some(ref embedder) = embedder {
            let targets: Vec<EmbedTarget> = chunks
                .iter()
                .map(|c| EmbedTarget::from_chunk(c, &file.source_id))
                .collect();
            let (embedded, failures) = embed_targets(
                &pool,
                embedder,
                config.embedding.batch_size,
                config.embedding.max_concurrency,
                targets,
            )
            .await?;
            summary.chunks_embedded += embedded;
            summary.chunks_failed += failures.len() as u64;
            summary.failures.extend(failures);
        }
    }

    pool.close().await;
    Ok(summary)
}

/// Scan and chunk without writing anything; returns (files, chunks) counts.
pub async fn estimate_ingest(config: &Config, limit: Option<usize>) -> Result<(usize, usize)> {
    let mut files = corpus::scan_corpus(config)?;
    if let Some(lim) = limit {
        files.truncate(lim);
    }

    let mut total_chunks = 0usize;
    for file in &files {
        if let Ok(body) = extract::extract_file(&file.path) {
            total_chunks += chunk_document("estimate", &body, &config.chunking)?.len();
        }
    }

    Ok((files.len(), total_chunks))
}

/// Embed chunks that are missing a vector or whose text changed since they
/// were last embedded.
pub async fn run_embed_pending(config: &Config, limit: Option<usize>) -> Result<EmbedSummary> {
    if !config.embedding.is_enabled() {
        return Err(PipelineError::config(
            "embedding provider is disabled; set [embedding] provider in config",
        ));
    }
    let embedder: Arc<dyn Embedder> = Arc::from(embedding::create_embedder(&config.embedding)?);
    let pool = db::connect(config).await?;

    let pending = find_pending_chunks(&pool, embedder.model_name(), limit).await?;
    let summary = embed_pending_targets(&pool, &embedder, config, pending).await?;

    pool.close().await;
    Ok(summary)
}

/// Delete all vectors and regenerate embeddings for every chunk.
pub async fn run_embed_rebuild(config: &Config) -> Result<EmbedSummary> {
    if !config.embedding.is_enabled() {
        return Err(PipelineError::config(
            "embedding provider is disabled; set [embedding] provider in config",
        ));
    }
    let embedder: Arc<dyn Embedder> = Arc::from(embedding::create_embedder(&config.embedding)?);
    let pool = db::connect(config).await?;

    sqlx::query("DELETE FROM chunk_vectors").execute(&pool).await?;
    sqlx::query("DELETE FROM embeddings").execute(&pool).await?;

    let pending = find_pending_chunks(&pool, embedder.model_name(), None).await?;
    let summary = embed_pending_targets(&pool, &embedder, config, pending).await?;

    pool.close().await;
    Ok(summary)
}

async fn embed_pending_targets(
    pool: &SqlitePool,
    embedder: &Arc<dyn Embedder>,
    config: &Config,
    pending: Vec<EmbedTarget>,
) -> Result<EmbedSummary> {
    let total = pending.len() as u64;
    let (embedded, failures) = embed_targets(
        pool,
        embedder,
        config.embedding.batch_size,
        config.embedding.max_concurrency,
        pending,
    )
    .await?;

    Ok(EmbedSummary {
        pending: total,
        embedded,
        failed: failures.len() as u64,
        failures,
    })
}

async fn upsert_document(
    pool: &SqlitePool,
    source_id: &str,
    title: &str,
    body: &str,
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(body.as_bytes());
    let dedup_hash = format!("{:x}", hasher.finalize());

    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(pool)
            .await?;

    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (id, source_id, title, body, ingested_at, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            ingested_at = excluded.ingested_at,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&doc_id)
    .bind(source_id)
    .bind(title)
    .bind(body)
    .bind(now)
    .bind(&dedup_hash)
    .execute(pool)
    .await?;

    Ok(doc_id)
}

/// Replace a document's chunks (and any dependent vectors) in one
/// transaction. Re-running ingestion can therefore never duplicate a
/// `(document, chunk_index)` entry.
async fn replace_chunks(pool: &SqlitePool, document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// A chunk queued for embedding, carrying enough identity to report a
/// failure against its source document.
#[derive(Debug, Clone)]
struct EmbedTarget {
    chunk_id: String,
    document_id: String,
    source_id: String,
    chunk_index: i64,
    text: String,
    hash: String,
}

impl EmbedTarget {
    fn from_chunk(chunk: &Chunk, source_id: &str) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            source_id: source_id.to_string(),
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            hash: chunk.hash.clone(),
        }
    }
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<EmbedTarget>> {
    let limit_val = limit.unwrap_or(usize::MAX) as i64;

    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.document_id, c.chunk_index, c.text, c.hash, d.source_id
        FROM chunks c
        JOIN documents d ON d.id = c.document_id
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
        WHERE e.chunk_id IS NULL OR e.hash != c.hash
        ORDER BY d.source_id, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| EmbedTarget {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            source_id: row.get("source_id"),
            chunk_index: row.get("chunk_index"),
            text: row.get("text"),
            hash: row.get("hash"),
        })
        .collect())
}

/// Embed targets in batches with bounded concurrency; writes are serialized
/// here, one transaction per batch. A failed batch is recorded per chunk and
/// the pass continues.
async fn embed_targets(
    pool: &SqlitePool,
    embedder: &Arc<dyn Embedder>,
    batch_size: usize,
    max_concurrency: usize,
    targets: Vec<EmbedTarget>,
) -> Result<(u64, Vec<IndexFailure>)> {
    if targets.is_empty() {
        return Ok((0, Vec::new()));
    }

    let batch_size = batch_size.max(1);
    let max_concurrency = max_concurrency.max(1);
    let batches: Vec<Vec<EmbedTarget>> = targets.chunks(batch_size).map(<[_]>::to_vec).collect();

    let mut join_set: JoinSet<(usize, Result<Vec<Vec<f32>>>)> = JoinSet::new();
    let mut outcomes: Vec<(usize, Result<Vec<Vec<f32>>>)> = Vec::with_capacity(batches.len());
    let mut next_batch = 0usize;

    while next_batch < batches.len() || !join_set.is_empty() {
        while next_batch < batches.len() && join_set.len() < max_concurrency {
            let embedder = Arc::clone(embedder);
            let texts: Vec<String> = batches[next_batch].iter().map(|t| t.text.clone()).collect();
            let idx = next_batch;
            join_set.spawn(async move { (idx, embedder.embed_batch(&texts).await) });
            next_batch += 1;
        }

        if let Some(joined) = join_set.join_next().await {
            let outcome = joined.map_err(|e| {
                PipelineError::embedding(format!("embedding task failed: {}", e), false)
            })?;
            outcomes.push(outcome);
        }
    }

    outcomes.sort_by_key(|(idx, _)| *idx);

    let mut embedded = 0u64;
    let mut failures = Vec::new();

    for (idx, result) in outcomes {
        let batch = &batches[idx];
        match result {
            Ok(vectors) => {
                store_batch(pool, embedder.model_name(), embedder.dims(), batch, &vectors).await?;
                embedded += batch.len() as u64;
            }
            Err(e) => {
                for target in batch {
                    failures.push(IndexFailure {
                        source_id: target.source_id.clone(),
                        chunk_index: Some(target.chunk_index),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    Ok((embedded, failures))
}

async fn store_batch(
    pool: &SqlitePool,
    model: &str,
    dims: usize,
    batch: &[EmbedTarget],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    for (target, vector) in batch.iter().zip(vectors.iter()) {
        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dims, hash, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                hash = excluded.hash,
                created_at = excluded.created_at
            "#,
        )
        .bind(&target.chunk_id)
        .bind(model)
        .bind(dims as i64)
        .bind(&target.hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                embedding = excluded.embedding
            "#,
        )
        .bind(&target.chunk_id)
        .bind(&target.document_id)
        .bind(embedding::vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::embedding::testing::HashEmbedder;
    use crate::migrate;
    use std::path::Path;

    fn test_config(root: &Path) -> Config {
        let config: Config = toml::from_str(&format!(
            r#"
            [db]
            path = "{}/data/lexify.sqlite"

            [corpus]
            root = "{}/documents"

            [chunking]
            chunk_size = 60
            overlap = 0
            "#,
            root.display(),
            root.display()
        ))
        .unwrap();
        config::validate(&config).unwrap();
        config
    }

    fn write_corpus(root: &Path) {
        let docs = root.join("documents");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(
            docs.join("labour.txt"),
            "The Payment of Wages Act regulates wage disbursal.\n\n\
             Unauthorized deductions are penalized under section fifteen.",
        )
        .unwrap();
        std::fs::write(
            docs.join("ipc.md"),
            "Section 351 defines assault.\n\nSection 498A covers cruelty by husband.",
        )
        .unwrap();
    }

    async fn chunk_count(config: &Config) -> i64 {
        let pool = db::connect(config).await.unwrap();
        let n = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await
            .unwrap();
        pool.close().await;
        n
    }

    #[tokio::test]
    async fn test_ingest_writes_documents_and_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        write_corpus(tmp.path());
        migrate::run_migrations(&config).await.unwrap();

        let summary = run_ingest_with(&config, None, None).await.unwrap();
        assert_eq!(summary.documents_indexed, 2);
        assert_eq!(summary.documents_failed, 0);
        assert!(summary.chunks_written >= 4);
        assert_eq!(summary.chunks_embedded, 0);
        assert!(!summary.is_partial());
    }

    #[tokio::test]
    async fn test_reingest_does_not_duplicate_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        write_corpus(tmp.path());
        migrate::run_migrations(&config).await.unwrap();

        let first = run_ingest_with(&config, None, None).await.unwrap();
        let count_after_first = chunk_count(&config).await;

        let second = run_ingest_with(&config, None, None).await.unwrap();
        let count_after_second = chunk_count(&config).await;

        assert_eq!(first.chunks_written, second.chunks_written);
        assert_eq!(count_after_first, count_after_second);
    }

    #[tokio::test]
    async fn test_ingest_embeds_with_provider() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        write_corpus(tmp.path());
        migrate::run_migrations(&config).await.unwrap();

        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(8));
        let summary = run_ingest_with(&config, Some(embedder), None)
            .await
            .unwrap();

        assert_eq!(summary.chunks_embedded, summary.chunks_written);
        assert_eq!(summary.chunks_failed, 0);

        let pool = db::connect(&config).await.unwrap();
        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&pool)
            .await
            .unwrap();
        let metadata: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(vectors, summary.chunks_embedded as i64);
        assert_eq!(metadata, vectors);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_failed_embedding_recorded_not_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        write_corpus(tmp.path());
        migrate::run_migrations(&config).await.unwrap();

        let embedder: Arc<dyn Embedder> = Arc::new(crate::embedding::DisabledEmbedder);
        let summary = run_ingest_with(&config, Some(embedder), None)
            .await
            .unwrap();

        assert_eq!(summary.chunks_embedded, 0);
        assert_eq!(summary.chunks_failed, summary.chunks_written);
        assert!(summary.is_partial());
        assert!(summary.failures.iter().all(|f| f.chunk_index.is_some()));
    }

    #[tokio::test]
    async fn test_unreadable_document_skipped_and_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        write_corpus(tmp.path());
        // Not a real PDF; extraction fails, the pass continues.
        std::fs::write(tmp.path().join("documents/broken.pdf"), b"not a pdf").unwrap();
        migrate::run_migrations(&config).await.unwrap();

        let summary = run_ingest_with(&config, None, None).await.unwrap();
        assert_eq!(summary.documents_indexed, 2);
        assert_eq!(summary.documents_failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].source_id, "broken.pdf");
        assert!(summary.failures[0].chunk_index.is_none());
    }

    #[tokio::test]
    async fn test_estimate_matches_real_ingest() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        write_corpus(tmp.path());
        migrate::run_migrations(&config).await.unwrap();

        let (files, chunks) = estimate_ingest(&config, None).await.unwrap();
        let summary = run_ingest_with(&config, None, None).await.unwrap();
        assert_eq!(files as u64, summary.documents_indexed);
        assert_eq!(chunks as u64, summary.chunks_written);
    }
}
