//! Query-time retrieval: similarity search with diversity re-ranking.
//!
//! The query is embedded, every stored vector is cosine-scored against it,
//! and a candidate pool of at least `2 × k` chunks is re-ranked with maximal
//! marginal relevance before the top `min(k, pool)` are returned. Retrieval
//! is strictly read-only.

use sqlx::{Row, SqlitePool};

use crate::config::RetrievalConfig;
use crate::embedding::{blob_to_vec, cosine_similarity, Embedder};
use crate::error::{PipelineError, Result};
use crate::models::RetrievedChunk;

struct Candidate {
    chunk: RetrievedChunk,
    vector: Vec<f32>,
}

/// Retrieve at most `k` chunks for `query`, most relevant/diverse first.
///
/// `k = 0` and an empty index both return an empty sequence without
/// touching the embedding service.
pub async fn retrieve(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    retrieval: &RetrievalConfig,
    query: &str,
    k: usize,
) -> Result<Vec<RetrievedChunk>> {
    if k == 0 {
        return Ok(Vec::new());
    }

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;
    if stored == 0 {
        return Ok(Vec::new());
    }

    let query_vec = embedder.embed(query).await?;

    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding,
               c.chunk_index, c.text, d.source_id
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        JOIN documents d ON d.id = cv.document_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut candidates = Vec::with_capacity(rows.len());
    for row in &rows {
        let chunk_id: String = row.get("chunk_id");
        let blob: Vec<u8> = row.get("embedding");
        let vector = blob_to_vec(&blob);

        if vector.len() != query_vec.len() {
            return Err(PipelineError::index(format!(
                "stored vector for chunk {} has {} dims but the query has {}; \
                 the index was built with a different model — run `lex embed rebuild`",
                chunk_id,
                vector.len(),
                query_vec.len()
            )));
        }

        let score = cosine_similarity(&query_vec, &vector);
        candidates.push(Candidate {
            chunk: RetrievedChunk {
                chunk_id,
                document_id: row.get("document_id"),
                source_id: row.get("source_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                score,
            },
            vector,
        });
    }

    // Relevance order with a stable tie-break that survives reindexing
    // (chunk ids change on reindex; source identity does not).
    candidates.sort_by(|a, b| {
        b.chunk
            .score
            .partial_cmp(&a.chunk.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.source_id.cmp(&b.chunk.source_id))
            .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });

    let pool_size = retrieval.fetch_k.max(2 * k);
    candidates.truncate(pool_size);

    Ok(mmr_select(candidates, k, retrieval.mmr_lambda))
}

/// Maximal marginal relevance: iteratively pick the candidate maximizing
/// `λ·relevance − (1−λ)·max similarity to the already-selected set`.
///
/// Candidates must arrive sorted by relevance; ties keep that order, so
/// selection is deterministic. Returns `min(k, candidates)` chunks.
fn mmr_select(candidates: Vec<Candidate>, k: usize, lambda: f32) -> Vec<RetrievedChunk> {
    let mut remaining = candidates;
    let mut selected: Vec<Candidate> = Vec::new();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (i, cand) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|s| cosine_similarity(&cand.vector, &s.vector))
                .fold(0.0f32, f32::max);
            let score = lambda * cand.chunk.score - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_idx = i;
            }
        }

        selected.push(remaining.remove(best_idx));
    }

    selected.into_iter().map(|c| c.chunk).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::db;
    use crate::embedding::testing::HashEmbedder;
    use crate::embedding::{vec_to_blob, DisabledEmbedder};
    use crate::index;
    use crate::migrate;
    use std::path::Path;
    use std::sync::Arc;

    fn candidate(id: &str, vector: Vec<f32>, relevance: f32) -> Candidate {
        Candidate {
            chunk: RetrievedChunk {
                chunk_id: id.to_string(),
                document_id: "d".to_string(),
                source_id: format!("{}.txt", id),
                chunk_index: 0,
                text: id.to_string(),
                score: relevance,
            },
            vector,
        }
    }

    #[test]
    fn test_mmr_prefers_diverse_over_near_duplicate() {
        // b is a near-duplicate of a; with diversity weighted high, the
        // orthogonal c wins the second slot despite lower relevance.
        let candidates = vec![
            candidate("a", vec![1.0, 0.0], 1.0),
            candidate("b", vec![0.999, 0.045], 0.999),
            candidate("c", vec![0.6, 0.8], 0.6),
        ];
        let picked = mmr_select(candidates, 2, 0.3);
        let ids: Vec<&str> = picked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_mmr_lambda_one_is_pure_relevance() {
        let candidates = vec![
            candidate("a", vec![1.0, 0.0], 1.0),
            candidate("b", vec![0.999, 0.045], 0.999),
            candidate("c", vec![0.6, 0.8], 0.6),
        ];
        let picked = mmr_select(candidates, 3, 1.0);
        let ids: Vec<&str> = picked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_mmr_returns_min_of_k_and_pool() {
        let candidates = vec![candidate("a", vec![1.0, 0.0], 1.0)];
        assert_eq!(mmr_select(candidates, 5, 0.7).len(), 1);
        assert!(mmr_select(Vec::new(), 5, 0.7).is_empty());
    }

    // ---- end-to-end retrieval over a real index ----

    fn test_config(root: &Path) -> Config {
        let config: Config = toml::from_str(&format!(
            r#"
            [db]
            path = "{}/data/lexify.sqlite"

            [corpus]
            root = "{}/documents"

            [chunking]
            chunk_size = 80
            overlap = 0
            "#,
            root.display(),
            root.display()
        ))
        .unwrap();
        config::validate(&config).unwrap();
        config
    }

    async fn indexed_fixture(root: &Path, files: &[(&str, &str)]) -> Config {
        let config = test_config(root);
        let docs = root.join("documents");
        std::fs::create_dir_all(&docs).unwrap();
        for (name, body) in files {
            std::fs::write(docs.join(name), body).unwrap();
        }
        migrate::run_migrations(&config).await.unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(8));
        index::run_ingest_with(&config, Some(embedder), None)
            .await
            .unwrap();
        config
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty_without_embedding() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();

        // DisabledEmbedder errors on any call; an empty result proves the
        // embedder was never consulted.
        let results = retrieve(&pool, &DisabledEmbedder, &config.retrieval, "wages", 5)
            .await
            .unwrap();
        assert!(results.is_empty());
        pool.close().await;
    }

    #[tokio::test]
    async fn test_k_zero_returns_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config =
            indexed_fixture(tmp.path(), &[("one.txt", "A single chunk of text.")]).await;
        let pool = db::connect(&config).await.unwrap();

        let results = retrieve(&pool, &DisabledEmbedder, &config.retrieval, "anything", 0)
            .await
            .unwrap();
        assert!(results.is_empty());
        pool.close().await;
    }

    #[tokio::test]
    async fn test_single_chunk_returned_for_any_query() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config =
            indexed_fixture(tmp.path(), &[("one.txt", "A single chunk of text.")]).await;
        let pool = db::connect(&config).await.unwrap();
        let embedder = HashEmbedder::new(8);

        let results = retrieve(&pool, &embedder, &config.retrieval, "test", 3)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "A single chunk of text.");
        assert_eq!(results[0].source_id, "one.txt");
        pool.close().await;
    }

    #[tokio::test]
    async fn test_reindex_is_rank_stable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let files = [
            ("labour.txt", "Wages must be paid before the seventh day of the month."),
            ("ipc.txt", "Assault is punishable under section 351 of the code."),
            ("consumer.txt", "A defective product may be returned for a refund."),
        ];
        let config = indexed_fixture(tmp.path(), &files).await;
        let embedder = HashEmbedder::new(8);

        let pool = db::connect(&config).await.unwrap();
        let first = retrieve(&pool, &embedder, &config.retrieval, "unpaid wages", 3)
            .await
            .unwrap();
        pool.close().await;

        // Full re-ingest: new chunk ids, same content.
        let arc: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(8));
        index::run_ingest_with(&config, Some(arc), None).await.unwrap();

        let pool = db::connect(&config).await.unwrap();
        let second = retrieve(&pool, &embedder, &config.retrieval, "unpaid wages", 3)
            .await
            .unwrap();
        pool.close().await;

        let first_keys: Vec<(String, i64)> = first
            .iter()
            .map(|c| (c.source_id.clone(), c.chunk_index))
            .collect();
        let second_keys: Vec<(String, i64)> = second
            .iter()
            .map(|c| (c.source_id.clone(), c.chunk_index))
            .collect();
        assert_eq!(first_keys, second_keys);
    }

    #[tokio::test]
    async fn test_dims_mismatch_is_index_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config =
            indexed_fixture(tmp.path(), &[("one.txt", "A single chunk of text.")]).await;
        let pool = db::connect(&config).await.unwrap();

        // Corrupt the stored vector: wrong dimensionality.
        sqlx::query("UPDATE chunk_vectors SET embedding = ?")
            .bind(vec_to_blob(&[1.0, 2.0]))
            .execute(&pool)
            .await
            .unwrap();

        let embedder = HashEmbedder::new(8);
        let err = retrieve(&pool, &embedder, &config.retrieval, "test", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Index(_)));
        pool.close().await;
    }
}
