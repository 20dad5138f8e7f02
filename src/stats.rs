use crate::config::Config;
use crate::db;
use crate::error::Result;

/// Counters over the persisted index.
#[derive(Debug, Clone, Copy)]
pub struct IndexStats {
    pub documents: i64,
    pub chunks: i64,
    pub embedded: i64,
    /// Chunks missing a vector or embedded from stale text.
    pub pending: i64,
}

pub async fn collect_stats(config: &Config) -> Result<IndexStats> {
    let pool = db::connect(config).await?;

    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;
    let pending: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id
        WHERE e.chunk_id IS NULL OR e.hash != c.hash
        "#,
    )
    .fetch_one(&pool)
    .await?;

    pool.close().await;
    Ok(IndexStats {
        documents,
        chunks,
        embedded,
        pending,
    })
}
