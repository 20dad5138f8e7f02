use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::models::{Chunk, Document};

/// A document with its chunks, for inspection from the CLI.
#[derive(Debug)]
pub struct DocumentView {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

/// Look up a document by UUID or by its corpus-relative source path.
/// Returns `None` if nothing matches.
pub async fn get_document(config: &Config, id: &str) -> Result<Option<DocumentView>> {
    let pool = db::connect(config).await?;

    let row = sqlx::query(
        "SELECT id, source_id, title, body, ingested_at, dedup_hash
         FROM documents WHERE id = ? OR source_id = ?",
    )
    .bind(id)
    .bind(id)
    .fetch_optional(&pool)
    .await?;

    let Some(row) = row else {
        pool.close().await;
        return Ok(None);
    };

    let document = Document {
        id: row.get("id"),
        source_id: row.get("source_id"),
        title: row.get("title"),
        body: row.get("body"),
        ingested_at: row.get("ingested_at"),
        dedup_hash: row.get("dedup_hash"),
    };

    let chunk_rows = sqlx::query(
        "SELECT id, document_id, chunk_index, text, hash
         FROM chunks WHERE document_id = ? ORDER BY chunk_index",
    )
    .bind(&document.id)
    .fetch_all(&pool)
    .await?;

    let chunks = chunk_rows
        .iter()
        .map(|row| Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            chunk_index: row.get("chunk_index"),
            text: row.get("text"),
            hash: row.get("hash"),
        })
        .collect();

    pool.close().await;
    Ok(Some(DocumentView { document, chunks }))
}
