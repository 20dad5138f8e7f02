//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two implementations:
//! - **[`DisabledEmbedder`]** — returns errors; used when embeddings are not
//!   configured.
//! - **[`OpenAiEmbedder`]** — calls an OpenAI-compatible embeddings endpoint
//!   with batching, timeout, and capped exponential backoff.
//!
//! Also provides the vector utilities shared by indexing and retrieval:
//! [`vec_to_blob`], [`blob_to_vec`], and [`cosine_similarity`].
//!
//! # Retry strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → transient, retried
//! - other HTTP 4xx → permanent, fails immediately
//! - network errors → transient, retried

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};
use crate::retry;

/// An external text-to-vector service.
///
/// Stateless and deterministic for a fixed model/version; vectors have a
/// constant dimensionality across the index.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a search query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let vectors = self.embed_batch(&texts).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::embedding("empty embedding response", false))
    }
}

/// Create the appropriate [`Embedder`] for the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        other => Err(PipelineError::config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// A no-op embedder that always returns errors. Used when
/// `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(PipelineError::embedding(
            "embedding provider is disabled; set [embedding] provider in config",
            false,
        ))
    }
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| PipelineError::config("embedding.model required"))?;
        let dims = config
            .dims
            .ok_or_else(|| PipelineError::config("embedding.dims required"))?;

        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            PipelineError::config(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::embedding(e.to_string(), false))?;

        Ok(Self {
            client,
            model,
            dims,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct Response {
            data: Vec<ResponseItem>,
        }

        #[derive(Deserialize)]
        struct ResponseItem {
            index: usize,
            embedding: Vec<f32>,
        }

        let request = Request {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::embedding(format!("request failed: {}", e), true))?;

        let status = response.status();
        if !status.is_success() {
            let transient = status.as_u16() == 429 || status.is_server_error();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::embedding(
                format!("embeddings API error {}: {}", status, api_error_detail(&body)),
                transient,
            ));
        }

        let mut body: Response = response
            .json()
            .await
            .map_err(|e| PipelineError::embedding(format!("invalid response: {}", e), false))?;

        body.data.sort_by_key(|item| item.index);

        if body.data.len() != texts.len() {
            return Err(PipelineError::embedding(
                format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    body.data.len()
                ),
                false,
            ));
        }

        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|item| item.embedding).collect();

        for vec in &vectors {
            if vec.len() != self.dims {
                return Err(PipelineError::embedding(
                    format!(
                        "model returned {}-dim vector, expected {}",
                        vec.len(),
                        self.dims
                    ),
                    false,
                ));
            }
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        retry::with_backoff(self.max_retries, || self.request_embeddings(texts)).await
    }
}

/// Pull the human-readable message out of an OpenAI-style error body
/// (`{"error": {"message": ...}}`), falling back to the raw body.
pub(crate) fn api_error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Encode a float vector as a BLOB of little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not form
/// a whole f32 are ignored; the caller validates dimensionality.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors or
/// mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_api_error_detail_extracts_message() {
        let body = r#"{"error": {"message": "Rate limit reached", "type": "tokens"}}"#;
        assert_eq!(api_error_detail(body), "Rate limit reached");
        assert_eq!(api_error_detail("plain text failure"), "plain text failure");
    }

    #[tokio::test]
    async fn test_disabled_embedder_errors() {
        let err = DisabledEmbedder.embed("anything").await.unwrap_err();
        assert!(matches!(err, PipelineError::Embedding { .. }));
        assert!(!err.is_transient());
    }
}
