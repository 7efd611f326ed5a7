//! Embedding client for the sidecar embedding service.
//!
//! The model is asymmetric: queries and passages are embedded with
//! different prefixes and are only comparable across roles. Vectors come
//! back L2-normalized.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{RetrievalError, RetrievalResult};

/// Embedding role for the asymmetric model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingRole {
    Query,
    Passage,
}

impl EmbeddingRole {
    pub fn as_prefix(&self) -> &'static str {
        match self {
            EmbeddingRole::Query => "query",
            EmbeddingRole::Passage => "passage",
        }
    }
}

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, role: EmbeddingRole) -> RetrievalResult<Vec<f32>>;

    async fn embed_batch(
        &self,
        texts: &[String],
        role: EmbeddingRole,
    ) -> RetrievalResult<Vec<Vec<f32>>>;

    /// Connectivity check, used at startup. Default: always healthy.
    async fn health(&self) -> RetrievalResult<()> {
        Ok(())
    }
}

/// HTTP client for the embedding sidecar.
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
    batch_size: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    const DEFAULT_BATCH_SIZE: usize = 64;

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RetrievalResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::Embedding(format!("build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch_size: Self::DEFAULT_BATCH_SIZE,
        })
    }

    async fn request_embeddings(
        &self,
        texts: &[String],
        role: EmbeddingRole,
    ) -> RetrievalResult<Vec<Vec<f32>>> {
        let response = self
            .http
            .post(format!("{}/embed", self.base_url))
            .json(&serde_json::json!({
                "texts": texts,
                "prefix": role.as_prefix(),
            }))
            .send()
            .await?
            .error_for_status()?;

        let parsed: EmbedResponse = response.json().await?;
        if parsed.embeddings.len() != texts.len() {
            return Err(RetrievalError::Embedding(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str, role: EmbeddingRole) -> RetrievalResult<Vec<f32>> {
        let mut vectors = self
            .request_embeddings(std::slice::from_ref(&text.to_string()), role)
            .await?;
        vectors
            .pop()
            .ok_or_else(|| RetrievalError::Embedding("empty embedding response".into()))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        role: EmbeddingRole,
    ) -> RetrievalResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            debug!(count = chunk.len(), role = role.as_prefix(), "Embedding batch");
            vectors.extend(self.request_embeddings(chunk, role).await?);
        }
        Ok(vectors)
    }

    async fn health(&self) -> RetrievalResult<()> {
        self.http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Cosine similarity between two vectors.
///
/// Sidecar vectors are L2-normalized so this is effectively a dot product,
/// but unnormalized input is handled (zero vectors score 0).
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
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
