//! Retrieval store: one record per indexed tool, with vector KNN and
//! lexical search.

mod memory;
mod redis;

use async_trait::async_trait;

pub use self::redis::RedisStore;
pub use memory::MemoryStore;

use crate::{error::RetrievalResult, record::ToolRecord};

/// Vector/lexical index over tool records.
///
/// KNN distances are cosine distances; callers convert to similarity as
/// `1 - distance`. Lexical scores are raw (unnormalized) relevance scores.
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    async fn upsert(&self, records: Vec<ToolRecord>) -> RetrievalResult<()>;

    /// Look up a single record by its unique `(server_id, name)` pair.
    async fn fetch(&self, server_id: &str, name: &str) -> RetrievalResult<Option<ToolRecord>>;

    /// K nearest neighbors by cosine distance, optionally restricted to one
    /// backend. Results are ordered by ascending distance.
    async fn knn_search(
        &self,
        vector: &[f32],
        k: usize,
        server_filter: Option<&str>,
    ) -> RetrievalResult<Vec<(ToolRecord, f32)>>;

    /// Lexical matches ordered by descending raw score.
    async fn text_search(
        &self,
        query: &str,
        server_filter: Option<&str>,
    ) -> RetrievalResult<Vec<(ToolRecord, f32)>>;

    async fn count(&self) -> RetrievalResult<usize>;

    async fn clear(&self) -> RetrievalResult<()>;
}

/// Split text into lowercase alphanumeric terms.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| term.to_string())
        .collect()
}
