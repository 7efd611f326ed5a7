//! Hybrid search: lexical and vector similarity fused into one ranking.

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    embedding::{Embedder, EmbeddingRole},
    error::RetrievalResult,
    record::{SearchCandidate, ToolRecord},
    store::RetrievalStore,
};

/// Default fusion weights: lexical 0.3, vector 0.7.
pub const DEFAULT_LEXICAL_WEIGHT: f32 = 0.3;
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.7;

/// How many lexical hits to consider relative to `top_k`.
const LEXICAL_FANOUT: usize = 4;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub min_score: f32,
    pub server_filter: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 8,
            min_score: 0.25,
            server_filter: None,
        }
    }
}

pub struct HybridSearchEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn RetrievalStore>,
    lexical_weight: f32,
    vector_weight: f32,
}

struct FusionEntry {
    record: ToolRecord,
    lexical: f32,
    vector: f32,
}

impl HybridSearchEngine {
    /// Build an engine. Weights are normalized to sum to 1; a degenerate
    /// pair falls back to the defaults.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn RetrievalStore>,
        lexical_weight: f32,
        vector_weight: f32,
    ) -> Self {
        let sum = lexical_weight + vector_weight;
        let (lexical_weight, vector_weight) = if sum > f32::EPSILON {
            (lexical_weight / sum, vector_weight / sum)
        } else {
            (DEFAULT_LEXICAL_WEIGHT, DEFAULT_VECTOR_WEIGHT)
        };
        Self {
            embedder,
            store,
            lexical_weight,
            vector_weight,
        }
    }

    pub fn with_defaults(embedder: Arc<dyn Embedder>, store: Arc<dyn RetrievalStore>) -> Self {
        Self::new(embedder, store, DEFAULT_LEXICAL_WEIGHT, DEFAULT_VECTOR_WEIGHT)
    }

    /// Run the fused search.
    ///
    /// Lexical scores are normalized by the top raw hit, vector distances
    /// become `1 - d` similarities, and both sides blend by weight with a
    /// missing side contributing zero. Candidates below `min_score` are
    /// dropped, ties keep insertion order (lexical hits first, vector-only
    /// additions after). Fused scores can nudge past 1.0; callers should
    /// not assume a hard cap.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> RetrievalResult<Vec<SearchCandidate>> {
        if query.trim().is_empty() || options.top_k == 0 {
            return Ok(vec![]);
        }

        let filter = options.server_filter.as_deref();

        // Lexical side. An empty or unbuilt lexical index is a zero
        // contribution, not a failed search.
        let mut lexical_hits = match self.store.text_search(query, filter).await {
            Ok(hits) => hits,
            Err(e) => {
                debug!(error = %e, "Lexical search unavailable, using vector only");
                vec![]
            }
        };
        lexical_hits.truncate(options.top_k * LEXICAL_FANOUT);

        let top_raw = lexical_hits
            .first()
            .map(|(_, score)| *score)
            .filter(|score| *score > 0.0);

        let mut order: Vec<String> = Vec::new();
        let mut entries: HashMap<String, FusionEntry> = HashMap::new();

        for (record, raw) in lexical_hits {
            let key = record.key();
            let normalized = top_raw.map(|top| raw / top).unwrap_or(0.0);
            entries.insert(
                key.clone(),
                FusionEntry {
                    record,
                    lexical: normalized,
                    vector: 0.0,
                },
            );
            order.push(key);
        }

        // Vector side.
        let query_vector = self.embedder.embed(query, EmbeddingRole::Query).await?;
        let neighbors = self
            .store
            .knn_search(&query_vector, options.top_k * 2, filter)
            .await?;

        for (record, distance) in neighbors {
            let similarity = 1.0 - distance;
            let key = record.key();
            match entries.get_mut(&key) {
                Some(entry) => entry.vector = similarity,
                None => {
                    entries.insert(
                        key.clone(),
                        FusionEntry {
                            record,
                            lexical: 0.0,
                            vector: similarity,
                        },
                    );
                    order.push(key);
                }
            }
        }

        let mut candidates: Vec<SearchCandidate> = order
            .into_iter()
            .filter_map(|key| entries.remove(&key))
            .map(|entry| {
                let fused =
                    self.lexical_weight * entry.lexical + self.vector_weight * entry.vector;
                SearchCandidate::new(entry.record, fused)
            })
            .filter(|candidate| candidate.score >= options.min_score)
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(options.top_k);

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        embedding::EmbeddingRole,
        error::{RetrievalError, RetrievalResult},
        store::MemoryStore,
    };

    /// Embedder with a fixed text -> vector table.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    impl TableEmbedder {
        fn new(pairs: &[(&str, Vec<f32>)]) -> Arc<Self> {
            Arc::new(Self {
                table: pairs
                    .iter()
                    .map(|(text, vec)| (text.to_string(), vec.clone()))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str, _role: EmbeddingRole) -> RetrievalResult<Vec<f32>> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| RetrievalError::Embedding(format!("no vector for '{}'", text)))
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            role: EmbeddingRole,
        ) -> RetrievalResult<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text, role).await?);
            }
            Ok(out)
        }
    }

    fn record(server: &str, name: &str, description: &str, vector: Vec<f32>) -> ToolRecord {
        ToolRecord {
            id: 0,
            server_id: server.into(),
            endpoint: None,
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object"}),
            vector,
            domain: None,
            cluster_id: None,
            keywords: vec![],
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(vec![
                record(
                    "serena",
                    "find_symbol",
                    "Find symbols in code",
                    vec![1.0, 0.0],
                ),
                record(
                    "github",
                    "search_code",
                    "Search for code across repositories",
                    vec![0.2, 0.98],
                ),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_semantic_overlap_ranks_first() {
        // Query vector close to find_symbol's vector; lexical overlap on
        // "find" reinforces it.
        let store = seeded_store().await;
        let embedder = TableEmbedder::new(&[("find a function definition", vec![0.95, 0.3])]);
        let engine = HybridSearchEngine::with_defaults(embedder, store);

        let results = engine
            .search(
                "find a function definition",
                &SearchOptions {
                    top_k: 5,
                    min_score: 0.25,
                    server_filter: None,
                },
            )
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].record.name, "find_symbol");
        for candidate in &results {
            assert!(candidate.score >= 0.25);
        }
    }

    #[tokio::test]
    async fn test_min_score_filters_and_top_k_truncates() {
        let store = seeded_store().await;
        let embedder = TableEmbedder::new(&[("anything", vec![1.0, 0.0])]);
        let engine = HybridSearchEngine::with_defaults(embedder, store);

        let strict = engine
            .search(
                "anything",
                &SearchOptions {
                    top_k: 5,
                    min_score: 0.69,
                    server_filter: None,
                },
            )
            .await
            .unwrap();
        // Only the perfectly aligned record passes 0.7 * similarity.
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].record.name, "find_symbol");

        let capped = engine
            .search(
                "anything",
                &SearchOptions {
                    top_k: 1,
                    min_score: 0.0,
                    server_filter: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_vector_only_when_no_lexical_overlap() {
        let store = seeded_store().await;
        let embedder = TableEmbedder::new(&[("locate definitions", vec![1.0, 0.0])]);
        let engine = HybridSearchEngine::with_defaults(embedder, store);

        let results = engine
            .search(
                "locate definitions",
                &SearchOptions {
                    top_k: 5,
                    min_score: 0.1,
                    server_filter: None,
                },
            )
            .await
            .unwrap();

        // Pure vector score: 0.7 * 1.0 for find_symbol.
        assert_eq!(results[0].record.name, "find_symbol");
        assert!((results[0].score - 0.7).abs() < 0.05);
    }

    #[tokio::test]
    async fn test_empty_query_and_zero_limit() {
        let store = seeded_store().await;
        let embedder = TableEmbedder::new(&[]);
        let engine = HybridSearchEngine::with_defaults(embedder, store);

        assert!(engine
            .search("", &SearchOptions::default())
            .await
            .unwrap()
            .is_empty());
        assert!(engine
            .search(
                "find",
                &SearchOptions {
                    top_k: 0,
                    min_score: 0.0,
                    server_filter: None,
                },
            )
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_weights_are_normalized() {
        let store = seeded_store().await;
        let embedder = TableEmbedder::new(&[("anything", vec![1.0, 0.0])]);
        // 3.0 / 7.0 normalizes back to 0.3 / 0.7.
        let engine = HybridSearchEngine::new(embedder, store, 3.0, 7.0);

        let results = engine
            .search(
                "anything",
                &SearchOptions {
                    top_k: 5,
                    min_score: 0.0,
                    server_filter: None,
                },
            )
            .await
            .unwrap();

        // Vector-only candidate: weight must be 0.7, not 7.0.
        let top = &results[0];
        assert!(top.score <= 1.05);
    }

    #[tokio::test]
    async fn test_server_filter_restricts_results() {
        let store = seeded_store().await;
        let embedder = TableEmbedder::new(&[("code", vec![0.5, 0.5])]);
        let engine = HybridSearchEngine::with_defaults(embedder, store);

        let results = engine
            .search(
                "code",
                &SearchOptions {
                    top_k: 5,
                    min_score: 0.0,
                    server_filter: Some("github".into()),
                },
            )
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert!(results.iter().all(|c| c.record.server_id == "github"));
    }
}
