//! In-process retrieval store.
//!
//! Brute-force cosine KNN and term-frequency lexical scoring over a map of
//! records. Backs tests and single-process deployments; catalogs are in the
//! hundreds, so linear scans are fine.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{tokenize, RetrievalStore};
use crate::{
    embedding::cosine_similarity,
    error::RetrievalResult,
    record::ToolRecord,
};

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, ToolRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lexical_score(record: &ToolRecord, terms: &[String]) -> f32 {
        let haystack = format!(
            "{} {} {}",
            record.name,
            record.description,
            record.keywords.join(" ")
        );
        let tokens = tokenize(&haystack);
        let mut score = 0usize;
        for term in terms {
            score += tokens.iter().filter(|t| *t == term).count();
        }
        score as f32
    }
}

#[async_trait]
impl RetrievalStore for MemoryStore {
    async fn upsert(&self, records: Vec<ToolRecord>) -> RetrievalResult<()> {
        let mut map = self.records.write();
        for record in records {
            map.insert(record.key(), record);
        }
        Ok(())
    }

    async fn fetch(&self, server_id: &str, name: &str) -> RetrievalResult<Option<ToolRecord>> {
        Ok(self
            .records
            .read()
            .get(&format!("{}:{}", server_id, name))
            .cloned())
    }

    async fn knn_search(
        &self,
        vector: &[f32],
        k: usize,
        server_filter: Option<&str>,
    ) -> RetrievalResult<Vec<(ToolRecord, f32)>> {
        let mut scored: Vec<(ToolRecord, f32)> = self
            .records
            .read()
            .values()
            .filter(|record| server_filter.is_none_or(|s| record.server_id == s))
            .filter(|record| !record.vector.is_empty())
            .map(|record| {
                let distance = 1.0 - cosine_similarity(vector, &record.vector);
                (record.clone(), distance)
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn text_search(
        &self,
        query: &str,
        server_filter: Option<&str>,
    ) -> RetrievalResult<Vec<(ToolRecord, f32)>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(vec![]);
        }

        let mut scored: Vec<(ToolRecord, f32)> = self
            .records
            .read()
            .values()
            .filter(|record| server_filter.is_none_or(|s| record.server_id == s))
            .filter_map(|record| {
                let score = Self::lexical_score(record, &terms);
                (score > 0.0).then(|| (record.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored)
    }

    async fn count(&self) -> RetrievalResult<usize> {
        Ok(self.records.read().len())
    }

    async fn clear(&self) -> RetrievalResult<()> {
        self.records.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, server: &str, name: &str, description: &str, vector: Vec<f32>) -> ToolRecord {
        ToolRecord {
            id,
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

    #[tokio::test]
    async fn test_upsert_is_keyed_by_server_and_name() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                record(1, "a", "tool", "first", vec![1.0, 0.0]),
                record(2, "a", "tool", "second", vec![0.0, 1.0]),
                record(3, "b", "tool", "third", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        let fetched = store.fetch("a", "tool").await.unwrap().unwrap();
        assert_eq!(fetched.description, "second");
    }

    #[tokio::test]
    async fn test_knn_orders_by_distance() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                record(1, "a", "near", "d", vec![1.0, 0.0]),
                record(2, "a", "far", "d", vec![0.0, 1.0]),
                record(3, "a", "mid", "d", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = store.knn_search(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.name, "near");
        assert!(hits[0].1 < hits[1].1);
    }

    #[tokio::test]
    async fn test_knn_server_filter() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                record(1, "a", "x", "d", vec![1.0, 0.0]),
                record(2, "b", "y", "d", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.knn_search(&[1.0, 0.0], 10, Some("b")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.server_id, "b");
    }

    #[tokio::test]
    async fn test_text_search_term_frequency() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                record(1, "a", "find_symbol", "Find symbols in code", vec![]),
                record(2, "a", "search_code", "Search for code across repositories", vec![]),
            ])
            .await
            .unwrap();

        let hits = store.text_search("find symbol", None).await.unwrap();
        assert_eq!(hits[0].0.name, "find_symbol");
        assert!(hits[0].1 > 0.0);

        // No matching terms yields nothing.
        assert!(store.text_search("unrelated", None).await.unwrap().is_empty());
        assert!(store.text_search("", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();
        store
            .upsert(vec![record(1, "a", "x", "d", vec![1.0])])
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
