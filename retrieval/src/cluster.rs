//! Capability clustering: group near-duplicate tools across backends.
//!
//! Pairwise embedding similarity with a strict threshold, merged through
//! union-find. Only near-identical capabilities offered by different
//! backends should land in the same cluster, not merely related tools.
//! The O(n^2) comparison is fine for catalogs in the hundreds; past a few
//! thousand entries this needs approximate nearest-neighbor bucketing.

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    embedding::{cosine_similarity, Embedder, EmbeddingRole},
    error::RetrievalResult,
};

/// Similarity at or above this merges two tools into one cluster.
pub const CLUSTER_THRESHOLD: f32 = 0.95;

pub struct CapabilityClusterer {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
}

impl CapabilityClusterer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            threshold: CLUSTER_THRESHOLD,
        }
    }

    pub fn with_threshold(embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
        }
    }

    /// Cluster tools given as `(key, text)` pairs, where `text` is the
    /// `name: description` string. Returns a cluster id per key for every
    /// tool in a multi-member group; singletons get no id (no
    /// deduplication partner).
    pub async fn cluster(
        &self,
        tools: &[(String, String)],
    ) -> RetrievalResult<HashMap<String, String>> {
        if tools.len() < 2 {
            return Ok(HashMap::new());
        }

        let texts: Vec<String> = tools.iter().map(|(_, text)| text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts, EmbeddingRole::Passage)
            .await?;

        let mut uf = UnionFind::new(tools.len());
        for i in 0..vectors.len() {
            for j in (i + 1)..vectors.len() {
                if cosine_similarity(&vectors[i], &vectors[j]) >= self.threshold {
                    uf.union(i, j);
                }
            }
        }

        // Assign synthetic ids to multi-member groups in first-seen order.
        let mut group_sizes: HashMap<usize, usize> = HashMap::new();
        for i in 0..tools.len() {
            *group_sizes.entry(uf.find(i)).or_insert(0) += 1;
        }

        let mut cluster_ids: HashMap<usize, String> = HashMap::new();
        let mut assignments = HashMap::new();
        for (i, (key, _)) in tools.iter().enumerate() {
            let root = uf.find(i);
            if group_sizes[&root] < 2 {
                continue;
            }
            let next_id = cluster_ids.len();
            let cluster_id = cluster_ids
                .entry(root)
                .or_insert_with(|| format!("cap-{}", next_id))
                .clone();
            assignments.insert(key.clone(), cluster_id);
        }

        debug!(
            tools = tools.len(),
            clusters = cluster_ids.len(),
            clustered_tools = assignments.len(),
            "Capability clustering complete"
        );
        Ok(assignments)
    }
}

/// Union-find with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::RetrievalResult;

    /// Embedder returning vectors from a fixed list, in input order.
    struct SeqEmbedder {
        vectors: Vec<Vec<f32>>,
    }

    #[async_trait]
    impl Embedder for SeqEmbedder {
        async fn embed(&self, _text: &str, _role: EmbeddingRole) -> RetrievalResult<Vec<f32>> {
            Ok(self.vectors[0].clone())
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            _role: EmbeddingRole,
        ) -> RetrievalResult<Vec<Vec<f32>>> {
            Ok(self.vectors[..texts.len()].to_vec())
        }
    }

    fn tools(keys: &[&str]) -> Vec<(String, String)> {
        keys.iter()
            .map(|k| (k.to_string(), format!("{}: description", k)))
            .collect()
    }

    #[tokio::test]
    async fn test_near_identical_tools_cluster() {
        // Two near-identical vectors and one unrelated.
        let embedder = Arc::new(SeqEmbedder {
            vectors: vec![
                vec![1.0, 0.0],
                vec![0.999, 0.04],
                vec![0.0, 1.0],
            ],
        });
        let clusterer = CapabilityClusterer::new(embedder);

        let assignments = clusterer
            .cluster(&tools(&[
                "datadog-us:get_metrics",
                "datadog-eu:get_metrics",
                "serena:find_symbol",
            ]))
            .await
            .unwrap();

        let us = assignments.get("datadog-us:get_metrics").unwrap();
        let eu = assignments.get("datadog-eu:get_metrics").unwrap();
        assert_eq!(us, eu);
        // Singleton gets no cluster id.
        assert!(!assignments.contains_key("serena:find_symbol"));
    }

    #[tokio::test]
    async fn test_related_but_distinct_tools_stay_apart() {
        // Similarity ~0.9: related, below the strict threshold.
        let embedder = Arc::new(SeqEmbedder {
            vectors: vec![vec![1.0, 0.0], vec![0.9, 0.436]],
        });
        let clusterer = CapabilityClusterer::new(embedder);

        let assignments = clusterer
            .cluster(&tools(&["a:search", "b:find"]))
            .await
            .unwrap();
        assert!(assignments.is_empty());
    }

    #[tokio::test]
    async fn test_transitive_merging() {
        // a~b and b~c merge all three into one cluster.
        let embedder = Arc::new(SeqEmbedder {
            vectors: vec![
                vec![1.0, 0.0],
                vec![0.995, 0.0998],
                vec![0.98, 0.198],
            ],
        });
        let clusterer = CapabilityClusterer::new(embedder);

        let assignments = clusterer
            .cluster(&tools(&["a:t", "b:t", "c:t"]))
            .await
            .unwrap();
        let ids: std::collections::HashSet<_> = assignments.values().collect();
        assert_eq!(assignments.len(), 3);
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_small_inputs() {
        let embedder = Arc::new(SeqEmbedder {
            vectors: vec![vec![1.0, 0.0]],
        });
        let clusterer = CapabilityClusterer::new(embedder);

        assert!(clusterer.cluster(&[]).await.unwrap().is_empty());
        assert!(clusterer
            .cluster(&tools(&["only:one"]))
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 1);
        uf.union(2, 3);
        assert_eq!(uf.find(0), uf.find(1));
        assert_eq!(uf.find(2), uf.find(3));
        assert_ne!(uf.find(0), uf.find(2));

        uf.union(1, 2);
        assert_eq!(uf.find(0), uf.find(3));
    }
}
