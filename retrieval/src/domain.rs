//! Zero-shot domain classification by nearest-anchor similarity.
//!
//! Each domain is backed by a few hand-written exemplar sentences describing
//! the interface style, not specific tool names. Anchors are embedded once
//! per process; a tool is labeled with the domain whose best anchor matches
//! its `name: description` text most closely. Anchor quality is the tunable
//! here; there is no training step.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    embedding::{cosine_similarity, Embedder, EmbeddingRole},
    error::RetrievalResult,
    record::DomainTag,
};

/// Winning similarity below this falls back to [`DomainTag::Generic`].
pub const CONFIDENCE_FLOOR: f32 = 0.5;

/// Exemplar sentences per domain. Describe characteristics, not tools.
const ANCHOR_TABLE: &[(DomainTag, &[&str])] = &[
    (
        DomainTag::StructuredApi,
        &[
            "Call a remote web API endpoint with typed parameters and receive structured JSON data",
            "Create, update, or fetch records in an external service through its official API",
            "Query a third-party platform for issues, pull requests, tickets, or documents",
        ],
    ),
    (
        DomainTag::ReasoningAid,
        &[
            "Think through a problem step by step before acting",
            "Record intermediate reasoning, plans, or reflections to improve a final answer",
            "Break a complex task into smaller sequential thoughts",
        ],
    ),
    (
        DomainTag::BrowserAutomation,
        &[
            "Open a web page in a browser, click elements, and fill in forms",
            "Navigate websites, take screenshots, and scrape rendered page content",
            "Automate interactions with a running web browser session",
        ],
    ),
    (
        DomainTag::Filesystem,
        &[
            "Read, write, move, or delete files and directories on disk",
            "List directory contents and search file contents by pattern",
            "Edit text files in a local workspace",
        ],
    ),
    (
        DomainTag::DataQuery,
        &[
            "Run SQL queries against a database and return rows",
            "Inspect database schemas, tables, and columns",
            "Execute analytical queries over a structured data warehouse",
        ],
    ),
    (
        DomainTag::Observability,
        &[
            "Fetch metrics, logs, or traces from a monitoring system",
            "Query dashboards and alerts for service health and performance",
            "Investigate incidents using telemetry data",
        ],
    ),
    (
        DomainTag::CloudResource,
        &[
            "Provision, configure, or inspect cloud infrastructure resources",
            "Manage compute instances, storage buckets, and deployments",
            "Operate Kubernetes clusters, containers, and cloud services",
        ],
    ),
    (
        DomainTag::ShellExec,
        &[
            "Execute an arbitrary shell command in a terminal and capture its output",
            "Run command-line programs in a sandboxed shell session",
            "Spawn a process with arguments and read stdout and stderr",
        ],
    ),
];

struct AnchorSet {
    tag: DomainTag,
    vectors: Vec<Vec<f32>>,
}

pub struct DomainClassifier {
    embedder: Arc<dyn Embedder>,
    confidence_floor: f32,
    anchors: OnceCell<Vec<AnchorSet>>,
}

impl DomainClassifier {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            confidence_floor: CONFIDENCE_FLOOR,
            anchors: OnceCell::new(),
        }
    }

    /// Embed every anchor sentence once and cache for process lifetime.
    async fn anchor_sets(&self) -> RetrievalResult<&Vec<AnchorSet>> {
        self.anchors
            .get_or_try_init(|| async {
                let texts: Vec<String> = ANCHOR_TABLE
                    .iter()
                    .flat_map(|(_, anchors)| anchors.iter().map(|a| a.to_string()))
                    .collect();

                let vectors = self
                    .embedder
                    .embed_batch(&texts, EmbeddingRole::Passage)
                    .await?;

                let mut sets = Vec::with_capacity(ANCHOR_TABLE.len());
                let mut offset = 0;
                for (tag, anchors) in ANCHOR_TABLE {
                    sets.push(AnchorSet {
                        tag: *tag,
                        vectors: vectors[offset..offset + anchors.len()].to_vec(),
                    });
                    offset += anchors.len();
                }
                debug!(anchors = texts.len(), domains = sets.len(), "Embedded domain anchors");
                Ok(sets)
            })
            .await
    }

    /// Classify one tool. Returns the winning tag and its similarity.
    pub async fn classify(
        &self,
        name: &str,
        description: &str,
    ) -> RetrievalResult<(DomainTag, f32)> {
        let text = format!("{}: {}", name, description);
        let vector = self.embedder.embed(&text, EmbeddingRole::Passage).await?;
        let sets = self.anchor_sets().await?;
        Ok(self.best_match(&vector, sets))
    }

    /// Classify a batch of `(name, description)` pairs with one embedding
    /// call. Results align with the input order.
    pub async fn classify_batch(
        &self,
        tools: &[(String, String)],
    ) -> RetrievalResult<Vec<(DomainTag, f32)>> {
        if tools.is_empty() {
            return Ok(vec![]);
        }

        let texts: Vec<String> = tools
            .iter()
            .map(|(name, description)| format!("{}: {}", name, description))
            .collect();
        let vectors = self
            .embedder
            .embed_batch(&texts, EmbeddingRole::Passage)
            .await?;
        let sets = self.anchor_sets().await?;

        Ok(vectors
            .iter()
            .map(|vector| self.best_match(vector, sets))
            .collect())
    }

    /// Max similarity per domain (a tool partially matching one anchor still
    /// counts), then the best domain overall.
    fn best_match(&self, vector: &[f32], sets: &[AnchorSet]) -> (DomainTag, f32) {
        let mut best = (DomainTag::Generic, 0.0f32);
        for set in sets {
            let domain_best = set
                .vectors
                .iter()
                .map(|anchor| cosine_similarity(vector, anchor))
                .fold(f32::MIN, f32::max);
            if domain_best > best.1 {
                best = (set.tag, domain_best);
            }
        }

        if best.1 < self.confidence_floor {
            (DomainTag::Generic, best.1)
        } else {
            best
        }
    }
}
