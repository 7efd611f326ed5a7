//! Gateway wiring: retrieval pipeline, router, backends, and the two
//! caller-facing operations (search and dispatch).

use std::{sync::Arc, time::Duration};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use toolscout_mcp::{
    spawn_health_sweep, BackendConnector, BackendError, BackendManager, BackendTransport,
    DiscoveredTool, RmcpConnector,
};
use toolscout_retrieval::{
    CapabilityClusterer, DomainClassifier, DomainTag, Embedder, EmbeddingRole, HttpEmbedder,
    HybridSearchEngine, MemoryStore, RedisStore, RetrievalStore, SearchOptions, ToolRecord,
};
use tracing::{info, warn};

use crate::{
    config::{GatewayConfig, StoreConfig},
    error::{GatewayError, GatewayResult},
    exposure::ExposureController,
    router::ToolRouter,
};

/// Backends discovered concurrently during index bootstrap.
const DISCOVERY_CONCURRENCY: usize = 4;

/// One entry in a search response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultEntry {
    pub exposed_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_tag: Option<DomainTag>,
    pub score: f32,
    pub description: String,
    /// Other backends offering an equivalent capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternates: Option<Vec<String>>,
}

/// The caller-facing search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    /// Whether the exposed set mutated (drives the list-changed signal).
    #[serde(skip)]
    pub changed: bool,
}

/// Result of dispatching a call. Always a structured result; per-request
/// failures never escape as faults.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// Content blocks, JSON-encoded.
    pub content: Value,
    pub is_error: bool,
}

impl DispatchResult {
    fn text(message: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: serde_json::json!([{ "type": "text", "text": message.into() }]),
            is_error,
        }
    }
}

pub struct Gateway {
    config: GatewayConfig,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn RetrievalStore>,
    engine: HybridSearchEngine,
    router: ToolRouter,
    classifier: DomainClassifier,
    clusterer: CapabilityClusterer,
    backends: Arc<BackendManager>,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Build the production gateway from config.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            config.embedding.url.clone(),
            Duration::from_secs(config.embedding.timeout_secs),
        )?);

        let store: Arc<dyn RetrievalStore> = match &config.store {
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
            StoreConfig::Redis { url, index } => Arc::new(RedisStore::new(url, index.clone(), 8)?),
        };

        let connector: Arc<dyn BackendConnector> =
            Arc::new(RmcpConnector::new(config.retry.attempt_timeout()));

        Ok(Self::with_parts(config, embedder, store, connector))
    }

    /// Assemble a gateway from pre-built collaborators (also the test seam).
    pub fn with_parts(
        config: GatewayConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn RetrievalStore>,
        connector: Arc<dyn BackendConnector>,
    ) -> Self {
        let backends = Arc::new(BackendManager::new(
            connector,
            &config.retry,
            config.health.clone(),
        ));
        for backend in &config.backends {
            backends.register_backend(backend.clone());
        }

        let engine = HybridSearchEngine::new(
            Arc::clone(&embedder),
            Arc::clone(&store),
            config.search.lexical_weight,
            config.search.vector_weight,
        );

        Self {
            classifier: DomainClassifier::new(Arc::clone(&embedder)),
            clusterer: CapabilityClusterer::new(Arc::clone(&embedder)),
            router: ToolRouter::new(),
            engine,
            embedder,
            store,
            backends,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Startup checks and background tasks. Failure here is the one fatal
    /// error class; afterwards every failure resolves to a structured
    /// per-request result.
    pub async fn initialize(&self) -> GatewayResult<()> {
        self.embedder.health().await?;

        let indexed = self.store.count().await?;
        info!(indexed, "Retrieval store reachable");

        if indexed == 0 && self.config.bootstrap_index {
            let built = self.bootstrap_index().await?;
            info!(built, "Bootstrapped tool index from backend catalogs");
        }

        spawn_health_sweep(Arc::clone(&self.backends), self.shutdown.child_token());
        Ok(())
    }

    /// Create the per-session exposure state, pinning always-exposed tools.
    pub async fn new_session(&self) -> ExposureController {
        let mut session = ExposureController::new(self.config.exposure.eviction_threshold);

        for qualified in &self.config.exposure.always_exposed {
            let Some((server_id, name)) = qualified.split_once(':') else {
                continue;
            };
            match self.store.fetch(server_id, name).await {
                Ok(Some(record)) => session.pin_always_exposed(&record),
                Ok(None) => {
                    warn!(tool = %qualified, "Always-exposed tool not found in index")
                }
                Err(e) => warn!(tool = %qualified, error = %e, "Failed to load always-exposed tool"),
            }
        }

        session
    }

    /// Discover backend catalogs, embed, classify, cluster, and index them.
    async fn bootstrap_index(&self) -> GatewayResult<usize> {
        let backends = Arc::clone(&self.backends);
        let discoveries: Vec<(String, Option<String>, Result<Vec<DiscoveredTool>, BackendError>)> =
            stream::iter(self.config.backends.clone())
                .map(|config| {
                    let backends = Arc::clone(&backends);
                    async move {
                        let endpoint = match &config.transport {
                            BackendTransport::Stdio { .. } => None,
                            _ => Some(config.endpoint()),
                        };
                        let tools = backends.discover_tools(&config.id, None).await;
                        (config.id, endpoint, tools)
                    }
                })
                .buffer_unordered(DISCOVERY_CONCURRENCY)
                .collect()
                .await;

        let mut catalog: Vec<(String, Option<String>, DiscoveredTool)> = Vec::new();
        for (server_id, endpoint, result) in discoveries {
            match result {
                Ok(tools) => {
                    info!(server_id = %server_id, tools = tools.len(), "Discovered backend catalog");
                    for tool in tools {
                        catalog.push((server_id.clone(), endpoint.clone(), tool));
                    }
                }
                Err(e) => {
                    warn!(server_id = %server_id, error = %e, "Skipping backend during bootstrap")
                }
            }
        }

        if catalog.is_empty() {
            return Ok(0);
        }

        let pairs: Vec<(String, String)> = catalog
            .iter()
            .map(|(_, _, tool)| (tool.name.clone(), tool.description.clone()))
            .collect();
        let domains = self.classifier.classify_batch(&pairs).await?;

        let keyed_texts: Vec<(String, String)> = catalog
            .iter()
            .map(|(server_id, _, tool)| {
                (
                    format!("{}:{}", server_id, tool.name),
                    format!("{}: {}", tool.name, tool.description),
                )
            })
            .collect();
        let clusters = self.clusterer.cluster(&keyed_texts).await?;

        let texts: Vec<String> = keyed_texts.iter().map(|(_, text)| text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts, EmbeddingRole::Passage)
            .await?;

        let records: Vec<ToolRecord> = catalog
            .into_iter()
            .zip(domains)
            .zip(vectors)
            .enumerate()
            .map(|(id, (((server_id, endpoint, tool), (domain, _)), vector))| {
                let key = format!("{}:{}", server_id, tool.name);
                ToolRecord {
                    id: id as u64,
                    keywords: extract_keywords(&tool.name, &tool.description),
                    cluster_id: clusters.get(&key).cloned(),
                    server_id,
                    endpoint,
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    vector,
                    domain: Some(domain),
                }
            })
            .collect();

        let count = records.len();
        self.store.upsert(records).await?;
        Ok(count)
    }

    /// The search meta-operation: retrieve, route, and refresh the exposed
    /// set.
    pub async fn search(
        &self,
        session: &mut ExposureController,
        query: &str,
        limit: Option<usize>,
    ) -> GatewayResult<SearchResponse> {
        session.next_request();

        let limit = limit
            .unwrap_or(self.config.search.default_limit)
            .min(self.config.search.max_limit);

        if limit == 0 || query.trim().is_empty() {
            return Ok(SearchResponse {
                results: vec![],
                notice: None,
                changed: false,
            });
        }

        let candidates = self
            .engine
            .search(
                query,
                &SearchOptions {
                    top_k: limit,
                    min_score: self.config.search.min_score,
                    server_filter: None,
                },
            )
            .await?;

        let route = self.router.route(candidates, query);
        let update = session.apply_search(&route);

        let results: Vec<SearchResultEntry> = route
            .candidates
            .iter()
            .map(|candidate| {
                let alternates = candidate.record.cluster_id.as_ref().and_then(|cluster_id| {
                    let others: Vec<String> = route
                        .alternates
                        .get(cluster_id)?
                        .iter()
                        .filter(|server| **server != candidate.record.server_id)
                        .cloned()
                        .collect();
                    (!others.is_empty()).then_some(others)
                });
                SearchResultEntry {
                    exposed_key: toolscout_mcp::exposed_key(
                        &candidate.record.server_id,
                        &candidate.record.name,
                    ),
                    domain_tag: candidate.record.domain,
                    score: candidate.score,
                    description: toolscout_mcp::prefixed_description(
                        &candidate.record.server_id,
                        &candidate.record.description,
                    ),
                    alternates,
                }
            })
            .collect();

        let notice = (route.deduplicated > 0).then(|| {
            format!(
                "{} equivalent tool(s) from other backends were deduplicated; alternates are listed per result",
                route.deduplicated
            )
        });

        Ok(SearchResponse {
            results,
            notice,
            changed: update.changed,
        })
    }

    /// Dispatch a call to an exposed tool.
    ///
    /// The counter ticks and the entry's stamp refreshes before forwarding,
    /// so even a failed call counts as usage. Unknown and malformed keys
    /// resolve to a "search first" result; backend failures resolve to
    /// error-flagged results naming the backend.
    pub async fn dispatch(
        &self,
        session: &mut ExposureController,
        exposed_key: &str,
        arguments: Option<Map<String, Value>>,
    ) -> DispatchResult {
        session.next_request();

        let Some(tool) = session.get(exposed_key).cloned() else {
            return DispatchResult::text(
                format!(
                    "Tool '{}' is not currently available. Use search_tools to find and enable tools before calling them.",
                    exposed_key
                ),
                true,
            );
        };

        session.touch(exposed_key);

        if session.resolve(exposed_key).is_none() {
            // Defensive: the stored description no longer matches the key.
            return DispatchResult::text(
                format!(
                    "Tool '{}' cannot be resolved to a backend. Use search_tools to refresh the tool list.",
                    exposed_key
                ),
                true,
            );
        }

        match self
            .backends
            .forward(
                &tool.server_id,
                &tool.original_name,
                arguments,
                tool.endpoint.as_deref(),
            )
            .await
        {
            Ok(outcome) => DispatchResult {
                content: outcome.content,
                is_error: outcome.is_error,
            },
            Err(BackendError::ServerUnreachable { server_id, endpoint }) => DispatchResult::text(
                format!(
                    "Cannot reach backend '{}' (last known endpoint: {}). The tool may be temporarily unavailable.",
                    server_id, endpoint
                ),
                true,
            ),
            Err(e) => DispatchResult::text(
                format!("Tool call on backend '{}' failed: {}", tool.server_id, e),
                true,
            ),
        }
    }

    pub fn backends(&self) -> Arc<BackendManager> {
        Arc::clone(&self.backends)
    }

    /// Stop background tasks and drain in-flight forwards.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.backends.shutdown().await;
    }
}

/// Distinct terms worth indexing alongside the embedding.
fn extract_keywords(name: &str, description: &str) -> Vec<String> {
    const MAX_KEYWORDS: usize = 8;
    let mut seen = std::collections::HashSet::new();
    let mut keywords = Vec::new();
    let text = format!("{} {}", name, description);
    for term in text
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
    {
        if term.len() > 3 && seen.insert(term.to_string()) {
            keywords.push(term.to_string());
            if keywords.len() >= MAX_KEYWORDS {
                break;
            }
        }
    }
    keywords
}
