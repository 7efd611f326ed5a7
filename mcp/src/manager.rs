//! Backend connection management and call forwarding.
//!
//! `BackendManager` owns the connection pool and drives the full connection
//! lifecycle: lazy connect-with-retry on first use, unhealthy-connection
//! replacement as a single swap, a forwarding retry loop for transient
//! failures, and the periodic health sweep. Reconnects to the same backend
//! are serialized behind a per-backend guard so racing callers await one
//! attempt instead of piling up.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    client::{BackendClient, BackendConnector, CallOutcome, DiscoveredTool},
    config::{BackendConfig, HealthConfig, RetryConfig},
    error::{BackendError, BackendResult},
    metrics::BackendMetrics,
    pool::{ConnectionPool, PooledConnection},
};

pub struct BackendManager {
    pool: ConnectionPool,
    connector: Arc<dyn BackendConnector>,
    retry: crate::retry::RetryPolicy,
    health: HealthConfig,
    /// Statically configured backends, by id.
    backends: DashMap<String, BackendConfig>,
    /// Per-backend reconnect guards so racing callers share one attempt.
    reconnect_guards: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    metrics: Arc<BackendMetrics>,
    active_forwards: Arc<AtomicUsize>,
}

impl BackendManager {
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        retry: &RetryConfig,
        health: HealthConfig,
    ) -> Self {
        Self {
            pool: ConnectionPool::new(),
            connector,
            retry: crate::retry::RetryPolicy::from_config(retry),
            health,
            backends: DashMap::new(),
            reconnect_guards: DashMap::new(),
            metrics: Arc::new(BackendMetrics::new()),
            active_forwards: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a statically configured backend.
    pub fn register_backend(&self, config: BackendConfig) {
        debug!(server_id = %config.id, endpoint = %config.endpoint(), "Registered backend");
        self.backends.insert(config.id.clone(), config);
    }

    pub fn registered_backends(&self) -> Vec<String> {
        self.backends.iter().map(|e| e.key().clone()).collect()
    }

    pub fn metrics(&self) -> Arc<BackendMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn health_interval(&self) -> Duration {
        self.health.interval()
    }

    pub fn pool_stats(&self) -> crate::pool::PoolStats {
        self.pool.stats()
    }

    /// Resolve the connection config for a backend: registered config first,
    /// falling back to a direct endpoint address when one is known.
    fn resolve_config(
        &self,
        server_id: &str,
        endpoint: Option<&str>,
    ) -> BackendResult<BackendConfig> {
        if let Some(config) = self.backends.get(server_id) {
            return Ok(config.clone());
        }
        match endpoint {
            Some(endpoint) => BackendConfig::from_endpoint(server_id, endpoint),
            None => Err(BackendError::ServerNotFound(server_id.to_string())),
        }
    }

    fn reconnect_guard(&self, server_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.reconnect_guards
            .entry(server_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Get a healthy connection for a backend, connecting lazily on first
    /// use and replacing unhealthy connections.
    ///
    /// `endpoint` is required only when the backend is not statically
    /// registered and has no live connection yet.
    pub async fn get_connection(
        &self,
        server_id: &str,
        endpoint: Option<&str>,
    ) -> BackendResult<Arc<dyn BackendClient>> {
        if let Some(conn) = self.pool.get(server_id) {
            if conn.healthy {
                return Ok(conn.client);
            }
            info!(server_id = %server_id, "Cached connection unhealthy, reconnecting");
        }

        let guard = self.reconnect_guard(server_id);
        let _locked = guard.lock().await;

        // A concurrent caller may have reconnected while we waited.
        if let Some(conn) = self.pool.get(server_id) {
            if conn.healthy {
                return Ok(conn.client);
            }
            self.pool.remove(server_id);
            self.metrics.record_connection_closed();
        }

        let config = self.resolve_config(server_id, endpoint)?;
        let endpoint_str = config.endpoint();

        let connector = Arc::clone(&self.connector);
        let connect_result = self
            .retry
            .run(&format!("connect '{}'", server_id), || {
                let connector = Arc::clone(&connector);
                let config = config.clone();
                async move { connector.connect(&config).await }
            })
            .await;

        match connect_result {
            Ok(client) => {
                self.pool.insert(
                    server_id,
                    PooledConnection::new(Arc::clone(&client), endpoint_str),
                );
                self.metrics.record_connection_opened();
                Ok(client)
            }
            Err(e) => {
                self.metrics.record_connection_error();
                error!(
                    server_id = %server_id,
                    endpoint = %endpoint_str,
                    error = %e,
                    "Exhausted connection attempts"
                );
                Err(BackendError::ServerUnreachable {
                    server_id: server_id.to_string(),
                    endpoint: endpoint_str,
                })
            }
        }
    }

    /// Forward a tool call to its owning backend.
    ///
    /// Connection-class failures mark the connection unhealthy and retry
    /// with the linear backoff up to the attempt limit; any other remote
    /// error surfaces immediately without retry. Exhausted retries resolve
    /// to an error naming the backend; callers turn this into a structured
    /// error result rather than a fault.
    pub async fn forward(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Option<Map<String, Value>>,
        endpoint: Option<&str>,
    ) -> BackendResult<CallOutcome> {
        self.active_forwards.fetch_add(1, Ordering::SeqCst);
        let _guard = scopeguard::guard(Arc::clone(&self.active_forwards), |count| {
            count.fetch_sub(1, Ordering::SeqCst);
        });

        self.metrics.record_call_start();
        let started = Instant::now();

        let result = self
            .forward_inner(server_id, tool_name, arguments, endpoint)
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let success = matches!(&result, Ok(outcome) if !outcome.is_error);
        self.metrics
            .record_call_end(server_id, tool_name, success, duration_ms);

        result
    }

    async fn forward_inner(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Option<Map<String, Value>>,
        endpoint: Option<&str>,
    ) -> BackendResult<CallOutcome> {
        let mut last_err: Option<BackendError> = None;

        for attempt in 1..=self.retry.max_attempts {
            let client = match self.get_connection(server_id, endpoint).await {
                Ok(client) => client,
                Err(e) => {
                    // Connect attempts were already retried inside get_connection.
                    last_err = Some(e);
                    break;
                }
            };

            match client.call_tool(tool_name, arguments.clone()).await {
                Ok(outcome) => {
                    if attempt > 1 {
                        info!(
                            server_id = %server_id,
                            tool = %tool_name,
                            attempt,
                            "Forward recovered after retry"
                        );
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        server_id = %server_id,
                        tool = %tool_name,
                        attempt,
                        error = %e,
                        "Connection-class failure, marking backend unhealthy"
                    );
                    self.pool.mark_unhealthy(server_id);
                    self.metrics.record_connection_error();
                    last_err = Some(e);
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| BackendError::ServerNotFound(server_id.to_string())))
    }

    /// Run the cheap health probe against a backend's live connection.
    ///
    /// Any failure, including the check timeout, counts as unhealthy.
    /// Transitions in either direction are logged.
    pub async fn check_health(&self, server_id: &str) -> bool {
        let Some(conn) = self.pool.get(server_id) else {
            return false;
        };

        let healthy = tokio::time::timeout(self.health.check_timeout(), conn.client.list_tools())
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);

        if let Some(previous) = self.pool.record_health(server_id, healthy) {
            if previous != healthy {
                if healthy {
                    info!(server_id = %server_id, "Backend recovered, marking healthy");
                } else {
                    warn!(server_id = %server_id, "Backend health check failed, marking unhealthy");
                }
            }
        }

        healthy
    }

    /// One pass of the health sweep: probe every connection whose last check
    /// is stale by at least the interval, and give unhealthy backends a
    /// single reconnect attempt.
    pub async fn sweep_health(&self) {
        for (server_id, _) in self.pool.stale(self.health.interval()) {
            if self.check_health(&server_id).await {
                continue;
            }

            let endpoint = self.pool.get(&server_id).map(|conn| conn.endpoint);
            self.pool.remove(&server_id);
            self.metrics.record_connection_closed();

            let config = match self.resolve_config(&server_id, endpoint.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    warn!(server_id = %server_id, error = %e, "Cannot resolve backend for reconnect");
                    continue;
                }
            };

            match self.connector.connect(&config).await {
                Ok(client) => {
                    self.pool
                        .insert(&server_id, PooledConnection::new(client, config.endpoint()));
                    self.metrics.record_connection_opened();
                    self.metrics.record_reconnect();
                    info!(server_id = %server_id, "Reconnected during health sweep");
                }
                Err(e) => {
                    self.metrics.record_connection_error();
                    warn!(server_id = %server_id, error = %e, "Reconnect failed during health sweep");
                }
            }
        }
    }

    /// Fetch a backend's tool catalog, connecting if needed.
    pub async fn discover_tools(
        &self,
        server_id: &str,
        endpoint: Option<&str>,
    ) -> BackendResult<Vec<DiscoveredTool>> {
        let client = self.get_connection(server_id, endpoint).await?;
        client.list_tools().await
    }

    /// Wait for in-flight forwards to drain (bounded), then drop all
    /// connections.
    pub async fn shutdown(&self) {
        let start = Instant::now();
        let timeout = Duration::from_secs(5);
        while self.active_forwards.load(Ordering::SeqCst) > 0 {
            if start.elapsed() >= timeout {
                warn!(
                    "Shutdown timeout reached; {} forwards still active",
                    self.active_forwards.load(Ordering::SeqCst)
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.pool.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicU32, Ordering},
    };

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Scripted behavior for a single call.
    #[derive(Clone)]
    enum CallScript {
        Ok,
        Transient(&'static str),
        Fatal(&'static str),
    }

    struct ScriptedClient {
        calls: AtomicU32,
        lists: AtomicU32,
        call_script: Mutex<VecDeque<CallScript>>,
        list_healthy: std::sync::atomic::AtomicBool,
    }

    impl ScriptedClient {
        fn new(script: Vec<CallScript>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                lists: AtomicU32::new(0),
                call_script: Mutex::new(script.into()),
                list_healthy: std::sync::atomic::AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl BackendClient for ScriptedClient {
        async fn list_tools(&self) -> BackendResult<Vec<DiscoveredTool>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            if self.list_healthy.load(Ordering::SeqCst) {
                Ok(vec![])
            } else {
                Err(BackendError::Transport("connection reset".into()))
            }
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Option<Map<String, Value>>,
        ) -> BackendResult<CallOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.call_script.lock().pop_front().unwrap_or(CallScript::Ok) {
                CallScript::Ok => Ok(CallOutcome {
                    content: serde_json::json!([{ "type": "text", "text": "ok" }]),
                    is_error: false,
                }),
                CallScript::Transient(msg) => Err(BackendError::ToolExecution(msg.into())),
                CallScript::Fatal(msg) => Err(BackendError::ToolExecution(msg.into())),
            }
        }
    }

    struct ScriptedConnector {
        attempts: AtomicU32,
        fail_first: u32,
        client: Arc<ScriptedClient>,
    }

    impl ScriptedConnector {
        fn new(fail_first: u32, client: Arc<ScriptedClient>) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicU32::new(0),
                fail_first,
                client,
            })
        }
    }

    #[async_trait]
    impl BackendConnector for ScriptedConnector {
        async fn connect(&self, _config: &BackendConfig) -> BackendResult<Arc<dyn BackendClient>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                Err(BackendError::ConnectionFailed("connection refused".into()))
            } else {
                Ok(Arc::clone(&self.client) as Arc<dyn BackendClient>)
            }
        }
    }

    fn manager_with(connector: Arc<dyn BackendConnector>) -> BackendManager {
        let manager = BackendManager::new(connector, &RetryConfig::default(), HealthConfig::default());
        manager.register_backend(
            BackendConfig::from_endpoint("svc", "http://localhost:9000/mcp").unwrap(),
        );
        manager
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_success() {
        let client = ScriptedClient::new(vec![CallScript::Ok]);
        let manager = manager_with(ScriptedConnector::new(0, Arc::clone(&client)));

        let outcome = manager.forward("svc", "do_it", None, None).await.unwrap();
        assert!(!outcome.is_error);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.metrics().snapshot().successful_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_backend_reports_error_and_caches_nothing() {
        let client = ScriptedClient::new(vec![]);
        let connector = ScriptedConnector::new(u32::MAX, client);
        let manager = manager_with(Arc::clone(&connector) as Arc<dyn BackendConnector>);

        let err = manager.forward("svc", "do_it", None, None).await.unwrap_err();
        match err {
            BackendError::ServerUnreachable { server_id, .. } => assert_eq!(server_id, "svc"),
            other => panic!("expected unreachable, got {:?}", other),
        }

        // Three connect attempts, nothing left in the pool.
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(manager.pool_stats().total_connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_backend_without_endpoint() {
        let client = ScriptedClient::new(vec![]);
        let manager = manager_with(ScriptedConnector::new(0, client));

        let err = manager.forward("ghost", "do_it", None, None).await.unwrap_err();
        assert!(matches!(err, BackendError::ServerNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_call_error_retries() {
        let client = ScriptedClient::new(vec![CallScript::Transient("connection reset"), CallScript::Ok]);
        let manager = manager_with(ScriptedConnector::new(0, Arc::clone(&client)));

        let outcome = manager.forward("svc", "do_it", None, None).await.unwrap();
        assert!(!outcome.is_error);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_connection_error_does_not_retry() {
        let client = ScriptedClient::new(vec![CallScript::Fatal("invalid arguments: missing field")]);
        let manager = manager_with(ScriptedConnector::new(0, Arc::clone(&client)));

        let err = manager.forward("svc", "do_it", None, None).await.unwrap_err();
        assert!(matches!(err, BackendError::ToolExecution(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_connect_via_record_endpoint() {
        let client = ScriptedClient::new(vec![CallScript::Ok]);
        let connector = ScriptedConnector::new(0, client);
        let manager = BackendManager::new(
            Arc::clone(&connector) as Arc<dyn BackendConnector>,
            &RetryConfig::default(),
            HealthConfig::default(),
        );

        // Not registered, but the index record carries an endpoint.
        let outcome = manager
            .forward("dyn", "do_it", None, Some("http://localhost:9001/mcp"))
            .await
            .unwrap();
        assert!(!outcome.is_error);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reconnects_are_serialized() {
        let client = ScriptedClient::new(vec![CallScript::Ok, CallScript::Ok]);
        let connector = ScriptedConnector::new(0, client);
        let manager = Arc::new(manager_with(
            Arc::clone(&connector) as Arc<dyn BackendConnector>
        ));

        let a = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_connection("svc", None).await.map(|_| ()) })
        };
        let b = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_connection("svc", None).await.map(|_| ()) })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // One connect attempt for both callers.
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.pool_stats().total_connections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_sweep_reconnects_unhealthy_backend() {
        let client = ScriptedClient::new(vec![CallScript::Ok]);
        let connector = ScriptedConnector::new(0, Arc::clone(&client));
        let manager = manager_with(Arc::clone(&connector) as Arc<dyn BackendConnector>);

        manager.get_connection("svc", None).await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        // Break the backend and let the health interval elapse.
        client.list_healthy.store(false, Ordering::SeqCst);
        tokio::time::advance(manager.health_interval()).await;

        manager.sweep_health().await;

        // Probe failed, one reconnect attempt was made.
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(manager.metrics().snapshot().reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_sweep_skips_fresh_connections() {
        let client = ScriptedClient::new(vec![]);
        let connector = ScriptedConnector::new(0, Arc::clone(&client));
        let manager = manager_with(Arc::clone(&connector) as Arc<dyn BackendConnector>);

        manager.get_connection("svc", None).await.unwrap();
        manager.sweep_health().await;

        // No probe ran: the connection was checked on creation just now.
        assert_eq!(client.lists.load(Ordering::SeqCst), 0);
    }
}
