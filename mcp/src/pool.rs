//! Connection pool for backend tool servers.
//!
//! One live connection per backend id at a time; reconnect replaces the
//! entry as a single remove-then-insert swap. The pool is bounded and
//! LRU-evicts the least recently used backend when full.

use std::{sync::Arc, time::Duration};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::client::BackendClient;

type EvictionCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A cached backend connection with its health bookkeeping.
#[derive(Clone)]
pub struct PooledConnection {
    pub client: Arc<dyn BackendClient>,
    pub endpoint: String,
    pub connected_at: Instant,
    pub last_health_check: Instant,
    pub healthy: bool,
}

impl PooledConnection {
    pub fn new(client: Arc<dyn BackendClient>, endpoint: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            client,
            endpoint: endpoint.into(),
            connected_at: now,
            last_health_check: now,
            healthy: true,
        }
    }
}

/// Thread-safe LRU pool keyed by backend id.
pub struct ConnectionPool {
    connections: Mutex<LruCache<String, PooledConnection>>,
    capacity: usize,
    eviction_callback: Option<EvictionCallback>,
}

impl ConnectionPool {
    const DEFAULT_CAPACITY: usize = 200;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            connections: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
            capacity: capacity.max(1),
            eviction_callback: None,
        }
    }

    pub fn set_eviction_callback<F>(&mut self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.eviction_callback = Some(Arc::new(callback));
    }

    /// Get the connection for a backend, promoting it in the LRU order.
    pub fn get(&self, server_id: &str) -> Option<PooledConnection> {
        self.connections.lock().get(server_id).cloned()
    }

    /// Insert a fresh connection, replacing any existing one for the backend.
    pub fn insert(&self, server_id: impl Into<String>, connection: PooledConnection) {
        let server_id = server_id.into();
        let evicted = {
            let mut connections = self.connections.lock();
            connections.pop(&server_id);
            connections.push(server_id, connection)
        };
        if let Some((evicted_id, _)) = evicted {
            if let Some(callback) = &self.eviction_callback {
                callback(&evicted_id);
            }
        }
    }

    /// Remove and return the connection for a backend.
    pub fn remove(&self, server_id: &str) -> Option<PooledConnection> {
        self.connections.lock().pop(server_id)
    }

    /// Flag a backend's connection as unhealthy without removing it.
    pub fn mark_unhealthy(&self, server_id: &str) {
        if let Some(conn) = self.connections.lock().peek_mut(server_id) {
            conn.healthy = false;
        }
    }

    /// Record the outcome of a health check. Returns the previous health
    /// state when the connection exists.
    pub fn record_health(&self, server_id: &str, healthy: bool) -> Option<bool> {
        let mut connections = self.connections.lock();
        let conn = connections.peek_mut(server_id)?;
        let previous = conn.healthy;
        conn.healthy = healthy;
        conn.last_health_check = Instant::now();
        Some(previous)
    }

    /// Backends whose last health check is stale by at least `interval`,
    /// with their current health state. Does not promote entries.
    pub fn stale(&self, interval: Duration) -> Vec<(String, bool)> {
        self.connections
            .lock()
            .iter()
            .filter(|(_, conn)| conn.last_health_check.elapsed() >= interval)
            .map(|(id, conn)| (id.clone(), conn.healthy))
            .collect()
    }

    pub fn contains(&self, server_id: &str) -> bool {
        self.connections.lock().contains(server_id)
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.connections
            .lock()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    pub fn clear(&self) {
        self.connections.lock().clear();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_connections: self.len(),
            capacity: self.capacity,
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_connections: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Map, Value};

    use super::*;
    use crate::{
        client::{CallOutcome, DiscoveredTool},
        error::BackendResult,
    };

    struct NullClient;

    #[async_trait]
    impl BackendClient for NullClient {
        async fn list_tools(&self) -> BackendResult<Vec<DiscoveredTool>> {
            Ok(vec![])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Option<Map<String, Value>>,
        ) -> BackendResult<CallOutcome> {
            Ok(CallOutcome {
                content: Value::Null,
                is_error: false,
            })
        }
    }

    fn test_connection() -> PooledConnection {
        PooledConnection::new(Arc::new(NullClient), "http://localhost:3000/mcp")
    }

    #[test]
    fn test_pool_insert_and_get() {
        let pool = ConnectionPool::new();
        assert!(pool.is_empty());

        pool.insert("server-a", test_connection());
        assert_eq!(pool.len(), 1);
        assert!(pool.contains("server-a"));

        let conn = pool.get("server-a").unwrap();
        assert!(conn.healthy);
        assert_eq!(conn.endpoint, "http://localhost:3000/mcp");
    }

    #[test]
    fn test_single_connection_per_backend() {
        let pool = ConnectionPool::new();
        pool.insert("server-a", test_connection());
        pool.insert("server-a", test_connection());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_mark_unhealthy_and_record_health() {
        let pool = ConnectionPool::new();
        pool.insert("server-a", test_connection());

        pool.mark_unhealthy("server-a");
        assert!(!pool.get("server-a").unwrap().healthy);

        let previous = pool.record_health("server-a", true);
        assert_eq!(previous, Some(false));
        assert!(pool.get("server-a").unwrap().healthy);

        assert!(pool.record_health("missing", true).is_none());
    }

    #[test]
    fn test_remove_leaves_nothing_cached() {
        let pool = ConnectionPool::new();
        pool.insert("server-a", test_connection());

        assert!(pool.remove("server-a").is_some());
        assert!(pool.get("server-a").is_none());
        assert!(pool.remove("server-a").is_none());
    }

    #[test]
    fn test_lru_eviction_fires_callback() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let mut pool = ConnectionPool::with_capacity(2);
        {
            let evicted = Arc::clone(&evicted);
            pool.set_eviction_callback(move |_| {
                evicted.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.insert("a", test_connection());
        pool.insert("b", test_connection());
        pool.insert("c", test_connection());

        assert_eq!(pool.len(), 2);
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
        assert!(!pool.contains("a"));
    }

    #[tokio::test]
    async fn test_stale_reporting() {
        let pool = ConnectionPool::new();
        pool.insert("server-a", test_connection());

        // Fresh connections are not stale at a long interval.
        assert!(pool.stale(Duration::from_secs(60)).is_empty());

        // A zero interval makes everything stale.
        let stale = pool.stale(Duration::ZERO);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0], ("server-a".to_string(), true));
    }

    #[test]
    fn test_stats_and_clear() {
        let pool = ConnectionPool::with_capacity(10);
        pool.insert("a", test_connection());

        let stats = pool.stats();
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.capacity, 10);

        pool.clear();
        assert!(pool.is_empty());
    }
}
