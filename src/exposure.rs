//! Exposed-tool set lifecycle: surface, retain, evict.
//!
//! One controller per logical session owns the set of currently callable
//! tools and the monotonic request counter. Search results refresh the set;
//! tools that fall out of results are carried for a few requests and then
//! evicted; always-exposed tools never age out. Old/new key comparison
//! decides whether the caller needs a list-changed notification.

use std::collections::{BTreeMap, HashSet};

use toolscout_mcp::naming;
use toolscout_retrieval::ToolRecord;
use tracing::debug;
use uuid::Uuid;

use crate::router::RouteResult;

/// A tool currently advertised as callable.
#[derive(Debug, Clone)]
pub struct ExposedTool {
    pub exposed_key: String,
    pub server_id: String,
    pub original_name: String,
    /// Bracket-prefixed with the raw server id; source of truth for
    /// resolution.
    pub description: String,
    pub input_schema: serde_json::Value,
    pub endpoint: Option<String>,
    /// Request counter value at last access.
    pub last_used: u64,
}

impl ExposedTool {
    pub fn from_record(record: &ToolRecord, counter: u64) -> Self {
        Self {
            exposed_key: naming::exposed_key(&record.server_id, &record.name),
            server_id: record.server_id.clone(),
            original_name: record.name.clone(),
            description: naming::prefixed_description(&record.server_id, &record.description),
            input_schema: record.input_schema.clone(),
            endpoint: record.endpoint.clone(),
            last_used: counter,
        }
    }
}

/// Outcome of applying a search to the exposed set.
#[derive(Debug, Clone, Default)]
pub struct ExposureUpdate {
    /// Whether the key set changed (drives the list-changed notification).
    pub changed: bool,
    pub added: Vec<String>,
    pub evicted: Vec<String>,
}

pub struct ExposureController {
    session_id: String,
    counter: u64,
    eviction_threshold: u64,
    exposed: BTreeMap<String, ExposedTool>,
    /// Keys that never age out.
    always_exposed: HashSet<String>,
}

impl ExposureController {
    pub fn new(eviction_threshold: u64) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            counter: 0,
            eviction_threshold: eviction_threshold.max(1),
            exposed: BTreeMap::new(),
            always_exposed: HashSet::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn request_counter(&self) -> u64 {
        self.counter
    }

    /// Tick the request counter. Called at the start of every search and
    /// every call dispatch; an attempted call counts as usage.
    pub fn next_request(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Pin a tool into the set permanently (e.g. reasoning aids).
    pub fn pin_always_exposed(&mut self, record: &ToolRecord) {
        let tool = ExposedTool::from_record(record, self.counter);
        self.always_exposed.insert(tool.exposed_key.clone());
        self.exposed.insert(tool.exposed_key.clone(), tool);
    }

    pub fn get(&self, exposed_key: &str) -> Option<&ExposedTool> {
        self.exposed.get(exposed_key)
    }

    pub fn list(&self) -> Vec<&ExposedTool> {
        self.exposed.values().collect()
    }

    pub fn len(&self) -> usize {
        self.exposed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exposed.is_empty()
    }

    /// Bump a tool's `last_used` to the current counter. The counter only
    /// grows, so `last_used` never decreases.
    pub fn touch(&mut self, exposed_key: &str) -> bool {
        let counter = self.counter;
        match self.exposed.get_mut(exposed_key) {
            Some(tool) => {
                tool.last_used = counter;
                true
            }
            None => false,
        }
    }

    /// Resolve an exposed key back to its backend and original name.
    ///
    /// The stored description's bracket prefix must re-derive the key;
    /// a missing entry and a malformed one both resolve to `None`.
    pub fn resolve(&self, exposed_key: &str) -> Option<naming::ParsedToolName> {
        let tool = self.exposed.get(exposed_key)?;
        naming::parse_tool_name(exposed_key, &tool.description)
    }

    /// Re-evaluate the exposed set against a fresh route result.
    ///
    /// The new set is: always-exposed entries, every routed candidate
    /// (newly surfaced ones stamped with the current counter), and previous
    /// entries still within the eviction window. Entries absent from the
    /// results for `eviction_threshold` requests are dropped.
    pub fn apply_search(&mut self, route: &RouteResult) -> ExposureUpdate {
        let mut next: BTreeMap<String, ExposedTool> = BTreeMap::new();

        for key in &self.always_exposed {
            if let Some(tool) = self.exposed.get(key) {
                next.insert(key.clone(), tool.clone());
            }
        }

        let mut added = Vec::new();
        for candidate in &route.candidates {
            // Surfacing in a result set refreshes the usage stamp.
            let tool = ExposedTool::from_record(&candidate.record, self.counter);
            let key = tool.exposed_key.clone();
            if !self.exposed.contains_key(&key) {
                added.push(key.clone());
            }
            next.insert(key, tool);
        }

        let mut evicted = Vec::new();
        for (key, tool) in &self.exposed {
            if next.contains_key(key) || self.always_exposed.contains(key) {
                continue;
            }
            let age = self.counter.saturating_sub(tool.last_used);
            if age < self.eviction_threshold {
                // Retained but not refreshed.
                next.insert(key.clone(), tool.clone());
            } else {
                evicted.push(key.clone());
            }
        }

        let old_keys: HashSet<&String> = self.exposed.keys().collect();
        let new_keys: HashSet<&String> = next.keys().collect();
        let changed = old_keys != new_keys;

        if changed {
            debug!(
                session = %self.session_id,
                exposed = next.len(),
                added = added.len(),
                evicted = evicted.len(),
                "Exposed tool set updated"
            );
        }

        self.exposed = next;
        ExposureUpdate {
            changed,
            added,
            evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use toolscout_retrieval::SearchCandidate;

    use super::*;

    fn record(server: &str, name: &str) -> ToolRecord {
        ToolRecord {
            id: 0,
            server_id: server.into(),
            endpoint: None,
            name: name.into(),
            description: format!("{} description", name),
            input_schema: serde_json::json!({"type": "object"}),
            vector: vec![],
            domain: None,
            cluster_id: None,
            keywords: vec![],
        }
    }

    fn route_with(records: &[ToolRecord]) -> RouteResult {
        RouteResult {
            candidates: records
                .iter()
                .map(|r| SearchCandidate::new(r.clone(), 0.5))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_search_exposes_results() {
        let mut exposure = ExposureController::new(5);
        exposure.next_request();

        let update = exposure.apply_search(&route_with(&[record("serena", "find_symbol")]));
        assert!(update.changed);
        assert_eq!(update.added, vec!["serena_find_symbol".to_string()]);

        let tool = exposure.get("serena_find_symbol").unwrap();
        assert_eq!(tool.server_id, "serena");
        assert_eq!(tool.description, "[serena] find_symbol description");
        assert_eq!(tool.last_used, 1);
    }

    #[test]
    fn test_identical_search_does_not_renotify() {
        let mut exposure = ExposureController::new(5);
        let route = route_with(&[record("serena", "find_symbol")]);

        exposure.next_request();
        assert!(exposure.apply_search(&route).changed);

        exposure.next_request();
        let update = exposure.apply_search(&route);
        assert!(!update.changed);
        assert!(update.added.is_empty());
        assert!(update.evicted.is_empty());
    }

    #[test]
    fn test_eviction_after_threshold_requests() {
        let mut exposure = ExposureController::new(5);

        exposure.next_request();
        exposure.apply_search(&route_with(&[record("serena", "find_symbol")]));

        // Subsequent searches return something else; the old tool ages.
        let other = route_with(&[record("github", "search_code")]);
        let mut change_events = 0;
        for _ in 0..6 {
            exposure.next_request();
            let update = exposure.apply_search(&other);
            if update.evicted.contains(&"serena_find_symbol".to_string()) {
                change_events += 1;
                // age reached the threshold exactly once, at request 6
                // (last_used = 1, threshold 5).
                assert_eq!(exposure.request_counter(), 6);
            }
        }

        assert_eq!(change_events, 1);
        assert!(exposure.get("serena_find_symbol").is_none());
        assert!(exposure.get("github_search_code").is_some());
    }

    #[test]
    fn test_usage_resets_eviction_clock() {
        let mut exposure = ExposureController::new(5);

        exposure.next_request();
        exposure.apply_search(&route_with(&[record("serena", "find_symbol")]));

        let other = route_with(&[record("github", "search_code")]);
        for _ in 0..3 {
            exposure.next_request();
            exposure.apply_search(&other);
        }

        // A call dispatch (even a failed one) refreshes the stamp.
        exposure.next_request();
        assert!(exposure.touch("serena_find_symbol"));
        let stamped = exposure.get("serena_find_symbol").unwrap().last_used;
        assert_eq!(stamped, 5);

        // Four more requests without it: still within the window at age 4.
        for _ in 0..4 {
            exposure.next_request();
            let update = exposure.apply_search(&other);
            assert!(!update.evicted.contains(&"serena_find_symbol".to_string()));
        }

        exposure.next_request();
        let update = exposure.apply_search(&other);
        assert!(update.evicted.contains(&"serena_find_symbol".to_string()));
    }

    #[test]
    fn test_last_used_is_monotonic() {
        let mut exposure = ExposureController::new(5);
        exposure.next_request();
        exposure.apply_search(&route_with(&[record("serena", "find_symbol")]));

        let mut previous = 0;
        for _ in 0..5 {
            exposure.next_request();
            exposure.touch("serena_find_symbol");
            let stamped = exposure.get("serena_find_symbol").unwrap().last_used;
            assert!(stamped >= previous);
            previous = stamped;
        }
    }

    #[test]
    fn test_always_exposed_never_evicts() {
        let mut exposure = ExposureController::new(5);
        exposure.pin_always_exposed(&record("serena", "think_about"));

        let other = route_with(&[record("github", "search_code")]);
        for _ in 0..20 {
            exposure.next_request();
            exposure.apply_search(&other);
        }

        assert!(exposure.get("serena_think_about").is_some());
    }

    #[test]
    fn test_resolve_round_trip_and_malformed() {
        let mut exposure = ExposureController::new(5);
        exposure.next_request();
        exposure.apply_search(&route_with(&[record("serena", "find_symbol")]));

        let parsed = exposure.resolve("serena_find_symbol").unwrap();
        assert_eq!(parsed.server_id, "serena");
        assert_eq!(parsed.original_name, "find_symbol");

        assert!(exposure.resolve("missing_tool").is_none());

        // Corrupt the stored description: resolution must fail closed.
        exposure
            .exposed
            .get_mut("serena_find_symbol")
            .unwrap()
            .description = "no bracket prefix".into();
        assert!(exposure.resolve("serena_find_symbol").is_none());
    }

    #[test]
    fn test_touch_unknown_key() {
        let mut exposure = ExposureController::new(5);
        exposure.next_request();
        assert!(!exposure.touch("ghost"));
    }
}
