//! Candidate routing: domain priority, intent and tenant hints, and
//! cluster-based deduplication.
//!
//! Similarity search alone cannot distinguish "best capability" from "best
//! interface type" or pick which of five identical tools the user meant.
//! The router layers deterministic, explainable overrides on top of the
//! fuzzy retrieval signal: an ordered table of intent patterns, tenant
//! terms derived from the candidate backend ids themselves, a fixed
//! domain-priority table, and cluster dedup for equivalent capabilities.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::OnceLock,
};

use regex::Regex;
use toolscout_retrieval::{DomainTag, SearchCandidate};
use tracing::debug;

/// Priority boost when a candidate's domain matches the detected intent.
const DOMAIN_BOOST: i32 = 5;
/// Priority boost when a candidate's backend matches the tenant hint.
/// Larger than any base-priority spread so tenant intent wins.
const TENANT_BOOST: i32 = 10;

/// Minimum length for a tenant term derived from a backend id. Two keeps
/// region suffixes like "eu" addressable.
const MIN_TENANT_TERM_LEN: usize = 2;

/// Generic infrastructure words that never identify one backend.
const TENANT_STOPLIST: &[&str] = &[
    "mcp", "server", "srv", "api", "prod", "dev", "test", "stage", "main", "tools",
];

struct IntentSignal {
    pattern: Regex,
    domain: DomainTag,
    label: &'static str,
}

/// Ordered intent signals; the first match wins.
fn intent_signals() -> &'static [IntentSignal] {
    static SIGNALS: OnceLock<Vec<IntentSignal>> = OnceLock::new();
    SIGNALS.get_or_init(|| {
        let table: &[(&str, DomainTag, &str)] = &[
            (
                r"(?i)\b(?:run|execute|launch)\b.*\b(?:terminal|shell|console)\b",
                DomainTag::ShellExec,
                "run-in-terminal",
            ),
            (
                r"(?i)\bcommand line\b",
                DomainTag::ShellExec,
                "command-line",
            ),
            (
                r"(?i)\buse the api\b|\bapi call\b|\brest api\b",
                DomainTag::StructuredApi,
                "use-the-api",
            ),
            (
                r"(?i)\bstep by step\b|\bthink through\b|\breason about\b",
                DomainTag::ReasoningAid,
                "step-by-step",
            ),
            (
                r"(?i)\b(?:open|navigate|click|visit)\b.*\b(?:browser|page|website)\b",
                DomainTag::BrowserAutomation,
                "browser-action",
            ),
            (
                r"(?i)\b(?:read|write|edit|create)\b.*\b(?:file|directory|folder)\b",
                DomainTag::Filesystem,
                "file-action",
            ),
            (
                r"(?i)\bsql\b|\bdatabase query\b",
                DomainTag::DataQuery,
                "sql-query",
            ),
            (
                r"(?i)\b(?:metrics|logs|traces|dashboards?)\b",
                DomainTag::Observability,
                "observability",
            ),
        ];
        table
            .iter()
            .map(|(pattern, domain, label)| IntentSignal {
                pattern: Regex::new(pattern).expect("intent pattern must compile"),
                domain: *domain,
                label,
            })
            .collect()
    })
}

/// The routed, deduplicated candidate list plus the decisions behind it.
#[derive(Debug, Clone, Default)]
pub struct RouteResult {
    pub candidates: Vec<SearchCandidate>,
    /// Label of the matched intent signal, if any.
    pub detected_intent: Option<String>,
    pub forced_domain: Option<DomainTag>,
    /// Backend id bound by a tenant hint in the query, if any.
    pub forced_tenant: Option<String>,
    /// How many equivalent candidates were suppressed.
    pub deduplicated: usize,
    /// For clusters spanning more than one backend: all backend ids
    /// offering the capability, sorted.
    pub alternates: HashMap<String, Vec<String>>,
}

pub struct ToolRouter;

impl ToolRouter {
    pub fn new() -> Self {
        Self
    }

    /// Route a candidate list for a query.
    pub fn route(&self, mut candidates: Vec<SearchCandidate>, query: &str) -> RouteResult {
        let intent = detect_intent(query);
        let forced_domain = intent.map(|(domain, _)| domain);
        let detected_intent = intent.map(|(_, label)| label.to_string());

        let forced_tenant = detect_tenant(query, &candidates);

        for candidate in &mut candidates {
            let domain = candidate.record.domain.unwrap_or_default();
            let mut priority = domain.base_priority();
            if forced_domain == Some(domain) {
                priority += DOMAIN_BOOST;
            }
            if forced_tenant.as_deref() == Some(candidate.record.server_id.as_str()) {
                priority += TENANT_BOOST;
            }
            candidate.priority = priority;
        }

        candidates.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });

        let alternates = collect_alternates(&candidates);

        // Cluster dedup keeps the first (highest-priority) member of each
        // cluster. Skipped entirely under a tenant hint: the boost already
        // surfaces the right backend, and suppressing siblings could hide
        // the tenant's own tools.
        let mut deduplicated = 0;
        if forced_tenant.is_none() {
            let mut seen_clusters = HashSet::new();
            candidates.retain(|candidate| match &candidate.record.cluster_id {
                Some(cluster_id) => {
                    if seen_clusters.insert(cluster_id.clone()) {
                        true
                    } else {
                        deduplicated += 1;
                        false
                    }
                }
                None => true,
            });
        }

        if detected_intent.is_some() || forced_tenant.is_some() || deduplicated > 0 {
            debug!(
                intent = ?detected_intent,
                tenant = ?forced_tenant,
                deduplicated,
                "Routing decisions applied"
            );
        }

        RouteResult {
            candidates,
            detected_intent,
            forced_domain,
            forced_tenant,
            deduplicated,
            alternates,
        }
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Match the query against the ordered intent table; first match wins.
fn detect_intent(query: &str) -> Option<(DomainTag, &'static str)> {
    intent_signals()
        .iter()
        .find(|signal| signal.pattern.is_match(query))
        .map(|signal| (signal.domain, signal.label))
}

/// Derive tenant terms from the candidate backend ids and find the first
/// whole-word match in the query.
///
/// Terms come from splitting each backend id on `-`/`_`, dropping short
/// terms and stoplisted infrastructure words. A term claimed by more than
/// one backend is ambiguous and discarded. Longer terms are tried first.
fn detect_tenant(query: &str, candidates: &[SearchCandidate]) -> Option<String> {
    let server_ids: HashSet<&str> = candidates
        .iter()
        .map(|c| c.record.server_id.as_str())
        .collect();

    // term -> owning servers
    let mut term_owners: BTreeMap<String, HashSet<&str>> = BTreeMap::new();
    for server_id in &server_ids {
        for term in server_id.split(['-', '_']) {
            let term = term.to_lowercase();
            if term.len() < MIN_TENANT_TERM_LEN || TENANT_STOPLIST.contains(&term.as_str()) {
                continue;
            }
            term_owners.entry(term).or_default().insert(server_id);
        }
    }

    let mut terms: Vec<(String, &str)> = term_owners
        .into_iter()
        .filter_map(|(term, owners)| {
            // Ambiguous terms identify nothing.
            if owners.len() != 1 {
                return None;
            }
            let owner = owners.into_iter().next()?;
            Some((term, owner))
        })
        .collect();
    terms.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

    for (term, server_id) in terms {
        let pattern = format!(r"(?i)\b{}\b", regex::escape(&term));
        if let Ok(re) = Regex::new(&pattern) {
            if re.is_match(query) {
                return Some(server_id.to_string());
            }
        }
    }
    None
}

/// Backend ids per cluster, for clusters offered by more than one backend.
fn collect_alternates(candidates: &[SearchCandidate]) -> HashMap<String, Vec<String>> {
    let mut by_cluster: HashMap<String, HashSet<String>> = HashMap::new();
    for candidate in candidates {
        if let Some(cluster_id) = &candidate.record.cluster_id {
            by_cluster
                .entry(cluster_id.clone())
                .or_default()
                .insert(candidate.record.server_id.clone());
        }
    }

    by_cluster
        .into_iter()
        .filter(|(_, servers)| servers.len() > 1)
        .map(|(cluster_id, servers)| {
            let mut servers: Vec<String> = servers.into_iter().collect();
            servers.sort();
            (cluster_id, servers)
        })
        .collect()
}
