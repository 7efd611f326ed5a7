//! Indexed tool records and search candidates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification of a tool's interface style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DomainTag {
    StructuredApi,
    ReasoningAid,
    BrowserAutomation,
    Filesystem,
    DataQuery,
    Observability,
    CloudResource,
    ShellExec,
    #[default]
    Generic,
}

impl DomainTag {
    /// Base routing priority. Structured APIs rank highest, shell execution
    /// lowest among real domains, and the generic fallback lowest of all.
    pub fn base_priority(&self) -> i32 {
        match self {
            DomainTag::StructuredApi => 5,
            DomainTag::ReasoningAid => 4,
            DomainTag::BrowserAutomation => 3,
            DomainTag::Filesystem => 3,
            DomainTag::DataQuery => 3,
            DomainTag::Observability => 2,
            DomainTag::CloudResource => 2,
            DomainTag::ShellExec => 1,
            DomainTag::Generic => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainTag::StructuredApi => "structured_api",
            DomainTag::ReasoningAid => "reasoning_aid",
            DomainTag::BrowserAutomation => "browser_automation",
            DomainTag::Filesystem => "filesystem",
            DomainTag::DataQuery => "data_query",
            DomainTag::Observability => "observability",
            DomainTag::CloudResource => "cloud_resource",
            DomainTag::ShellExec => "shell_exec",
            DomainTag::Generic => "generic",
        }
    }
}

impl fmt::Display for DomainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indexed tool: identity, owning backend, retrieval text, vector, and
/// optional classification tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Assigned at index-build time; not stable across re-indexing.
    pub id: u64,
    /// Owning backend id. `(server_id, name)` is unique.
    pub server_id: String,
    /// Direct connection address, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Original operation name as the backend knows it.
    pub name: String,
    pub description: String,
    /// Opaque schema, passed through verbatim.
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl ToolRecord {
    /// Unique `server:name` key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.server_id, self.name)
    }

    /// The text embedded and classified for this tool.
    pub fn embedding_text(&self) -> String {
        format!("{}: {}", self.name, self.description)
    }
}

/// A scored candidate flowing through the search pipeline.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub record: ToolRecord,
    /// Fused similarity, higher is more relevant.
    pub score: f32,
    /// Routing priority, derived after retrieval.
    pub priority: i32,
}

impl SearchCandidate {
    pub fn new(record: ToolRecord, score: f32) -> Self {
        Self {
            record,
            score,
            priority: 0,
        }
    }
}
