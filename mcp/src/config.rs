//! Backend configuration types.
//!
//! Defines the transport configuration for remote tool servers plus the
//! retry and health-check tunables used by the connection manager.

use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Configuration for a single backend tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Stable identifier for the backend. Used in exposed-key derivation.
    pub id: String,

    #[serde(flatten)]
    pub transport: BackendTransport,
}

impl BackendConfig {
    pub fn new(id: impl Into<String>, transport: BackendTransport) -> Self {
        Self {
            id: id.into(),
            transport,
        }
    }

    /// Build a config from a bare endpoint address.
    ///
    /// Used when the index record carries a direct connection address rather
    /// than a statically configured backend. SSE endpoints are recognized by
    /// the conventional `/sse` suffix, everything else is streamable HTTP.
    pub fn from_endpoint(id: impl Into<String>, endpoint: &str) -> BackendResult<Self> {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(BackendError::Config(format!(
                "unsupported endpoint scheme: {}",
                endpoint
            )));
        }
        let transport = if endpoint.ends_with("/sse") {
            BackendTransport::Sse {
                url: endpoint.to_string(),
                token: None,
            }
        } else {
            BackendTransport::Streamable {
                url: endpoint.to_string(),
                token: None,
            }
        };
        Ok(Self::new(id, transport))
    }

    /// Canonical endpoint string for this backend.
    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum BackendTransport {
    Streamable {
        url: String,
        /// Bearer token for Authorization header
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Sse {
        url: String,
        /// Bearer token for Authorization header
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        envs: HashMap<String, String>,
    },
}

impl BackendTransport {
    pub fn endpoint(&self) -> String {
        match self {
            BackendTransport::Streamable { url, .. } => url.clone(),
            BackendTransport::Sse { url, .. } => url.clone(),
            BackendTransport::Stdio { command, args, .. } => {
                if args.is_empty() {
                    command.clone()
                } else {
                    format!("{} {}", command, args.join(" "))
                }
            }
        }
    }
}

impl fmt::Debug for BackendTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendTransport::Streamable { url, token } => f
                .debug_struct("Streamable")
                .field("url", url)
                .field("token", &token.as_ref().map(|_| "****"))
                .finish(),
            BackendTransport::Sse { url, token } => f
                .debug_struct("Sse")
                .field("url", url)
                .field("token", &token.as_ref().map(|_| "****"))
                .finish(),
            BackendTransport::Stdio {
                command,
                args,
                envs,
            } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("envs", &format!("{} vars", envs.len()))
                .finish(),
        }
    }
}

/// Retry tunables for connecting and forwarding.
///
/// The delay between attempts grows linearly with the attempt number
/// (base, 2x base, 3x base), not exponentially.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_attempt_timeout_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Health sweep tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_check_timeout_secs() -> u64 {
    5
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            check_timeout_secs: default_check_timeout_secs(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}
