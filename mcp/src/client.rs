//! Backend client abstraction and the rmcp-based production implementation.
//!
//! The connection manager talks to backends through the [`BackendClient`]
//! trait so the pool, retry loop, and health sweep can be exercised against
//! scripted fakes. [`RmcpConnector`] is the production [`BackendConnector`]
//! covering streamable HTTP, SSE, and child-process transports.

use std::{borrow::Cow, sync::Arc, time::Duration};

use async_trait::async_trait;
use rmcp::{
    model::CallToolRequestParam,
    service::RunningService,
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    config::{BackendConfig, BackendTransport},
    error::{BackendError, BackendResult},
};

type RmcpClient = RunningService<RoleClient, ()>;

/// A tool advertised by a backend: the raw catalog triplet.
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    /// Opaque input schema, passed through verbatim.
    pub input_schema: Value,
}

/// Result of forwarding a call to a backend.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Content blocks as returned by the backend, serialized to JSON.
    pub content: Value,
    /// Whether the backend flagged the result as an error.
    pub is_error: bool,
}

impl CallOutcome {
    /// Build a local error-flagged outcome with a plain text message.
    pub fn error_text(message: impl Into<String>) -> Self {
        Self {
            content: serde_json::json!([{ "type": "text", "text": message.into() }]),
            is_error: true,
        }
    }
}

/// A live connection to a backend tool server.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// List the backend's tool catalog. Also doubles as the cheap health probe.
    async fn list_tools(&self) -> BackendResult<Vec<DiscoveredTool>>;

    /// Invoke a tool by its original (backend-local) name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> BackendResult<CallOutcome>;
}

/// Establishes connections to backends.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, config: &BackendConfig) -> BackendResult<Arc<dyn BackendClient>>;
}

/// Production backend client over an rmcp session.
pub struct RmcpBackendClient {
    server_id: String,
    service: RmcpClient,
    call_timeout: Duration,
}

#[async_trait]
impl BackendClient for RmcpBackendClient {
    async fn list_tools(&self) -> BackendResult<Vec<DiscoveredTool>> {
        let tools = tokio::time::timeout(self.call_timeout, self.service.peer().list_all_tools())
            .await
            .map_err(|_| {
                BackendError::Timeout(format!("list tools on '{}' timed out", self.server_id))
            })?
            .map_err(|e| {
                BackendError::Transport(format!("list tools on '{}': {}", self.server_id, e))
            })?;

        Ok(tools
            .into_iter()
            .map(|tool| DiscoveredTool {
                name: tool.name.to_string(),
                description: tool
                    .description
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> BackendResult<CallOutcome> {
        let request = CallToolRequestParam {
            name: Cow::Owned(name.to_string()),
            arguments,
        };

        let result = tokio::time::timeout(self.call_timeout, self.service.call_tool(request))
            .await
            .map_err(|_| {
                BackendError::Timeout(format!(
                    "call '{}' on '{}' timed out",
                    name, self.server_id
                ))
            })?
            .map_err(|e| {
                BackendError::ToolExecution(format!(
                    "call '{}' on '{}': {}",
                    name, self.server_id, e
                ))
            })?;

        let is_error = result.is_error.unwrap_or(false);
        let content = serde_json::to_value(&result.content)
            .map_err(|e| BackendError::ToolExecution(format!("serialize tool result: {}", e)))?;

        Ok(CallOutcome { content, is_error })
    }
}

/// Production connector over rmcp client transports.
pub struct RmcpConnector {
    call_timeout: Duration,
    connect_timeout: Duration,
}

impl RmcpConnector {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            connect_timeout: Duration::from_secs(10),
        }
    }

    async fn connect_impl(&self, config: &BackendConfig) -> BackendResult<RmcpClient> {
        info!(
            server_id = %config.id,
            transport = ?config.transport,
            "Connecting to backend"
        );

        match &config.transport {
            BackendTransport::Stdio {
                command,
                args,
                envs,
            } => {
                let transport = TokioChildProcess::new(
                    tokio::process::Command::new(command).configure(|cmd| {
                        cmd.args(args)
                            .envs(envs.iter())
                            .stderr(std::process::Stdio::inherit());
                    }),
                )
                .map_err(|e| BackendError::Transport(format!("create stdio transport: {}", e)))?;

                let client = ().serve(transport).await.map_err(|e| {
                    BackendError::ConnectionFailed(format!("initialize stdio client: {}", e))
                })?;

                info!(server_id = %config.id, "Connected to stdio backend");
                Ok(client)
            }

            BackendTransport::Sse { url, token } => {
                let http = build_http_client(token.as_deref(), self.connect_timeout)?;

                let cfg = SseClientConfig {
                    sse_endpoint: url.clone().into(),
                    ..Default::default()
                };

                let transport = SseClientTransport::start_with_client(http, cfg)
                    .await
                    .map_err(|e| {
                        BackendError::Transport(format!("create SSE transport: {}", e))
                    })?;

                let client = ().serve(transport).await.map_err(|e| {
                    BackendError::ConnectionFailed(format!("initialize SSE client: {}", e))
                })?;

                info!(server_id = %config.id, url = %url, "Connected to SSE backend");
                Ok(client)
            }

            BackendTransport::Streamable { url, token } => {
                let transport = if let Some(tok) = token {
                    let mut cfg = StreamableHttpClientTransportConfig::with_uri(url.as_str());
                    cfg.auth_header = Some(tok.to_string());
                    StreamableHttpClientTransport::from_config(cfg)
                } else {
                    StreamableHttpClientTransport::from_uri(url.as_str())
                };

                let client = ().serve(transport).await.map_err(|e| {
                    BackendError::ConnectionFailed(format!("initialize streamable client: {}", e))
                })?;

                info!(server_id = %config.id, url = %url, "Connected to streamable HTTP backend");
                Ok(client)
            }
        }
    }
}

#[async_trait]
impl BackendConnector for RmcpConnector {
    async fn connect(&self, config: &BackendConfig) -> BackendResult<Arc<dyn BackendClient>> {
        let service = self.connect_impl(config).await?;
        Ok(Arc::new(RmcpBackendClient {
            server_id: config.id.clone(),
            service,
            call_timeout: self.call_timeout,
        }))
    }
}

fn build_http_client(
    token: Option<&str>,
    connect_timeout: Duration,
) -> BackendResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);

    if let Some(tok) = token {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", tok)
                .parse()
                .map_err(|e| BackendError::Transport(format!("auth token: {}", e)))?,
        );
        builder = builder.default_headers(headers);
    }

    builder
        .build()
        .map_err(|e| BackendError::Transport(format!("build HTTP client: {}", e)))
}
