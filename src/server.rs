//! Caller-facing MCP server surface.
//!
//! Exposes one permanent meta-tool, `search_tools`, plus whatever the
//! session's exposure controller currently advertises. Calls to exposed
//! tools are resolved and forwarded through the gateway; the exposed list
//! mutating emits a tool-list-changed notification so the caller re-fetches.

use std::{borrow::Cow, sync::Arc};

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
        ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    ErrorData, RoleServer, ServerHandler,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{exposure::ExposureController, gateway::Gateway};

/// Name of the always-present search meta-operation.
pub const SEARCH_TOOL_NAME: &str = "search_tools";

const SEARCH_TOOL_DESCRIPTION: &str = "Search the indexed catalog of backend tools by natural-language query. \
     Returns a ranked list of matching tools and makes them callable. \
     Call this first: other tools only become available after a search \
     surfaces them.";

pub struct ToolScoutServer {
    gateway: Arc<Gateway>,
    session: tokio::sync::Mutex<ExposureController>,
}

impl ToolScoutServer {
    /// One server instance per logical session: the exposure state is not
    /// shared across connections.
    pub async fn new(gateway: Arc<Gateway>) -> Self {
        let session = gateway.new_session().await;
        Self {
            gateway,
            session: tokio::sync::Mutex::new(session),
        }
    }

    fn search_meta_tool() -> Tool {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What kind of tool or capability you are looking for."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results (clamped to 50)."
                }
            },
            "required": ["query"]
        });
        Tool {
            name: Cow::Borrowed(SEARCH_TOOL_NAME),
            title: None,
            description: Some(Cow::Borrowed(SEARCH_TOOL_DESCRIPTION)),
            input_schema: Arc::new(value_to_object(&schema)),
            output_schema: None,
            annotations: None,
            icons: None,
        }
    }

    async fn handle_search(
        &self,
        arguments: Option<serde_json::Map<String, Value>>,
        context: &RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let arguments = arguments.unwrap_or_default();
        let Some(query) = arguments.get("query").and_then(Value::as_str) else {
            return Err(ErrorData::invalid_params(
                "search_tools requires a 'query' string argument",
                None,
            ));
        };
        let limit = arguments
            .get("limit")
            .and_then(Value::as_u64)
            .map(|limit| limit as usize);

        let response = {
            let mut session = self.session.lock().await;
            self.gateway.search(&mut session, query, limit).await
        };

        match response {
            Ok(response) => {
                if response.changed {
                    // Out-of-band signal; the payload is the list itself.
                    if let Err(e) = context.peer.notify_tool_list_changed().await {
                        warn!(error = %e, "Failed to send tool list notification");
                    }
                }
                let body = serde_json::to_string_pretty(&response).map_err(|e| {
                    ErrorData::internal_error(format!("serialize search response: {}", e), None)
                })?;
                Ok(CallToolResult::success(vec![Content::text(body)]))
            }
            // Index or embedding service down: a failed search, reported as
            // an error-flagged result so the caller can recover in-band.
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Tool search is unavailable: {}",
                e
            ))])),
        }
    }

    async fn handle_dispatch(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> CallToolResult {
        let result = {
            let mut session = self.session.lock().await;
            self.gateway.dispatch(&mut session, name, arguments).await
        };

        let content = content_blocks(result.content);
        if result.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}

impl ServerHandler for ToolScoutServer {
    fn get_info(&self) -> ServerInfo {
        let mut capabilities = ServerCapabilities::builder().enable_tools().build();
        if let Some(tools) = capabilities.tools.as_mut() {
            tools.list_changed = Some(true);
        }

        ServerInfo {
            instructions: Some(
                "Tool discovery gateway. Start with search_tools to find relevant \
                 backend tools; matching tools become callable and the tool list \
                 updates. Rarely used tools are retired again after a few requests."
                    .to_string(),
            ),
            capabilities,
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let session = self.session.lock().await;

        let mut tools = vec![Self::search_meta_tool()];
        for exposed in session.list() {
            tools.push(Tool {
                name: Cow::Owned(exposed.exposed_key.clone()),
                title: None,
                description: Some(Cow::Owned(exposed.description.clone())),
                input_schema: Arc::new(value_to_object(&exposed.input_schema)),
                output_schema: None,
                annotations: None,
                icons: None,
            });
        }

        debug!(exposed = tools.len() - 1, "Listing tools");
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        if request.name == SEARCH_TOOL_NAME {
            self.handle_search(request.arguments, &context).await
        } else {
            Ok(self.handle_dispatch(&request.name, request.arguments).await)
        }
    }
}

/// Coerce a JSON value into the object map rmcp tool schemas require.
fn value_to_object(value: &Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    }
}

/// Decode forwarded content blocks, falling back to a single text block.
fn content_blocks(content: Value) -> Vec<Content> {
    match serde_json::from_value::<Vec<Content>>(content.clone()) {
        Ok(blocks) if !blocks.is_empty() => blocks,
        _ => vec![Content::text(content.to_string())],
    }
}
