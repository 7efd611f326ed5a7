//! toolscout: query-driven tool discovery gateway.
//!
//! Aggregates tools from many backend MCP servers behind a single search
//! meta-operation. Instead of advertising hundreds of tools up front, the
//! gateway retrieves a ranked subset per query, exposes those tools for the
//! session, retires them after disuse, and forwards calls to the owning
//! backend over lazy, health-checked connections.
//!
//! ## Modules
//!
//! - [`config`]: YAML configuration with env overrides
//! - [`exposure`]: per-session exposed-tool lifecycle and eviction
//! - [`router`]: domain priority, intent/tenant hints, cluster dedup
//! - [`gateway`]: wiring and the search/dispatch operations
//! - [`server`]: the rmcp server surface

pub mod config;
pub mod error;
pub mod exposure;
pub mod gateway;
pub mod router;
pub mod server;

pub use config::{GatewayConfig, SearchConfig, StoreConfig};
pub use error::{GatewayError, GatewayResult};
pub use exposure::{ExposedTool, ExposureController, ExposureUpdate};
pub use gateway::{DispatchResult, Gateway, SearchResponse, SearchResultEntry};
pub use router::{RouteResult, ToolRouter};
pub use server::{ToolScoutServer, SEARCH_TOOL_NAME};
