//! Gateway error types.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Retrieval(#[from] toolscout_retrieval::RetrievalError),

    #[error(transparent)]
    Backend(#[from] toolscout_mcp::BackendError),
}
