//! Retrieval layer for the toolscout gateway.
//!
//! ## Modules
//!
//! - [`embedding`]: embedding client for the sidecar service
//! - [`store`]: vector/lexical index over tool records
//! - [`hybrid`]: lexical + vector fused search
//! - [`domain`]: zero-shot interface-style classification
//! - [`cluster`]: capability clustering across backends

pub mod cluster;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod hybrid;
pub mod record;
pub mod store;

pub use cluster::{CapabilityClusterer, CLUSTER_THRESHOLD};
pub use domain::{DomainClassifier, CONFIDENCE_FLOOR};
pub use embedding::{cosine_similarity, Embedder, EmbeddingRole, HttpEmbedder};
pub use error::{RetrievalError, RetrievalResult};
pub use hybrid::{HybridSearchEngine, SearchOptions, DEFAULT_LEXICAL_WEIGHT, DEFAULT_VECTOR_WEIGHT};
pub use record::{DomainTag, SearchCandidate, ToolRecord};
pub use store::{MemoryStore, RedisStore, RetrievalStore};
