//! Embedding-similarity routing
//!
//! Two similarity-scored layers sharing one [`UtteranceEncoder`]:
//! - [`RouteLayer`] maps utterances to pre-computed responses, bypassing the
//!   reasoning agent when confident.
//! - [`AgentRouter`] picks which reasoning agent handles the current turn in
//!   multi-agent mode.

pub mod agents;
pub mod encoder;
pub mod layer;
pub mod vector_cache;

pub use agents::AgentRouter;
pub use encoder::HashEncoder;
pub use layer::{RouteLayer, RouteMatch};
pub use vector_cache::VectorCache;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Route '{0}' has no utterances")]
    EmptyRoute(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid routing configuration: {0}")]
    Config(String),
}
