//! Typed errors for the dispatch core.
//!
//! Recoverable adapter failures never cross the `process_turn` boundary;
//! the workflow converts them into degraded responses. Only generation
//! exhaustion while producing the final text surfaces as a `TurnError`.

use thiserror::Error;

/// Errors from the capability registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("capability '{0}' is already registered")]
    DuplicateCapability(String),
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),
}

/// Errors from the retrieval adapter. Anything short of a transport
/// failure is expressed as an empty result, not an error.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("retrieval service unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the generation adapter.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("generation request timed out: {0}")]
    Timeout(String),
    #[error("generation service rate limited: {0}")]
    RateLimited(String),
    #[error("generation service produced an unusable decision: {0}")]
    MalformedDecision(String),
    #[error("generation service error: {0}")]
    Api(String),
}

/// Turn-level failure returned by `process_turn`. The caller's state is
/// left unmodified, so a retried turn starts from a clean history.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
}
