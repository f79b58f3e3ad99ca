//! Error types for the gateway core

use thiserror::Error;

/// Rejected input to the conflict resolvers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("Invalid span {start}..{end}: start must be less than end")]
    InvalidSpan { start: usize, end: usize },
}

/// Terminal failure of a rewritten response stream.
#[derive(Error, Debug)]
pub enum RewriteError {
    /// The upstream body failed mid-stream. Anything still held in the
    /// placeholder buffers is discarded.
    #[error("Upstream stream failed: {0}")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Failures surfaced while preparing a request for forwarding.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Secrets were found and the configured action is `block`.
    #[error("Request blocked: secrets detected ({})", .types.join(", "))]
    SecretsBlocked { types: Vec<String> },

    #[error("PII detection failed: {0}")]
    Detection(#[source] anyhow::Error),

    #[error(transparent)]
    Conflict(#[from] ConflictError),
}
