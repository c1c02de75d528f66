//! Error types for the proxy pipeline

use thiserror::Error;

/// Errors surfaced by the rewrite pipeline
///
/// Header rewriting is plain string work and cannot fail, so it has no
/// variant here. `Config` is fatal at startup; the other variants are
/// recovered per exchange and surfaced to the client as a generic
/// bad-gateway response.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed or unusable configuration at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// The upstream could not be reached or did not answer in time
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// A body could not be fully read
    #[error("body read failed: {0}")]
    BodyRead(String),
}
