//! Error taxonomy.
//!
//! Configuration errors abort setup synchronously; per-request faults travel
//! forward along the chain's error path until an error handler consumes them
//! or the chain turns them into a 500 response.

use thiserror::Error;

/// Errors raised while building routes or loading mock configuration.
///
/// These surface at registration time and must abort setup; a server is
/// never started with a half-valid mock table.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required registration argument was empty or missing.
    #[error("not enough parameters: {0}")]
    NotEnoughParameters(&'static str),

    /// A pattern route failed to compile.
    #[error("invalid route pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A string did not name a known HTTP method.
    #[error("invalid http method '{0}'")]
    InvalidMethod(String),

    /// A status code outside the valid HTTP range.
    #[error("invalid status code: {0}")]
    InvalidStatus(u16),
}

/// A per-request fault signaled by a handler.
///
/// Faults do not unwind; they are carried forward through the remaining
/// handlers (error-aware handlers may recover or replace them) and become a
/// plain-text 500 if still pending when the chain ends.
#[derive(Debug, Error)]
pub enum Fault {
    /// A mock resolver function failed.
    #[error("mock resolver failed: {0}")]
    Resolver(anyhow::Error),

    /// A data or page transform failed.
    #[error("mock transform failed: {0}")]
    Transform(anyhow::Error),

    /// The configured serializer failed.
    #[error("mock serializer failed: {0}")]
    Serialize(anyhow::Error),

    /// Any other handler failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
