//! Error types surfaced across the pool's control API.
//!
//! Most failure modes (transient transport failure, persistence failure,
//! cache-file parse failure, MTU exceeded, no tunnel available) are handled
//! internally as state transitions plus a log line and never cross a
//! `Result` boundary. The variants below cover what remains: configuration
//! errors and unreachable states.

use thiserror::Error;

/// Errors returned by [`crate::pool::TunnelPool`] control-API methods.
#[derive(Error, Debug)]
pub enum PoolError {
    /// `add()` was called with a URL the transport's syntactic check rejects,
    /// or one containing whitespace (unrepresentable in the cache file format).
    #[error("invalid tunnel URL: {0}")]
    InvalidUrl(String),

    /// A record was observed in a state unreachable from the tunnel state
    /// machine's transition table. Treated as a bug: the process aborts
    /// with a diagnostic, and this variant is what gets logged immediately
    /// before that abort.
    #[error("tunnel record in unreachable state: {0}")]
    InvariantViolation(String),
}
