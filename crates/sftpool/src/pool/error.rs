// ── Error types ──────────────────────────────────────────────────────────────

use thiserror::Error;

/// Failure during one session-establishment attempt.
///
/// Classification happens at the transport boundary: the ssh2-backed factory
/// tags the known host-key verification race as [`ConnectError::HandshakeRace`]
/// so that retry logic can match on the variant instead of on message text.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Authentication or network failure. Not retried.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The transient host-key verification race seen under concurrent
    /// handshakes. Safe to retry within the attempt budget.
    #[error("transient host-key verification race: {0}")]
    HandshakeRace(String),
}

/// Failure surfaced by the pool itself.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Session/channel establishment or teardown failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Internal bookkeeping invariant violated. Signals a defect in the
    /// pool, not a transient condition.
    #[error("connection pool consistency error: {0}")]
    Consistency(String),

    /// The pool has been shut down; no further acquisition or pooling.
    #[error("connection pool is shut down")]
    ShutDown,
}

impl From<ConnectError> for PoolError {
    fn from(e: ConnectError) -> Self {
        // Exhausted handshake-race retries escalate to a plain transport
        // failure, stringifying the underlying cause.
        PoolError::Transport(e.to_string())
    }
}
