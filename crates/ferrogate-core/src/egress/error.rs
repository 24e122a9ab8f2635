//! Egress error types

use crate::egress::connection::Route;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failure during an outbound attempt.
///
/// Produced by the connector and upstream-transport collaborators. The retry
/// orchestrator classifies each variant as retryable or terminal; see
/// [`crate::egress::retry::DefaultFailureClassifier`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection establishment exceeded the connect timeout
    #[error("connect timed out")]
    ConnectTimeout,

    /// An in-flight attempt exceeded the per-attempt request timeout
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),

    /// I/O operation was interrupted
    #[error("I/O interrupted")]
    Interrupted,

    /// Upstream host name could not be resolved
    #[error("name resolution failed: {0}")]
    NameResolution(String),

    /// Upstream actively refused the connection
    #[error("connection refused")]
    ConnectionRefused,

    /// Upstream closed the connection mid-exchange
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Transport-security negotiation with the upstream failed
    #[error("TLS negotiation failed: {0}")]
    TlsHandshake(String),

    /// Protocol violation in the upstream exchange
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Anything else
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Map an I/O error onto the closest transport failure variant.
    ///
    /// Keeps classification decisions out of connector implementations:
    /// a connector can hand over raw `io::Error`s and still get the
    /// retryable kinds recognized.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => TransportError::ConnectTimeout,
            io::ErrorKind::Interrupted => TransportError::Interrupted,
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => TransportError::ConnectionClosed,
            _ => TransportError::Io(err),
        }
    }
}

/// Errors surfaced by the connection pool
#[derive(Error, Debug)]
pub enum EgressError {
    /// No egress capacity for the route within the bounded acquisition wait
    #[error("pool exhausted for {route}: no connection within {waited_ms}ms")]
    PoolExhausted { route: Route, waited_ms: u64 },

    /// Opening a new connection failed
    #[error("connect to {route} failed: {source}")]
    Connect {
        route: Route,
        #[source]
        source: TransportError,
    },
}

/// Result type for egress operations
pub type EgressResult<T> = Result<T, EgressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_mapping() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            TransportError::from_io(refused),
            TransportError::ConnectionRefused
        ));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            TransportError::from_io(reset),
            TransportError::ConnectionClosed
        ));

        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert!(matches!(
            TransportError::from_io(timed_out),
            TransportError::ConnectTimeout
        ));

        let other = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(TransportError::from_io(other), TransportError::Io(_)));
    }
}
