use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for slotmux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the cluster client.
///
/// Connectivity failures (`Io`, `Timeout`, `PoolExhausted`, `PoolClosed`) are
/// retried by the dispatcher within its redirect budget. Everything else is
/// either passed through from the server unchanged or is terminal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A blocking step did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Which step timed out (connect, read, write).
        operation: &'static str,
        /// The configured limit.
        after: Duration,
    },

    /// No connection could be taken from a node pool within the wait timeout.
    #[error("connection pool for {node} exhausted after waiting {waited:?}")]
    PoolExhausted {
        /// Node key of the pool.
        node: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The node pool was closed while (or before) acquiring.
    #[error("connection pool for {node} is closed")]
    PoolClosed {
        /// Node key of the pool.
        node: String,
    },

    /// A protocol error occurred.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// Malformed bytes on the wire.
    #[error("decode error: {source}")]
    Decode {
        /// Underlying decode error.
        #[from]
        source: DecodeError,
    },

    /// The server returned an error.
    #[error("server error: {message}")]
    Server {
        /// Error message from server.
        message: String,
    },

    /// Authentication failed.
    #[error("authentication failed: {message}")]
    Auth {
        /// Error message from server.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// The cluster reported it cannot serve the request.
    #[error("cluster is down: {message}")]
    ClusterDown {
        /// Error message from server.
        message: String,
    },

    /// Keys of a multi-key command map to different slots.
    ///
    /// Use hash tags `{...}` to force related keys onto one slot.
    #[error("CROSSSLOT keys in request map to different slots ({first} and {second})")]
    CrossSlot {
        /// Slot of the first key.
        first: u16,
        /// First slot that differs from it.
        second: u16,
    },

    /// The client has been closed.
    #[error("client is closed")]
    ClientClosed,

    /// Key moved to another node (permanent redirect).
    ///
    /// Only ever seen as the cause of [`Error::TooManyRedirections`]; the
    /// dispatcher follows MOVED replies itself.
    #[error("MOVED to slot {slot} at {address}")]
    Moved {
        /// The slot number (0-16383).
        slot: u16,
        /// Address of the new owner.
        address: String,
    },

    /// Slot is being migrated (one-shot redirect).
    #[error("ASK to slot {slot} at {address}")]
    Ask {
        /// The slot number (0-16383).
        slot: u16,
        /// Address of the node importing the slot.
        address: String,
    },

    /// The redirect budget ran out while the cluster kept redirecting.
    #[error("too many cluster redirections ({attempts} attempts)")]
    TooManyRedirections {
        /// Attempts made before giving up.
        attempts: usize,
        /// The most recent redirect or failure.
        #[source]
        source: Box<Error>,
    },

    /// The redirect budget ran out on connectivity failures alone.
    #[error("cluster unavailable after {attempts} attempts")]
    ClusterUnavailable {
        /// Attempts made before giving up.
        attempts: usize,
        /// The most recent failure.
        #[source]
        source: Box<Error>,
    },

    /// Every known node failed during a fallback sweep.
    #[error("no reachable node in cluster")]
    NoReachableNode {
        /// First failure observed during the sweep, if any node was tried.
        #[source]
        source: Option<Box<Error>>,
    },
}

impl Error {
    /// Returns true for failures that mean "this node could not be talked to".
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::Io { .. }
                | Error::Timeout { .. }
                | Error::PoolExhausted { .. }
                | Error::PoolClosed { .. }
        )
    }

    /// Returns true when the error indicates a redirection loop.
    pub fn is_redirection_loop(&self) -> bool {
        matches!(self, Error::TooManyRedirections { .. })
    }

    /// Returns true if repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_connectivity()
            || matches!(
                self,
                Error::ClusterDown { .. }
                    | Error::ClusterUnavailable { .. }
                    | Error::NoReachableNode { .. }
                    | Error::TooManyRedirections { .. }
            )
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Error returned when bytes on the wire are not valid RESP.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The frame starts with a byte that is not a RESP type marker.
    #[error("unknown frame type byte {0:#04x}")]
    UnknownType(u8),

    /// A length or integer line could not be parsed.
    #[error("invalid integer in frame header")]
    InvalidInteger,

    /// A negative length other than -1.
    #[error("invalid length {0}")]
    InvalidLength(i64),

    /// A simple string or error line is not UTF-8.
    #[error("frame line is not valid UTF-8")]
    InvalidUtf8,

    /// A bulk string payload is not followed by CRLF.
    #[error("missing CRLF after bulk payload")]
    MissingTerminator,

    /// A frame exceeds the configured size limit.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Announced or buffered size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        let io_err = Error::Io {
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(io_err.is_connectivity());

        let timeout = Error::Timeout {
            operation: "read",
            after: Duration::from_millis(10),
        };
        assert!(timeout.is_connectivity());

        let exhausted = Error::PoolExhausted {
            node: "localhost:7000".to_string(),
            waited: Duration::from_millis(5),
        };
        assert!(exhausted.is_connectivity());

        assert!(!Error::protocol("bad").is_connectivity());
        assert!(!Error::CrossSlot { first: 1, second: 2 }.is_connectivity());
        assert!(!Error::Auth {
            message: "WRONGPASS".to_string()
        }
        .is_connectivity());
    }

    #[test]
    fn test_redirection_loop_keeps_cause() {
        let err = Error::TooManyRedirections {
            attempts: 5,
            source: Box::new(Error::Moved {
                slot: 42,
                address: "localhost:7001".to_string(),
            }),
        };
        assert!(err.is_redirection_loop());
        let cause = std::error::Error::source(&err).unwrap();
        assert_eq!(cause.to_string(), "MOVED to slot 42 at localhost:7001");
    }

    #[test]
    fn test_cross_slot_is_not_retryable() {
        assert!(!Error::CrossSlot { first: 1, second: 2 }.is_retryable());
        assert!(!Error::ClientClosed.is_retryable());
        assert!(Error::ClusterDown {
            message: "CLUSTERDOWN".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_no_reachable_node_without_cause() {
        let err = Error::NoReachableNode { source: None };
        assert!(std::error::Error::source(&err).is_none());
        assert_eq!(err.to_string(), "no reachable node in cluster");
    }

    #[test]
    fn test_error_from_decode() {
        let error: Error = DecodeError::InvalidInteger.into();
        assert!(matches!(error, Error::Decode { .. }));
        assert!(!error.is_connectivity());
    }

    #[test]
    fn test_error_display_timeout() {
        let error = Error::Timeout {
            operation: "connect",
            after: Duration::from_secs(2),
        };
        assert_eq!(error.to_string(), "connect timed out after 2s");
    }
}
