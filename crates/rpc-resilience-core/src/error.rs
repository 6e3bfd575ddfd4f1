//! Error types shared by endpoints and their wrappers.
//!
//! The taxonomy has three layers:
//!
//! - [`ConnectError`]: a single attempt to establish a connection failed.
//!   Reconnecting wrappers retry these on their own and only surface them as
//!   the cause of a [`ConnectionUnavailable`].
//! - [`ConnectionUnavailable`]: a call was attempted while no connection was
//!   available, or the bounded reconnect attempts were used up.
//! - [`CallError`]: the outcome of a failed call. Three of its variants
//!   ([`CallError::Shutdown`], [`CallError::Eof`] and
//!   [`CallError::UnexpectedEof`]) mean the connection itself was lost; every
//!   other variant is an ordinary call failure.
//!
//! # Example
//!
//! ```rust
//! use rpc_resilience_core::CallError;
//!
//! fn describe(error: &CallError) -> &'static str {
//!     if error.is_connection_lost() {
//!         "connection lost"
//!     } else if error.is_unavailable() {
//!         "no connection"
//!     } else {
//!         "call failed"
//!     }
//! }
//!
//! assert_eq!(describe(&CallError::Eof), "connection lost");
//! assert_eq!(describe(&CallError::Server("no such method".into())), "call failed");
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A single connection attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Dialing the remote address failed.
    #[error("failed to dial {address}: {source}")]
    Dial {
        /// Address that was dialed.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The connection was opened but the transport handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Any other connection failure.
    #[error("{0}")]
    Other(String),
}

impl ConnectError {
    /// Creates a [`ConnectError::Other`] from anything displayable.
    pub fn other(message: impl fmt::Display) -> Self {
        ConnectError::Other(message.to_string())
    }
}

/// No connection is available to serve a call.
///
/// Carries the last [`ConnectError`] observed by the reconnect logic, if any.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUnavailable {
    cause: Option<Arc<ConnectError>>,
}

impl ConnectionUnavailable {
    /// Creates an error with no known cause.
    pub fn new() -> Self {
        Self { cause: None }
    }

    /// Creates an error caused by the given connect failure.
    pub fn caused_by(cause: Arc<ConnectError>) -> Self {
        Self { cause: Some(cause) }
    }

    /// Creates an error from an optional cause.
    pub fn with_cause(cause: Option<Arc<ConnectError>>) -> Self {
        Self { cause }
    }

    /// Returns the last connect failure, if one was recorded.
    pub fn cause(&self) -> Option<&ConnectError> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ConnectionUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "connection unavailable: {}", cause),
            None => write!(f, "connection unavailable"),
        }
    }
}

impl std::error::Error for ConnectionUnavailable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Errors returned by [`Endpoint::call`](crate::Endpoint::call) and delivered
/// inside [`Call`](crate::Call) results.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The connection has been shut down.
    #[error("connection is shut down")]
    Shutdown,

    /// The peer closed the stream.
    #[error("end of stream")]
    Eof,

    /// The stream ended in the middle of a message.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// No connection was available to carry the call.
    #[error(transparent)]
    Unavailable(ConnectionUnavailable),

    /// The remote method ran and returned an error.
    #[error("server error: {0}")]
    Server(String),

    /// The request or reply could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Any other I/O failure on an established connection.
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
}

impl CallError {
    /// Returns `true` for the error kinds that mean the connection was lost:
    /// [`Shutdown`](Self::Shutdown), [`Eof`](Self::Eof) and
    /// [`UnexpectedEof`](Self::UnexpectedEof).
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            CallError::Shutdown | CallError::Eof | CallError::UnexpectedEof
        )
    }

    /// Returns `true` if the call was refused because no connection was available.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CallError::Unavailable(_))
    }

    /// Returns the unavailability details, if this is an
    /// [`Unavailable`](Self::Unavailable) error.
    pub fn as_unavailable(&self) -> Option<&ConnectionUnavailable> {
        match self {
            CallError::Unavailable(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConnectionUnavailable> for CallError {
    fn from(err: ConnectionUnavailable) -> Self {
        CallError::Unavailable(err)
    }
}

impl From<io::Error> for CallError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => CallError::UnexpectedEof,
            _ => CallError::Io(err),
        }
    }
}
