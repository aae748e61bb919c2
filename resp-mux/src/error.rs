use std::io;
use std::sync::Arc;

use resp_proto::{ParseError, ServerError};

// ── Error ───────────────────────────────────────────────────────────────

/// Errors returned by the transport and pool.
///
/// `Clone` so that a single connection fault can be handed to every
/// operation that was pending when it happened.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The transport is closed (or closing) and accepts no more requests.
    #[error("transport closed")]
    Closed,

    /// I/O error on the underlying channel.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    /// The peer closed the stream while replies were still owed.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Malformed bytes from the peer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The server answered with an error value.
    #[error("server error: {0}")]
    Server(ServerError),

    /// A reply arrived that no request was waiting for, or a reply had an
    /// unexpected shape.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// The operation was canceled or timed out.
    #[error("operation canceled")]
    Canceled,

    /// The operation was awaited but its request never reached the writer.
    #[error("request was never sent")]
    NotSent,

    /// The producer side went away without completing the operation.
    #[error("operation abandoned")]
    Abandoned,

    /// All connections in the pool are down and reconnection failed.
    #[error("all connections failed")]
    AllConnectionsFailed,

    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<resp_proto::ReadError> for Error {
    fn from(err: resp_proto::ReadError) -> Self {
        match err {
            resp_proto::ReadError::Parse(e) => Error::Protocol(e),
            resp_proto::ReadError::Server(e) => Error::Server(e),
        }
    }
}

impl Error {
    /// Whether this error ended the connection it came from.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Error::Closed | Error::Io(_) | Error::UnexpectedEof | Error::Protocol(_)
        )
    }
}

// ── OperationError ──────────────────────────────────────────────────────

/// Why awaiting an [`Operation`](crate::Operation) did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError<E> {
    #[error("operation canceled")]
    Canceled,

    /// Awaited before the request was handed to the writer.
    #[error("operation was never sent")]
    NotSent,

    /// The remote was dropped after send without completing.
    #[error("operation abandoned")]
    Abandoned,

    /// Polled again after the outcome was already taken.
    #[error("operation outcome already consumed")]
    Consumed,

    #[error("{0}")]
    Fault(E),
}

impl From<OperationError<Error>> for Error {
    fn from(err: OperationError<Error>) -> Self {
        match err {
            OperationError::Canceled => Error::Canceled,
            OperationError::NotSent => Error::NotSent,
            OperationError::Abandoned | OperationError::Consumed => Error::Abandoned,
            OperationError::Fault(e) => e,
        }
    }
}
