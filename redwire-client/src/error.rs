//! # Client Errors
//!
//! Purpose: One error type for every failure the client can surface, with
//! a clear split between errors that poison a connection and errors that
//! leave it healthy.

use redwire_common::{FramingError, Reply, ServerError};

/// Result type for the client.
pub type ClientResult<T> = Result<T, Error>;

/// Invalid WATCH/MULTI/DISCARD/EXEC ordering, caught before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransactionStateError {
    #[error("WATCH inside MULTI is not allowed")]
    WatchInsideMulti,
    #[error("UNWATCH inside MULTI is not allowed")]
    UnwatchInsideMulti,
    #[error("MULTI calls can not be nested")]
    NestedMulti,
    #[error("DISCARD without MULTI")]
    DiscardWithoutMulti,
    #[error("EXEC without MULTI")]
    ExecWithoutMulti,
}

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network or IO failure while connecting, reading or writing.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer closed the stream while a reply was still expected.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// RESP2 framing error.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Client and server disagree about frame boundaries.
    #[error("protocol desynchronized: {0}")]
    Desync(String),

    /// Reply did not have the shape the command handler requires.
    #[error("unexpected reply: expected {}, got {} {:?}", .expected, .got.kind(), .got)]
    UnexpectedReply { expected: String, got: Reply },

    /// Server error reply, surfaced on request of the caller.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// A connect-time request (AUTH, SELECT, ...) was refused.
    #[error("connection initialization failed on {command}: {reply:?}")]
    Handshake { command: String, reply: Reply },

    /// Invalid transaction ordering; nothing was sent.
    #[error("transaction state error: {0}")]
    Transaction(#[from] TransactionStateError),

    /// The connection was discarded after an earlier failure.
    #[error("connection was discarded after an earlier failure")]
    Detached,
}

impl Error {
    /// True when the error leaves the connection unusable.
    ///
    /// Server errors and client-side transaction errors never touch the
    /// stream; everything else means it can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Server(_) | Error::Transaction(_))
    }

    pub(crate) fn unexpected(expected: impl Into<String>, got: Reply) -> Self {
        Error::UnexpectedReply {
            expected: expected.into(),
            got,
        }
    }
}
