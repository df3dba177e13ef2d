//! # Replies
//!
//! Purpose: The decoded form of one server reply. Exactly one `Reply`
//! answers each `Request`, in send order.

use bytes::Bytes;

use crate::error::ServerError;

/// Reply value as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// +OK or +PONG style responses.
    Status(String),
    /// -ERR ... responses, kept as a value until a caller asks for it.
    Error(ServerError),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Bytes>),
    /// *... arrays.
    Array(Vec<Reply>),
    /// *-1, distinct from an empty array.
    NullArray,
}

impl Reply {
    /// True for `-` replies.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// True for a null bulk string or a null array.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::NullArray)
    }

    /// True when the reply is the status line `token`.
    pub fn is_status(&self, token: &str) -> bool {
        matches!(self, Reply::Status(text) if text == token)
    }

    /// Surfaces an error reply as `Err`, passing everything else through.
    pub fn into_result(self) -> Result<Reply, ServerError> {
        match self {
            Reply::Error(err) => Err(err),
            other => Ok(other),
        }
    }

    /// Bulk payload, if this is a non-null bulk string.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Reply::Bulk(Some(data)) => Some(data),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer reply.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Short name of the reply kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(Some(_)) => "bulk",
            Reply::Bulk(None) => "null bulk",
            Reply::Array(_) => "array",
            Reply::NullArray => "null array",
        }
    }
}
