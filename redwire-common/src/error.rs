//! # Protocol Errors
//!
//! Purpose: Describe the two failure families that originate in the wire
//! format itself: broken framing and server-reported errors.
//!
//! ## Design Principles
//! 1. **Fatal vs. Inline**: `FramingError` always poisons the stream, while
//!    `ServerError` is an ordinary reply value the caller may inspect.
//! 2. **Cheap Clones**: Both types are small and `Clone` so they can travel
//!    inside result trees.

use std::fmt;

/// Malformed input detected while decoding a reply.
///
/// Any of these means the client no longer knows where the next frame
/// begins, so the connection carrying the bytes must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// A reply line held only the CRLF terminator.
    #[error("protocol out of sync (empty line)")]
    EmptyLine,

    /// The first byte of a reply line is not one of `+ - : $ *`.
    #[error("protocol out of sync (line begins with {:?})", char::from(*.0))]
    UnknownTag(u8),

    /// The payload of an integer, length or count line is not a number.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// A bulk length or array count below -1.
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// A bulk payload was not followed by CRLF.
    #[error("protocol out of sync (no CRLF after bulk)")]
    MissingCrlf,
}

/// Error reply sent by the server (`-ERR ...` lines).
///
/// Not fatal to the connection: the server answered, it just refused the
/// command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    message: String,
}

impl ServerError {
    /// Wraps the text that followed the `-` tag.
    pub fn new(message: impl Into<String>) -> Self {
        ServerError {
            message: message.into(),
        }
    }

    /// Full error text, e.g. `WRONGTYPE Operation against a key ...`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Leading error code (`ERR`, `WRONGTYPE`, `EXECABORT`, ...).
    pub fn code(&self) -> &str {
        self.message.split_whitespace().next().unwrap_or("")
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ServerError {}
