//! # Result Handlers
//!
//! Purpose: Decide, per queued command, what its reply turns into once a
//! pipelined batch comes back.
//!
//! A handler either passes the reply through, checks it against a fixed
//! status token, maps it with a transform, or (for EXEC) walks a nested
//! handler list over the transaction's aggregate reply.

use std::fmt;

use redwire_common::Reply;

use crate::error::{ClientResult, Error};
use crate::value::Value;

/// Mapping applied to a reply by a transform handler.
pub type Transform = Box<dyn FnOnce(Reply) -> ClientResult<Value> + Send>;

/// What to do with one reply.
pub enum Handler {
    /// Deliver the reply as a value.
    Raw,
    /// Require this status token and produce no result.
    Expect(&'static str),
    /// Map the reply into a higher-level value.
    Transform(Transform),
    /// Aggregate EXEC reply, decoded with the handlers recorded inside MULTI.
    Transaction(Vec<Handler>),
}

impl Handler {
    /// Builds a transform handler.
    pub fn transform<F>(f: F) -> Self
    where
        F: FnOnce(Reply) -> ClientResult<Value> + Send + 'static,
    {
        Handler::Transform(Box::new(f))
    }

    /// Runs the handler on its reply.
    ///
    /// `Ok(None)` means the handler consumed the reply without producing a
    /// result (a matched status expectation). Server error replies are
    /// reported as `Value::Error` whatever the handler, so one failed
    /// command never hides the results of its neighbours.
    pub fn apply(self, reply: Reply) -> ClientResult<Option<Value>> {
        if let Reply::Error(err) = reply {
            return Ok(Some(Value::Error(err)));
        }
        match self {
            Handler::Raw => Ok(Some(Value::from(reply))),
            Handler::Expect(token) => {
                if reply.is_status(token) {
                    Ok(None)
                } else {
                    Err(Error::unexpected(token, reply))
                }
            }
            Handler::Transform(f) => f(reply).map(Some),
            Handler::Transaction(handlers) => match reply {
                Reply::NullArray => Ok(Some(Value::Nil)),
                Reply::Array(replies) => Ok(Some(Value::List(apply_all(handlers, replies)?))),
                other => Err(Error::unexpected("transaction result array", other)),
            },
        }
    }
}

/// Walks handlers and replies pairwise, in order.
pub fn apply_all(handlers: Vec<Handler>, replies: Vec<Reply>) -> ClientResult<Vec<Value>> {
    if handlers.len() != replies.len() {
        return Err(Error::Desync(format!(
            "{} handlers for {} replies",
            handlers.len(),
            replies.len()
        )));
    }
    let mut values = Vec::with_capacity(replies.len());
    for (handler, reply) in handlers.into_iter().zip(replies) {
        if let Some(value) = handler.apply(reply)? {
            values.push(value);
        }
    }
    Ok(values)
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Raw => f.write_str("Raw"),
            Handler::Expect(token) => write!(f, "Expect({:?})", token),
            Handler::Transform(_) => f.write_str("Transform"),
            Handler::Transaction(handlers) => f.debug_tuple("Transaction").field(handlers).finish(),
        }
    }
}
