//! # Session
//!
//! Purpose: Queue commands against one borrowed connection and execute
//! them as a single pipelined batch.
//!
//! ## Design Principles
//! 1. **Builder Pattern**: Command methods queue a request and return
//!    `&mut Self`; nothing touches the network until `execute`.
//! 2. **RAII Release**: Dropping a session returns its connection to the
//!    pool, unless the session failed or used a transaction.
//! 3. **Report Everything**: Per-command server errors come back as
//!    `Value::Error` results; nothing is rolled back or retried.
//! 4. **Poison and Discard**: Any failure during execution closes and
//!    detaches the connection before the error is returned.
//!
//! ## Execution Flow
//!
//! ```text
//! queue:   (handler, request) -> commands
//!          inside MULTI: ("QUEUED", request) -> commands,
//!                        handler -> transaction side list
//! execute: connect? -> Connection::run(requests) -> apply_all(handlers, replies)
//!          -> decoding -> one value unwrapped, otherwise a list
//! ```

use std::fmt;
use std::mem;

use tracing::{debug, warn};

use redwire_common::Request;

use crate::connection::Connection;
use crate::error::{ClientResult, Error};
use crate::handler::{apply_all, Handler};
use crate::pool::ConnectionPool;
use crate::transaction::TransactionState;
use crate::value::{Decoding, Value};

/// A request waiting for the next `execute`, with its result handler.
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub(crate) handler: Handler,
    pub(crate) request: Request,
}

/// Unit of work on one pooled connection.
pub struct Session {
    pool: ConnectionPool,
    conn: Option<Connection>,
    poolable: bool,
    commands: Vec<PendingCommand>,
    pub(crate) transaction: TransactionState,
    decoding: Decoding,
}

impl Session {
    /// Borrows a connection from `pool` for the lifetime of the session.
    pub fn new(pool: ConnectionPool) -> Self {
        let conn = pool.acquire();
        Session {
            pool,
            conn: Some(conn),
            poolable: true,
            commands: Vec::new(),
            transaction: TransactionState::Idle,
            decoding: Decoding::Raw,
        }
    }

    /// Queues an arbitrary command whose reply is delivered as is.
    pub fn call<I, A>(&mut self, name: &str, args: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: redwire_common::IntoArg,
    {
        self.queue(Request::cmd(name).args(args), Handler::Raw)
    }

    /// Queues a prepared request with an explicit handler.
    pub fn queue(&mut self, request: Request, handler: Handler) -> &mut Self {
        match &mut self.transaction {
            TransactionState::Queuing(recorded) => {
                // The server answers QUEUED now and the real reply at EXEC.
                recorded.push(handler);
                self.commands.push(PendingCommand {
                    handler: Handler::Expect("QUEUED"),
                    request,
                });
            }
            _ => self.commands.push(PendingCommand { handler, request }),
        }
        self
    }

    /// Queues a transaction control command outside the QUEUED path.
    pub(crate) fn queue_direct(&mut self, request: Request, handler: Handler) {
        self.commands.push(PendingCommand { handler, request });
    }

    /// Number of commands waiting for `execute`.
    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    /// Keeps this session's connection out of the pool when it ends.
    pub fn prevent_pooling(&mut self) -> &mut Self {
        self.poolable = false;
        self
    }

    /// True while the connection would go back to the pool on drop.
    pub fn is_poolable(&self) -> bool {
        self.poolable && self.conn.as_ref().map_or(false, |conn| !conn.is_in_flight())
    }

    /// Decodes valid UTF-8 payloads of the next execution into text.
    pub fn strdecode(&mut self) -> &mut Self {
        self.decoding(Decoding::Str)
    }

    /// Decodes payloads of the next execution into text or JSON.
    pub fn autodecode(&mut self) -> &mut Self {
        self.decoding(Decoding::Auto)
    }

    /// Sets the decoding for the next execution; it resets afterwards.
    pub fn decoding(&mut self, decoding: Decoding) -> &mut Self {
        self.decoding = decoding;
        self
    }

    /// Executes queued commands.
    ///
    /// A single result is returned as is; zero or several results come back
    /// as a `Value::List` in queue order.
    pub async fn execute(&mut self) -> ClientResult<Value> {
        let mut values = self.execute_all().await?;
        if values.len() == 1 {
            if let Some(value) = values.pop() {
                return Ok(value);
            }
        }
        Ok(Value::List(values))
    }

    /// Executes queued commands and returns every result in queue order.
    pub async fn execute_all(&mut self) -> ClientResult<Vec<Value>> {
        let result = self.run().await;
        if let Err(err) = &result {
            warn!(error = %err, "session failed, discarding its connection");
            self.poolable = false;
            if let Some(mut conn) = self.conn.take() {
                conn.close().await;
            }
        }
        result
    }

    async fn run(&mut self) -> ClientResult<Vec<Value>> {
        let conn = self.conn.as_mut().ok_or(Error::Detached)?;
        if !conn.is_connected() {
            conn.connect().await?;
        }
        if self.commands.is_empty() {
            return Ok(Vec::new());
        }
        if !matches!(self.transaction, TransactionState::Idle) {
            // Server-side WATCH/MULTI state must not leak to the next borrower.
            self.poolable = false;
        }

        let (handlers, requests): (Vec<Handler>, Vec<Request>) = mem::take(&mut self.commands)
            .into_iter()
            .map(|pending| (pending.handler, pending.request))
            .unzip();
        let replies = conn.run(&requests).await?;
        let values = apply_all(handlers, replies)?;

        let decoding = mem::take(&mut self.decoding);
        Ok(values.into_iter().map(|value| decoding.apply(value)).collect())
    }

    pub(crate) fn mark_unpoolable(&mut self) {
        self.poolable = false;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("conn", &self.conn)
            .field("poolable", &self.poolable)
            .field("pending", &self.commands.len())
            .field("transaction", &self.transaction.phase())
            .field("decoding", &self.decoding)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        if self.poolable {
            self.pool.release(conn);
        } else {
            debug!("session connection not returned to pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use redwire_common::ServerError;

    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::testing::{DuplexConnector, Peer};

    fn pool_with_peers(count: usize) -> (ConnectionPool, Vec<Peer>) {
        let (connector, servers) = DuplexConnector::with_peers(count);
        let config = ClientConfig::with_connector(connector);
        let peers = servers.into_iter().map(Peer::new).collect();
        (ConnectionPool::new(Arc::new(config)), peers)
    }

    #[tokio::test]
    async fn queues_without_io_and_returns_ordered_results() {
        let (pool, mut peers) = pool_with_peers(1);
        let mut peer = peers.remove(0);
        let server = tokio::spawn(async move {
            assert_eq!(peer.request().await, vec!["SET", "k", "v"]);
            assert_eq!(peer.request().await, vec!["GET", "k"]);
            peer.reply(b"+OK\r\n$1\r\nv\r\n").await;
            peer
        });

        let mut session = Session::new(pool.clone());
        session.set("k", "v").get("k");
        assert_eq!(session.pending(), 2);
        let result = session.execute().await.unwrap();
        let _peer = server.await.unwrap();

        assert_eq!(
            result,
            Value::List(vec![
                Value::Status("OK".into()),
                Value::Bytes(Bytes::from_static(b"v")),
            ])
        );
        assert_eq!(session.pending(), 0);
        drop(session);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn single_result_is_unwrapped_and_empty_batch_is_empty_list() {
        let (pool, mut peers) = pool_with_peers(1);
        let mut peer = peers.remove(0);
        let server = tokio::spawn(async move {
            peer.request().await;
            peer.reply(b":3\r\n").await;
            peer
        });

        let mut session = Session::new(pool);
        assert_eq!(session.execute().await.unwrap(), Value::List(Vec::new()));
        let value = session.incr("n").execute().await.unwrap();
        let _peer = server.await.unwrap();
        assert_eq!(value, Value::Int(3));
    }

    #[tokio::test]
    async fn server_error_is_a_value_and_connection_stays_pooled() {
        let (pool, mut peers) = pool_with_peers(1);
        let mut peer = peers.remove(0);
        let server = tokio::spawn(async move {
            peer.request().await;
            peer.request().await;
            peer.reply(b"-WRONGTYPE wrong kind\r\n:1\r\n").await;
            peer
        });

        let mut session = Session::new(pool.clone());
        let values = session.get("h").incr("n").execute_all().await.unwrap();
        let _peer = server.await.unwrap();
        assert_eq!(
            values,
            vec![
                Value::Error(ServerError::new("WRONGTYPE wrong kind")),
                Value::Int(1),
            ]
        );
        assert!(session.is_poolable());
        drop(session);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn failure_detaches_and_never_pools() {
        let (pool, mut peers) = pool_with_peers(1);
        let mut peer = peers.remove(0);
        let server = tokio::spawn(async move {
            peer.request().await;
            peer.reply(b"%1\r\n").await;
            peer
        });

        let mut session = Session::new(pool.clone());
        let err = session.get("k").execute().await.unwrap_err();
        let _peer = server.await.unwrap();
        assert!(matches!(err, Error::Framing(_)));
        assert!(!session.is_poolable());
        assert!(matches!(session.get("k").execute().await, Err(Error::Detached)));
        drop(session);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn mismatched_expectation_poisons_session() {
        let (pool, mut peers) = pool_with_peers(1);
        let mut peer = peers.remove(0);
        let server = tokio::spawn(async move {
            peer.request().await;
            peer.reply(b"+NOTPONG\r\n").await;
            peer
        });

        let mut session = Session::new(pool.clone());
        let err = session.ping().execute().await.unwrap_err();
        let _peer = server.await.unwrap();
        assert!(matches!(err, Error::UnexpectedReply { .. }));
        drop(session);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn decoding_applies_to_one_execution_only() {
        let (pool, mut peers) = pool_with_peers(1);
        let mut peer = peers.remove(0);
        let server = tokio::spawn(async move {
            peer.request().await;
            peer.reply(b"$2\r\nhi\r\n").await;
            peer.request().await;
            peer.reply(b"$2\r\nhi\r\n").await;
            peer
        });

        let mut session = Session::new(pool);
        let decoded = session.get("k").strdecode().execute().await.unwrap();
        let raw = session.get("k").execute().await.unwrap();
        let _peer = server.await.unwrap();
        assert_eq!(decoded, Value::Text("hi".into()));
        assert_eq!(raw, Value::Bytes(Bytes::from_static(b"hi")));
    }

    #[tokio::test]
    async fn cancelled_execute_never_returns_connection_to_pool() {
        let (pool, mut peers) = pool_with_peers(2);
        let mut abandoned = peers.remove(0);
        let mut next = peers.remove(0);

        let mut session = Session::new(pool.clone());
        let elapsed =
            tokio::time::timeout(Duration::from_millis(50), session.get("a").execute()).await;
        assert!(elapsed.is_err());
        assert_eq!(abandoned.request().await, vec!["GET", "a"]);
        assert!(!session.is_poolable());
        drop(session);
        assert_eq!(pool.idle_count(), 0);

        let server = tokio::spawn(async move {
            assert_eq!(next.request().await, vec!["GET", "b"]);
            next.reply(b"$7\r\nvalue-b\r\n").await;
            next
        });
        let mut session = Session::new(pool.clone());
        let value = session.get("b").execute().await.unwrap();
        let _next = server.await.unwrap();
        assert_eq!(value, Value::Bytes(Bytes::from_static(b"value-b")));
    }

    #[test]
    fn debug_shows_queue_and_transaction_phase() {
        let (pool, _peers) = pool_with_peers(1);
        let mut session = Session::new(pool);
        session.get("a").get("b");
        let rendered = format!("{session:?}");
        assert!(rendered.starts_with("Session {"), "{rendered}");
        assert!(rendered.contains("pending: 2"), "{rendered}");
        assert!(rendered.contains("transaction: Idle"), "{rendered}");
    }

    #[tokio::test]
    async fn prevent_pooling_keeps_connection_out_of_pool() {
        let (pool, mut peers) = pool_with_peers(1);
        let mut peer = peers.remove(0);
        let server = tokio::spawn(async move {
            peer.request().await;
            peer.reply(b":1\r\n").await;
            peer
        });

        let mut session = Session::new(pool.clone());
        session.prevent_pooling().delete(["k"]).execute().await.unwrap();
        let _peer = server.await.unwrap();
        drop(session);
        assert_eq!(pool.idle_count(), 0);
    }
}
