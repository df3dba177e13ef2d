//! # Client Configuration
//!
//! Purpose: Collect everything a connection needs before its first byte:
//! how to open a transport, which fixed requests to run right after
//! connecting, and how many idle connections the pool may keep.

use std::fmt;
use std::sync::Arc;

use redwire_common::Request;

use crate::transport::{Connector, TcpConnector};

/// Default number of idle connections kept by the pool.
pub const DEFAULT_POOL_MAX: usize = 100;

/// A request run once per connection right after the transport opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRequest {
    /// Request to send.
    pub request: Request,
    /// Status reply that must come back, e.g. "OK".
    pub expect: String,
}

impl InitRequest {
    /// Pairs a request with the status it must produce.
    pub fn new(request: Request, expect: impl Into<String>) -> Self {
        InitRequest {
            request,
            expect: expect.into(),
        }
    }
}

/// Configuration for the client and its pool.
#[derive(Clone)]
pub struct ClientConfig {
    /// Transport factory.
    pub connector: Arc<dyn Connector>,
    /// Optional ACL username, only sent together with `password`.
    pub username: Option<String>,
    /// Optional password sent with AUTH on connect.
    pub password: Option<String>,
    /// Logical database selected on connect (0 skips SELECT).
    pub database: i64,
    /// Extra connect-time requests, run after AUTH and SELECT.
    pub init_requests: Vec<InitRequest>,
    /// Maximum idle connections kept in the pool.
    pub pool_max: usize,
}

impl ClientConfig {
    /// Configuration for a TCP server at `addr`.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::with_connector(Arc::new(TcpConnector::new(addr)))
    }

    /// Configuration for a server listening on a unix domain socket.
    #[cfg(unix)]
    pub fn unix(path: impl Into<std::path::PathBuf>) -> Self {
        Self::with_connector(Arc::new(crate::transport::UnixConnector::new(path)))
    }

    /// Configuration around a caller-supplied transport factory.
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        ClientConfig {
            connector,
            username: None,
            password: None,
            database: 0,
            init_requests: Vec::new(),
            pool_max: DEFAULT_POOL_MAX,
        }
    }

    /// Sets the AUTH password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the ACL username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the logical database.
    pub fn database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    /// Sets the idle pool bound.
    pub fn pool_max(mut self, pool_max: usize) -> Self {
        self.pool_max = pool_max;
        self
    }

    /// Appends a connect-time request.
    pub fn init_request(mut self, request: Request, expect: impl Into<String>) -> Self {
        self.init_requests.push(InitRequest::new(request, expect));
        self
    }

    /// Full connect-time sequence in send order.
    pub fn init_sequence(&self) -> Vec<InitRequest> {
        let mut sequence = Vec::with_capacity(self.init_requests.len() + 2);
        if let Some(password) = &self.password {
            let auth = match &self.username {
                Some(username) => Request::cmd("AUTH").arg(username).arg(password),
                None => Request::cmd("AUTH").arg(password),
            };
            sequence.push(InitRequest::new(auth, "OK"));
        }
        if self.database != 0 {
            sequence.push(InitRequest::new(
                Request::cmd("SELECT").arg(self.database),
                "OK",
            ));
        }
        sequence.extend(self.init_requests.iter().cloned());
        sequence
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::tcp("127.0.0.1:6379")
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("connector", &self.connector)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("init_requests", &self.init_requests)
            .field("pool_max", &self.pool_max)
            .finish()
    }
}
