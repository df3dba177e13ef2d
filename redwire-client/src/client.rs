use std::sync::Arc;

use crate::config::ClientConfig;
use crate::pool::ConnectionPool;
use crate::pubsub::PubSub;
use crate::session::Session;

/// Entry point holding the shared configuration and connection pool.
///
/// Cheap to clone; clones share one pool. Work happens on the sessions it
/// hands out: `db()` for command batches and transactions, `pubsub()` for
/// subscriber connections.
#[derive(Clone)]
pub struct Client {
    pool: ConnectionPool,
}

impl Client {
    /// Creates a client for the TCP server at `addr` with default settings.
    pub fn connect(addr: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::tcp(addr))
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        Client {
            pool: ConnectionPool::new(Arc::new(config)),
        }
    }

    /// Starts a session on a pooled connection.
    pub fn db(&self) -> Session {
        Session::new(self.pool.clone())
    }

    /// Starts a subscriber with `channels` requested up front.
    ///
    /// Nothing is sent until `connect` or the first `receive`.
    pub fn pubsub<I, A>(&self, channels: I) -> PubSub
    where
        I: IntoIterator<Item = A>,
        A: redwire_common::IntoArg,
    {
        let mut pubsub = PubSub::new(&self.pool);
        pubsub.subscribe(channels);
        pubsub
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &ClientConfig {
        self.pool.config()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::with_config(ClientConfig::default())
    }
}
