//! # Connection Pool
//!
//! Purpose: Reuse connections across sessions to avoid repeated connects
//! and connect-time handshakes.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded stack of idle connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Never Wait**: A pool miss creates a fresh, unconnected connection;
//!    it opens lazily on first use.
//! 4. **Healthy Only**: Closed connections are dropped, never pooled.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::Connection;

struct PoolInner {
    config: Arc<ClientConfig>,
    idle: Mutex<Vec<Connection>>,
}

/// Connection pool handle. Clones share the same idle set.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        let capacity = config.pool_max.min(64);
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                idle: Mutex::new(Vec::with_capacity(capacity)),
            }),
        }
    }

    /// Configuration shared by every connection of this pool.
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.inner.config
    }

    /// Takes an idle connection, or creates an unconnected one.
    pub fn acquire(&self) -> Connection {
        if let Some(conn) = self.inner.idle.lock().pop() {
            return conn;
        }
        debug!("pool miss, creating connection");
        Connection::new(self.inner.config.clone())
    }

    /// Returns a connection for reuse.
    ///
    /// Closed connections, connections abandoned mid-batch and connections
    /// beyond the configured bound are dropped, which releases their
    /// transport.
    pub fn release(&self, conn: Connection) {
        if conn.is_closed() {
            debug!("dropping closed connection");
            return;
        }
        if conn.is_in_flight() {
            debug!("dropping connection with unread replies");
            return;
        }
        let mut idle = self.inner.idle.lock();
        if idle.len() < self.inner.config.pool_max {
            idle.push(conn);
        } else {
            debug!(pool_max = self.inner.config.pool_max, "pool full, dropping connection");
        }
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::DuplexConnector;

    fn pool(pool_max: usize) -> (ConnectionPool, Arc<DuplexConnector>) {
        let (connector, _servers) = DuplexConnector::with_peers(0);
        let config = ClientConfig::with_connector(connector.clone()).pool_max(pool_max);
        (ConnectionPool::new(Arc::new(config)), connector)
    }

    #[test]
    fn miss_creates_unconnected_connection() {
        let (pool, connector) = pool(2);
        let conn = pool.acquire();
        assert!(!conn.is_connected());
        assert!(!conn.is_closed());
        assert_eq!(*connector.connects.lock(), 0);
    }

    #[test]
    fn release_respects_bound() {
        let (pool, _connector) = pool(2);
        let conns: Vec<Connection> = (0..3).map(|_| pool.acquire()).collect();
        for conn in conns {
            pool.release(conn);
        }
        assert_eq!(pool.idle_count(), 2);
        let _reused = pool.acquire();
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn closed_connections_are_not_pooled() {
        let (pool, _connector) = pool(4);
        let mut conn = pool.acquire();
        conn.close().await;
        pool.release(conn);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn zero_bound_pools_nothing() {
        let (pool, _connector) = pool(0);
        pool.release(pool.acquire());
        assert_eq!(pool.idle_count(), 0);
    }
}
