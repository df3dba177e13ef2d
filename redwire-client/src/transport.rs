//! # Transports
//!
//! Purpose: Open the byte streams connections run on (TCP, unix domain
//! sockets, or anything else a caller plugs in, such as a TLS wrapper).
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Connector` hides how a stream is obtained, so
//!    the connection layer only sees `AsyncRead + AsyncWrite`.
//! 2. **Caller-Owned Deadlines**: Only connect may time out here; read and
//!    write deadlines belong to whoever drives the connection.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Bidirectional byte stream a connection owns exclusively.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed transport handed out by connectors.
pub type BoxTransport = Box<dyn Transport>;

/// Factory for fresh transports.
#[async_trait]
pub trait Connector: fmt::Debug + Send + Sync {
    /// Opens a new stream to the server.
    async fn connect(&self) -> io::Result<BoxTransport>;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Connects to `addr`, e.g. "127.0.0.1:6379" or "cache.internal:6379".
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector {
            addr: addr.into(),
            connect_timeout: None,
        }
    }

    /// Fails connects that take longer than `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Target address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<BoxTransport> {
        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
            None => TcpStream::connect(&self.addr).await?,
        };
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "tcp transport connected");
        Ok(Box::new(stream))
    }
}

/// Unix domain socket connector.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixConnector {
    /// Connects to the socket file at `path`.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        UnixConnector { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self) -> io::Result<BoxTransport> {
        let stream = tokio::net::UnixStream::connect(&self.path).await?;
        debug!(path = %self.path.display(), "unix transport connected");
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transports for unit tests.

    use std::collections::VecDeque;
    use std::sync::Arc;

    use bytes::BytesMut;
    use parking_lot::Mutex;
    use redwire_common::{Reply, ReplyDecoder};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    /// Hands out pre-made duplex client ends, one per connect.
    #[derive(Debug, Default)]
    pub struct DuplexConnector {
        streams: Mutex<VecDeque<DuplexStream>>,
        pub connects: Mutex<usize>,
    }

    impl DuplexConnector {
        /// Creates a connector and the server ends for `count` connects.
        pub fn with_peers(count: usize) -> (Arc<Self>, Vec<DuplexStream>) {
            let connector = Arc::new(DuplexConnector::default());
            let mut servers = Vec::with_capacity(count);
            for _ in 0..count {
                let (client, server) = tokio::io::duplex(64 * 1024);
                connector.streams.lock().push_back(client);
                servers.push(server);
            }
            (connector, servers)
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        async fn connect(&self) -> io::Result<BoxTransport> {
            *self.connects.lock() += 1;
            match self.streams.lock().pop_front() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no peer left")),
            }
        }
    }

    /// Scripted server side of a duplex transport.
    ///
    /// Requests are arrays of bulk strings, so the reply decoder parses them.
    pub struct Peer {
        stream: DuplexStream,
        buf: BytesMut,
        decoder: ReplyDecoder,
    }

    impl Peer {
        pub fn new(stream: DuplexStream) -> Self {
            Peer {
                stream,
                buf: BytesMut::new(),
                decoder: ReplyDecoder::new(),
            }
        }

        /// Reads the next request and returns its arguments as text.
        pub async fn request(&mut self) -> Vec<String> {
            loop {
                if let Some(reply) = self.decoder.decode(&mut self.buf).expect("valid request") {
                    return match reply {
                        Reply::Array(items) => items
                            .into_iter()
                            .map(|item| match item {
                                Reply::Bulk(Some(data)) => String::from_utf8_lossy(&data).into_owned(),
                                other => panic!("request argument is not bulk: {other:?}"),
                            })
                            .collect(),
                        other => panic!("request is not an array: {other:?}"),
                    };
                }
                let read = self.stream.read_buf(&mut self.buf).await.expect("peer read");
                assert!(read > 0, "client hung up before sending a request");
            }
        }

        /// Writes raw reply bytes.
        pub async fn reply(&mut self, raw: &[u8]) {
            self.stream.write_all(raw).await.expect("peer write");
        }
    }
}
