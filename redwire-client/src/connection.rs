//! # Connection
//!
//! Purpose: Own one transport plus its send/receive buffers and run
//! pipelined request batches over it.
//!
//! ## Design Principles
//! 1. **Pipelining**: A batch is encoded into one buffer and written with a
//!    single flush; replies are matched to requests purely by arrival order.
//! 2. **Desynchronization Guard**: Leftover bytes before a batch or after
//!    its last reply mean frame boundaries are lost, so the batch fails.
//! 3. **Poison and Discard**: Any failure while talking to the server closes
//!    the transport. A closed connection is never reopened.
//! 4. **Buffer Reuse**: Buffers live on the connection across batches.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use redwire_common::{encode_request, Needed, Reply, ReplyDecoder, Request};

use crate::config::ClientConfig;
use crate::error::{ClientResult, Error};
use crate::transport::BoxTransport;

/// Read size used when the decoder waits for a line.
const READ_CHUNK: usize = 8 * 1024;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, transport not opened yet.
    Unconnected,
    /// Transport open and initialized.
    Connected,
    /// Transport released; terminal.
    Closed,
}

/// Single server connection with reusable buffers.
pub struct Connection {
    config: Arc<ClientConfig>,
    stream: Option<BoxTransport>,
    state: ConnectionState,
    inbuf: BytesMut,
    outbuf: BytesMut,
    decoder: ReplyDecoder,
    // Set while a batch is sent but not fully answered.
    in_flight: bool,
}

impl Connection {
    /// Creates an unconnected connection; the transport opens on `connect`.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Connection {
            config,
            stream: None,
            state: ConnectionState::Unconnected,
            inbuf: BytesMut::with_capacity(READ_CHUNK),
            outbuf: BytesMut::with_capacity(256),
            decoder: ReplyDecoder::new(),
            in_flight: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once the transport is open and initialized.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True after the transport was released.
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// True when a batch was started but its replies were not all read,
    /// e.g. because the caller dropped the future. Such a connection can
    /// not be trusted to be in sync and must not be reused.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Opens the transport and runs the configured connect-time requests.
    ///
    /// Each connect-time request must answer with its expected status,
    /// otherwise the transport is closed and the connect fails. A failed
    /// connect is not retried.
    pub async fn connect(&mut self) -> ClientResult<()> {
        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closed => return Err(Error::Detached),
            ConnectionState::Unconnected => {}
        }

        let stream = match self.config.connector.connect().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "transport connect failed");
                self.state = ConnectionState::Closed;
                return Err(Error::Transport(err));
            }
        };
        self.stream = Some(stream);
        self.state = ConnectionState::Connected;

        let init = self.config.init_sequence();
        if init.is_empty() {
            debug!("connection established");
            return Ok(());
        }

        let requests: Vec<Request> = init.iter().map(|step| step.request.clone()).collect();
        let replies = self.run(&requests).await?;
        for (step, reply) in init.into_iter().zip(replies) {
            if !reply.is_status(&step.expect) {
                // Never echo the whole request here, AUTH carries a secret.
                let command = String::from_utf8_lossy(step.request.name()).into_owned();
                warn!(%command, "connect-time request refused");
                self.close().await;
                return Err(Error::Handshake { command, reply });
            }
        }
        debug!(init_requests = requests.len(), "connection established");
        Ok(())
    }

    /// Sends `requests` in one flush and reads exactly one reply per request.
    ///
    /// Fails without sending if bytes from an earlier exchange are still
    /// buffered, and fails if bytes remain after the last reply. Any failure
    /// closes the connection before the error is returned.
    pub async fn run(&mut self, requests: &[Request]) -> ClientResult<Vec<Reply>> {
        self.in_flight = true;
        let result = self.run_pipeline(requests).await;
        match &result {
            Ok(_) => self.in_flight = false,
            Err(err) => {
                warn!(error = %err, "closing connection after pipeline failure");
                self.close().await;
            }
        }
        result
    }

    /// Writes `requests` without waiting for replies.
    ///
    /// Used by pub/sub sessions, where unsolicited frames may already sit in
    /// the receive buffer. Failure closes the connection.
    pub async fn send(&mut self, requests: &[Request]) -> ClientResult<()> {
        for request in requests {
            trace!(%request, "queue request");
            encode_request(request, &mut self.outbuf);
        }
        let result = self.flush().await;
        if let Err(err) = &result {
            warn!(error = %err, "closing connection after send failure");
            self.close().await;
        }
        result
    }

    /// Reads the next reply frame. Failure closes the connection.
    pub async fn receive(&mut self) -> ClientResult<Reply> {
        let result = self.read_reply().await;
        if let Err(err) = &result {
            warn!(error = %err, "closing connection after receive failure");
            self.close().await;
        }
        result
    }

    /// Releases the transport and clears all buffers. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!(error = %err, "transport shutdown failed");
            }
            debug!("connection closed");
        }
        self.inbuf.clear();
        self.outbuf.clear();
        self.decoder.reset();
        self.state = ConnectionState::Closed;
    }

    async fn run_pipeline(&mut self, requests: &[Request]) -> ClientResult<Vec<Reply>> {
        self.ensure_synchronized("before sending")?;

        for request in requests {
            trace!(%request, "pipeline request");
            encode_request(request, &mut self.outbuf);
        }
        self.flush().await?;

        let mut replies = Vec::with_capacity(requests.len());
        for _ in requests {
            replies.push(self.read_reply().await?);
        }

        self.ensure_synchronized("after the last reply")?;
        trace!(replies = replies.len(), "pipeline complete");
        Ok(replies)
    }

    fn ensure_synchronized(&self, when: &str) -> ClientResult<()> {
        if self.inbuf.is_empty() && self.decoder.is_idle() {
            return Ok(());
        }
        Err(Error::Desync(format!(
            "{} unconsumed bytes {}",
            self.inbuf.len(),
            when
        )))
    }

    async fn flush(&mut self) -> ClientResult<()> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(not_open(self.state)),
        };
        stream.write_all(&self.outbuf).await?;
        stream.flush().await?;
        self.outbuf.clear();
        Ok(())
    }

    async fn read_reply(&mut self) -> ClientResult<Reply> {
        loop {
            if let Some(reply) = self.decoder.decode(&mut self.inbuf)? {
                return Ok(reply);
            }

            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(not_open(self.state)),
            };
            match self.decoder.needed(&self.inbuf) {
                Needed::Bytes(count) => self.inbuf.reserve(count.min(READ_CHUNK)),
                Needed::Line => self.inbuf.reserve(READ_CHUNK),
            }
            let read = stream.read_buf(&mut self.inbuf).await?;
            if read == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

fn not_open(state: ConnectionState) -> Error {
    match state {
        ConnectionState::Closed => Error::Detached,
        _ => Error::Transport(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection is not open",
        )),
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("buffered", &self.inbuf.len())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
