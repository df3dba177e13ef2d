//! # Publish/Subscribe
//!
//! Purpose: Run a connection in subscriber mode, where every inbound frame
//! is either a subscription acknowledgment or a delivered message.
//!
//! ## Design Principles
//! 1. **Count Invariant**: Each acknowledgment carries the server's total
//!    subscription count, which must equal the tracked channels plus
//!    patterns. The server tags acknowledgments with nothing else, so a
//!    mismatch is treated as desynchronization.
//! 2. **No Lost Messages**: Messages that arrive while acknowledgments are
//!    still outstanding are queued and delivered first.
//! 3. **Poison and Discard**: Any failure closes the connection for good.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──connect──► Subscribing ──all acked──► Listening ──close/error──► Closed
//!                        ▲                         │
//!                        └── more (un)subscribes ──┘
//! ```

use std::collections::{HashSet, VecDeque};

use bytes::Bytes;
use futures::Stream;
use tracing::{debug, warn};

use redwire_common::{IntoArg, Reply, Request};

use crate::connection::Connection;
use crate::error::{ClientResult, Error};
use crate::pool::ConnectionPool;
use crate::value::{key_text, Decoding, Value};

/// Lifecycle of a pub/sub session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubState {
    Idle,
    Subscribing,
    Listening,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubKind {
    Subscribe,
    Psubscribe,
    Unsubscribe,
    Punsubscribe,
}

impl SubKind {
    fn command(self) -> &'static str {
        match self {
            SubKind::Subscribe => "SUBSCRIBE",
            SubKind::Psubscribe => "PSUBSCRIBE",
            SubKind::Unsubscribe => "UNSUBSCRIBE",
            SubKind::Punsubscribe => "PUNSUBSCRIBE",
        }
    }

    fn is_pattern(self) -> bool {
        matches!(self, SubKind::Psubscribe | SubKind::Punsubscribe)
    }

    fn from_ack(kind: &[u8]) -> Option<Self> {
        match kind {
            b"subscribe" => Some(SubKind::Subscribe),
            b"psubscribe" => Some(SubKind::Psubscribe),
            b"unsubscribe" => Some(SubKind::Unsubscribe),
            b"punsubscribe" => Some(SubKind::Punsubscribe),
            _ => None,
        }
    }
}

/// A delivered message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Pattern that matched, for pattern subscriptions.
    pub pattern: Option<Bytes>,
    /// Channel the message was published on.
    pub channel: Bytes,
    /// Message body, decoded per the session's decoding.
    pub payload: Value,
}

/// Subscriber session on a dedicated connection.
pub struct PubSub {
    conn: Option<Connection>,
    state: PubSubState,
    subscribed: HashSet<Bytes>,
    psubscribed: HashSet<Bytes>,
    subscription_count: i64,
    // Requested but not yet sent.
    requested: Vec<(SubKind, Bytes)>,
    // Sent but not yet acknowledged.
    unacked: VecDeque<(SubKind, Bytes)>,
    backlog: VecDeque<Message>,
    with_channel: bool,
    decoding: Decoding,
}

impl PubSub {
    /// Creates a subscriber on a connection taken from `pool`.
    ///
    /// The connection never goes back to the pool: once subscribed it can
    /// no longer carry ordinary commands.
    pub fn new(pool: &ConnectionPool) -> Self {
        PubSub {
            conn: Some(pool.acquire()),
            state: PubSubState::Idle,
            subscribed: HashSet::new(),
            psubscribed: HashSet::new(),
            subscription_count: 0,
            requested: Vec::new(),
            unacked: VecDeque::new(),
            backlog: VecDeque::new(),
            with_channel: false,
            decoding: Decoding::Raw,
        }
    }

    /// Subscribes to channels; takes effect on the next connect or receive.
    pub fn subscribe<I, A>(&mut self, channels: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.request(SubKind::Subscribe, channels)
    }

    /// Subscribes to channel patterns; takes effect on the next connect or receive.
    pub fn psubscribe<I, A>(&mut self, patterns: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.request(SubKind::Psubscribe, patterns)
    }

    /// Unsubscribes from channels; an empty list means every subscribed channel.
    pub fn unsubscribe<I, A>(&mut self, channels: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.request(SubKind::Unsubscribe, channels)
    }

    /// Unsubscribes from patterns; an empty list means every subscribed pattern.
    pub fn punsubscribe<I, A>(&mut self, patterns: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.request(SubKind::Punsubscribe, patterns)
    }

    /// Makes `receive` yield `[channel, payload]` lists instead of payloads.
    pub fn with_channel(&mut self) -> &mut Self {
        self.with_channel = true;
        self
    }

    /// Decodes valid UTF-8 payloads into text.
    pub fn strdecode(&mut self) -> &mut Self {
        self.decoding(Decoding::Str)
    }

    /// Decodes payloads into text or JSON.
    pub fn autodecode(&mut self) -> &mut Self {
        self.decoding(Decoding::Auto)
    }

    /// Sets how message payloads are decoded, for every later message.
    pub fn decoding(&mut self, decoding: Decoding) -> &mut Self {
        self.decoding = decoding;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PubSubState {
        self.state
    }

    /// Last subscription count reported by the server.
    pub fn subscription_count(&self) -> i64 {
        self.subscription_count
    }

    /// Channels acknowledged as subscribed.
    pub fn subscribed(&self) -> &HashSet<Bytes> {
        &self.subscribed
    }

    /// Patterns acknowledged as subscribed.
    pub fn psubscribed(&self) -> &HashSet<Bytes> {
        &self.psubscribed
    }

    /// Connects if needed, sends requested (un)subscriptions and waits until
    /// the server acknowledged all of them.
    pub async fn connect(&mut self) -> ClientResult<&mut Self> {
        let result = self.sync_subscriptions().await;
        match result {
            Ok(()) => Ok(self),
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Waits for the next message and renders it per `with_channel`.
    pub async fn receive(&mut self) -> ClientResult<Value> {
        let message = self.next_message().await?;
        if self.with_channel {
            return Ok(Value::List(vec![
                Value::Text(key_text(&message.channel)),
                message.payload,
            ]));
        }
        Ok(message.payload)
    }

    /// Waits for the next message.
    pub async fn next_message(&mut self) -> ClientResult<Message> {
        let result = self.listen().await;
        match result {
            Ok(message) => Ok(message),
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Endless stream of rendered messages; ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = ClientResult<Value>> {
        futures::stream::unfold(self, |mut pubsub| async move {
            if pubsub.state == PubSubState::Closed {
                return None;
            }
            let item = pubsub.receive().await;
            Some((item, pubsub))
        })
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
        self.state = PubSubState::Closed;
    }

    fn request<I, A>(&mut self, kind: SubKind, names: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let mut names: Vec<Bytes> = names.into_iter().map(IntoArg::into_arg).collect();
        if names.is_empty() {
            names = match kind {
                SubKind::Unsubscribe => self.subscribed.iter().cloned().collect(),
                SubKind::Punsubscribe => self.psubscribed.iter().cloned().collect(),
                _ => Vec::new(),
            };
        }
        for name in names {
            // Only a repeat of the latest pending op for this name is redundant.
            let latest = self
                .requested
                .iter()
                .rev()
                .find(|(k, n)| k.is_pattern() == kind.is_pattern() && *n == name);
            if latest.map_or(true, |(k, _)| *k != kind) {
                self.requested.push((kind, name));
            }
        }
        self
    }

    async fn sync_subscriptions(&mut self) -> ClientResult<()> {
        let conn = self.conn.as_mut().ok_or(Error::Detached)?;
        if !conn.is_connected() {
            conn.connect().await?;
        }

        if !self.requested.is_empty() {
            let requested = std::mem::take(&mut self.requested);
            conn.send(&group_requests(&requested)).await?;
            self.unacked.extend(requested);
        }

        if !self.unacked.is_empty() {
            self.state = PubSubState::Subscribing;
        }
        while !self.unacked.is_empty() {
            let reply = self.read_frame().await?;
            if let Some(message) = self.handle_frame(reply)? {
                self.backlog.push_back(message);
            }
        }
        self.state = PubSubState::Listening;
        debug!(
            channels = self.subscribed.len(),
            patterns = self.psubscribed.len(),
            "pub/sub listening"
        );
        Ok(())
    }

    async fn listen(&mut self) -> ClientResult<Message> {
        if self.state != PubSubState::Listening || !self.requested.is_empty() {
            self.sync_subscriptions().await?;
        }
        loop {
            if let Some(message) = self.backlog.pop_front() {
                return Ok(message);
            }
            let reply = self.read_frame().await?;
            if let Some(message) = self.handle_frame(reply)? {
                return Ok(message);
            }
        }
    }

    async fn read_frame(&mut self) -> ClientResult<Reply> {
        let conn = self.conn.as_mut().ok_or(Error::Detached)?;
        conn.receive().await
    }

    /// Classifies one frame: a message is returned, an acknowledgment
    /// updates the bookkeeping, anything else is a protocol error.
    fn handle_frame(&mut self, reply: Reply) -> ClientResult<Option<Message>> {
        let items = match reply {
            Reply::Array(items) if (3..=4).contains(&items.len()) => items,
            other => return Err(Error::unexpected("pub/sub frame", other)),
        };
        let kind = match items.first() {
            Some(Reply::Bulk(Some(kind))) => kind.clone(),
            _ => Bytes::new(),
        };
        if kind.is_empty() {
            return Err(Error::unexpected("pub/sub frame", Reply::Array(items)));
        }

        let mut parts = items.into_iter().skip(1);
        match (&kind[..], parts.len()) {
            (b"message", 2) => {
                let channel = bulk_part(parts.next())?;
                let payload = parts.next().map(Value::from).unwrap_or(Value::Nil);
                Ok(Some(self.message(None, channel, payload)))
            }
            (b"pmessage", 3) => {
                let pattern = bulk_part(parts.next())?;
                let channel = bulk_part(parts.next())?;
                let payload = parts.next().map(Value::from).unwrap_or(Value::Nil);
                Ok(Some(self.message(Some(pattern), channel, payload)))
            }
            (ack, 2) => {
                let kind = match SubKind::from_ack(ack) {
                    Some(kind) => kind,
                    None => {
                        return Err(Error::Desync(format!(
                            "unexpected pub/sub frame kind {:?}",
                            key_text(ack)
                        )))
                    }
                };
                let name = match parts.next() {
                    Some(Reply::Bulk(name)) => name,
                    Some(other) => return Err(Error::unexpected("bulk channel name", other)),
                    None => None,
                };
                let count = match parts.next() {
                    Some(Reply::Integer(count)) => count,
                    Some(other) => return Err(Error::unexpected("subscription count", other)),
                    None => return Err(Error::Desync("acknowledgment without count".into())),
                };
                self.acknowledge(kind, name, count)?;
                Ok(None)
            }
            (other, _) => Err(Error::Desync(format!(
                "unexpected pub/sub frame kind {:?}",
                key_text(other)
            ))),
        }
    }

    fn acknowledge(&mut self, kind: SubKind, name: Option<Bytes>, count: i64) -> ClientResult<()> {
        let position = match &name {
            Some(name) => {
                match kind {
                    SubKind::Subscribe => self.subscribed.insert(name.clone()),
                    SubKind::Psubscribe => self.psubscribed.insert(name.clone()),
                    SubKind::Unsubscribe => self.subscribed.remove(name),
                    SubKind::Punsubscribe => self.psubscribed.remove(name),
                };
                self.unacked.iter().position(|(k, n)| *k == kind && n == name)
            }
            // Unsubscribing while nothing is subscribed acks a nil channel.
            None => self.unacked.iter().position(|(k, _)| *k == kind),
        };
        if let Some(position) = position {
            self.unacked.remove(position);
        }

        self.subscription_count = count;
        let tracked = self.subscribed.len() + self.psubscribed.len();
        if count < 0 || count as usize != tracked {
            return Err(Error::Desync(format!(
                "server reports {} subscriptions, {} tracked",
                count, tracked
            )));
        }
        Ok(())
    }

    fn message(&self, pattern: Option<Bytes>, channel: Bytes, payload: Value) -> Message {
        Message {
            pattern,
            channel,
            payload: self.decoding.apply(payload),
        }
    }

    async fn fail(&mut self, err: Error) -> Error {
        warn!(error = %err, "pub/sub session failed, closing connection");
        self.close().await;
        err
    }
}

fn bulk_part(part: Option<Reply>) -> ClientResult<Bytes> {
    match part {
        Some(Reply::Bulk(Some(data))) => Ok(data),
        Some(other) => Err(Error::unexpected("bulk string", other)),
        None => Err(Error::Desync("truncated pub/sub frame".into())),
    }
}

/// One request per run of consecutive operations of the same kind.
fn group_requests(ops: &[(SubKind, Bytes)]) -> Vec<Request> {
    let mut runs: Vec<(SubKind, Vec<Bytes>)> = Vec::new();
    for (kind, name) in ops {
        match runs.last_mut() {
            Some((last, names)) if last == kind => names.push(name.clone()),
            _ => runs.push((*kind, vec![name.clone()])),
        }
    }
    runs.into_iter()
        .map(|(kind, names)| Request::cmd(kind.command()).args(names))
        .collect()
}
