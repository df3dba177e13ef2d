//! # Redwire Async Client
//!
//! Purpose: Talk to a Redis-protocol server over pipelined connections, with
//! pooling, client-checked transactions and publish/subscribe.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Sessions borrow connections from a shared
//!    pool and give them back on drop.
//! 2. **Pipelining**: A session sends every queued request in one write and
//!    reads the replies back in order.
//! 3. **Fail Closed**: Protocol or transport trouble closes the connection;
//!    it is never reused after an error.
//! 4. **Protocol Clarity**: Framing lives in `redwire-common`; this crate
//!    adds I/O and reply interpretation.
//!
//! ```no_run
//! # async fn demo() -> redwire_client::ClientResult<()> {
//! let client = redwire_client::Client::connect("127.0.0.1:6379");
//! let mut db = client.db();
//! let value = db.set("k", "v").get("k").execute().await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

mod client;
mod commands;
mod config;
mod connection;
mod error;
mod handler;
mod pool;
mod pubsub;
mod session;
mod transaction;
mod transport;
mod value;

pub use client::Client;
pub use config::{ClientConfig, InitRequest, DEFAULT_POOL_MAX};
pub use connection::{Connection, ConnectionState};
pub use error::{ClientResult, Error, TransactionStateError};
pub use handler::{apply_all, Handler, Transform};
pub use pool::ConnectionPool;
pub use pubsub::{Message, PubSub, PubSubState};
pub use session::Session;
pub use transaction::{TransactionPhase, TransactionState};
#[cfg(unix)]
pub use transport::UnixConnector;
pub use transport::{BoxTransport, Connector, TcpConnector, Transport};
pub use value::{Decoding, Value};

pub use redwire_common::{FramingError, IntoArg, Reply, Request, ServerError};
