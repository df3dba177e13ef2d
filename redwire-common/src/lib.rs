// redwire-common - Wire types and codec for the redwire client
//
// This crate holds the pure protocol layer: request framing and the
// incremental reply decoder. It performs no I/O of its own.

pub mod codec;
pub mod error;
pub mod reply;
pub mod request;

// Re-export for convenience
pub use codec::*;
pub use error::*;
pub use reply::*;
pub use request::*;
