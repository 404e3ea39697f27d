//! Core AS2 (RFC 4130) message sender: security pipeline, HTTP transport,
//! MDN reconciliation and outbox polling.
//!
//! This crate implements the sending half of an AS2 trading-partner
//! exchange. It does not implement an inbound AS2 listener; see the
//! module docs on [`mdn`] for the synchronous-MDN boundary this crate
//! does cover.

pub mod certs;
pub mod crypto;
pub mod dumper;
pub mod error;
pub mod headers;
pub mod mdn;
pub mod message;
pub mod mime;
pub mod pending_store;
pub mod pipeline;
pub mod poller;
pub mod sender;
pub mod transport;

pub use error::{As2Error, Result};
pub use message::{Message, Partnership};
pub use sender::Sender;
