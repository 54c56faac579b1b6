//! Transport-agnostic duplex channel contract.
//!
//! The client core never touches a socket directly. It drives a [`Channel`]
//! obtained from a [`Connector`]:
//! - TCP streams (`tcp`)
//! - In-process pipes for tests and embedding (`memory`)
//!
//! This is the lowest layer of linkwire. Everything else builds on top of
//! the byte-oriented [`Channel`] type provided here.

pub mod channel;
pub mod error;
pub mod memory;
pub mod tcp;

pub use channel::{
    channel_pair, BoxFuture, Channel, ChannelEvent, ChannelPeer, ChannelSender, Connector,
    EventSink, OutboundQueue, SendFailure, DEFAULT_QUEUE_CAPACITY,
};
pub use error::{Result, TransportError};
pub use memory::{MemoryConnection, MemoryConnector, MemoryServer};
pub use tcp::{TcpConfig, TcpConnector};
