//! Persistent, self-healing client for a length-framed binary protocol.
//!
//! linkwire keeps one long-lived connection to a server and multiplexes
//! request/response exchanges and server pushes over it, with heartbeats,
//! automatic reconnect and outbound rate limiting.
//!
//! # Crate Structure
//!
//! - [`transport`]: duplex channel contract with TCP and in-memory connectors
//! - [`frame`]: envelope model, wire codec and incremental decoder
//! - [`client`]: the connection facade (behind the `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use linkwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use linkwire_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use linkwire_client::*;
}
