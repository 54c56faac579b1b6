//! Persistent, self-healing connection to a linkwire server.
//!
//! A [`Client`] owns one logical connection and multiplexes over it:
//! - Requests matched to responses by correlation id, each with a deadline
//! - Server pushes dispatched to route-key subscribers
//! - Heartbeats that detect a dead peer
//! - Automatic reconnect after unintentional disconnects
//! - A token bucket on every outbound send
//!
//! The connection state is observable through [`Client::state_changes`].
//!
//! ```no_run
//! # async fn demo() -> linkwire_client::Result<()> {
//! use linkwire_client::{Client, ClientConfig};
//! use linkwire_frame::RouteKey;
//!
//! let client = Client::tcp(ClientConfig::default())?;
//! client.connect("127.0.0.1", 7000).await?;
//! let reply = client.request(RouteKey::new(1, 1), &b"ping"[..]).await?;
//! println!("{} bytes back", reply.payload.len());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
pub(crate) mod connection;
pub mod control;
pub mod error;
pub mod heartbeat;
pub mod pending;
pub mod ratelimit;
pub mod reconnect;
pub mod router;
pub mod state;
pub mod stats;

pub use client::Client;
pub use config::{ClientConfig, HeartbeatConfig, RateLimitConfig, ReconnectConfig};
pub use control::{
    unix_millis, DisconnectNotice, DisconnectReason, TimeSyncRequest, TimeSyncResponse,
    TimeSyncSample,
};
pub use error::{ClientError, ErrorCode, Result};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use pending::{PendingHandle, PendingTable};
pub use ratelimit::TokenBucket;
pub use reconnect::{CampaignOutcome, ReconnectCampaign};
pub use router::{DispatchReport, HandlerResult, MessageRouter, Subscription, SubscriptionId};
pub use state::{ConnectionState, StateChange, StateMachine, TransitionReason};
pub use stats::ClientStats;
