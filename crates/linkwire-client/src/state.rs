//! Connection lifecycle state machine.
//!
//! The machine is the only place state changes. Every accepted transition is
//! broadcast as a [`StateChange`]; rejected ones are logged and leave the
//! state untouched.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::control::DisconnectNotice;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }

    /// Whether `self -> to` is in the allowed transition table.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
                | (Disconnected | Connecting | Connected | Reconnecting, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionReason {
    /// `connect`, `disconnect` or `close` was called.
    Requested,
    /// The transport opened.
    Opened,
    ConnectFailed(String),
    TransportLost(String),
    HeartbeatTimeout,
    /// The inbound stream violated the wire format.
    Protocol(String),
    /// The server sent a disconnect notice.
    ServerNotice(DisconnectNotice),
    ReconnectExhausted,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionReason::Requested => f.write_str("requested"),
            TransitionReason::Opened => f.write_str("transport opened"),
            TransitionReason::ConnectFailed(err) => write!(f, "connect failed: {err}"),
            TransitionReason::TransportLost(err) => write!(f, "transport lost: {err}"),
            TransitionReason::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            TransitionReason::Protocol(err) => write!(f, "protocol error: {err}"),
            TransitionReason::ServerNotice(notice) => write!(f, "server notice: {notice}"),
            TransitionReason::ReconnectExhausted => f.write_str("reconnect attempts exhausted"),
        }
    }
}

/// Notification emitted for every accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: TransitionReason,
}

#[derive(Debug)]
pub struct StateMachine {
    state: Mutex<ConnectionState>,
    changes: broadcast::Sender<StateChange>,
}

impl StateMachine {
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            changes,
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Move to `to`, or fail with `InvalidTransition` and keep the state.
    pub fn transition(&self, to: ConnectionState, reason: TransitionReason) -> Result<StateChange> {
        let mut state = self.lock();
        self.apply(&mut state, to, reason)
    }

    /// Move to `to` only if the state is still `from`.
    ///
    /// Returns `None` when another transition got there first, which is
    /// the normal outcome of racing teardown paths.
    pub fn transition_from(
        &self,
        from: ConnectionState,
        to: ConnectionState,
        reason: TransitionReason,
    ) -> Option<StateChange> {
        let mut state = self.lock();
        let current = *state;
        if current != from {
            debug!(%current, expected = %from, %to, "skipping stale transition");
            return None;
        }
        self.apply(&mut state, to, reason).ok()
    }

    fn apply(
        &self,
        state: &mut MutexGuard<'_, ConnectionState>,
        to: ConnectionState,
        reason: TransitionReason,
    ) -> Result<StateChange> {
        let from = **state;
        if !from.can_transition_to(to) {
            warn!(%from, %to, %reason, "rejected state transition");
            return Err(ClientError::InvalidTransition { from, to });
        }

        **state = to;
        info!(%from, %to, %reason, "connection state changed");
        let change = StateChange { from, to, reason };
        // No receivers is fine.
        let _ = self.changes.send(change.clone());
        Ok(change)
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
