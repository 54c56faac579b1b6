//! Task that owns one live connection.
//!
//! The task owns the channel's inbound side, the frame decoder and the
//! heartbeat monitor, so none of them need locking. It runs until something
//! ends the connection; the returned [`ExitCause`] says what.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use linkwire_frame::{encode, Envelope, FrameConfig, FrameDecoder, FrameError, MessageType};
use linkwire_transport::{Channel, ChannelEvent, ChannelSender, SendFailure};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::control::{DisconnectNotice, DisconnectReason};
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::pending::PendingTable;
use crate::router::MessageRouter;
use crate::stats::StatsCounters;

/// State shared between the facade and connection tasks.
pub(crate) struct Shared {
    pub(crate) pending: PendingTable,
    pub(crate) router: Arc<MessageRouter>,
    pub(crate) stats: StatsCounters,
    pub(crate) last_disconnect: Mutex<Option<DisconnectNotice>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            pending: PendingTable::new(),
            router: Arc::new(MessageRouter::new()),
            stats: StatsCounters::default(),
            last_disconnect: Mutex::new(None),
        }
    }

    pub(crate) fn last_disconnect(&self) -> Option<DisconnectNotice> {
        self.last_disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_disconnect(&self, notice: DisconnectNotice) {
        *self
            .last_disconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(notice);
    }
}

/// Why a connection task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExitCause {
    /// The client tore the connection down itself.
    Shutdown,
    TransportLost(String),
    HeartbeatTimeout,
    /// The inbound stream broke the wire format. The stream is abandoned,
    /// a fresh connection starts clean.
    Protocol(String),
    ServerNotice(DisconnectNotice),
}

impl ExitCause {
    /// Whether auto-reconnect may follow.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            ExitCause::Shutdown => false,
            ExitCause::ServerNotice(notice) => notice.is_retryable(),
            ExitCause::TransportLost(_) | ExitCause::HeartbeatTimeout | ExitCause::Protocol(_) => {
                true
            }
        }
    }
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::Shutdown => f.write_str("shutdown"),
            ExitCause::TransportLost(reason) => write!(f, "transport lost: {reason}"),
            ExitCause::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            ExitCause::Protocol(reason) => write!(f, "protocol error: {reason}"),
            ExitCause::ServerNotice(notice) => write!(f, "server disconnect: {notice}"),
        }
    }
}

pub(crate) struct ConnectionSettings {
    pub(crate) heartbeat_interval: Duration,
    pub(crate) heartbeat_threshold: u32,
    pub(crate) sweep_interval: Duration,
    pub(crate) frame: FrameConfig,
}

/// Drive one connection until it ends.
pub(crate) async fn run(
    mut channel: Channel,
    shared: Arc<Shared>,
    settings: ConnectionSettings,
    cancel: CancellationToken,
) -> ExitCause {
    let sender = channel.sender();
    let mut decoder = FrameDecoder::with_config(settings.frame);
    let mut monitor = HeartbeatMonitor::new(settings.heartbeat_threshold);

    let heartbeat_frame = match encode(&Envelope::heartbeat()) {
        Ok(frame) => frame,
        Err(err) => return ExitCause::Protocol(err.to_string()),
    };
    if let Err(failure) = send_heartbeat(&sender, &heartbeat_frame, &shared) {
        return ExitCause::TransportLost(failure.to_string());
    }

    let start = Instant::now();
    let mut heartbeat = interval_at(
        start + settings.heartbeat_interval,
        settings.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep = interval_at(start + settings.sweep_interval, settings.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExitCause::Shutdown,
            event = channel.recv() => match event {
                Some(ChannelEvent::Data(bytes)) => {
                    shared.stats.bytes_received(bytes.len());
                    for item in decoder.feed(&bytes) {
                        let envelope = match item {
                            Ok(envelope) => envelope,
                            Err(err) => return protocol_failure(err),
                        };
                        shared.stats.frame_received();
                        if let Some(exit) = handle_inbound(envelope, &mut monitor, &shared) {
                            return exit;
                        }
                    }
                }
                Some(ChannelEvent::SendFailed(failure)) => {
                    warn!(%failure, "transport reported a failed write");
                }
                Some(ChannelEvent::Disconnected(reason)) => {
                    return ExitCause::TransportLost(reason);
                }
                None => return ExitCause::TransportLost("channel closed".to_string()),
            },
            _ = heartbeat.tick() => match monitor.on_interval() {
                Some(HeartbeatAction::Send) => {
                    if let Err(failure) = send_heartbeat(&sender, &heartbeat_frame, &shared) {
                        if failure == SendFailure::QueueFull {
                            debug!("outbound queue full, heartbeat skipped");
                        } else {
                            return ExitCause::TransportLost(failure.to_string());
                        }
                    }
                }
                Some(HeartbeatAction::Dead) => {
                    warn!(
                        missed = monitor.missed(),
                        threshold = monitor.threshold(),
                        "heartbeat timeout"
                    );
                    return ExitCause::HeartbeatTimeout;
                }
                None => {}
            },
            _ = sweep.tick() => {
                shared.pending.tick(Instant::now());
            }
        }
    }
}

fn protocol_failure(err: FrameError) -> ExitCause {
    warn!(error = %err, "inbound stream violated the wire format");
    ExitCause::Protocol(err.to_string())
}

fn send_heartbeat(
    sender: &ChannelSender,
    frame: &bytes::Bytes,
    shared: &Shared,
) -> Result<(), SendFailure> {
    sender.send(frame.clone())?;
    shared.stats.heartbeat_sent();
    shared.stats.frame_sent(frame.len());
    Ok(())
}

/// Demultiplex one inbound envelope. Returns an exit cause when the
/// envelope ends the connection.
fn handle_inbound(
    envelope: Envelope,
    monitor: &mut HeartbeatMonitor,
    shared: &Shared,
) -> Option<ExitCause> {
    match envelope.message_type {
        MessageType::Heartbeat => {
            monitor.on_response();
            None
        }
        MessageType::DisconnectNotify => {
            let notice = DisconnectNotice::from_envelope(&envelope).unwrap_or_else(|err| {
                warn!(error = %err, "unreadable disconnect notice");
                DisconnectNotice::new(DisconnectReason::Unknown, "unreadable disconnect notice")
            });
            shared.record_disconnect(notice.clone());
            Some(ExitCause::ServerNotice(notice))
        }
        MessageType::Business | MessageType::TimeSync => {
            debug!(
                route_key = %envelope.route_key,
                correlation_id = envelope.correlation_id,
                kind = %envelope.message_type,
                "inbound envelope"
            );
            if let Some(unclaimed) = shared.pending.complete(envelope) {
                shared.router.dispatch(&unclaimed);
            }
            None
        }
    }
}
