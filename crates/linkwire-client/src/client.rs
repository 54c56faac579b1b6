use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use linkwire_frame::{encode_frame, Envelope, MessageType, RouteKey};
use linkwire_transport::{Channel, ChannelSender, Connector, TcpConfig, TcpConnector};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{self, ConnectionSettings, ExitCause, Shared};
use crate::control::{unix_millis, DisconnectNotice, TimeSyncRequest, TimeSyncResponse, TimeSyncSample};
use crate::error::{ClientError, Result};
use crate::ratelimit::TokenBucket;
use crate::reconnect::{run_campaign, CampaignOutcome};
use crate::router::{HandlerResult, Subscription};
use crate::state::{ConnectionState, StateChange, StateMachine, TransitionReason};
use crate::stats::ClientStats;

/// The live connection currently installed in the client.
struct Link {
    id: u64,
    sender: ChannelSender,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    state: StateMachine,
    shared: Arc<Shared>,
    limiter: TokenBucket,
    link: Mutex<Option<Link>>,
    next_link_id: AtomicU64,
    target: Mutex<Option<(String, u16)>>,
    campaign: Mutex<Option<CancellationToken>>,
    controller_started: Mutex<bool>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(link) = lock(&self.link).take() {
            link.cancel.cancel();
        }
    }
}

/// Handle to one logical connection.
///
/// Cloning is cheap; all clones drive the same connection. Dropping the
/// last clone stops the connection and the reconnect controller.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Build a client over any transport.
    pub fn new(config: ClientConfig, connector: impl Connector) -> Result<Self> {
        config.validate()?;
        let limiter = TokenBucket::new(&config.rate_limit);
        let state = StateMachine::new(config.state_channel_capacity);
        Ok(Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                state,
                shared: Arc::new(Shared::new()),
                limiter,
                link: Mutex::new(None),
                next_link_id: AtomicU64::new(1),
                target: Mutex::new(None),
                campaign: Mutex::new(None),
                controller_started: Mutex::new(false),
                shutdown: CancellationToken::new(),
                config,
            }),
        })
    }

    /// Build a client over TCP.
    pub fn tcp(config: ClientConfig) -> Result<Self> {
        let connector = TcpConnector::with_config(TcpConfig {
            queue_capacity: config.queue_capacity,
            ..TcpConfig::default()
        });
        Self::new(config, connector)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    /// Stream of every accepted state transition from now on.
    pub fn state_changes(&self) -> broadcast::Receiver<StateChange> {
        self.inner.state.subscribe()
    }

    /// Open the transport to `host:port` within the connect timeout.
    ///
    /// Only valid from `Disconnected`. The target is remembered for
    /// reconnect campaigns.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let inner = &self.inner;
        if inner.state.current() == ConnectionState::Closed {
            return Err(ClientError::Closed);
        }
        inner
            .state
            .transition(ConnectionState::Connecting, TransitionReason::Requested)?;
        *lock(&inner.target) = Some((host.to_string(), port));
        inner.ensure_controller();

        match inner.open(host, port).await {
            Ok(channel) => {
                if inner.install(channel, ConnectionState::Connecting) {
                    Ok(())
                } else if inner.state.current() == ConnectionState::Closed {
                    Err(ClientError::Closed)
                } else {
                    Err(ClientError::not_connected("connect aborted"))
                }
            }
            Err(err) => {
                inner.state.transition_from(
                    ConnectionState::Connecting,
                    ConnectionState::Disconnected,
                    TransitionReason::ConnectFailed(err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// Drop the connection without reconnecting. Outstanding requests fail
    /// with `NotConnected`.
    pub fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        let current = inner.state.current();
        match current {
            ConnectionState::Closed => return Err(ClientError::Closed),
            ConnectionState::Disconnected => return Ok(()),
            _ => {}
        }
        inner.cancel_campaign();
        inner.teardown_link("disconnect requested");
        inner
            .state
            .transition(ConnectionState::Disconnected, TransitionReason::Requested)
            .map(|_| ())
            .or_else(|err| match inner.state.current() {
                ConnectionState::Disconnected => Ok(()),
                _ => Err(err),
            })
    }

    /// Shut the client down for good. Every later call fails with `Closed`.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.state.current() == ConnectionState::Closed {
            return;
        }
        inner.cancel_campaign();
        inner.teardown_link("client closed");
        let _ = inner
            .state
            .transition(ConnectionState::Closed, TransitionReason::Requested);
        inner.shutdown.cancel();
    }

    /// Fire-and-forget business message.
    pub fn send(&self, route_key: RouteKey, payload: impl Into<Bytes>) -> Result<()> {
        self.inner.admit(route_key)?;
        self.inner
            .send_envelope(&Envelope::push(route_key, payload))
    }

    /// Request with the configured default timeout.
    pub async fn request(&self, route_key: RouteKey, payload: impl Into<Bytes>) -> Result<Envelope> {
        let timeout = self.inner.config.request_timeout;
        self.inner
            .exchange(MessageType::Business, route_key, payload.into(), timeout, None)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        route_key: RouteKey,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Envelope> {
        self.inner
            .exchange(MessageType::Business, route_key, payload.into(), timeout, None)
            .await
    }

    /// Request that also resolves `Cancelled` when `cancel` fires.
    pub async fn request_with_cancel(
        &self,
        route_key: RouteKey,
        payload: impl Into<Bytes>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Envelope> {
        self.inner
            .exchange(
                MessageType::Business,
                route_key,
                payload.into(),
                timeout,
                Some(cancel),
            )
            .await
    }

    /// Measure round trip and clock offset against the server.
    pub async fn sync_time(&self) -> Result<TimeSyncSample> {
        let request = TimeSyncRequest {
            client_send_ms: unix_millis(),
        };
        let payload = Bytes::from(serde_json::to_vec(&request)?);
        let started = Instant::now();
        let response = self
            .inner
            .exchange(
                MessageType::TimeSync,
                RouteKey::NONE,
                payload,
                self.inner.config.request_timeout,
                None,
            )
            .await?;
        let round_trip = started.elapsed();
        let reply: TimeSyncResponse = serde_json::from_slice(&response.payload)?;
        let sample = TimeSyncSample::from_exchange(round_trip, reply.server_ms, unix_millis());
        debug!(
            round_trip_ms = round_trip.as_millis() as u64,
            offset_ms = sample.offset_ms,
            "time sync"
        );
        Ok(sample)
    }

    /// Register a handler for pushes and unclaimed responses on `route_key`.
    ///
    /// Handlers run on the connection task and should return quickly.
    /// Call [`Subscription::unsubscribe`] to remove the handler.
    pub fn subscribe<F>(&self, route_key: RouteKey, handler: F) -> Subscription
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.shared.router.subscribe(route_key, handler)
    }

    /// The most recent disconnect notice sent by the server.
    pub fn last_disconnect(&self) -> Option<DisconnectNotice> {
        self.inner.shared.last_disconnect()
    }

    pub fn stats(&self) -> ClientStats {
        let shared = &self.inner.shared;
        shared.stats.snapshot(shared.pending.len())
    }

    /// Name of the underlying transport.
    pub fn transport_name(&self) -> &'static str {
        self.inner.connector.transport_name()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("transport", &self.transport_name())
            .finish()
    }
}

impl Inner {
    async fn open(&self, host: &str, port: u16) -> Result<Channel> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.connector.open(host, port)).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(ClientError::ConnectTimeout {
                addr: format!("{host}:{port}"),
                after: timeout,
            }),
        }
    }

    /// Start a connection task for `channel` and move `from -> Connected`.
    ///
    /// Returns `false` (and drops the channel) when the state moved on while
    /// the transport was opening.
    fn install(self: &Arc<Self>, channel: Channel, from: ConnectionState) -> bool {
        let mut link = lock(&self.link);
        if self
            .state
            .transition_from(from, ConnectionState::Connected, TransitionReason::Opened)
            .is_none()
        {
            debug!(%from, "discarding channel opened for a stale attempt");
            return false;
        }

        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let sender = channel.sender();
        let settings = ConnectionSettings {
            heartbeat_interval: self.config.heartbeat.interval,
            heartbeat_threshold: self.config.heartbeat.timeout_count,
            sweep_interval: self.config.pending_sweep_interval,
            frame: self.config.frame_config(),
        };
        let shared = Arc::clone(&self.shared);
        let weak = Arc::downgrade(self);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let cause = connection::run(channel, shared, settings, task_cancel).await;
            if let Some(inner) = weak.upgrade() {
                inner.connection_lost(id, cause);
            }
        });

        *link = Some(Link {
            id,
            sender,
            cancel,
            _task: task,
        });
        true
    }

    /// React to a connection task ending on its own.
    fn connection_lost(&self, link_id: u64, cause: ExitCause) {
        if cause == ExitCause::Shutdown {
            return;
        }
        {
            let mut link = lock(&self.link);
            if link.as_ref().map(|l| l.id) != Some(link_id) {
                return;
            }
            *link = None;
        }

        info!(%cause, "connection lost");
        self.shared.pending.drain_all(&cause.to_string());

        let reason = match &cause {
            ExitCause::TransportLost(reason) => TransitionReason::TransportLost(reason.clone()),
            ExitCause::HeartbeatTimeout => TransitionReason::HeartbeatTimeout,
            ExitCause::Protocol(reason) => TransitionReason::Protocol(reason.clone()),
            ExitCause::ServerNotice(notice) => TransitionReason::ServerNotice(notice.clone()),
            ExitCause::Shutdown => TransitionReason::Requested,
        };
        let target = if self.config.reconnect.enabled && cause.is_retryable() {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Disconnected
        };
        self.state
            .transition_from(ConnectionState::Connected, target, reason);
    }

    fn teardown_link(&self, reason: &str) {
        if let Some(link) = lock(&self.link).take() {
            link.cancel.cancel();
        }
        self.shared.pending.drain_all(reason);
    }

    fn cancel_campaign(&self) {
        if let Some(token) = lock(&self.campaign).take() {
            token.cancel();
        }
    }

    /// Spawn the reconnect controller once per client.
    fn ensure_controller(self: &Arc<Self>) {
        let mut started = lock(&self.controller_started);
        if *started {
            return;
        }
        *started = true;
        let changes = self.state.subscribe();
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(reconnect_controller(weak, changes, shutdown));
    }

    /// Admission checks shared by every caller-initiated send.
    fn admit(&self, route_key: RouteKey) -> Result<()> {
        match self.state.current() {
            ConnectionState::Connected => {}
            ConnectionState::Closed => return Err(ClientError::Closed),
            other => {
                return Err(ClientError::NotConnected {
                    reason: format!("connection is {other}"),
                    route_key: Some(route_key),
                    correlation_id: None,
                })
            }
        }
        if !self.limiter.try_acquire() {
            self.shared.stats.rate_limited();
            debug!(%route_key, "send rejected by rate limiter");
            return Err(ClientError::RateLimited { route_key });
        }
        Ok(())
    }

    fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let mut frame = bytes::BytesMut::new();
        encode_frame(envelope, &mut frame, self.config.max_frame_size)?;
        let frame = frame.freeze();

        let sender = lock(&self.link)
            .as_ref()
            .map(|link| link.sender.clone())
            .ok_or_else(|| ClientError::NotConnected {
                reason: "no live connection".to_string(),
                route_key: Some(envelope.route_key),
                correlation_id: Some(envelope.correlation_id).filter(|id| *id != 0),
            })?;

        let len = frame.len();
        sender.send(frame).map_err(|failure| ClientError::SendFailed {
            route_key: envelope.route_key,
            failure,
        })?;
        self.shared.stats.frame_sent(len);
        debug!(
            route_key = %envelope.route_key,
            correlation_id = envelope.correlation_id,
            bytes = len,
            "envelope sent"
        );
        Ok(())
    }

    async fn exchange(
        &self,
        message_type: MessageType,
        route_key: RouteKey,
        payload: Bytes,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Envelope> {
        self.admit(route_key)?;
        let handle = self
            .shared
            .pending
            .register_next(route_key, timeout, Instant::now())?;
        let envelope =
            Envelope::new(message_type, route_key, payload).with_correlation_id(handle.correlation_id());
        self.send_envelope(&envelope)?;

        let result = handle.wait(cancel).await;
        if let Err(ClientError::Timeout { correlation_id, .. }) = &result {
            self.shared.stats.timed_out();
            debug!(%route_key, correlation_id, "request timed out");
        }
        result
    }
}

/// Watches state changes and runs a reconnect campaign on every entry into
/// `Reconnecting`.
async fn reconnect_controller(
    weak: Weak<Inner>,
    mut changes: broadcast::Receiver<StateChange>,
    shutdown: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            change = changes.recv() => change,
        };
        let entered_reconnecting = match change {
            Ok(change) => change.to == ConnectionState::Reconnecting,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "state change stream lagged");
                true
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if !entered_reconnecting {
            continue;
        }

        let Some(inner) = weak.upgrade() else { return };
        if inner.state.current() != ConnectionState::Reconnecting {
            continue;
        }
        let Some((host, port)) = lock(&inner.target).clone() else {
            continue;
        };
        let campaign = inner.shutdown.child_token();
        *lock(&inner.campaign) = Some(campaign.clone());
        let config = inner.config.reconnect.clone();
        drop(inner);

        let outcome = run_campaign(&config, &campaign, |attempt| {
            reconnect_once(weak.clone(), host.clone(), port, campaign.clone(), attempt)
        })
        .await;

        let Some(inner) = weak.upgrade() else { return };
        lock(&inner.campaign).take();
        match outcome {
            CampaignOutcome::Reconnected { attempts } => {
                info!(attempts, "reconnected");
            }
            CampaignOutcome::Exhausted { attempts } => {
                warn!(attempts, "giving up on reconnect");
                inner.state.transition_from(
                    ConnectionState::Reconnecting,
                    ConnectionState::Disconnected,
                    TransitionReason::ReconnectExhausted,
                );
            }
            CampaignOutcome::Cancelled => {
                debug!("reconnect campaign cancelled");
            }
        }
    }
}

async fn reconnect_once(
    weak: Weak<Inner>,
    host: String,
    port: u16,
    campaign: CancellationToken,
    attempt: u32,
) -> std::result::Result<(), String> {
    let inner = weak.upgrade().ok_or_else(|| "client dropped".to_string())?;
    inner.shared.stats.reconnect_attempt();
    info!(attempt, %host, port, "reconnecting");
    let channel = inner.open(&host, port).await.map_err(|err| err.to_string())?;
    if inner.install(channel, ConnectionState::Reconnecting) {
        Ok(())
    } else {
        campaign.cancel();
        Err("state changed during reconnect".to_string())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use linkwire_transport::MemoryConnector;

    use super::*;

    #[test]
    fn invalid_config_is_rejected() {
        let (connector, _server) = MemoryConnector::pair();
        let config = ClientConfig {
            request_timeout: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert!(matches!(
            Client::new(config, connector),
            Err(ClientError::InvalidConfig(_))
        ));
    }

    #[test]
    fn sends_before_connect_are_not_connected() {
        let (connector, _server) = MemoryConnector::pair();
        let client = Client::new(ClientConfig::default(), connector).unwrap();
        let err = client.send(RouteKey::new(1, 1), &b"x"[..]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NotConnected);
        assert_eq!(err.route_key(), Some(RouteKey::new(1, 1)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn closed_client_rejects_everything() {
        let (connector, _server) = MemoryConnector::pair();
        let client = Client::new(ClientConfig::default(), connector).unwrap();
        client.close();

        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(
            client.connect("h", 1).await,
            Err(ClientError::Closed)
        ));
        assert!(matches!(
            client.request(RouteKey::new(1, 1), &b""[..]).await,
            Err(ClientError::Closed)
        ));
        assert!(matches!(client.disconnect(), Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn connect_failure_returns_to_disconnected() {
        let (connector, server) = MemoryConnector::pair();
        server.refuse_connections(true);
        let client = Client::new(ClientConfig::default(), connector).unwrap();
        let mut changes = client.state_changes();

        let err = client.connect("h", 1).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConnectFailed);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        assert_eq!(changes.recv().await.unwrap().to, ConnectionState::Connecting);
        let back = changes.recv().await.unwrap();
        assert_eq!(back.to, ConnectionState::Disconnected);
        assert!(matches!(back.reason, TransitionReason::ConnectFailed(_)));
    }
}
