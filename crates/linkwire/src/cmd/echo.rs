use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use linkwire_client::{unix_millis, DisconnectNotice, DisconnectReason, TimeSyncResponse};
use linkwire_frame::{Envelope, EnvelopeCodec, FrameError, MessageType, RouteKey};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cmd::{parse_addr, parse_duration, EchoArgs};
use crate::exit::{io_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

/// What the server does with one inbound envelope.
#[derive(Debug, PartialEq)]
enum Reply {
    Send(Envelope),
    Ignore,
    Hangup,
}

pub async fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let (host, port) = parse_addr(&args.addr)?;
    let push_interval = parse_duration(&args.push_interval)?;
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|err| io_error("bind failed", err))?;
    let local = listener
        .local_addr()
        .map_err(|err| io_error("bind failed", err))?;
    info!(addr = %local, "echo server listening");

    let shutdown = CancellationToken::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                shutdown.cancel();
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(|err| io_error("accept failed", err))?;
                let session = Session {
                    peer,
                    push_route: args.push_route,
                    push_interval,
                    shutdown: shutdown.child_token(),
                };
                tokio::spawn(session.serve(stream));
            }
        }
    }

    // Give sessions a moment to deliver their goodbye notices.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(SUCCESS)
}

struct Session {
    peer: SocketAddr,
    push_route: Option<RouteKey>,
    push_interval: Duration,
    shutdown: CancellationToken,
}

impl Session {
    async fn serve(self, stream: TcpStream) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "could not set TCP_NODELAY");
        }
        info!(peer = %self.peer, "client connected");
        let mut framed = Framed::new(stream, EnvelopeCodec::new());
        let mut pushes = tokio::time::interval(self.push_interval);
        pushes.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pushed: u64 = 0;

        let outcome: Result<(), FrameError> = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let notice = DisconnectNotice::new(DisconnectReason::ServerClose, "server shutting down");
                    if let Ok(envelope) = notice.to_envelope() {
                        let _ = framed.send(envelope).await;
                    }
                    break Ok(());
                }
                _ = pushes.tick(), if self.push_route.is_some() => {
                    let Some(route) = self.push_route else { continue };
                    pushed += 1;
                    let body = format!("push {pushed}");
                    if let Err(err) = framed.send(Envelope::push(route, body.into_bytes())).await {
                        break Err(err);
                    }
                }
                item = framed.next() => {
                    let envelope = match item {
                        Some(Ok(envelope)) => envelope,
                        Some(Err(err)) => break Err(err),
                        None => break Ok(()),
                    };
                    match reply_to(envelope) {
                        Reply::Send(reply) => {
                            if let Err(err) = framed.send(reply).await {
                                break Err(err);
                            }
                        }
                        Reply::Ignore => {}
                        Reply::Hangup => break Ok(()),
                    }
                }
            }
        };

        match outcome {
            Ok(()) => info!(peer = %self.peer, "client disconnected"),
            Err(err) => warn!(peer = %self.peer, error = %err, "session ended with error"),
        }
    }
}

fn reply_to(envelope: Envelope) -> Reply {
    match envelope.message_type {
        MessageType::Heartbeat => Reply::Send(Envelope::heartbeat()),
        MessageType::TimeSync => match TimeSyncResponse::reply_to(&envelope, unix_millis()) {
            Ok(reply) => Reply::Send(reply),
            Err(err) => Reply::Send(Envelope::error_response(
                &envelope,
                400,
                format!("bad time-sync payload: {err}"),
            )),
        },
        MessageType::DisconnectNotify => Reply::Hangup,
        MessageType::Business if envelope.is_push() => {
            debug!(route_key = %envelope.route_key, size = envelope.payload.len(), "push ignored");
            Reply::Ignore
        }
        MessageType::Business => {
            info!(
                route_key = %envelope.route_key,
                correlation_id = envelope.correlation_id,
                size = envelope.payload.len(),
                "echoing request"
            );
            Reply::Send(Envelope::response_to(&envelope, envelope.payload.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_answered() {
        assert_eq!(reply_to(Envelope::heartbeat()), Reply::Send(Envelope::heartbeat()));
    }

    #[test]
    fn request_payload_is_echoed() {
        let request = Envelope::request(RouteKey::new(1, 2), 44, &b"abc"[..]);
        let Reply::Send(reply) = reply_to(request.clone()) else {
            panic!("request should be answered");
        };
        assert_eq!(reply.correlation_id, 44);
        assert_eq!(reply.route_key, request.route_key);
        assert_eq!(reply.payload, request.payload);
    }

    #[test]
    fn broken_time_sync_gets_an_error_status() {
        let request = Envelope::new(MessageType::TimeSync, RouteKey::NONE, &b"nope"[..])
            .with_correlation_id(5);
        let Reply::Send(reply) = reply_to(request) else {
            panic!("time sync should be answered");
        };
        assert_eq!(reply.response_status, 400);
        assert_eq!(reply.correlation_id, 5);
    }

    #[test]
    fn client_pushes_and_notices_are_not_echoed() {
        assert_eq!(
            reply_to(Envelope::push(RouteKey::new(1, 1), &b"x"[..])),
            Reply::Ignore
        );
        let notice = DisconnectNotice::new(DisconnectReason::ServerClose, "bye")
            .to_envelope()
            .expect("notice should serialize");
        assert_eq!(reply_to(notice), Reply::Hangup);
    }
}
