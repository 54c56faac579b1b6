use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use linkwire_client::{Client, ClientConfig, ClientError, ConnectionState, TransitionReason};
use linkwire_frame::{EnvelopeCodec, Envelope, MessageType, RouteKey};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

const REVERSE: RouteKey = RouteKey::new(2, 7);
const MISSING: RouteKey = RouteKey::new(2, 99);
const ANNOUNCE: RouteKey = RouteKey::new(9, 1);

/// Serve one connection: echo heartbeats, reverse payloads on `REVERSE`,
/// answer everything else with status 404, and push once per request.
async fn serve_one(listener: TcpListener) {
    let (stream, _) = listener.accept().await.expect("client should connect");
    let mut framed = Framed::new(stream, EnvelopeCodec::new());

    while let Some(item) = framed.next().await {
        let envelope = item.expect("client frames should decode");
        let reply = match envelope.message_type {
            MessageType::Heartbeat => Envelope::heartbeat(),
            MessageType::Business if envelope.route_key == REVERSE => {
                let mut payload = envelope.payload.to_vec();
                payload.reverse();
                framed
                    .send(Envelope::push(ANNOUNCE, &b"served"[..]))
                    .await
                    .expect("push should write");
                Envelope::response_to(&envelope, payload)
            }
            _ => Envelope::error_response(&envelope, 404, "unknown route"),
        };
        if framed.send(reply).await.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn requests_and_pushes_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let port = listener.local_addr().expect("bound address").port();
    let server = tokio::spawn(serve_one(listener));

    let mut config = ClientConfig::default();
    config.reconnect.enabled = false;
    let client = Client::tcp(config).expect("config should be valid");
    assert_eq!(client.transport_name(), "tcp");

    let (push_tx, mut push_rx) = tokio::sync::mpsc::unbounded_channel();
    client.subscribe(ANNOUNCE, move |envelope| {
        let _ = push_tx.send(envelope.payload.clone());
        Ok(())
    });

    client
        .connect("127.0.0.1", port)
        .await
        .expect("connect should succeed");
    assert_eq!(client.state(), ConnectionState::Connected);

    let large = vec![b'z'; 200_000];
    let reply = client
        .request(REVERSE, large.clone())
        .await
        .expect("large request should succeed");
    assert_eq!(reply.payload.len(), large.len());

    let reply = client
        .request(REVERSE, &b"linkwire"[..])
        .await
        .expect("request should succeed");
    assert_eq!(reply.payload.as_ref(), b"eriwknil");

    let err = client
        .request(MISSING, &b""[..])
        .await
        .expect_err("unknown route should fail");
    assert!(matches!(err, ClientError::Application { status: 404, .. }));

    let pushed = tokio::time::timeout(Duration::from_secs(5), push_rx.recv())
        .await
        .expect("push should arrive")
        .expect("subscriber channel open");
    assert_eq!(pushed.as_ref(), b"served");

    let stats = client.stats();
    assert!(stats.frames_sent >= 4);
    assert!(stats.frames_received >= 5);
    assert_eq!(stats.pending, 0);

    client.close();
    let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
}

#[tokio::test]
async fn server_going_away_without_reconnect_ends_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let port = listener.local_addr().expect("bound address").port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("client should connect");
        drop(stream);
    });

    let mut config = ClientConfig::default();
    config.reconnect.enabled = false;
    let client = Client::tcp(config).expect("config should be valid");
    let mut changes = client.state_changes();

    client
        .connect("127.0.0.1", port)
        .await
        .expect("connect should succeed");
    server.await.expect("server task should finish");

    let lost = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let change = changes.recv().await.expect("state stream open");
            if change.from == ConnectionState::Connected {
                return change;
            }
        }
    })
    .await
    .expect("loss should be noticed");
    assert_eq!(lost.to, ConnectionState::Disconnected);
    assert!(matches!(lost.reason, TransitionReason::TransportLost(_)));
}

#[tokio::test]
async fn refused_connect_reports_connect_failed() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let port = listener.local_addr().expect("bound address").port();
    drop(listener);

    let client = Client::tcp(ClientConfig::default()).expect("config should be valid");
    let err = client
        .connect("127.0.0.1", port)
        .await
        .expect_err("nothing is listening");
    assert_eq!(err.code(), linkwire_client::ErrorCode::ConnectFailed);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
