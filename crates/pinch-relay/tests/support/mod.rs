//! Shared test-relay bootstrap helpers, grounded on the upstream
//! nostr-relay integration test harness (`start_test_relay` /
//! `next_test_port` / `test_relay_url`).

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Once;

use futures_util::{SinkExt, StreamExt};
use pinch_crypto::Identity;
use pinch_envelope::{
    build_auth_message, decode_envelope, encode_envelope, AuthResponse, Envelope, Payload,
};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as TMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

static NEXT_PORT: AtomicU16 = AtomicU16::new(18000);

pub fn next_test_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

pub struct TestRelay {
    pub url: String,
    pub host: String,
    _temp_dir: tempfile::TempDir,
}

pub async fn start_test_relay(port: u16) -> TestRelay {
    init_tracing();
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let mut config = pinch_relay::RelayConfig::default();
    config.port = port;
    config.host = "localhost".to_string();
    config.db_path = db_path.to_string_lossy().to_string();
    config.queue_max = 1000;

    let (router, _hub) = pinch_relay::bootstrap(config).await.expect("bootstrap relay");

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await.expect("bind test relay");

    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let url = format!("ws://127.0.0.1:{port}/ws");

    for _ in 0..50 {
        if connect_async(&url).await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    TestRelay {
        url,
        host: "localhost".to_string(),
        _temp_dir: temp_dir,
    }
}

pub type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connect and run the auth handshake to completion, returning the
/// connected socket and the assigned address.
pub async fn connect_and_authenticate(relay: &TestRelay, identity: &Identity) -> (Socket, String) {
    let (mut socket, _) = connect_async(&relay.url).await.expect("connect");

    let challenge_bytes = match socket.next().await {
        Some(Ok(TMessage::Binary(bytes))) => bytes,
        other => panic!("expected AuthChallenge, got {other:?}"),
    };
    let challenge_envelope = decode_envelope(&challenge_bytes).expect("decode challenge");
    let Payload::AuthChallenge(challenge) = challenge_envelope.payload else {
        panic!("expected AuthChallenge payload");
    };

    let message = build_auth_message(&relay.host, &challenge.nonce);
    let signature = identity.sign(&message);

    let response = Envelope::new(
        pinch_envelope::PROTOCOL_VERSION,
        "unauthenticated",
        None,
        None,
        None,
        Payload::AuthResponse(AuthResponse {
            version: pinch_envelope::PROTOCOL_VERSION,
            pubkey: identity.public_key_bytes(),
            signature: signature.to_bytes(),
            nonce_echo: challenge.nonce,
        }),
    );
    let bytes = encode_envelope(&response, usize::MAX).unwrap();
    socket.send(TMessage::Binary(bytes)).await.unwrap();

    let result_bytes = match socket.next().await {
        Some(Ok(TMessage::Binary(bytes))) => bytes,
        other => panic!("expected AuthResult, got {other:?}"),
    };
    let result_envelope = decode_envelope(&result_bytes).expect("decode auth result");
    let Payload::AuthResult(result) = result_envelope.payload else {
        panic!("expected AuthResult payload");
    };
    assert!(result.success, "handshake should succeed: {:?}", result.error_message);

    let address = result.assigned_address.expect("assigned address");
    (socket, address)
}

pub async fn recv_envelope(socket: &mut Socket) -> Option<Envelope> {
    loop {
        match socket.next().await {
            Some(Ok(TMessage::Binary(bytes))) => return decode_envelope(&bytes).ok(),
            Some(Ok(TMessage::Ping(_))) | Some(Ok(TMessage::Pong(_))) => continue,
            _ => return None,
        }
    }
}

pub async fn send_envelope(socket: &mut Socket, envelope: &Envelope) {
    let bytes = encode_envelope(envelope, usize::MAX).unwrap();
    socket.send(TMessage::Binary(bytes)).await.unwrap();
}
