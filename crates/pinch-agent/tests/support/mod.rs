//! Shared helpers for booting a real test relay and one or more real
//! [`pinch_agent::PinchAgent`] instances against it, grounded on
//! `pinch-relay`'s own `tests/support/mod.rs`.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use pinch_agent::{AgentConfig, NullPolicyEvaluator, PinchAgent, PolicyEvaluator};
use tokio::net::TcpListener;

static NEXT_PORT: AtomicU16 = AtomicU16::new(19000);

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
    _temp_dir: tempfile::TempDir,
}

pub async fn start_test_relay(port: u16) -> TestRelay {
    init_tracing();
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("relay.db");

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
        if tokio_tungstenite::connect_async(&url).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    TestRelay {
        url,
        _temp_dir: temp_dir,
    }
}

/// Bootstrap one agent against `relay` with a fresh identity and
/// empty local stores, using [`NullPolicyEvaluator`].
pub async fn spawn_agent(relay: &TestRelay) -> Arc<PinchAgent> {
    spawn_agent_with_evaluator(relay, Arc::new(NullPolicyEvaluator)).await
}

pub async fn spawn_agent_with_evaluator(
    relay: &TestRelay,
    evaluator: Arc<dyn PolicyEvaluator>,
) -> Arc<PinchAgent> {
    let dir = tempfile::tempdir().unwrap();
    let config = AgentConfig {
        relay_url: relay.url.clone(),
        keypair_path: dir.path().join("keypair.json"),
        data_dir: dir.path().to_path_buf(),
    };
    // Leak the temp dir so the agent's stores stay valid for the rest
    // of the test; the OS reclaims it at process exit.
    std::mem::forget(dir);

    PinchAgent::bootstrap(config, evaluator).await.expect("bootstrap agent")
}

/// Poll until `f` returns true or the deadline elapses, for waiting on
/// the agent's background dispatch task to process an inbound
/// envelope.
pub async fn wait_until<F: Fn() -> bool>(f: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
