use std::time::Duration;

/// Relay configuration, loaded from the environment the way
/// `AppConfig` is in the upstream backend.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Advertised host: embedded in `AuthChallenge` and used to derive
    /// the assigned address of every client that authenticates here.
    pub host: String,
    pub db_path: String,
    pub queue_max: u64,
    pub queue_ttl: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PINCH_RELAY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(7777);

        let host = std::env::var("PINCH_RELAY_HOST").unwrap_or_else(|_| "localhost".to_string());

        let db_path = std::env::var("PINCH_RELAY_DB").unwrap_or_else(|_| "pinch-relay.db".to_string());

        let queue_max = std::env::var("PINCH_RELAY_QUEUE_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        let queue_ttl_secs: u64 = std::env::var("PINCH_RELAY_QUEUE_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7 * 24 * 60 * 60);

        Self {
            port,
            host,
            db_path,
            queue_max,
            queue_ttl: Duration::from_secs(queue_ttl_secs),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 7777,
            host: "localhost".to_string(),
            db_path: "pinch-relay.db".to_string(),
            queue_max: 1000,
            queue_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Auth handshake deadline.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat ping interval bounds.
pub const HEARTBEAT_INTERVAL_MIN: Duration = Duration::from_secs(20);
pub const HEARTBEAT_INTERVAL_MAX: Duration = Duration::from_secs(30);

/// Pong grace period bounds.
pub const HEARTBEAT_GRACE_MIN: Duration = Duration::from_secs(5);
pub const HEARTBEAT_GRACE_MAX: Duration = Duration::from_secs(10);

/// TTL sweep cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Flush batch size.
pub const FLUSH_BATCH_SIZE: usize = 32;

/// Per-sender token bucket defaults (tokens/sec, burst).
pub const RATE_LIMIT_TOKENS_PER_SEC: u32 = 20;
pub const RATE_LIMIT_BURST: u32 = 40;

/// Close code applied on auth failure.
pub const CLOSE_CODE_AUTH_FAILURE: u16 = 4001;
