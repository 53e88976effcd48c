//! Agent configuration, loaded from the environment the way
//! `RelayConfig` is in `pinch-relay`.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub relay_url: String,
    pub keypair_path: PathBuf,
    pub data_dir: PathBuf,
}

impl AgentConfig {
    /// Bootstrap the full engine's configuration: reads `PINCH_RELAY_URL`,
    /// `PINCH_KEYPAIR_PATH`, `PINCH_DATA_DIR`. Tools that only touch local
    /// stores should use [`AgentConfig::local_only`] instead so they never
    /// read `PINCH_RELAY_URL`.
    pub fn from_env() -> Self {
        let relay_url = std::env::var("PINCH_RELAY_URL")
            .unwrap_or_else(|_| "ws://localhost:7777/ws".to_string());
        Self {
            relay_url,
            ..Self::local_only()
        }
    }

    /// Local-store-only configuration: does not read `PINCH_RELAY_URL`
    /// and never opens a socket. Used by tools that only need permissions
    /// or audit verification/export.
    pub fn local_only() -> Self {
        let keypair_path = std::env::var("PINCH_KEYPAIR_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home_path(".pinch/keypair.json"));
        let data_dir = std::env::var("PINCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home_path(".pinch/data"));

        Self {
            relay_url: String::new(),
            keypair_path,
            data_dir,
        }
    }

    pub fn connection_store_path(&self) -> PathBuf {
        self.data_dir.join("connections.json")
    }

    pub fn message_db_path(&self) -> PathBuf {
        self.data_dir.join("messages.db")
    }

    pub fn audit_db_path(&self) -> PathBuf {
        self.data_dir.join("audit.db")
    }
}

fn default_home_path(suffix: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(suffix)
}

/// Reconnect backoff parameters (§4.3).
pub const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const RECONNECT_JITTER: Duration = Duration::from_secs(1);
pub const RECONNECT_MAX_ATTEMPTS: u32 = 20;

/// Grace period for `waitForFlush` to observe a `QueueStatus` envelope.
pub const FLUSH_STATUS_GRACE: Duration = Duration::from_secs(2);

/// Connection request TTL.
pub const CONNECTION_REQUEST_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Circuit breaker defaults (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerThresholds {
    pub flood_count: u32,
    pub flood_window: Duration,
    pub permission_violation_count: u32,
    pub permission_violation_window: Duration,
    pub spending_exceeded_count: u32,
    pub spending_exceeded_window: Duration,
    pub boundary_probe_count: u32,
    pub boundary_probe_window: Duration,
}

impl Default for CircuitBreakerThresholds {
    fn default() -> Self {
        Self {
            flood_count: 50,
            flood_window: Duration::from_secs(60),
            permission_violation_count: 5,
            permission_violation_window: Duration::from_secs(300),
            spending_exceeded_count: 5,
            spending_exceeded_window: Duration::from_secs(300),
            boundary_probe_count: 3,
            boundary_probe_window: Duration::from_secs(600),
        }
    }
}
