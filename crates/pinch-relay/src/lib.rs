mod config;
mod connection;
mod error;
mod hub;
mod http;
mod ratelimit;
mod store;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use hub::RelayHub;
pub use store::Store;

use std::sync::Arc;

use tracing::info;

/// Build the relay's axum router and start the background sweep loop.
/// The caller is responsible for binding a listener and serving.
pub async fn bootstrap(config: RelayConfig) -> anyhow::Result<(axum::Router, Arc<RelayHub>)> {
    let store = Arc::new(Store::open(&config.db_path)?);
    let hub = Arc::new(RelayHub::new(config, store));

    tokio::spawn(hub.clone().run_sweep_loop());
    info!("relay bootstrapped");

    Ok((http::build_router(hub.clone()), hub))
}
