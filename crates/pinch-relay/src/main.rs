use pinch_relay::RelayConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pinch_relay=info")),
        )
        .init();

    let config = RelayConfig::from_env();
    let port = config.port;
    let (app, _hub) = pinch_relay::bootstrap(config).await?;

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("starting pinch relay on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
