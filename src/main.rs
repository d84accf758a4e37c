use eyre::Result;
use std::sync::Arc;
use tracing::info;

use marketpulse::api;
use marketpulse::arb::LogNotifier;
use marketpulse::config::Config;
use marketpulse::service::MarketDataService;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketpulse=info,tower_http=info".into()),
        )
        .init();

    let config = Config::load()?;
    info!("Config loaded; stream endpoint {}", config.stream_url());

    let service = Arc::new(MarketDataService::new(&config, Some(Arc::new(LogNotifier))).await?);

    // Initial watchlist from the environment, e.g.
    // SYMBOLS=BTC/USDT,ETH/USDT EXCHANGES=binance,kraken
    let symbols = env_list("SYMBOLS");
    let exchanges = env_list("EXCHANGES");
    if !symbols.is_empty() || !exchanges.is_empty() {
        service.subscribe(&symbols, &exchanges).await;
        info!("Tracking {:?} on {:?}", symbols, exchanges);
    }

    service.start().await;

    let app_state = Arc::new(api::AppState {
        service: service.clone(),
    });
    let app = api::router(app_state);
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.dashboard_port)).await?;
    info!("Snapshot API running on http://0.0.0.0:{}", config.dashboard_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.stop().await;
    info!("Market data service shut down");
    Ok(())
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
