use eyre::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP base of the dashboard backend, e.g. "http://localhost:8080".
    /// The stream URL is derived from it (http -> ws, https -> wss).
    pub backend_url: String,
    /// Base URL of the historical market-data provider.
    pub provider_url: String,
    /// Optional provider API key, sent as a request header when set.
    pub provider_api_key: Option<String>,
    pub stream: StreamConfig,
    pub arb: ArbConfig,
    pub ohlcv_db_path: String,
    pub ohlcv_ttl: Duration,
    pub dashboard_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArbConfig {
    /// Spread percent above which an alert is surfaced as a notification.
    pub notify_threshold_pct: f64,
    /// Fee rate applied to each leg of a projected trade.
    pub fee_rate: f64,
    /// Capacity of the alert ring buffer.
    pub alert_capacity: usize,
}

impl Default for ArbConfig {
    fn default() -> Self {
        Self {
            notify_threshold_pct: 1.0,
            fee_rate: 0.001,
            alert_capacity: 100,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let backend_url =
            std::env::var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
        let provider_url = std::env::var("PROVIDER_URL")
            .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string());
        let provider_api_key = std::env::var("PROVIDER_API_KEY").ok().filter(|k| !k.is_empty());
        let ohlcv_db_path =
            std::env::var("OHLCV_DB_PATH").unwrap_or_else(|_| "ohlcv-cache.db".to_string());
        let dashboard_port: u16 = std::env::var("DASHBOARD_PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse()
            .unwrap_or(3001);

        let stream = StreamConfig {
            reconnect_interval: Duration::from_millis(env_u64("RECONNECT_INTERVAL_MS", 3000)),
            max_reconnect_attempts: env_u64("MAX_RECONNECT_ATTEMPTS", 5) as u32,
            connect_timeout: Duration::from_millis(env_u64("CONNECT_TIMEOUT_MS", 10_000)),
        };

        let arb = ArbConfig {
            notify_threshold_pct: env_f64("ARB_NOTIFY_THRESHOLD_PCT", 1.0),
            fee_rate: env_f64("TRADE_FEE_RATE", 0.001),
            alert_capacity: env_u64("ALERT_CAPACITY", 100) as usize,
        };

        Ok(Config {
            backend_url,
            provider_url,
            provider_api_key,
            stream,
            arb,
            ohlcv_db_path,
            ohlcv_ttl: Duration::from_secs(env_u64("OHLCV_TTL_MINS", 5) * 60),
            dashboard_port,
        })
    }

    /// Streaming endpoint derived from the backend base URL: the scheme
    /// follows the backend's (https -> wss, http -> ws).
    pub fn stream_url(&self) -> String {
        let base = self.backend_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws", ws_base)
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
