use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::cache::{SqliteBackend, TtlCache};
use super::market_chart::FetchError;
use crate::domain::{Candle, CandleSeries};

/// Client for the backend's candle endpoint.
pub struct CandleClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    data: Vec<[f64; 6]>,
    exchange: String,
}

impl CandleClient {
    pub fn new(base_url: String) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch(
        &self,
        symbol: &str,
        exchange: Option<&str>,
        timeframe: &str,
        limit: u32,
    ) -> Result<CandleSeries, FetchError> {
        let mut url = format!(
            "{}/api/ohlcv?symbol={}&timeframe={}&limit={}",
            self.base_url, symbol, timeframe, limit
        );
        if let Some(exchange) = exchange {
            url.push_str(&format!("&exchange={}", exchange));
        }

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        let body: CandleResponse = resp.json().await?;

        let candles = body
            .data
            .iter()
            .map(|row| Candle {
                timestamp: row[0] as i64,
                open: row[1],
                high: row[2],
                low: row[3],
                close: row[4],
                volume: row[5],
            })
            .collect();

        Ok(CandleSeries {
            candles,
            source: body.exchange,
        })
    }
}

/// Durable candle cache: rows live in sqlite and survive restarts, keyed by
/// symbol + timeframe + limit with a fixed minutes-scale TTL.
pub struct OhlcvCache {
    client: CandleClient,
    cache: TtlCache<CandleSeries, SqliteBackend<CandleSeries>>,
    ttl: Duration,
}

impl OhlcvCache {
    pub fn new(client: CandleClient, backend: SqliteBackend<CandleSeries>, ttl: Duration) -> Self {
        Self {
            client,
            cache: TtlCache::new(backend),
            ttl,
        }
    }

    fn key(symbol: &str, timeframe: &str, limit: u32) -> String {
        format!("{}:{}:{}", symbol, timeframe, limit)
    }

    /// Cached read path with lazy expiry.
    pub async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
        exchange: Option<&str>,
    ) -> Result<CandleSeries, FetchError> {
        let key = Self::key(symbol, timeframe, limit);
        if let Some(hit) = self.cache.get(&key).await? {
            debug!("OHLCV cache hit: {}", key);
            return Ok(hit);
        }

        let series = self.client.fetch(symbol, exchange, timeframe, limit).await?;
        self.cache.insert(&key, series.clone(), self.ttl).await?;
        Ok(series)
    }

    /// Manual refresh: the durable entry is removed before fetching, so this
    /// always bypasses the cache, unlike the lazy-expiry read path.
    pub async fn refetch(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
        exchange: Option<&str>,
    ) -> Result<CandleSeries, FetchError> {
        let key = Self::key(symbol, timeframe, limit);
        self.cache.remove(&key).await?;
        info!("OHLCV refetch: {}", key);

        let series = self.client.fetch(symbol, exchange, timeframe, limit).await?;
        self.cache.insert(&key, series.clone(), self.ttl).await?;
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::cache::open_pool;
    use axum::{extract::State, routing::get, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn candle_fixture(State(hits): State<Arc<AtomicUsize>>) -> Json<serde_json::Value> {
        hits.fetch_add(1, Ordering::SeqCst);
        Json(serde_json::json!({
            "data": [
                [1000.0, 1.0, 2.0, 0.5, 1.5, 100.0],
                [2000.0, 1.5, 2.5, 1.0, 2.0, 200.0]
            ],
            "exchange": "binance"
        }))
    }

    async fn spawn_backend() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/api/ohlcv", get(candle_fixture))
            .with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), hits)
    }

    async fn cache_at(base: &str, db_path: &str, ttl: Duration) -> OhlcvCache {
        let pool = open_pool(db_path).await.unwrap();
        let backend = SqliteBackend::new(pool, "ohlcv_cache").await.unwrap();
        OhlcvCache::new(CandleClient::new(base.to_string()).unwrap(), backend, ttl)
    }

    #[tokio::test]
    async fn cached_read_survives_restart() {
        let (base, hits) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ohlcv.db");
        let db_path = db_path.to_str().unwrap();

        let cache = cache_at(&base, db_path, Duration::from_secs(300)).await;
        let series = cache.candles("BTC/USDT", "1h", 100, None).await.unwrap();
        assert_eq!(series.candles.len(), 2);
        assert_eq!(series.source, "binance");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Second read is served from the durable row.
        cache.candles("BTC/USDT", "1h", 100, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // A fresh instance over the same file simulates a process restart.
        drop(cache);
        let reopened = cache_at(&base, db_path, Duration::from_secs(300)).await;
        let series = reopened.candles("BTC/USDT", "1h", 100, None).await.unwrap();
        assert_eq!(series.source, "binance");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetch_always_bypasses_the_cache() {
        let (base, hits) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ohlcv.db");

        let cache = cache_at(&base, db_path.to_str().unwrap(), Duration::from_secs(300)).await;
        cache.candles("BTC/USDT", "1h", 100, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        cache.refetch("BTC/USDT", "1h", 100, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Refetch repopulated the cache for the normal read path.
        cache.candles("BTC/USDT", "1h", 100, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entry_refetches_on_read() {
        let (base, hits) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ohlcv.db");

        let cache = cache_at(&base, db_path.to_str().unwrap(), Duration::ZERO).await;
        cache.candles("BTC/USDT", "1h", 100, None).await.unwrap();
        cache.candles("BTC/USDT", "1h", 100, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
