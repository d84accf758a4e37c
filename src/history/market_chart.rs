use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::cache::{CacheError, MemoryBackend, TtlCache};
use crate::domain::{DataPoint, HistoricalSeries, IndexPoint, SeriesKind, SeriesStats};

/// Header carrying the optional provider API key.
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Raw market-chart payload: paired `[timestamp, value]` arrays per series.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketChart {
    #[serde(default)]
    pub prices: Vec<[f64; 2]>,
    #[serde(default)]
    pub market_caps: Vec<[f64; 2]>,
    #[serde(default)]
    pub total_volumes: Vec<[f64; 2]>,
}

/// Client for the provider's market-chart endpoint.
pub struct MarketChartClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl MarketChartClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub async fn market_chart(&self, coin_id: &str, days: &str) -> Result<MarketChart, FetchError> {
        let url = format!(
            "{}/coins/{}/market_chart?vs_currency=usd&days={}",
            self.base_url, coin_id, days
        );

        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        Ok(resp.json::<MarketChart>().await?)
    }
}

/// Range-dependent TTL: short-range data changes faster, so it goes stale
/// sooner.
pub fn ttl_for_range(days: &str) -> Duration {
    match days {
        "1" => Duration::from_secs(2 * 60),
        "7" => Duration::from_secs(10 * 60),
        "14" | "30" => Duration::from_secs(30 * 60),
        "90" | "180" => Duration::from_secs(60 * 60),
        _ => Duration::from_secs(2 * 60 * 60),
    }
}

/// Transform paired `[timestamp, value]` arrays into the stored series shape:
/// raw points, an index-based sparkline, and summary stats.
pub fn build_series(pairs: &[[f64; 2]], kind: SeriesKind) -> HistoricalSeries {
    let raw: Vec<DataPoint> = pairs
        .iter()
        .map(|p| DataPoint {
            timestamp: p[0] as i64,
            value: p[1],
        })
        .collect();

    let sparkline: Vec<IndexPoint> = raw
        .iter()
        .enumerate()
        .map(|(i, p)| IndexPoint { x: i, y: p.value })
        .collect();

    let stats = compute_stats(&raw, kind);
    HistoricalSeries {
        raw,
        sparkline,
        stats,
    }
}

fn compute_stats(points: &[DataPoint], kind: SeriesKind) -> SeriesStats {
    if points.is_empty() {
        return SeriesStats {
            min: 0.0,
            max: 0.0,
            change: 0.0,
            change_pct: 0.0,
            average: (kind == SeriesKind::Volume).then_some(0.0),
        };
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for p in points {
        min = min.min(p.value);
        max = max.max(p.value);
        sum += p.value;
    }

    let first = points[0].value;
    let last = points[points.len() - 1].value;
    let change = last - first;
    let change_pct = if first != 0.0 {
        change / first * 100.0
    } else {
        0.0
    };

    SeriesStats {
        min,
        max,
        change,
        change_pct,
        average: (kind == SeriesKind::Volume).then_some(sum / points.len() as f64),
    }
}

type SeriesCache = TtlCache<HistoricalSeries, MemoryBackend<HistoricalSeries>>;

/// Fetch-and-cache layer over the market-chart endpoint. One cache instance
/// per series kind so a burst of one kind cannot evict the others.
pub struct HistoryService {
    client: MarketChartClient,
    price: SeriesCache,
    market_cap: SeriesCache,
    volume: SeriesCache,
}

impl HistoryService {
    pub fn new(client: MarketChartClient) -> Self {
        Self {
            client,
            price: TtlCache::new(MemoryBackend::new()),
            market_cap: TtlCache::new(MemoryBackend::new()),
            volume: TtlCache::new(MemoryBackend::new()),
        }
    }

    fn cache_for(&self, kind: SeriesKind) -> &SeriesCache {
        match kind {
            SeriesKind::Price => &self.price,
            SeriesKind::MarketCap => &self.market_cap,
            SeriesKind::Volume => &self.volume,
        }
    }

    /// Fresh series from cache, or fetch-transform-store on a miss. Fetch
    /// failures propagate; nothing is cached for them.
    pub async fn series(
        &self,
        coin_id: &str,
        days: &str,
        kind: SeriesKind,
    ) -> Result<HistoricalSeries, FetchError> {
        let cache = self.cache_for(kind);
        let key = format!("{}:{}", coin_id, days);

        if let Some(hit) = cache.get(&key).await? {
            debug!("History cache hit: {} {}", kind, key);
            return Ok(hit);
        }

        let chart = self.client.market_chart(coin_id, days).await?;
        let pairs = match kind {
            SeriesKind::Price => chart.prices,
            SeriesKind::MarketCap => chart.market_caps,
            SeriesKind::Volume => chart.total_volumes,
        };

        let series = build_series(&pairs, kind);
        cache
            .insert(&key, series.clone(), ttl_for_range(days))
            .await?;
        Ok(series)
    }
}
