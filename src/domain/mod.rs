use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest bid/ask pair for one symbol on one exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub exchange: String,
    pub bid: f64,
    pub ask: f64,
    pub mid_price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Build a quote, recomputing the midpoint from bid/ask.
    pub fn new(
        symbol: String,
        exchange: String,
        bid: f64,
        ask: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol,
            exchange,
            bid,
            ask,
            mid_price: (bid + ask) / 2.0,
            timestamp,
        }
    }
}

/// Cross-exchange arbitrage alert, either pushed by the server or
/// derived locally from the quote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageAlert {
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub spread_percent: f64,
    pub profit: f64,
    pub timestamp: DateTime<Utc>,
}

/// Best buy/sell venue pair for a symbol as computed by the comparator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub buy_exchange: String,
    pub buy_price: f64,
    pub sell_exchange: String,
    pub sell_price: f64,
    pub spread_percent: f64,
}

/// Trade economics for a candidate size against one opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProjection {
    /// Units of base asset bought.
    pub buy_amount: f64,
    pub buy_total: f64,
    pub sell_total: f64,
    pub fees: f64,
    pub net_profit: f64,
    pub roi_pct: f64,
}

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle series plus the data source the upstream resolved it from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    pub candles: Vec<Candle>,
    pub source: String,
}

/// A single historical observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub value: f64,
}

/// Sparkline point: x is the sequential index, not the timestamp, so the
/// renderer gets uniform spacing regardless of sampling gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub x: usize,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub change: f64,
    pub change_pct: f64,
    /// Only populated for volume series.
    pub average: Option<f64>,
}

/// Transformed historical series: raw points, sparkline projection, stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSeries {
    pub raw: Vec<DataPoint>,
    pub sparkline: Vec<IndexPoint>,
    pub stats: SeriesStats,
}

/// Which market-chart series a historical request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Price,
    MarketCap,
    Volume,
}

impl std::fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesKind::Price => write!(f, "price"),
            SeriesKind::MarketCap => write!(f, "market_cap"),
            SeriesKind::Volume => write!(f, "volume"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_recomputes_midpoint() {
        let q = Quote::new("BTC/USDT".into(), "binance".into(), 100.0, 102.0, Utc::now());
        assert_eq!(q.mid_price, 101.0);
    }
}
