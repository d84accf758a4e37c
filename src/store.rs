use std::collections::{HashMap, VecDeque};

use crate::domain::{ArbitrageAlert, Quote};

/// Keyed table of the latest quote per (symbol, exchange).
///
/// Mutation happens only on the stream dispatch task; readers get owned
/// snapshots so they never observe a partially-updated table.
#[derive(Debug, Default)]
pub struct PriceStore {
    quotes: HashMap<(String, String), Quote>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for the quote's (symbol, exchange) key.
    pub fn put(&mut self, quote: Quote) {
        self.quotes
            .insert((quote.symbol.clone(), quote.exchange.clone()), quote);
    }

    pub fn get(&self, symbol: &str, exchange: &str) -> Option<Quote> {
        self.quotes
            .get(&(symbol.to_string(), exchange.to_string()))
            .cloned()
    }

    /// All quotes for a symbol across exchanges, as an owned snapshot.
    pub fn snapshot_for_symbol(&self, symbol: &str) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self
            .quotes
            .values()
            .filter(|q| q.symbol == symbol)
            .cloned()
            .collect();
        quotes.sort_by(|a, b| a.exchange.cmp(&b.exchange));
        quotes
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Subsystem teardown is the only path that deletes quotes.
    pub fn clear(&mut self) {
        self.quotes.clear();
    }
}

/// Fixed-capacity FIFO buffer of recent alerts, oldest evicted first.
#[derive(Debug)]
pub struct AlertRing {
    alerts: VecDeque<ArbitrageAlert>,
    capacity: usize,
}

impl AlertRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an alert, evicting the oldest once full. A frame identical to
    /// an already-buffered alert for the same venue pair (same timestamp) is
    /// treated as a duplicate push and skipped.
    pub fn push(&mut self, alert: ArbitrageAlert) {
        let duplicate = self.alerts.iter().rev().any(|a| {
            a.symbol == alert.symbol
                && a.buy_exchange == alert.buy_exchange
                && a.sell_exchange == alert.sell_exchange
                && a.timestamp == alert.timestamp
        });
        if duplicate {
            return;
        }

        if self.alerts.len() == self.capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    /// Oldest-first snapshot of the buffered alerts.
    pub fn snapshot(&self) -> Vec<ArbitrageAlert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn quote(symbol: &str, exchange: &str, bid: f64, ask: f64) -> Quote {
        Quote::new(symbol.into(), exchange.into(), bid, ask, Utc::now())
    }

    fn alert(symbol: &str, spread: f64, ts_ms: i64) -> ArbitrageAlert {
        ArbitrageAlert {
            symbol: symbol.into(),
            buy_exchange: "binance".into(),
            sell_exchange: "kraken".into(),
            buy_price: 100.0,
            sell_price: 100.0 + spread,
            spread_percent: spread,
            profit: spread,
            timestamp: Utc.timestamp_millis_opt(ts_ms).unwrap(),
        }
    }

    #[test]
    fn put_then_get_returns_exact_midpoint() {
        let mut store = PriceStore::new();
        store.put(quote("BTC/USDT", "binance", 100.0, 101.0));

        let q = store.get("BTC/USDT", "binance").unwrap();
        assert_eq!(q.mid_price, (100.0 + 101.0) / 2.0);
    }

    #[test]
    fn put_overwrites_last_write_wins() {
        let mut store = PriceStore::new();
        store.put(quote("BTC/USDT", "binance", 100.0, 101.0));
        store.put(quote("BTC/USDT", "binance", 200.0, 201.0));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("BTC/USDT", "binance").unwrap().bid, 200.0);
    }

    #[test]
    fn snapshot_filters_by_symbol() {
        let mut store = PriceStore::new();
        store.put(quote("BTC/USDT", "binance", 100.0, 101.0));
        store.put(quote("BTC/USDT", "kraken", 102.0, 103.0));
        store.put(quote("ETH/USDT", "binance", 10.0, 11.0));

        let snap = store.snapshot_for_symbol("BTC/USDT");
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().all(|q| q.symbol == "BTC/USDT"));
    }

    #[test]
    fn ring_keeps_most_recent_hundred() {
        let mut ring = AlertRing::new(100);
        for i in 0..150 {
            ring.push(alert("BTC/USDT", i as f64, i));
        }

        assert_eq!(ring.len(), 100);
        let snap = ring.snapshot();
        // Oldest 50 evicted; buffer holds alerts 50..150 oldest-first.
        assert_eq!(snap.first().unwrap().spread_percent, 50.0);
        assert_eq!(snap.last().unwrap().spread_percent, 149.0);
    }

    #[test]
    fn ring_skips_duplicate_frames() {
        let mut ring = AlertRing::new(10);
        ring.push(alert("BTC/USDT", 2.0, 1000));
        ring.push(alert("BTC/USDT", 2.0, 1000));
        assert_eq!(ring.len(), 1);

        // Same venues at a later timestamp is a fresh alert.
        ring.push(alert("BTC/USDT", 2.0, 2000));
        assert_eq!(ring.len(), 2);
    }
}
