use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::{ArbitrageAlert, Opportunity, Quote};
use crate::store::{AlertRing, PriceStore};

/// Sink for surfaced arbitrage alerts. Notifications carry a tag of the form
/// `arbitrage-{symbol}`; a later notification with the same tag replaces the
/// earlier one rather than stacking.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, tag: &str, title: &str, body: &str);
}

/// Default notifier: structured log line per alert.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, tag: &str, title: &str, body: &str) {
        info!(%tag, %title, "{}", body);
    }
}

/// Cross-exchange comparison plus ingestion of server-pushed alerts.
pub struct ArbitrageDetector {
    store: Arc<RwLock<PriceStore>>,
    alerts: Arc<RwLock<AlertRing>>,
    notifier: Option<Arc<dyn Notifier>>,
    notify_threshold_pct: f64,
}

impl ArbitrageDetector {
    pub fn new(
        store: Arc<RwLock<PriceStore>>,
        alerts: Arc<RwLock<AlertRing>>,
        notifier: Option<Arc<dyn Notifier>>,
        notify_threshold_pct: f64,
    ) -> Self {
        Self {
            store,
            alerts,
            notifier,
            notify_threshold_pct,
        }
    }

    /// Append a validated server-pushed alert to the ring and surface it as a
    /// notification when it clears the configured threshold.
    pub async fn ingest(&self, alert: ArbitrageAlert) {
        self.alerts.write().await.push(alert.clone());

        if alert.spread_percent > self.notify_threshold_pct {
            if let Some(notifier) = &self.notifier {
                let tag = format!("arbitrage-{}", alert.symbol);
                let title = format!("Arbitrage: {}", alert.symbol);
                let body = format!(
                    "buy {} @ {:.4}, sell {} @ {:.4} ({:.2}%)",
                    alert.buy_exchange,
                    alert.buy_price,
                    alert.sell_exchange,
                    alert.sell_price,
                    alert.spread_percent
                );
                notifier.notify(&tag, &title, &body).await;
            }
        }
    }

    /// Compare the given exchanges for a symbol against the quote table.
    pub async fn scan(&self, symbol: &str, exchanges: &[String]) -> Option<Opportunity> {
        let store = self.store.read().await;
        let quotes: Vec<Option<Quote>> = exchanges
            .iter()
            .map(|e| store.get(symbol, e))
            .collect();
        drop(store);

        best_spread(symbol, &quotes)
    }
}

/// Select the lowest ask (best buy) and highest bid (best sell) across the
/// given quotes, skipping exchanges with no data. Ties go to the first
/// exchange in input order with the extremal price. Returns `None` when
/// either side has no data.
pub fn best_spread(symbol: &str, quotes: &[Option<Quote>]) -> Option<Opportunity> {
    let mut best_buy: Option<&Quote> = None;
    let mut best_sell: Option<&Quote> = None;

    for quote in quotes.iter().flatten() {
        match best_buy {
            Some(b) if quote.ask >= b.ask => {}
            _ => best_buy = Some(quote),
        }
        match best_sell {
            Some(s) if quote.bid <= s.bid => {}
            _ => best_sell = Some(quote),
        }
    }

    let buy = best_buy?;
    let sell = best_sell?;
    if buy.ask <= 0.0 {
        return None;
    }

    let spread_percent = (sell.bid - buy.ask) / buy.ask * 100.0;
    Some(Opportunity {
        symbol: symbol.to_string(),
        buy_exchange: buy.exchange.clone(),
        buy_price: buy.ask,
        sell_exchange: sell.exchange.clone(),
        sell_price: sell.bid,
        spread_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn quote(exchange: &str, bid: f64, ask: f64) -> Quote {
        Quote::new("BTC/USDT".into(), exchange.into(), bid, ask, Utc::now())
    }

    #[test]
    fn picks_lowest_ask_and_highest_bid() {
        let quotes = vec![
            Some(quote("a", 100.0, 101.0)),
            Some(quote("b", 105.0, 106.0)),
        ];
        let opp = best_spread("BTC/USDT", &quotes).unwrap();

        assert_eq!(opp.buy_exchange, "a");
        assert_eq!(opp.buy_price, 101.0);
        assert_eq!(opp.sell_exchange, "b");
        assert_eq!(opp.sell_price, 105.0);
        // (105 - 101) / 101 * 100
        assert!((opp.spread_percent - 3.9603960396039604).abs() < 1e-9);
    }

    #[test]
    fn skips_exchanges_without_quotes() {
        let quotes = vec![
            None,
            Some(quote("b", 100.0, 101.0)),
            None,
            Some(quote("d", 103.0, 104.0)),
        ];
        let opp = best_spread("BTC/USDT", &quotes).unwrap();
        assert_eq!(opp.buy_exchange, "b");
        assert_eq!(opp.sell_exchange, "d");
    }

    #[test]
    fn no_data_means_no_opportunity() {
        assert!(best_spread("BTC/USDT", &[]).is_none());
        assert!(best_spread("BTC/USDT", &[None, None]).is_none());
    }

    #[test]
    fn ties_break_by_input_order() {
        let quotes = vec![
            Some(quote("first", 100.0, 101.0)),
            Some(quote("second", 100.0, 101.0)),
        ];
        let opp = best_spread("BTC/USDT", &quotes).unwrap();
        assert_eq!(opp.buy_exchange, "first");
        assert_eq!(opp.sell_exchange, "first");
    }

    struct RecordingNotifier {
        seen: tokio::sync::Mutex<HashMap<String, String>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, tag: &str, _title: &str, body: &str) {
            // Same-tag notifications replace each other, as the runtime does.
            self.seen
                .lock()
                .await
                .insert(tag.to_string(), body.to_string());
        }
    }

    fn alert(symbol: &str, spread: f64) -> ArbitrageAlert {
        ArbitrageAlert {
            symbol: symbol.into(),
            buy_exchange: "binance".into(),
            sell_exchange: "kraken".into(),
            buy_price: 100.0,
            sell_price: 100.0 + spread,
            spread_percent: spread,
            profit: spread,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn notifies_only_above_threshold_with_symbol_tag() {
        let store = Arc::new(RwLock::new(PriceStore::new()));
        let alerts = Arc::new(RwLock::new(AlertRing::new(10)));
        let notifier = Arc::new(RecordingNotifier {
            seen: tokio::sync::Mutex::new(HashMap::new()),
        });
        let detector = ArbitrageDetector::new(
            store,
            alerts.clone(),
            Some(notifier.clone()),
            1.0,
        );

        detector.ingest(alert("BTC/USDT", 0.5)).await;
        detector.ingest(alert("BTC/USDT", 2.0)).await;
        detector.ingest(alert("BTC/USDT", 3.0)).await;

        let seen = notifier.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert!(seen.contains_key("arbitrage-BTC/USDT"));
        // Latest alert replaced the earlier one under the same tag.
        assert!(seen["arbitrage-BTC/USDT"].contains("3.00%"));
        drop(seen);

        // All three alerts were buffered regardless of the threshold.
        assert_eq!(alerts.read().await.len(), 3);
    }
}
