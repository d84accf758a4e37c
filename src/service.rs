use eyre::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::arb::{ArbitrageDetector, Notifier};
use crate::config::Config;
use crate::domain::{
    ArbitrageAlert, CandleSeries, HistoricalSeries, Opportunity, Quote, SeriesKind,
    TradeProjection,
};
use crate::history::{
    open_pool, CandleClient, FetchError, HistoryService, MarketChartClient, OhlcvCache,
    SqliteBackend,
};
use crate::profit::{ProfitCalculator, ValidationError};
use crate::store::{AlertRing, PriceStore};
use crate::stream::registry::SubscriptionRegistry;
use crate::stream::wire::{Action, ControlMessage};
use crate::stream::{ConnState, ConnectionManager, StreamShared};

/// Point-in-time view of the subsystem for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub state: ConnState,
    pub symbols: Vec<String>,
    pub exchanges: Vec<String>,
    pub quote_count: usize,
    pub alert_count: usize,
    pub dropped_frames: u64,
    pub last_error: Option<String>,
}

/// Explicitly constructed owner of the whole market-data subsystem: the
/// stream connection, quote table, alert ring, caches and calculators.
/// External consumers only ever get owned snapshots out of it.
pub struct MarketDataService {
    conn: ConnectionManager,
    shared: StreamShared,
    alerts: Arc<RwLock<AlertRing>>,
    profit: ProfitCalculator,
    history: HistoryService,
    ohlcv: OhlcvCache,
}

impl MarketDataService {
    pub async fn new(config: &Config, notifier: Option<Arc<dyn Notifier>>) -> Result<Self> {
        let store = Arc::new(RwLock::new(PriceStore::new()));
        let alerts = Arc::new(RwLock::new(AlertRing::new(config.arb.alert_capacity)));
        let detector = Arc::new(ArbitrageDetector::new(
            store.clone(),
            alerts.clone(),
            notifier,
            config.arb.notify_threshold_pct,
        ));

        let shared = StreamShared {
            state: Arc::new(RwLock::new(ConnState::Idle)),
            registry: Arc::new(RwLock::new(SubscriptionRegistry::new())),
            store,
            detector,
            dropped_frames: Arc::new(AtomicU64::new(0)),
            last_error: Arc::new(RwLock::new(None)),
        };
        let conn = ConnectionManager::new(
            config.stream_url(),
            config.stream.clone(),
            shared.clone(),
        );

        let history = HistoryService::new(MarketChartClient::new(
            config.provider_url.clone(),
            config.provider_api_key.clone(),
        )?);

        let pool = open_pool(&config.ohlcv_db_path).await?;
        let backend = SqliteBackend::new(pool, "ohlcv_cache").await?;
        let ohlcv = OhlcvCache::new(
            CandleClient::new(config.backend_url.clone())?,
            backend,
            config.ohlcv_ttl,
        );

        Ok(Self {
            conn,
            shared,
            alerts,
            profit: ProfitCalculator::new(config.arb.fee_rate),
            history,
            ohlcv,
        })
    }

    pub async fn start(&self) {
        info!("Market data service starting");
        self.conn.connect().await;
    }

    /// Teardown: close the socket, cancel pending timers, clear the quote
    /// table. Safe to call from any state.
    pub async fn stop(&self) {
        self.conn.disconnect().await;
        self.shared.store.write().await.clear();
        info!("Market data service stopped");
    }

    /// Explicit reconnect, also the way out of the Failed state.
    pub async fn reconnect(&self) {
        self.conn.connect().await;
    }

    pub async fn state(&self) -> ConnState {
        self.conn.state().await
    }

    /// Track symbols/exchanges. The accumulated set is retransmitted in full
    /// on every reconnect; the wire message here only goes out while Open.
    pub async fn subscribe(&self, symbols: &[String], exchanges: &[String]) {
        self.shared.registry.write().await.subscribe(symbols, exchanges);
        self.conn
            .send_if_open(ControlMessage {
                action: Action::Subscribe,
                symbols: symbols.to_vec(),
                exchanges: exchanges.to_vec(),
            })
            .await;
    }

    pub async fn unsubscribe(&self, symbols: &[String], exchanges: &[String]) {
        self.shared
            .registry
            .write()
            .await
            .unsubscribe(symbols, exchanges);
        self.conn
            .send_if_open(ControlMessage {
                action: Action::Unsubscribe,
                symbols: symbols.to_vec(),
                exchanges: exchanges.to_vec(),
            })
            .await;
    }

    pub async fn quote(&self, symbol: &str, exchange: &str) -> Option<Quote> {
        self.shared.store.read().await.get(symbol, exchange)
    }

    pub async fn quotes_for(&self, symbol: &str) -> Vec<Quote> {
        self.shared.store.read().await.snapshot_for_symbol(symbol)
    }

    pub async fn alerts(&self) -> Vec<ArbitrageAlert> {
        self.alerts.read().await.snapshot()
    }

    /// Cross-exchange comparison for a symbol against the live quote table.
    pub async fn spread_check(&self, symbol: &str, exchanges: &[String]) -> Option<Opportunity> {
        self.shared.detector.scan(symbol, exchanges).await
    }

    /// Trade economics for a candidate USD size against an opportunity.
    pub fn project_profit(
        &self,
        opportunity: &Opportunity,
        trade_amount_usd: f64,
    ) -> Result<TradeProjection, ValidationError> {
        self.profit.compute(opportunity, trade_amount_usd)
    }

    pub async fn history(
        &self,
        coin_id: &str,
        days: &str,
        kind: SeriesKind,
    ) -> Result<HistoricalSeries, FetchError> {
        self.history.series(coin_id, days, kind).await
    }

    pub async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
        exchange: Option<&str>,
    ) -> Result<CandleSeries, FetchError> {
        self.ohlcv.candles(symbol, timeframe, limit, exchange).await
    }

    pub async fn refetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
        exchange: Option<&str>,
    ) -> Result<CandleSeries, FetchError> {
        self.ohlcv.refetch(symbol, timeframe, limit, exchange).await
    }

    pub async fn status(&self) -> ServiceStatus {
        let registry = self.shared.registry.read().await;
        ServiceStatus {
            state: *self.shared.state.read().await,
            symbols: registry.symbols(),
            exchanges: registry.exchanges(),
            quote_count: self.shared.store.read().await.len(),
            alert_count: self.alerts.read().await.len(),
            dropped_frames: self.shared.dropped_frames.load(Ordering::Relaxed),
            last_error: self.shared.last_error.read().await.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArbConfig, StreamConfig};
    use chrono::Utc;
    use std::time::Duration;

    async fn test_service() -> (MarketDataService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            backend_url: "http://127.0.0.1:1".into(),
            provider_url: "http://127.0.0.1:1".into(),
            provider_api_key: None,
            stream: StreamConfig::default(),
            arb: ArbConfig::default(),
            ohlcv_db_path: dir
                .path()
                .join("ohlcv.db")
                .to_str()
                .unwrap()
                .to_string(),
            ohlcv_ttl: Duration::from_secs(300),
            dashboard_port: 0,
        };
        let service = MarketDataService::new(&config, None).await.unwrap();
        (service, dir)
    }

    fn quote(symbol: &str, exchange: &str, bid: f64, ask: f64) -> Quote {
        Quote::new(symbol.into(), exchange.into(), bid, ask, Utc::now())
    }

    #[tokio::test]
    async fn double_subscribe_is_one_logical_entry() {
        let (service, _dir) = test_service().await;
        let symbols = vec!["BTC/USDT".to_string()];
        let exchanges = vec!["binance".to_string()];

        service.subscribe(&symbols, &exchanges).await;
        service.subscribe(&symbols, &exchanges).await;

        let status = service.status().await;
        assert_eq!(status.symbols, symbols);
        assert_eq!(status.exchanges, exchanges);
    }

    #[tokio::test]
    async fn spread_check_and_projection_run_off_the_quote_table() {
        let (service, _dir) = test_service().await;
        {
            let mut store = service.shared.store.write().await;
            store.put(quote("BTC/USDT", "a", 100.0, 101.0));
            store.put(quote("BTC/USDT", "b", 105.0, 106.0));
        }

        let opp = service
            .spread_check("BTC/USDT", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(opp.buy_exchange, "a");
        assert_eq!(opp.sell_exchange, "b");

        let projection = service.project_profit(&opp, 1000.0).unwrap();
        assert!(projection.net_profit > 0.0);

        assert!(service
            .spread_check("ETH/USDT", &["a".to_string(), "b".to_string()])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn stop_clears_the_quote_table() {
        let (service, _dir) = test_service().await;
        service
            .shared
            .store
            .write()
            .await
            .put(quote("BTC/USDT", "a", 100.0, 101.0));

        service.stop().await;

        assert_eq!(service.state().await, ConnState::Closed);
        assert!(service.quotes_for("BTC/USDT").await.is_empty());
    }
}
