pub mod cache;
pub mod market_chart;
pub mod ohlcv;

pub use cache::{open_pool, CacheError, SqliteBackend};
pub use market_chart::{FetchError, HistoryService, MarketChartClient};
pub use ohlcv::{CandleClient, OhlcvCache};
