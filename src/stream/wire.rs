use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ArbitrageAlert, Quote};

/// Client -> server control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub action: Action,
    pub symbols: Vec<String>,
    pub exchanges: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

/// Server -> client frames, discriminated by `type`.
///
/// Shape validation happens here and nowhere else: a frame that does not
/// deserialize into one of these variants is a protocol error, dropped by
/// the dispatcher. Internal code never branches on optional-field presence.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Price {
        symbol: String,
        exchange: String,
        bid: f64,
        ask: f64,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Arbitrage {
        symbol: String,
        buy_exchange: String,
        sell_exchange: String,
        buy_price: f64,
        sell_price: f64,
        spread_percent: f64,
        profit: f64,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Subscribed {
        #[serde(default)]
        symbols: Vec<String>,
        #[serde(default)]
        exchanges: Vec<String>,
    },
    Unsubscribed {
        #[serde(default)]
        symbols: Vec<String>,
        #[serde(default)]
        exchanges: Vec<String>,
    },
    Error {
        message: String,
    },
}

fn wire_timestamp(millis: Option<i64>) -> DateTime<Utc> {
    millis
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

impl ServerMessage {
    /// Convert a price frame into a quote, rejecting negative or non-finite
    /// sides. Returns `None` for non-price frames.
    pub fn into_quote(self) -> Option<Quote> {
        match self {
            ServerMessage::Price {
                symbol,
                exchange,
                bid,
                ask,
                timestamp,
            } => {
                if !bid.is_finite() || !ask.is_finite() || bid < 0.0 || ask < 0.0 {
                    return None;
                }
                Some(Quote::new(symbol, exchange, bid, ask, wire_timestamp(timestamp)))
            }
            _ => None,
        }
    }

    /// Convert an arbitrage frame into an alert. Returns `None` for other
    /// frames.
    pub fn into_alert(self) -> Option<ArbitrageAlert> {
        match self {
            ServerMessage::Arbitrage {
                symbol,
                buy_exchange,
                sell_exchange,
                buy_price,
                sell_price,
                spread_percent,
                profit,
                timestamp,
            } => Some(ArbitrageAlert {
                symbol,
                buy_exchange,
                sell_exchange,
                buy_price,
                sell_price,
                spread_percent,
                profit,
                timestamp: wire_timestamp(timestamp),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_frame_parses_and_computes_midpoint() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"price","symbol":"BTC/USDT","exchange":"binance","bid":100.0,"ask":101.0,"timestamp":1700000000000}"#,
        )
        .unwrap();
        let quote = msg.into_quote().unwrap();
        assert_eq!(quote.mid_price, 100.5);
        assert_eq!(quote.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn price_frame_missing_bid_is_rejected_at_parse() {
        let res: Result<ServerMessage, _> = serde_json::from_str(
            r#"{"type":"price","symbol":"BTC/USDT","exchange":"binance","ask":101.0}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn negative_sides_are_rejected() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"price","symbol":"BTC/USDT","exchange":"binance","bid":-1.0,"ask":101.0}"#,
        )
        .unwrap();
        assert!(msg.into_quote().is_none());
    }

    #[test]
    fn arbitrage_frame_uses_camel_case_fields() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"arbitrage","symbol":"BTC/USDT","buyExchange":"binance","sellExchange":"kraken","buyPrice":100.0,"sellPrice":102.0,"spreadPercent":2.0,"profit":2.0}"#,
        )
        .unwrap();
        let alert = msg.into_alert().unwrap();
        assert_eq!(alert.buy_exchange, "binance");
        assert_eq!(alert.spread_percent, 2.0);
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        let res: Result<ServerMessage, _> =
            serde_json::from_str(r#"{"type":"heartbeat"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn control_message_serializes_action_lowercase() {
        let msg = ControlMessage {
            action: Action::Subscribe,
            symbols: vec!["BTC/USDT".into()],
            exchanges: vec!["binance".into()],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""action":"subscribe""#));
    }
}
