use thiserror::Error;

use crate::domain::{Opportunity, TradeProjection};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("trade amount must be positive, got {0}")]
    NonPositiveAmount(f64),

    #[error("buy price must be positive, got {0}")]
    NonPositiveBuyPrice(f64),

    #[error("prices and amount must be finite numbers")]
    NotFinite,
}

/// Pure trade-economics calculator: both legs pay the configured fee rate.
#[derive(Debug, Clone)]
pub struct ProfitCalculator {
    fee_rate: f64,
}

impl ProfitCalculator {
    pub fn new(fee_rate: f64) -> Self {
        Self { fee_rate }
    }

    /// Project the economics of buying `trade_amount_usd` at the opportunity's
    /// buy price and selling at its sell price.
    ///
    /// Invalid numeric input is a guarded failure, never a division by zero.
    pub fn compute(
        &self,
        opportunity: &Opportunity,
        trade_amount_usd: f64,
    ) -> Result<TradeProjection, ValidationError> {
        let buy_price = opportunity.buy_price;
        let sell_price = opportunity.sell_price;

        if !buy_price.is_finite() || !sell_price.is_finite() || !trade_amount_usd.is_finite() {
            return Err(ValidationError::NotFinite);
        }
        if trade_amount_usd <= 0.0 {
            return Err(ValidationError::NonPositiveAmount(trade_amount_usd));
        }
        if buy_price <= 0.0 {
            return Err(ValidationError::NonPositiveBuyPrice(buy_price));
        }

        let buy_amount = trade_amount_usd / buy_price;
        let buy_total = trade_amount_usd;
        let sell_total = buy_amount * sell_price;
        let fees = buy_total * self.fee_rate + sell_total * self.fee_rate;
        let net_profit = sell_total - buy_total - fees;
        let roi_pct = net_profit / buy_total * 100.0;

        Ok(TradeProjection {
            buy_amount,
            buy_total,
            sell_total,
            fees,
            net_profit,
            roi_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opportunity(buy_price: f64, sell_price: f64) -> Opportunity {
        Opportunity {
            symbol: "BTC/USDT".into(),
            buy_exchange: "binance".into(),
            buy_price,
            sell_exchange: "kraken".into(),
            sell_price,
            spread_percent: (sell_price - buy_price) / buy_price * 100.0,
        }
    }

    #[test]
    fn projects_both_legs_with_fees() {
        let calc = ProfitCalculator::new(0.001);
        let p = calc.compute(&opportunity(100.0, 105.0), 1000.0).unwrap();

        assert_eq!(p.buy_amount, 10.0);
        assert_eq!(p.buy_total, 1000.0);
        assert_eq!(p.sell_total, 1050.0);
        // 0.1% on each leg: 1.0 + 1.05
        assert!((p.fees - 2.05).abs() < 1e-9);
        assert!((p.net_profit - (1050.0 - 1000.0 - 2.05)).abs() < 1e-9);
        assert!((p.roi_pct - p.net_profit / 1000.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_buy_price_is_guarded() {
        let calc = ProfitCalculator::new(0.001);
        assert_eq!(
            calc.compute(&opportunity(0.0, 105.0), 1000.0),
            Err(ValidationError::NonPositiveBuyPrice(0.0))
        );
    }

    #[test]
    fn non_positive_amount_is_guarded() {
        let calc = ProfitCalculator::new(0.001);
        assert_eq!(
            calc.compute(&opportunity(100.0, 105.0), 0.0),
            Err(ValidationError::NonPositiveAmount(0.0))
        );
        assert_eq!(
            calc.compute(&opportunity(100.0, 105.0), -5.0),
            Err(ValidationError::NonPositiveAmount(-5.0))
        );
    }

    #[test]
    fn nan_input_is_guarded() {
        let calc = ProfitCalculator::new(0.001);
        assert_eq!(
            calc.compute(&opportunity(f64::NAN, 105.0), 1000.0),
            Err(ValidationError::NotFinite)
        );
    }
}
