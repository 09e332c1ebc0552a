//! Fill cost helpers.
//!
//! Pure formulas for slippage, commission and risk-based sizing. The
//! execution engine fills frictionlessly and never calls these; hosts use them
//! to estimate what a trade would have cost.

use replay_core::config::ExecutionConfig;
use replay_core::OrderSide;

use crate::position::TradeResult;

/// Cost model built from the execution config.
#[derive(Debug, Clone)]
pub struct FillModel {
    config: ExecutionConfig,
}

impl FillModel {
    /// Create a new fill model.
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// Price after adverse slippage for an order on `side`.
    ///
    /// Buys pay up, sells give up; entries and exits use their own tick counts.
    pub fn slipped_price(&self, price: f64, side: OrderSide, is_entry: bool) -> f64 {
        let ticks = if is_entry {
            self.config.slippage_ticks_entry
        } else {
            self.config.slippage_ticks_exit
        };
        let slippage = ticks as f64 * self.config.tick_size;
        match side {
            OrderSide::Buy => price + slippage,
            OrderSide::Sell => price - slippage,
        }
    }

    /// Commission for a given notional and order type.
    pub fn commission(&self, notional: f64, is_maker: bool) -> f64 {
        let bps = if is_maker {
            self.config.maker_fee_bps
        } else {
            self.config.taker_fee_bps
        };
        notional * bps / 10000.0
    }

    /// Taker commission for entering and exiting `trade`.
    pub fn round_trip_cost(&self, trade: &TradeResult) -> f64 {
        let entry = self.commission(trade.entry_price * trade.size, false);
        let exit = self.commission(trade.exit_price * trade.size, false);
        entry + exit
    }
}

/// Size that loses `balance * risk_fraction` if the stop is hit.
///
/// Returns 0 when entry and stop coincide.
pub fn position_size_for_risk(balance: f64, risk_fraction: f64, entry: f64, stop: f64) -> f64 {
    let distance = (entry - stop).abs();
    if distance == 0.0 {
        return 0.0;
    }
    balance * risk_fraction / distance
}
