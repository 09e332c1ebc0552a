//! Orders, positions and closed-trade records.

use std::fmt;

use replay_core::{OrderSide, PositionSide, TimestampSecs};
use serde::{Deserialize, Serialize};

/// Identifier of an open (or formerly open) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos-{}", self.0)
    }
}

/// Caller-chosen identifier of a pending limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ord-{}", self.0)
    }
}

/// Market order request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub side: OrderSide,
    pub size: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    /// Amount risked, used for the R-multiple.
    #[serde(default)]
    pub initial_risk: Option<f64>,
}

impl MarketOrder {
    /// Plain market order without protective levels.
    pub fn new(side: OrderSide, size: f64) -> Self {
        Self {
            side,
            size,
            stop_loss: None,
            take_profit: None,
            initial_risk: None,
        }
    }

    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    pub fn with_initial_risk(mut self, risk: f64) -> Self {
        self.initial_risk = Some(risk);
        self
    }
}

/// Resting limit order waiting for its price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: OrderId,
    pub side: OrderSide,
    pub size: f64,
    pub limit_price: f64,
}

impl PendingOrder {
    /// Whether a bar with this range reaches the limit.
    ///
    /// Buys fill when the low trades at or below the limit, sells when the
    /// high trades at or above it.
    pub fn is_triggered(&self, low: f64, high: f64) -> bool {
        match self.side {
            OrderSide::Buy => low <= self.limit_price,
            OrderSide::Sell => high >= self.limit_price,
        }
    }
}

/// An open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub entry_time: TimestampSecs,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub initial_risk: Option<f64>,
    /// Unrealized P&L at the last mark.
    pub current_pnl: f64,
    /// Unrealized move as a percentage of the entry price.
    pub current_pnl_percent: f64,
    /// Favorable price distance from entry at the last mark.
    pub pips: f64,
}

impl Position {
    /// Re-mark the position at `price`.
    pub fn mark(&mut self, price: f64) {
        let diff = self.side.price_diff(self.entry_price, price);
        self.current_pnl = diff * self.size;
        self.current_pnl_percent = percent_of(diff, self.entry_price);
        self.pips = diff;
    }

    /// Check if the stop is hit at `close`.
    pub fn is_stopped(&self, close: f64) -> bool {
        match (self.side, self.stop_loss) {
            (PositionSide::Long, Some(stop)) => close <= stop,
            (PositionSide::Short, Some(stop)) => close >= stop,
            _ => false,
        }
    }

    /// Check if the target is hit at `close`.
    pub fn is_target_hit(&self, close: f64) -> bool {
        match (self.side, self.take_profit) {
            (PositionSide::Long, Some(tp)) => close >= tp,
            (PositionSide::Short, Some(tp)) => close <= tp,
            _ => false,
        }
    }
}

/// Reason for exiting a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Stop loss hit.
    StopLoss,
    /// Take profit hit.
    TakeProfit,
    /// Closed by the user.
    Manual,
}

/// Closed trade record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub position_id: PositionId,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: TimestampSecs,
    pub exit_time: TimestampSecs,
    pub size: f64,
    /// Realized P&L.
    pub pnl: f64,
    pub pnl_percent: f64,
    /// P&L in units of the initial risk; 0 without one.
    pub r_multiple: f64,
    pub reason: ExitReason,
}

impl TradeResult {
    /// Settle `position` at `exit_price`.
    pub fn settle(position: &Position, exit_price: f64, exit_time: TimestampSecs, reason: ExitReason) -> Self {
        let diff = position.side.price_diff(position.entry_price, exit_price);
        let pnl = diff * position.size;
        let r_multiple = match position.initial_risk {
            Some(risk) if risk != 0.0 => pnl / risk,
            _ => 0.0,
        };

        Self {
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time,
            size: position.size,
            pnl,
            pnl_percent: percent_of(diff, position.entry_price),
            r_multiple,
            reason,
        }
    }

    /// Holding time in seconds.
    pub fn duration_secs(&self) -> i64 {
        self.exit_time - self.entry_time
    }
}

fn percent_of(diff: f64, base: f64) -> f64 {
    if base != 0.0 {
        diff / base * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_position(side: PositionSide, stop_loss: Option<f64>, take_profit: Option<f64>) -> Position {
        Position {
            id: PositionId(1),
            symbol: "BTCUSDT".to_string(),
            side,
            size: 2.0,
            entry_price: 100.0,
            entry_time: 60,
            stop_loss,
            take_profit,
            initial_risk: Some(10.0),
            current_pnl: 0.0,
            current_pnl_percent: 0.0,
            pips: 0.0,
        }
    }

    #[test]
    fn test_mark_short() {
        let mut position = make_position(PositionSide::Short, None, None);
        position.mark(90.0);
        assert_relative_eq!(position.current_pnl, 20.0);
        assert_relative_eq!(position.current_pnl_percent, 10.0);
        assert_relative_eq!(position.pips, 10.0);
    }

    #[test]
    fn test_stop_and_target_use_close() {
        let long = make_position(PositionSide::Long, Some(95.0), Some(110.0));
        assert!(long.is_stopped(95.0));
        assert!(!long.is_stopped(95.5));
        assert!(long.is_target_hit(110.0));

        let short = make_position(PositionSide::Short, Some(105.0), Some(90.0));
        assert!(short.is_stopped(106.0));
        assert!(short.is_target_hit(89.0));
        assert!(!short.is_target_hit(91.0));
    }

    #[test]
    fn test_settle_r_multiple() {
        let position = make_position(PositionSide::Long, None, None);
        let trade = TradeResult::settle(&position, 95.0, 120, ExitReason::Manual);
        assert_relative_eq!(trade.pnl, -10.0);
        assert_relative_eq!(trade.pnl_percent, -5.0);
        assert_relative_eq!(trade.r_multiple, -1.0);
        assert_eq!(trade.duration_secs(), 60);
    }

    #[test]
    fn test_limit_trigger() {
        let buy = PendingOrder {
            id: OrderId(1),
            side: OrderSide::Buy,
            size: 1.0,
            limit_price: 98.0,
        };
        assert!(buy.is_triggered(97.0, 99.0));
        assert!(!buy.is_triggered(98.5, 99.0));

        let sell = PendingOrder {
            side: OrderSide::Sell,
            limit_price: 105.0,
            ..buy
        };
        assert!(sell.is_triggered(100.0, 105.0));
        assert!(!sell.is_triggered(100.0, 104.0));
    }
}
