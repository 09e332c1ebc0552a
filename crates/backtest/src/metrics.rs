//! Backtest performance statistics.
//!
//! Statistics are derived on demand from closed trades plus the live account
//! state; only the drawdown maxima are tracked incrementally, because they
//! depend on every intermediate equity reading.

use ordered_float::OrderedFloat;
use replay_core::TimestampSecs;
use serde::{Deserialize, Serialize};

use crate::position::{Position, TradeResult};

/// Aggregate performance statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestStatistics {
    /// Number of closed trades.
    pub total_trades: u32,
    /// Trades with positive P&L.
    pub winning_trades: u32,
    /// Trades with negative P&L.
    pub losing_trades: u32,
    /// Win rate (0-100).
    pub win_rate: f64,
    /// Sum of winning P&L.
    pub gross_profit: f64,
    /// Absolute sum of losing P&L.
    pub gross_loss: f64,
    /// Gross profit / gross loss. Infinite when there are wins and no losses.
    pub profit_factor: f64,
    /// Balance minus initial balance.
    pub total_pnl: f64,
    pub total_pnl_percent: f64,
    pub avg_win: f64,
    /// Average losing trade, as a positive number.
    pub avg_loss: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    /// Mean R-multiple over all trades.
    pub average_r: f64,
    /// Mean realized P&L per trade.
    pub expectancy: f64,
    /// Largest peak-to-trough equity decline seen so far.
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub current_balance: f64,
    /// Balance plus unrealized P&L of open positions.
    pub current_equity: f64,
    pub open_positions: u32,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    pub avg_trade_duration_secs: f64,
}

/// Point on the realized equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    /// Exit time of the trade that produced this point; `None` for the start.
    pub time: Option<TimestampSecs>,
    pub equity: f64,
    pub drawdown: f64,
    pub drawdown_percent: f64,
}

/// Running peak-equity and maximum drawdown.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawdownTracker {
    peak: f64,
    max_drawdown: f64,
    max_drawdown_percent: f64,
}

impl DrawdownTracker {
    /// Start tracking from `initial_equity`.
    pub fn new(initial_equity: f64) -> Self {
        Self {
            peak: initial_equity,
            max_drawdown: 0.0,
            max_drawdown_percent: 0.0,
        }
    }

    /// Record an equity reading.
    pub fn update(&mut self, equity: f64) {
        self.peak = self.peak.max(equity);
        let drawdown = self.peak - equity;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
        let drawdown_percent = if self.peak > 0.0 { drawdown / self.peak * 100.0 } else { 0.0 };
        if drawdown_percent > self.max_drawdown_percent {
            self.max_drawdown_percent = drawdown_percent;
        }
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn max_drawdown_percent(&self) -> f64 {
        self.max_drawdown_percent
    }
}

/// Statistics calculator.
pub struct StatisticsCalculator {
    initial_balance: f64,
}

impl StatisticsCalculator {
    /// Create a new calculator.
    pub fn new(initial_balance: f64) -> Self {
        Self { initial_balance }
    }

    /// Compute statistics from closed trades and the live account state.
    pub fn calculate(
        &self,
        trades: &[TradeResult],
        balance: f64,
        open_positions: &[Position],
        drawdown: &DrawdownTracker,
    ) -> BacktestStatistics {
        let mut stats = BacktestStatistics {
            total_trades: trades.len() as u32,
            current_balance: balance,
            open_positions: open_positions.len() as u32,
            max_drawdown: drawdown.max_drawdown(),
            max_drawdown_percent: drawdown.max_drawdown_percent(),
            ..Default::default()
        };

        stats.total_pnl = balance - self.initial_balance;
        stats.total_pnl_percent = if self.initial_balance != 0.0 {
            stats.total_pnl / self.initial_balance * 100.0
        } else {
            0.0
        };
        stats.current_equity = balance + open_positions.iter().map(|p| p.current_pnl).sum::<f64>();

        if trades.is_empty() {
            return stats;
        }

        let mut realized = 0.0;
        let mut total_r = 0.0;
        let mut total_duration = 0i64;
        let mut current_wins = 0u32;
        let mut current_losses = 0u32;

        for trade in trades {
            realized += trade.pnl;
            total_r += trade.r_multiple;
            total_duration += trade.duration_secs();

            if trade.pnl > 0.0 {
                stats.winning_trades += 1;
                stats.gross_profit += trade.pnl;

                current_wins += 1;
                current_losses = 0;
                stats.max_consecutive_wins = stats.max_consecutive_wins.max(current_wins);
            } else if trade.pnl < 0.0 {
                stats.losing_trades += 1;
                stats.gross_loss += trade.pnl;

                current_losses += 1;
                current_wins = 0;
                stats.max_consecutive_losses = stats.max_consecutive_losses.max(current_losses);
            } else {
                // Breakeven trades break both streaks.
                current_wins = 0;
                current_losses = 0;
            }
        }
        stats.gross_loss = stats.gross_loss.abs();

        let total = trades.len() as f64;
        stats.win_rate = stats.winning_trades as f64 / total * 100.0;

        stats.profit_factor = if stats.gross_loss > 0.0 {
            stats.gross_profit / stats.gross_loss
        } else if stats.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        stats.avg_win = if stats.winning_trades > 0 {
            stats.gross_profit / stats.winning_trades as f64
        } else {
            0.0
        };
        stats.avg_loss = if stats.losing_trades > 0 {
            stats.gross_loss / stats.losing_trades as f64
        } else {
            0.0
        };

        stats.best_trade = trades
            .iter()
            .map(|t| OrderedFloat(t.pnl))
            .max()
            .map_or(0.0, |p| p.0);
        stats.worst_trade = trades
            .iter()
            .map(|t| OrderedFloat(t.pnl))
            .min()
            .map_or(0.0, |p| p.0);

        stats.average_r = total_r / total;
        stats.expectancy = realized / total;
        stats.avg_trade_duration_secs = total_duration as f64 / total;

        stats
    }

    /// Build the realized equity curve from closed trades.
    pub fn equity_curve(&self, trades: &[TradeResult]) -> Vec<EquityPoint> {
        let mut curve = Vec::with_capacity(trades.len() + 1);

        curve.push(EquityPoint {
            time: None,
            equity: self.initial_balance,
            drawdown: 0.0,
            drawdown_percent: 0.0,
        });

        let mut equity = self.initial_balance;
        let mut peak = self.initial_balance;

        for trade in trades {
            equity += trade.pnl;
            peak = peak.max(equity);

            let drawdown = peak - equity;
            let drawdown_percent = if peak > 0.0 { drawdown / peak * 100.0 } else { 0.0 };

            curve.push(EquityPoint {
                time: Some(trade.exit_time),
                equity,
                drawdown,
                drawdown_percent,
            });
        }

        curve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{ExitReason, PositionId};
    use approx::assert_relative_eq;
    use replay_core::PositionSide;

    fn make_trade(pnl: f64, r_multiple: f64, duration_secs: i64) -> TradeResult {
        TradeResult {
            position_id: PositionId(1),
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            entry_time: 0,
            exit_time: duration_secs,
            size: 1.0,
            pnl,
            pnl_percent: pnl,
            r_multiple,
            reason: ExitReason::Manual,
        }
    }

    #[test]
    fn test_one_win_one_loss() {
        let calculator = StatisticsCalculator::new(10000.0);
        let trades = vec![make_trade(200.0, 2.0, 60), make_trade(-100.0, -1.0, 120)];
        let tracker = DrawdownTracker::new(10000.0);

        let stats = calculator.calculate(&trades, 10100.0, &[], &tracker);

        assert_eq!(stats.total_trades, 2);
        assert_relative_eq!(stats.win_rate, 50.0);
        assert_relative_eq!(stats.gross_profit, 200.0);
        assert_relative_eq!(stats.gross_loss, 100.0);
        assert_relative_eq!(stats.profit_factor, 2.0);
        assert_relative_eq!(stats.total_pnl, 100.0);
        assert_relative_eq!(stats.total_pnl_percent, 1.0);
        assert_relative_eq!(stats.avg_win, 200.0);
        assert_relative_eq!(stats.avg_loss, 100.0);
        assert_relative_eq!(stats.best_trade, 200.0);
        assert_relative_eq!(stats.worst_trade, -100.0);
        assert_relative_eq!(stats.average_r, 0.5);
        assert_relative_eq!(stats.expectancy, 50.0);
        assert_relative_eq!(stats.avg_trade_duration_secs, 90.0);
    }

    #[test]
    fn test_empty_trades() {
        let calculator = StatisticsCalculator::new(10000.0);
        let stats = calculator.calculate(&[], 10000.0, &[], &DrawdownTracker::new(10000.0));

        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.profit_factor, 0.0);
        assert_eq!(stats.best_trade, 0.0);
        assert_eq!(stats.average_r, 0.0);
        assert_eq!(stats.current_equity, 10000.0);
    }

    #[test]
    fn test_profit_factor_without_losses_is_infinite() {
        let calculator = StatisticsCalculator::new(10000.0);
        let trades = vec![make_trade(50.0, 0.0, 10)];
        let stats = calculator.calculate(&trades, 10050.0, &[], &DrawdownTracker::new(10000.0));
        assert!(stats.profit_factor.is_infinite());
    }

    #[test]
    fn test_breakeven_trade_counts_neither_way() {
        let calculator = StatisticsCalculator::new(10000.0);
        let trades = vec![make_trade(0.0, 0.0, 10)];
        let stats = calculator.calculate(&trades, 10000.0, &[], &DrawdownTracker::new(10000.0));
        assert_eq!(stats.winning_trades, 0);
        assert_eq!(stats.losing_trades, 0);
        assert_eq!(stats.profit_factor, 0.0);
    }

    #[test]
    fn test_consecutive_wins_losses() {
        let calculator = StatisticsCalculator::new(10000.0);
        let trades = vec![
            make_trade(10.0, 0.0, 1),
            make_trade(10.0, 0.0, 2),
            make_trade(10.0, 0.0, 3),
            make_trade(-5.0, 0.0, 4),
            make_trade(-5.0, 0.0, 5),
        ];

        let stats = calculator.calculate(&trades, 10020.0, &[], &DrawdownTracker::new(10000.0));

        assert_eq!(stats.max_consecutive_wins, 3);
        assert_eq!(stats.max_consecutive_losses, 2);
    }

    #[test]
    fn test_drawdown_tracker() {
        let mut tracker = DrawdownTracker::new(1000.0);
        tracker.update(1100.0);
        tracker.update(990.0);
        tracker.update(1050.0);

        assert_relative_eq!(tracker.peak(), 1100.0);
        assert_relative_eq!(tracker.max_drawdown(), 110.0);
        assert_relative_eq!(tracker.max_drawdown_percent(), 10.0);
    }

    #[test]
    fn test_equity_curve() {
        let calculator = StatisticsCalculator::new(10000.0);
        let trades = vec![
            make_trade(100.0, 0.0, 60),
            make_trade(-150.0, 0.0, 120),
            make_trade(200.0, 0.0, 180),
        ];

        let curve = calculator.equity_curve(&trades);

        assert_eq!(curve.len(), 4);
        assert_eq!(curve[0].time, None);
        assert_relative_eq!(curve[1].equity, 10100.0);
        assert_relative_eq!(curve[2].equity, 9950.0);
        assert_relative_eq!(curve[2].drawdown, 150.0);
        assert_relative_eq!(curve[3].drawdown, 0.0);
    }
}
