//! Execution and accounting engine.
//!
//! Fills orders against the candle fed by the host, marks open positions on
//! every bar, applies stop-loss / take-profit and keeps the running balance.
//!
//! Two deliberate simplifications, both visible to callers:
//! - limit orders fill at the close of the triggering bar, not at the limit;
//! - stops and targets are evaluated against the close only, so an intrabar
//!   touch that closes back inside the range does not trigger.

use std::collections::BTreeMap;

use replay_core::config::AccountConfig;
use replay_core::{Candle, TimestampSecs};
use tracing::{debug, info, warn};

use crate::metrics::{BacktestStatistics, DrawdownTracker, StatisticsCalculator};
use crate::position::{ExitReason, MarketOrder, OrderId, PendingOrder, Position, PositionId, TradeResult};

/// Simulated single-symbol account.
pub struct ExecutionEngine {
    symbol: String,
    initial_balance: f64,
    balance: f64,
    positions: BTreeMap<PositionId, Position>,
    pending_orders: BTreeMap<OrderId, PendingOrder>,
    trades: Vec<TradeResult>,
    drawdown: DrawdownTracker,
    calculator: StatisticsCalculator,
    next_position_id: u64,
}

impl ExecutionEngine {
    /// Create an engine with the configured symbol and starting balance.
    pub fn new(config: &AccountConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            initial_balance: config.initial_balance,
            balance: config.initial_balance,
            positions: BTreeMap::new(),
            pending_orders: BTreeMap::new(),
            trades: Vec::new(),
            drawdown: DrawdownTracker::new(config.initial_balance),
            calculator: StatisticsCalculator::new(config.initial_balance),
            next_position_id: 1,
        }
    }

    /// Open a position at the candle's close.
    pub fn execute_market_order(&mut self, order: &MarketOrder, candle: &Candle) -> Position {
        let id = PositionId(self.next_position_id);
        self.next_position_id += 1;

        let position = Position {
            id,
            symbol: self.symbol.clone(),
            side: order.side.into(),
            size: order.size,
            entry_price: candle.close,
            entry_time: candle.time,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            initial_risk: order.initial_risk,
            current_pnl: 0.0,
            current_pnl_percent: 0.0,
            pips: 0.0,
        };

        info!(
            %id,
            side = ?position.side,
            size = position.size,
            price = position.entry_price,
            "position opened"
        );
        self.positions.insert(id, position.clone());
        position
    }

    /// Rest a limit order. An order with the same id is replaced.
    pub fn place_limit_order(&mut self, order: PendingOrder) {
        debug!(id = %order.id, side = ?order.side, limit = order.limit_price, "limit order placed");
        if let Some(previous) = self.pending_orders.insert(order.id, order) {
            warn!(id = %previous.id, "limit order replaced");
        }
    }

    /// Remove a pending order, returning it if it existed.
    pub fn cancel_limit_order(&mut self, id: OrderId) -> Option<PendingOrder> {
        let order = self.pending_orders.remove(&id);
        if order.is_some() {
            debug!(%id, "limit order cancelled");
        }
        order
    }

    /// Change the protective levels of an open position.
    ///
    /// Returns false if the position does not exist.
    pub fn modify_position(&mut self, id: PositionId, stop_loss: Option<f64>, take_profit: Option<f64>) -> bool {
        match self.positions.get_mut(&id) {
            Some(position) => {
                position.stop_loss = stop_loss;
                position.take_profit = take_profit;
                debug!(%id, ?stop_loss, ?take_profit, "position modified");
                true
            }
            None => false,
        }
    }

    /// Per-bar update.
    ///
    /// Fills triggered limit orders, marks every open position at the close,
    /// closes those whose stop or target is hit, then records the equity
    /// reading for drawdown. Returns the trades closed on this bar.
    pub fn update_positions(&mut self, candle: &Candle) -> Vec<TradeResult> {
        self.fill_limit_orders(candle);

        let close = candle.close;
        let mut exits = Vec::new();
        for position in self.positions.values_mut() {
            position.mark(close);

            // Stop takes precedence; a stopped position skips the target check.
            if position.is_stopped(close) {
                if let Some(stop) = position.stop_loss {
                    exits.push((position.id, stop, ExitReason::StopLoss));
                    continue;
                }
            }
            if position.is_target_hit(close) {
                if let Some(target) = position.take_profit {
                    exits.push((position.id, target, ExitReason::TakeProfit));
                }
            }
        }

        let closed: Vec<TradeResult> = exits
            .into_iter()
            .filter_map(|(id, price, reason)| self.close_position(id, price, candle.time, reason))
            .collect();

        self.drawdown.update(self.equity());
        closed
    }

    fn fill_limit_orders(&mut self, candle: &Candle) {
        let triggered: Vec<OrderId> = self
            .pending_orders
            .values()
            .filter(|order| order.is_triggered(candle.low, candle.high))
            .map(|order| order.id)
            .collect();

        for id in triggered {
            if let Some(order) = self.pending_orders.remove(&id) {
                debug!(%id, limit = order.limit_price, fill = candle.close, "limit order filled");
                let market = MarketOrder::new(order.side, order.size);
                self.execute_market_order(&market, candle);
            }
        }
    }

    /// Close a position. Unknown ids are ignored.
    pub fn close_position(
        &mut self,
        id: PositionId,
        exit_price: f64,
        exit_time: TimestampSecs,
        reason: ExitReason,
    ) -> Option<TradeResult> {
        let position = self.positions.remove(&id)?;
        let trade = TradeResult::settle(&position, exit_price, exit_time, reason);

        self.balance += trade.pnl;
        info!(
            %id,
            ?reason,
            exit = exit_price,
            pnl = trade.pnl,
            balance = self.balance,
            "position closed"
        );

        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Close every open position at the same price and time.
    pub fn close_all_positions(&mut self, price: f64, time: TimestampSecs) -> Vec<TradeResult> {
        let ids: Vec<PositionId> = self.positions.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.close_position(id, price, time, ExitReason::Manual))
            .collect()
    }

    /// Get an open position.
    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    /// Snapshot of open positions, ordered by id.
    pub fn positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    /// Snapshot of pending limit orders, ordered by id.
    pub fn pending_orders(&self) -> Vec<PendingOrder> {
        self.pending_orders.values().cloned().collect()
    }

    /// Snapshot of closed trades in closing order.
    pub fn trades(&self) -> Vec<TradeResult> {
        self.trades.clone()
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Realized balance.
    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    /// Balance plus unrealized P&L at the last mark.
    pub fn equity(&self) -> f64 {
        self.balance + self.positions.values().map(|p| p.current_pnl).sum::<f64>()
    }

    /// Compute statistics from the current account state.
    pub fn stats(&self) -> BacktestStatistics {
        let open: Vec<Position> = self.positions();
        self.calculator.calculate(&self.trades, self.balance, &open, &self.drawdown)
    }

    /// Return to the initial balance with no positions, orders or history.
    pub fn reset(&mut self) {
        self.balance = self.initial_balance;
        self.positions.clear();
        self.pending_orders.clear();
        self.trades.clear();
        self.drawdown = DrawdownTracker::new(self.initial_balance);
        self.next_position_id = 1;
        debug!(balance = self.balance, "engine reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use replay_core::{OrderSide, PositionSide};

    fn make_engine() -> ExecutionEngine {
        ExecutionEngine::new(&AccountConfig::default())
    }

    fn make_candle(time: i64, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            time,
            open: close,
            high,
            low,
            close,
        }
    }

    fn flat(time: i64, close: f64) -> Candle {
        make_candle(time, close, close, close)
    }

    #[test]
    fn test_market_order_opens_at_close() {
        let mut engine = make_engine();
        let order = MarketOrder::new(OrderSide::Sell, 2.0).with_stop_loss(110.0);
        let position = engine.execute_market_order(&order, &make_candle(60, 95.0, 105.0, 100.0));

        assert_eq!(position.side, PositionSide::Short);
        assert_eq!(position.entry_price, 100.0);
        assert_eq!(position.entry_time, 60);
        assert_eq!(position.stop_loss, Some(110.0));
        assert_eq!(position.current_pnl, 0.0);
        assert_eq!(engine.positions().len(), 1);
    }

    #[test]
    fn test_stop_loss_closes_at_stop_price() {
        let mut engine = make_engine();
        let order = MarketOrder::new(OrderSide::Buy, 1.0).with_stop_loss(95.0);
        let position = engine.execute_market_order(&order, &flat(0, 100.0));

        let closed = engine.update_positions(&flat(60, 90.0));

        assert_eq!(closed.len(), 1);
        let trade = &closed[0];
        assert_eq!(trade.position_id, position.id);
        assert_eq!(trade.reason, ExitReason::StopLoss);
        assert_relative_eq!(trade.exit_price, 95.0);
        assert_relative_eq!(trade.pnl, -5.0);
        assert!(engine.positions().is_empty());
        assert_relative_eq!(engine.balance(), 9995.0);
    }

    #[test]
    fn test_stop_skips_take_profit_on_same_bar() {
        let mut engine = make_engine();
        // Misconfigured levels where both trigger on the same close.
        let order = MarketOrder::new(OrderSide::Buy, 1.0)
            .with_stop_loss(95.0)
            .with_take_profit(90.0);
        engine.execute_market_order(&order, &flat(0, 100.0));

        let closed = engine.update_positions(&flat(60, 90.0));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, ExitReason::StopLoss);
        assert_eq!(engine.trades().len(), 1);
    }

    #[test]
    fn test_take_profit_short() {
        let mut engine = make_engine();
        let order = MarketOrder::new(OrderSide::Sell, 2.0)
            .with_take_profit(90.0)
            .with_initial_risk(10.0);
        engine.execute_market_order(&order, &flat(0, 100.0));

        let closed = engine.update_positions(&flat(60, 88.0));
        assert_eq!(closed[0].reason, ExitReason::TakeProfit);
        assert_relative_eq!(closed[0].exit_price, 90.0);
        assert_relative_eq!(closed[0].pnl, 20.0);
        assert_relative_eq!(closed[0].r_multiple, 2.0);
    }

    #[test]
    fn test_intrabar_touch_does_not_stop() {
        let mut engine = make_engine();
        let order = MarketOrder::new(OrderSide::Buy, 1.0).with_stop_loss(95.0);
        engine.execute_market_order(&order, &flat(0, 100.0));

        let closed = engine.update_positions(&make_candle(60, 90.0, 101.0, 99.0));
        assert!(closed.is_empty());
        let position = &engine.positions()[0];
        assert_relative_eq!(position.current_pnl, -1.0);
        assert_relative_eq!(position.current_pnl_percent, -1.0);
        assert_relative_eq!(position.pips, -1.0);
    }

    #[test]
    fn test_limit_buy_fills_at_candle_close() {
        let mut engine = make_engine();
        engine.place_limit_order(PendingOrder {
            id: OrderId(7),
            side: OrderSide::Buy,
            size: 1.0,
            limit_price: 98.0,
        });

        engine.update_positions(&make_candle(60, 97.0, 99.0, 98.5));

        assert!(engine.pending_orders().is_empty());
        let positions = engine.positions();
        assert_eq!(positions.len(), 1);
        assert_relative_eq!(positions[0].entry_price, 98.5);
        assert_eq!(positions[0].entry_time, 60);
    }

    #[test]
    fn test_limit_order_waits_until_triggered() {
        let mut engine = make_engine();
        engine.place_limit_order(PendingOrder {
            id: OrderId(1),
            side: OrderSide::Sell,
            size: 1.0,
            limit_price: 105.0,
        });

        engine.update_positions(&make_candle(60, 99.0, 104.0, 100.0));
        assert_eq!(engine.pending_orders().len(), 1);
        assert!(engine.positions().is_empty());

        engine.update_positions(&make_candle(120, 100.0, 106.0, 104.0));
        assert!(engine.pending_orders().is_empty());
        assert_eq!(engine.positions()[0].side, PositionSide::Short);
    }

    #[test]
    fn test_duplicate_limit_id_replaces() {
        let mut engine = make_engine();
        let order = PendingOrder {
            id: OrderId(1),
            side: OrderSide::Buy,
            size: 1.0,
            limit_price: 98.0,
        };
        engine.place_limit_order(order.clone());
        engine.place_limit_order(PendingOrder {
            limit_price: 90.0,
            ..order
        });

        let pending = engine.pending_orders();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].limit_price, 90.0);
        assert!(engine.cancel_limit_order(OrderId(1)).is_some());
        assert!(engine.cancel_limit_order(OrderId(1)).is_none());
    }

    #[test]
    fn test_close_position_once() {
        let mut engine = make_engine();
        let position = engine.execute_market_order(&MarketOrder::new(OrderSide::Buy, 3.0), &flat(0, 100.0));

        let trade = engine
            .close_position(position.id, 110.0, 60, ExitReason::Manual)
            .unwrap();
        assert_relative_eq!(trade.pnl, 30.0);
        assert_relative_eq!(trade.pnl_percent, 10.0);
        assert_eq!(trade.r_multiple, 0.0);

        assert!(engine.close_position(position.id, 120.0, 120, ExitReason::Manual).is_none());
        assert_eq!(engine.trades().len(), 1);
        assert_relative_eq!(engine.balance(), 10030.0);
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let mut engine = make_engine();
        assert!(engine.close_position(PositionId(42), 1.0, 0, ExitReason::Manual).is_none());
        assert!(!engine.modify_position(PositionId(42), Some(1.0), None));
        assert!(engine.cancel_limit_order(OrderId(42)).is_none());
        assert_eq!(engine.balance(), engine.initial_balance());
    }

    #[test]
    fn test_modify_position_arms_stop() {
        let mut engine = make_engine();
        let position = engine.execute_market_order(&MarketOrder::new(OrderSide::Buy, 1.0), &flat(0, 100.0));
        assert!(engine.modify_position(position.id, Some(99.0), None));

        let closed = engine.update_positions(&flat(60, 98.0));
        assert_eq!(closed[0].reason, ExitReason::StopLoss);
        assert_relative_eq!(closed[0].exit_price, 99.0);
    }

    #[test]
    fn test_close_all_positions() {
        let mut engine = make_engine();
        engine.execute_market_order(&MarketOrder::new(OrderSide::Buy, 1.0), &flat(0, 100.0));
        engine.execute_market_order(&MarketOrder::new(OrderSide::Sell, 1.0), &flat(0, 100.0));

        let closed = engine.close_all_positions(105.0, 60);
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|t| t.reason == ExitReason::Manual));
        assert!(engine.positions().is_empty());
        assert_relative_eq!(engine.balance(), 10000.0);
    }

    #[test]
    fn test_stats_from_closed_trades() {
        let mut engine = make_engine();
        let win = engine.execute_market_order(&MarketOrder::new(OrderSide::Buy, 1.0), &flat(0, 1000.0));
        engine.close_position(win.id, 1200.0, 60, ExitReason::Manual);
        let loss = engine.execute_market_order(&MarketOrder::new(OrderSide::Buy, 1.0), &flat(60, 1000.0));
        engine.close_position(loss.id, 900.0, 120, ExitReason::Manual);

        let stats = engine.stats();
        assert_relative_eq!(stats.win_rate, 50.0);
        assert_relative_eq!(stats.gross_profit, 200.0);
        assert_relative_eq!(stats.gross_loss, 100.0);
        assert_relative_eq!(stats.profit_factor, 2.0);
        assert_relative_eq!(stats.total_pnl, 100.0);
        assert_relative_eq!(stats.current_equity, 10100.0);
    }

    #[test]
    fn test_drawdown_tracks_unrealized_equity() {
        let mut engine = make_engine();
        engine.execute_market_order(&MarketOrder::new(OrderSide::Buy, 10.0), &flat(0, 100.0));

        engine.update_positions(&flat(60, 110.0));
        engine.update_positions(&flat(120, 90.0));
        engine.update_positions(&flat(180, 100.0));

        let stats = engine.stats();
        assert_relative_eq!(stats.max_drawdown, 200.0);
        assert_relative_eq!(stats.max_drawdown_percent, 200.0 / 10100.0 * 100.0);
        assert_relative_eq!(stats.current_equity, 10000.0);
        assert_eq!(stats.open_positions, 1);
    }

    #[test]
    fn test_reset() {
        let mut engine = make_engine();
        let position = engine.execute_market_order(&MarketOrder::new(OrderSide::Buy, 1.0), &flat(0, 100.0));
        engine.update_positions(&flat(60, 50.0));
        engine.close_position(position.id, 50.0, 60, ExitReason::Manual);
        engine.place_limit_order(PendingOrder {
            id: OrderId(1),
            side: OrderSide::Buy,
            size: 1.0,
            limit_price: 10.0,
        });

        engine.reset();

        assert_eq!(engine.balance(), 10000.0);
        assert!(engine.positions().is_empty());
        assert!(engine.pending_orders().is_empty());
        assert!(engine.trades().is_empty());
        let stats = engine.stats();
        assert_eq!(stats.max_drawdown, 0.0);
        assert_eq!(stats.total_trades, 0);
    }
}
