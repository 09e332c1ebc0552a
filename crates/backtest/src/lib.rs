//! Execution and accounting engine for the bar-replay system.
//!
//! This crate provides:
//! - Market and limit order fills against replayed candles
//! - Position tracking with close-price stop-loss / take-profit
//! - Balance, drawdown and performance statistics
//! - Pure slippage / commission helpers

pub mod engine;
pub mod fill_model;
pub mod metrics;
pub mod position;

pub use engine::ExecutionEngine;
pub use fill_model::{position_size_for_risk, FillModel};
pub use metrics::{BacktestStatistics, DrawdownTracker, EquityPoint, StatisticsCalculator};
pub use position::{ExitReason, MarketOrder, OrderId, PendingOrder, Position, PositionId, TradeResult};
