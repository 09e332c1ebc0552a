//! Configuration structures for the bar-replay system.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::PlaybackSpeed;

/// Main configuration for a replay session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playback configuration.
    pub replay: ReplayConfig,
    /// Simulated account configuration.
    pub account: AccountConfig,
    /// Cost model inputs for the fill helpers.
    pub execution: ExecutionConfig,
}

impl Config {
    /// Parse a configuration from JSON. Missing sections fall back to defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.replay.base_interval_ms == 0 {
            return Err(Error::config("replay.base_interval_ms must be positive"));
        }
        let balance = self.account.initial_balance;
        if !balance.is_finite() || balance <= 0.0 {
            return Err(Error::config(format!(
                "account.initial_balance must be positive (got {balance})"
            )));
        }
        if !self.execution.tick_size.is_finite() || self.execution.tick_size <= 0.0 {
            return Err(Error::config("execution.tick_size must be positive"));
        }
        Ok(())
    }
}

/// Playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Timer period at 1x, in milliseconds.
    pub base_interval_ms: u64,
    /// Speed a freshly initialized scheduler starts with.
    pub default_speed: PlaybackSpeed,
    /// Whether the chart should follow the cursor.
    pub auto_scroll: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 200,
            default_speed: PlaybackSpeed::X1,
            auto_scroll: true,
        }
    }
}

/// Simulated account configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Trading symbol (e.g., "BTCUSDT").
    pub symbol: String,
    /// Starting balance.
    pub initial_balance: f64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            initial_balance: 10000.0,
        }
    }
}

/// Execution cost configuration.
///
/// Only the pure cost helpers read these; fills in the engine are frictionless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Tick size (minimum price increment).
    pub tick_size: f64,
    /// Slippage for entry (ticks).
    pub slippage_ticks_entry: u32,
    /// Slippage for exit (ticks).
    pub slippage_ticks_exit: u32,
    /// Taker fee in basis points.
    pub taker_fee_bps: f64,
    /// Maker fee in basis points (negative = rebate).
    pub maker_fee_bps: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            tick_size: 0.1,
            slippage_ticks_entry: 1,
            slippage_ticks_exit: 1,
            taker_fee_bps: 5.0,
            maker_fee_bps: -1.0,
        }
    }
}
