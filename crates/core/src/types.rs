//! Core data types for the bar-replay system.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Timestamp in seconds since Unix epoch (UTC).
pub type TimestampSecs = i64;

/// One OHLC price bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time (epoch seconds).
    pub time: TimestampSecs,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
}

impl Candle {
    /// Bar open time as a UTC datetime, if representable.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }

    /// Whether high/low bound the open and close.
    #[inline]
    pub fn is_consistent(&self) -> bool {
        let body_high = self.open.max(self.close);
        let body_low = self.open.min(self.close);
        self.low <= body_low && body_high <= self.high
    }
}

/// An immutable, validated sequence of candles addressed by index.
///
/// Cloning is cheap: the bars live behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: Arc<[Candle]>,
}

impl CandleSeries {
    /// Validate and wrap a candle vector.
    ///
    /// Timestamps must be strictly increasing and every bar's high/low must
    /// bound its open and close.
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        for (i, candle) in candles.iter().enumerate() {
            if !candle.is_consistent() {
                return Err(Error::data(format!(
                    "candle {i} at {} has inconsistent OHLC values",
                    candle.time
                )));
            }
        }
        if let Some(i) = candles.windows(2).position(|w| w[1].time <= w[0].time) {
            return Err(Error::data(format!(
                "candle timestamps must be strictly increasing (index {} -> {})",
                i,
                i + 1
            )));
        }

        Ok(Self {
            candles: candles.into(),
        })
    }

    /// Parse a JSON array of candles.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let candles: Vec<Candle> = serde_json::from_str(json)?;
        Self::new(candles)
    }

    /// Load a JSON array of candles from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Number of candles.
    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Whether the series holds no candles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Candle at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    /// All candles.
    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    /// Index of the last candle whose time is at or before `time`.
    pub fn index_of_time(&self, time: TimestampSecs) -> Option<usize> {
        match self.candles.binary_search_by_key(&time, |c| c.time) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        }
    }
}

/// Position side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Favorable price move from `entry` to `price` for this side.
    #[inline]
    pub fn price_diff(self, entry: f64, price: f64) -> f64 {
        match self {
            PositionSide::Long => price - entry,
            PositionSide::Short => entry - price,
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl From<OrderSide> for PositionSide {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }
}

/// Replay mode: following the present, or stepping through history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReplayMode {
    /// No cursor; the chart follows the latest bar.
    #[default]
    Live,
    /// Cursor active over historical bars.
    Replay,
}

/// Discrete playback speed multipliers, ordered slowest to fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum PlaybackSpeed {
    Half,
    #[default]
    X1,
    X2,
    X5,
    X10,
    X20,
    X50,
    /// Unthrottled: one bar per timer unit.
    X100,
}

impl PlaybackSpeed {
    /// Every speed, slowest first.
    pub const ALL: [PlaybackSpeed; 8] = [
        PlaybackSpeed::Half,
        PlaybackSpeed::X1,
        PlaybackSpeed::X2,
        PlaybackSpeed::X5,
        PlaybackSpeed::X10,
        PlaybackSpeed::X20,
        PlaybackSpeed::X50,
        PlaybackSpeed::X100,
    ];

    /// Speed multiplier relative to 1x.
    pub fn multiplier(self) -> f64 {
        match self {
            PlaybackSpeed::Half => 0.5,
            PlaybackSpeed::X1 => 1.0,
            PlaybackSpeed::X2 => 2.0,
            PlaybackSpeed::X5 => 5.0,
            PlaybackSpeed::X10 => 10.0,
            PlaybackSpeed::X20 => 20.0,
            PlaybackSpeed::X50 => 50.0,
            PlaybackSpeed::X100 => 100.0,
        }
    }

    /// Whether this is the fastest defined speed.
    pub fn is_fastest(self) -> bool {
        self == PlaybackSpeed::X100
    }

    fn position(self) -> usize {
        Self::ALL.iter().position(|&s| s == self).unwrap_or(0)
    }

    /// Next faster speed, saturating at the fastest.
    pub fn faster(self) -> Self {
        Self::ALL[(self.position() + 1).min(Self::ALL.len() - 1)]
    }

    /// Next slower speed, saturating at the slowest.
    pub fn slower(self) -> Self {
        Self::ALL[self.position().saturating_sub(1)]
    }
}

impl TryFrom<f64> for PlaybackSpeed {
    type Error = String;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|s| s.multiplier() == value)
            .ok_or_else(|| format!("unsupported playback speed {value}"))
    }
}

impl From<PlaybackSpeed> for f64 {
    fn from(speed: PlaybackSpeed) -> Self {
        speed.multiplier()
    }
}

impl std::fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x", self.multiplier())
    }
}
