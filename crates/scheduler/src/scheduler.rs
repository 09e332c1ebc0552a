//! Replay scheduler.
//!
//! Owns the playback cursor over a candle sequence, the live/replay mode,
//! playback speed and the optional cut point. The scheduler is a plain state
//! machine: it never sleeps. It publishes the periodic timer it wants through
//! [`ReplayScheduler::ticker`], and a runtime driver calls
//! [`ReplayScheduler::tick`] once per period.

use std::time::Duration;

use replay_core::config::ReplayConfig;
use replay_core::{PlaybackSpeed, ReplayMode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::events::{EventBus, ReplayEvent};

/// Snapshot of the scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayState {
    /// Live or replay.
    pub mode: ReplayMode,
    /// First index playback may visit.
    pub start_index: usize,
    /// Last index playback may visit.
    pub end_index: usize,
    /// Cursor, set only in replay mode.
    pub current_index: Option<usize>,
    /// Whether the timer is driving the cursor.
    pub is_playing: bool,
    /// Current speed.
    pub speed: PlaybackSpeed,
    /// Whether the chart should follow the cursor.
    pub auto_scroll: bool,
    /// Cut point, if any.
    pub cut_point: Option<usize>,
    /// Length of the candle sequence.
    pub total_candles: usize,
}

/// Result of a single timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The cursor advanced to this index.
    Advanced(usize),
    /// Playback paused at the end index.
    ReachedEnd,
    /// Playback paused at the cut point.
    ReachedCutPoint,
    /// Not playing; nothing happened.
    Idle,
}

/// The periodic timer the scheduler wants running.
///
/// `generation` changes every time the timer is (re)started, including a
/// restart with an unchanged period, so a driver can tell when to rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    /// Tick period.
    pub period: Duration,
    /// Start counter.
    pub generation: u64,
}

/// Playback state machine over `total_candles` bars.
#[derive(Debug)]
pub struct ReplayScheduler {
    total_candles: usize,
    cut_point: Option<usize>,
    start_index: usize,
    end_index: usize,
    current_index: Option<usize>,
    mode: ReplayMode,
    is_playing: bool,
    speed: PlaybackSpeed,
    default_speed: PlaybackSpeed,
    auto_scroll: bool,
    base_interval: Duration,
    ticker: Option<Ticker>,
    generation: u64,
    events: EventBus,
}

impl ReplayScheduler {
    /// Create a scheduler with no candles loaded.
    pub fn new(config: &ReplayConfig) -> Self {
        Self {
            total_candles: 0,
            cut_point: None,
            start_index: 0,
            end_index: 0,
            current_index: None,
            mode: ReplayMode::Live,
            is_playing: false,
            speed: config.default_speed,
            default_speed: config.default_speed,
            auto_scroll: config.auto_scroll,
            base_interval: Duration::from_millis(config.base_interval_ms.max(1)),
            ticker: None,
            generation: 0,
            events: EventBus::new(),
        }
    }

    /// Create and initialize in one step.
    pub fn with_candles(config: &ReplayConfig, total_candles: usize, cut_point: Option<usize>) -> Self {
        let mut scheduler = Self::new(config);
        scheduler.initialize(total_candles, cut_point);
        scheduler
    }

    /// (Re)initialize for a candle sequence. Subscribers are kept.
    pub fn initialize(&mut self, total_candles: usize, cut_point: Option<usize>) {
        self.stop_ticker();
        self.total_candles = total_candles;
        self.cut_point = cut_point;
        self.start_index = 0;
        self.current_index = None;
        self.mode = ReplayMode::Live;
        self.is_playing = false;
        self.speed = self.default_speed;
        self.recompute_end();
        tracing::debug!(total_candles, ?cut_point, end_index = self.end_index, "replay initialized");
    }

    /// Subscribe to replay events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ReplayEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Snapshot of the current state.
    pub fn state(&self) -> ReplayState {
        ReplayState {
            mode: self.mode,
            start_index: self.start_index,
            end_index: self.end_index,
            current_index: self.current_index,
            is_playing: self.is_playing,
            speed: self.speed,
            auto_scroll: self.auto_scroll,
            cut_point: self.cut_point,
            total_candles: self.total_candles,
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.speed
    }

    pub fn cut_point(&self) -> Option<usize> {
        self.cut_point
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn end_index(&self) -> usize {
        self.end_index
    }

    pub fn total_candles(&self) -> usize {
        self.total_candles
    }

    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    /// The timer that should currently be running, if any.
    pub fn ticker(&self) -> Option<Ticker> {
        self.ticker
    }

    /// Tick period for the current speed.
    ///
    /// The fastest speed runs unthrottled at 1ms; otherwise the base interval
    /// is divided by the multiplier and floored to whole milliseconds.
    pub fn interval(&self) -> Duration {
        if self.speed.is_fastest() {
            return Duration::from_millis(1);
        }
        let base_ms = self.base_interval.as_millis() as f64;
        let ms = (base_ms / self.speed.multiplier()).floor().max(1.0);
        Duration::from_millis(ms as u64)
    }

    /// Playback progress in percent.
    ///
    /// Live mode (no cursor) reports 100; an empty range reports 0.
    pub fn progress(&self) -> f64 {
        let Some(current) = self.current_index else {
            return 100.0;
        };
        let range = self.end_index.saturating_sub(self.start_index);
        if range == 0 {
            return 0.0;
        }
        (current.saturating_sub(self.start_index)) as f64 / range as f64 * 100.0
    }

    // ------------------------------------------------------------------
    // Range management
    // ------------------------------------------------------------------

    /// Update the sequence length, clamping the cursor into the new range.
    pub fn set_total_candles(&mut self, total_candles: usize) {
        self.total_candles = total_candles;
        self.recompute_end();
        if !self.has_data() {
            self.pause();
            self.current_index = None;
            return;
        }
        self.clamp_cursor();
    }

    /// Set or clear the cut point.
    ///
    /// If playback is running at or past the new cut point it pauses
    /// immediately and `CutPointReached` fires.
    pub fn set_cut_point(&mut self, cut_point: Option<usize>) {
        self.cut_point = cut_point;
        self.recompute_end();
        tracing::debug!(?cut_point, end_index = self.end_index, "cut point set");

        if let (Some(cut), Some(current)) = (cut_point, self.current_index) {
            if self.is_playing && current >= cut {
                self.pause();
                self.events.emit(ReplayEvent::CutPointReached);
            }
        }
        self.clamp_cursor();
    }

    /// Remove the cut point.
    pub fn clear_cut_point(&mut self) {
        self.set_cut_point(None);
    }

    /// Move the start of the playable range, clamped to the end index.
    pub fn set_start_index(&mut self, index: usize) {
        self.start_index = index.min(self.end_index);
        self.clamp_cursor();
    }

    pub fn set_auto_scroll(&mut self, auto_scroll: bool) {
        self.auto_scroll = auto_scroll;
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Start playback.
    ///
    /// Enters replay mode if needed and restarts from the start index when
    /// the cursor is unset or already at the end.
    pub fn play(&mut self) {
        if self.is_playing || !self.has_data() {
            return;
        }
        self.enter_replay();

        let restart = match self.current_index {
            None => true,
            Some(current) => current >= self.end_index,
        };
        if restart {
            self.current_index = Some(self.start_index);
            self.events.emit(ReplayEvent::IndexChange(self.start_index));
        }

        self.is_playing = true;
        self.start_ticker();
        tracing::debug!(index = ?self.current_index, speed = %self.speed, "replay playing");
        self.events.emit(ReplayEvent::Play);
    }

    /// Pause playback. No-op when already paused.
    pub fn pause(&mut self) {
        if !self.is_playing {
            return;
        }
        self.stop_ticker();
        self.is_playing = false;
        tracing::debug!(index = ?self.current_index, "replay paused");
        self.events.emit(ReplayEvent::Pause);
    }

    /// Play if paused, pause if playing.
    pub fn toggle(&mut self) {
        if self.is_playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Pause and rewind the cursor to the start index.
    pub fn stop(&mut self) {
        self.pause();
        if self.mode == ReplayMode::Replay && self.has_data() {
            self.current_index = Some(self.start_index);
            self.events.emit(ReplayEvent::IndexChange(self.start_index));
        }
    }

    /// Pause, return to live mode and forget the cursor and start index.
    pub fn reset(&mut self) {
        self.pause();
        let was_replay = self.mode == ReplayMode::Replay;
        self.mode = ReplayMode::Live;
        self.current_index = None;
        self.start_index = 0;
        self.recompute_end();
        if was_replay {
            self.events.emit(ReplayEvent::ModeChange(ReplayMode::Live));
        }
    }

    /// Stop the timer for good. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.stop_ticker();
        self.is_playing = false;
    }

    /// Advance one step of timed playback.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.is_playing {
            return TickOutcome::Idle;
        }
        let Some(current) = self.current_index else {
            return TickOutcome::Idle;
        };

        if let Some(cut) = self.cut_point {
            if current >= cut {
                self.pause();
                tracing::info!(index = current, "cut point reached");
                self.events.emit(ReplayEvent::CutPointReached);
                return TickOutcome::ReachedCutPoint;
            }
        }

        if current >= self.end_index {
            self.pause();
            tracing::info!(index = current, "replay reached end");
            self.events.emit(ReplayEvent::End);
            return TickOutcome::ReachedEnd;
        }

        let next = current + 1;
        self.current_index = Some(next);
        tracing::trace!(index = next, "replay advanced");
        self.events.emit(ReplayEvent::IndexChange(next));
        TickOutcome::Advanced(next)
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Move the cursor one bar forward. Fires `IndexChange` even when clamped.
    pub fn step_forward(&mut self) {
        if !self.has_data() {
            return;
        }
        self.enter_replay();
        let current = self.current_index.unwrap_or(self.start_index);
        self.set_cursor((current + 1).min(self.end_index));
    }

    /// Move the cursor one bar back. Fires `IndexChange` even when clamped.
    pub fn step_backward(&mut self) {
        if !self.has_data() {
            return;
        }
        self.enter_replay();
        let current = self.current_index.unwrap_or(self.start_index);
        self.set_cursor(current.saturating_sub(1).max(self.start_index));
    }

    /// Jump to `index`, clamped into the playable range.
    pub fn jump_to_index(&mut self, index: usize) {
        if !self.has_data() {
            return;
        }
        self.enter_replay();
        self.set_cursor(index.clamp(self.start_index, self.end_index));
    }

    pub fn jump_to_start(&mut self) {
        self.jump_to_index(self.start_index);
    }

    pub fn jump_to_end(&mut self) {
        self.jump_to_index(self.end_index);
    }

    /// Jump to a percentage of the playable range (clamped to 0..=100,
    /// rounded to the nearest bar).
    pub fn jump_to_percentage(&mut self, percent: f64) {
        let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        let range = self.end_index.saturating_sub(self.start_index) as f64;
        let offset = (percent / 100.0 * range).round() as usize;
        self.jump_to_index(self.start_index + offset);
    }

    // ------------------------------------------------------------------
    // Speed and mode
    // ------------------------------------------------------------------

    /// Change speed; a running timer restarts with the new period.
    pub fn set_speed(&mut self, speed: PlaybackSpeed) {
        self.speed = speed;
        if self.is_playing {
            self.start_ticker();
        }
        tracing::debug!(%speed, interval_ms = self.interval().as_millis() as u64, "replay speed set");
    }

    pub fn speed_up(&mut self) {
        self.set_speed(self.speed.faster());
    }

    pub fn speed_down(&mut self) {
        self.set_speed(self.speed.slower());
    }

    /// Switch between live and replay mode. Pauses a running playback.
    pub fn set_mode(&mut self, mode: ReplayMode) {
        if mode == self.mode {
            return;
        }
        self.pause();
        self.mode = mode;
        match mode {
            ReplayMode::Replay => {
                if self.current_index.is_none() && self.has_data() {
                    self.current_index = Some(self.start_index);
                }
            }
            ReplayMode::Live => self.current_index = None,
        }
        tracing::debug!(?mode, "replay mode changed");
        self.events.emit(ReplayEvent::ModeChange(mode));
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn has_data(&self) -> bool {
        self.total_candles > 0
    }

    fn enter_replay(&mut self) {
        if self.mode == ReplayMode::Live {
            self.set_mode(ReplayMode::Replay);
        }
    }

    fn recompute_end(&mut self) {
        let last = self.total_candles.saturating_sub(1);
        self.end_index = match self.cut_point {
            Some(cut) => cut.min(last),
            None => last,
        };
        self.start_index = self.start_index.min(self.end_index);
    }

    fn set_cursor(&mut self, index: usize) {
        self.current_index = Some(index);
        self.events.emit(ReplayEvent::IndexChange(index));
    }

    fn clamp_cursor(&mut self) {
        if let Some(current) = self.current_index {
            let clamped = current.clamp(self.start_index, self.end_index);
            if clamped != current {
                self.set_cursor(clamped);
            }
        }
    }

    fn start_ticker(&mut self) {
        self.generation += 1;
        self.ticker = Some(Ticker {
            period: self.interval(),
            generation: self.generation,
        });
    }

    fn stop_ticker(&mut self) {
        self.ticker = None;
    }
}
