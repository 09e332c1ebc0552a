//! Replay scheduler for the bar-replay system.
//!
//! This crate provides:
//! - The playback state machine (play/pause/step/jump, live vs replay mode)
//! - Variable-speed tick timing
//! - Cut-point enforcement
//! - Typed replay events with channel-based subscription

pub mod events;
pub mod scheduler;

pub use events::{EventBus, ReplayEvent};
pub use scheduler::{ReplayScheduler, ReplayState, TickOutcome, Ticker};
