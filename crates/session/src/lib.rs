//! Async host for a replay session.
//!
//! A single actor task owns the scheduler, the execution engine and the
//! candle series. Every mutation goes through its command channel, and the
//! actor drives timed playback with one tokio interval.

pub mod session;

pub use session::{ReplaySession, SessionHandle};
