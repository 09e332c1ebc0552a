//! Replay events and their subscription bus.

use replay_core::ReplayMode;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Notification emitted by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayEvent {
    /// The cursor moved (or was re-announced) to this index.
    IndexChange(usize),
    /// Playback started.
    Play,
    /// Playback paused.
    Pause,
    /// Playback stopped at the last available bar.
    End,
    /// Mode switched.
    ModeChange(ReplayMode),
    /// Playback stopped at the cut point.
    CutPointReached,
}

/// Fan-out of replay events to any number of subscribers.
///
/// Channels are unbounded. Closed receivers are pruned on the next emission.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<ReplayEvent>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ReplayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver an event to every live subscriber and return how many got it.
    pub fn emit(&mut self, event: ReplayEvent) -> usize {
        tracing::trace!(?event, "replay event");
        self.subscribers.retain(|tx| tx.send(event).is_ok());
        self.subscribers.len()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
