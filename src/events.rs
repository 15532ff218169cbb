use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::{channel::ControlChannel, sequence::SequenceSummary};

/// Things every connected session should hear about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// The connection state changed, or something went wrong without a specific requester.
    Status(String),

    /// The device sent a line.
    Telemetry(String),

    /// A control channel changed value or enabled flag.
    Channel(ControlChannel),

    /// The recorded sequence or its playback state changed.
    Sequence(SequenceSummary),
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Status(status) => write!(f, "status: {status}"),
            Event::Telemetry(line) => write!(f, "telemetry: {line}"),
            Event::Channel(channel) => write!(f, "channel: {channel}"),
            Event::Sequence(summary) => write!(f, "sequence: {summary}"),
        }
    }
}

/// A broadcaster of [`Event`]s.
///
/// Cheap to clone, all clones feed the same subscribers.
#[derive(Debug, Clone)]
pub struct Events {
    tx: broadcast::Sender<Event>,
}

impl Default for Events {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Events {
    /// Create a new broadcaster.
    /// Subscribers lagging more than `capacity` events behind lose the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Send an event to every subscriber.
    /// Having no subscribers is fine.
    pub fn send(&self, event: Event) {
        trace!(%event, "Broadcasting event");

        if let Ok(listeners) = self.tx.send(event) {
            debug!("Broadcasted event to {listeners} listener(s)");
        }
    }

    /// Shorthand for [`Event::Status`].
    pub fn status<S: Into<String>>(&self, status: S) {
        self.send(Event::Status(status.into()))
    }
}
