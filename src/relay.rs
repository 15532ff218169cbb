//! The Command Relay sits between inputs and the Connection Manager.
//!
//! Continuous channels (sliders) each get a lane with its own [`RateLimiter`],
//! discrete commands pass straight through.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info_span, trace, warn, Instrument};

use crate::{
    channel::ChannelId,
    connection::ConnectionHandle,
    error::Error,
    events::Events,
    serial::Command,
    throttle::{Admit, Flush, RateLimiter},
};

/// How often a continuous channel may put a command on the wire.
pub const THROTTLE_WINDOW: Duration = Duration::from_millis(50);

/// What happened to a continuous command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// It was written.
    Sent,

    /// It is held until the channel's window ends, unless a newer one replaces it.
    Coalesced,
}

#[derive(Debug)]
struct Lane {
    limiter: RateLimiter<Command>,

    /// Whether a task is waiting to flush this lane.
    flushing: bool,
}

type Lanes = Arc<Mutex<HashMap<ChannelId, Lane>>>;

/// Forwards commands to the device. Cheap to clone, clones share lanes.
#[derive(Clone)]
pub struct CommandRelay {
    connection: ConnectionHandle,
    events: Events,
    window: Duration,
    lanes: Lanes,
}

impl CommandRelay {
    /// A relay using the default [`THROTTLE_WINDOW`].
    pub fn new(connection: ConnectionHandle, events: Events) -> Self {
        Self::with_window(connection, events, THROTTLE_WINDOW)
    }

    /// A relay with a custom window per continuous channel.
    pub fn with_window(connection: ConnectionHandle, events: Events, window: Duration) -> Self {
        Self {
            connection,
            events,
            window,
            lanes: Arc::default(),
        }
    }

    /// The connection commands are forwarded to.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Forward a command right away.
    pub async fn send_discrete(&self, command: Command) -> Result<(), Error> {
        trace!(%command, "Discrete");
        self.connection.write(command).await
    }

    /// Forward a command from a continuous channel, rate limited per channel.
    ///
    /// Errors are only returned for commands written right away.
    /// Held commands written later report problems as a status to everyone,
    /// since whoever sent them may have moved on.
    pub async fn send_continuous(
        &self,
        channel: &ChannelId,
        command: Command,
    ) -> Result<Dispatch, Error> {
        let admit = {
            let mut lanes = self.lanes.lock().await;
            let lane = lanes.entry(channel.clone()).or_insert_with(|| Lane {
                limiter: RateLimiter::new(self.window),
                flushing: false,
            });

            match lane.limiter.offer(Instant::now(), command) {
                Admit::Held { flush_at } if !lane.flushing => {
                    lane.flushing = true;
                    self.spawn_flusher(channel.clone(), flush_at);
                    Admit::Held { flush_at }
                }
                admit => admit,
            }
        };

        match admit {
            Admit::Forward(command) => {
                trace!(%channel, %command, "Continuous, leading edge");
                self.connection.write(command).await?;
                Ok(Dispatch::Sent)
            }
            Admit::Held { .. } => Ok(Dispatch::Coalesced),
        }
    }

    fn spawn_flusher(&self, channel: ChannelId, flush_at: Instant) {
        let this = self.clone();
        let span = info_span!("Flush", %channel);

        tokio::spawn(async move { this.flush_lane(channel, flush_at).await }.instrument(span));
    }

    async fn flush_lane(&self, channel: ChannelId, mut flush_at: Instant) {
        loop {
            tokio::time::sleep_until(flush_at).await;

            let flushed = {
                let mut lanes = self.lanes.lock().await;
                let Some(lane) = lanes.get_mut(&channel) else {
                    return;
                };

                let flushed = lane.limiter.flush(Instant::now());
                if flushed == Flush::Idle {
                    lane.flushing = false;
                }
                flushed
            };

            match flushed {
                Flush::Early(at) => flush_at = at,
                Flush::Send(command) => {
                    trace!(%command, "Continuous, trailing value");

                    if let Err(e) = self.connection.write(command).await {
                        warn!(%e, "Trailing write failed");
                        self.events.status(e.status());
                    }

                    flush_at = Instant::now() + self.window;
                }
                Flush::Idle => {
                    debug!("Lane idle");
                    return;
                }
            }
        }
    }
}
