//! Recording and replaying snapshots of the control channels.
//!
//! A recorded [`Step`] holds the command of every enabled channel at that moment.
//! Playing the sequence sends each step's commands as discrete commands,
//! then waits [`STEP_DELAY`] before the next step.
//!
//! Only one playback runs at a time. Playback works on a copy of the steps taken
//! when it started, so recording or clearing meanwhile only affects the next playback.

use std::{fmt::Display, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    channel::Channels,
    error::Error,
    events::{Event, Events},
    relay::CommandRelay,
    serial::Command,
};

/// How long to wait after each step, giving the device time to move.
pub const STEP_DELAY: Duration = Duration::from_millis(1500);

/// The commands of all enabled channels at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Step(Vec<Command>);

impl Step {
    /// The commands, in channel declaration order.
    pub fn commands(&self) -> &[Command] {
        &self.0
    }
}

impl<C: Into<Command>> FromIterator<C> for Step {
    fn from_iter<T: IntoIterator<Item = C>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// What clients see of the sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSummary {
    /// The recorded steps, in order.
    pub steps: Vec<Step>,

    /// Whether a playback is in progress.
    pub playing: bool,
}

impl Display for SequenceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} step(s)", self.steps.len())?;
        if self.playing {
            write!(f, ", playing")?;
        }
        Ok(())
    }
}

/// How a playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    /// Every step was played.
    Finished,

    /// [`Sequencer::stop`] was called.
    Stopped,
}

#[derive(Debug, Default)]
struct SequenceState {
    steps: Vec<Step>,

    /// Set while a playback runs.
    playback: Option<CancellationToken>,
}

impl SequenceState {
    fn summary(&self) -> SequenceSummary {
        SequenceSummary {
            steps: self.steps.clone(),
            playing: self.playback.is_some(),
        }
    }
}

/// Records and plays the sequence. Cheap to clone, clones share the sequence.
#[derive(Clone)]
pub struct Sequencer {
    state: Arc<Mutex<SequenceState>>,
    channels: Channels,
    relay: CommandRelay,
    events: Events,
    step_delay: Duration,
}

impl Sequencer {
    /// A sequencer waiting [`STEP_DELAY`] between steps.
    pub fn new(channels: Channels, relay: CommandRelay, events: Events) -> Self {
        Self {
            state: Arc::default(),
            channels,
            relay,
            events,
            step_delay: STEP_DELAY,
        }
    }

    /// Record the commands of all enabled channels as a new step.
    pub async fn record_step(&self) -> Result<Step, Error> {
        let commands = self.channels.enabled_commands().await;

        if commands.is_empty() {
            return Err(Error::InvalidOperation(
                "Enable at least one channel to record a step".into(),
            ));
        }

        let step = Step(commands);

        let summary = {
            let mut state = self.state.lock().await;
            state.steps.push(step.clone());
            info!(step = state.steps.len(), "Recorded step");
            state.summary()
        };
        self.events.send(Event::Sequence(summary));

        Ok(step)
    }

    /// Forget every step. A playback in progress keeps going.
    pub async fn clear(&self) {
        let summary = {
            let mut state = self.state.lock().await;
            if state.steps.is_empty() {
                return;
            }
            state.steps.clear();
            state.summary()
        };

        debug!("Cleared sequence");
        self.events.send(Event::Sequence(summary));
    }

    /// Start playing the sequence.
    ///
    /// The playback runs as a task, whose handle is returned.
    pub async fn play(&self) -> Result<JoinHandle<Playback>, Error> {
        let (steps, token, summary) = {
            let mut state = self.state.lock().await;

            if state.steps.is_empty() {
                return Err(Error::InvalidOperation("The sequence is empty".into()));
            }

            if state.playback.is_some() {
                return Err(Error::InvalidOperation(
                    "The sequence is already playing".into(),
                ));
            }

            let token = CancellationToken::new();
            state.playback = Some(token.clone());

            (state.steps.clone(), token, state.summary())
        };

        self.events.send(Event::Sequence(summary));

        let this = self.clone();
        let span = info_span!("Playback", steps = steps.len());

        Ok(tokio::spawn(
            async move {
                let outcome = this.run(&steps, &token).await;
                info!(?outcome, "Playback over");

                let summary = {
                    let mut state = this.state.lock().await;
                    state.playback = None;
                    state.summary()
                };
                this.events.send(Event::Sequence(summary));

                outcome
            }
            .instrument(span),
        ))
    }

    /// Stop a playback in progress after the current step.
    pub async fn stop(&self) -> Result<(), Error> {
        match &self.state.lock().await.playback {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(Error::InvalidOperation("No sequence is playing".into())),
        }
    }

    /// The current steps and playback state.
    pub async fn summary(&self) -> SequenceSummary {
        self.state.lock().await.summary()
    }

    async fn run(&self, steps: &[Step], token: &CancellationToken) -> Playback {
        for (index, step) in steps.iter().enumerate() {
            if token.is_cancelled() {
                return Playback::Stopped;
            }

            debug!(step = index + 1, "Playing step");

            for command in step.commands() {
                if let Err(e) = self.relay.send_discrete(command.clone()).await {
                    warn!(%command, %e, "Replay write failed");
                    self.events.status(e.status());
                }
            }

            tokio::select! {
                _ = token.cancelled() => return Playback::Stopped,
                _ = tokio::time::sleep(self.step_delay) => {}
            }
        }

        Playback::Finished
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    use super::*;
    use crate::{
        channel::{ChannelConfig, ChannelId},
        connection::ConnectionHandle,
        mock::{MockConnector, MockDevice},
    };

    fn channels() -> Channels {
        Channels::new(&[
            ChannelConfig::slider("base", "Base", "BASE:", 0, 180, 90),
            ChannelConfig::slider("shoulder", "Shoulder", "SHO:", 0, 180, 120).enabled(false),
            ChannelConfig::slider("elbow", "Elbow", "ELB:", 0, 180, 45),
        ])
    }

    fn sequencer(channels: Channels) -> (Sequencer, MockConnector, Events) {
        let connector = MockConnector::new(&["/dev/ttyArm"]);
        let events = Events::default();
        let connection = ConnectionHandle::new(Arc::new(connector.clone()), events.clone());
        let relay = CommandRelay::new(connection, events.clone());

        (Sequencer::new(channels, relay, events.clone()), connector, events)
    }

    async fn connected_sequencer(channels: Channels) -> (Sequencer, MockDevice) {
        let (sequencer, connector, _events) = sequencer(channels);
        let mut devices = connector.devices();

        sequencer.relay.connection().connect("/dev/ttyArm").await.unwrap();
        let device = devices.recv().await.unwrap();

        (sequencer, device)
    }

    #[tokio::test]
    async fn record_takes_enabled_channels_in_order() {
        let (sequencer, _connector, _events) = sequencer(channels());

        let step = sequencer.record_step().await.unwrap();

        assert_eq!(step, Step::from_iter(["BASE:90", "ELB:45"]));
        assert_eq!(sequencer.summary().await.steps, vec![step]);
    }

    #[tokio::test]
    async fn record_without_enabled_channels_is_rejected() {
        let channels = channels();
        for id in ["base", "elbow"] {
            channels.set_enabled(&ChannelId::new(id), false).await.unwrap();
        }
        let (sequencer, _connector, _events) = sequencer(channels);

        let result = sequencer.record_step().await;

        assert!(matches!(result, Err(Error::InvalidOperation(_))));
        assert!(sequencer.summary().await.steps.is_empty());
    }

    #[tokio::test]
    async fn steps_capture_values_at_record_time() {
        let channels = channels();
        let (sequencer, _connector, _events) = sequencer(channels.clone());

        sequencer.record_step().await.unwrap();
        channels.set_value(&ChannelId::new("base"), 10).await.unwrap();
        sequencer.record_step().await.unwrap();

        let steps = sequencer.summary().await.steps;
        assert_eq!(steps[0], Step::from_iter(["BASE:90", "ELB:45"]));
        assert_eq!(steps[1], Step::from_iter(["BASE:10", "ELB:45"]));
    }

    #[tokio::test(start_paused = true)]
    async fn play_sends_steps_in_order_with_delay() {
        let channels = channels();
        let (sequencer, mut device) = connected_sequencer(channels.clone()).await;

        sequencer.record_step().await.unwrap();
        channels.set_value(&ChannelId::new("base"), 0).await.unwrap();
        channels.set_value(&ChannelId::new("elbow"), 180).await.unwrap();
        sequencer.record_step().await.unwrap();

        let start = Instant::now();
        let playback = sequencer.play().await.unwrap();

        let mut seen = vec![];
        for _ in 0..4 {
            let line = device.read_line().await.unwrap();
            seen.push((start.elapsed(), line));
        }

        assert_eq!(playback.await.unwrap(), Playback::Finished);

        let lines = seen.iter().map(|(_, line)| line.as_str()).collect::<Vec<_>>();
        assert_eq!(lines, vec!["BASE:90", "ELB:45", "BASE:0", "ELB:180"]);

        assert!(seen[1].0 < STEP_DELAY);
        assert!(seen[2].0 >= STEP_DELAY);
        assert!(!sequencer.summary().await.playing);
    }

    #[tokio::test(start_paused = true)]
    async fn play_while_playing_is_rejected() {
        let (sequencer, _device) = connected_sequencer(channels()).await;
        sequencer.record_step().await.unwrap();

        let playback = sequencer.play().await.unwrap();
        let again = sequencer.play().await;

        assert!(matches!(again, Err(Error::InvalidOperation(_))));
        assert_eq!(playback.await.unwrap(), Playback::Finished);

        // Once done it may be played again.
        assert!(sequencer.play().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_then_play_sends_nothing() {
        let (sequencer, mut device) = connected_sequencer(channels()).await;
        sequencer.record_step().await.unwrap();

        sequencer.clear().await;
        let result = sequencer.play().await;

        assert!(matches!(result, Err(Error::InvalidOperation(_))));

        let nothing = tokio::time::timeout(Duration::from_secs(5), device.read_line()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_during_playback_does_not_disturb_it() {
        let (sequencer, mut device) = connected_sequencer(channels()).await;
        sequencer.record_step().await.unwrap();
        sequencer.record_step().await.unwrap();

        let playback = sequencer.play().await.unwrap();
        assert_eq!(device.read_line().await.unwrap(), "BASE:90");

        sequencer.clear().await;

        assert_eq!(playback.await.unwrap(), Playback::Finished);
        assert!(sequencer.summary().await.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_playback_after_current_step() {
        let (sequencer, mut device) = connected_sequencer(channels()).await;
        for _ in 0..3 {
            sequencer.record_step().await.unwrap();
        }

        let playback = sequencer.play().await.unwrap();
        assert_eq!(device.read_line().await.unwrap(), "BASE:90");
        assert_eq!(device.read_line().await.unwrap(), "ELB:45");

        sequencer.stop().await.unwrap();

        assert_eq!(playback.await.unwrap(), Playback::Stopped);
        assert!(sequencer.stop().await.is_err());
    }

    #[tokio::test]
    async fn summary_is_broadcast() {
        let (sequencer, _connector, events) = sequencer(channels());
        let mut events = events.subscribe();

        sequencer.record_step().await.unwrap();

        let Event::Sequence(summary) = events.recv().await.unwrap() else {
            panic!("Expected a sequence event");
        };
        assert_eq!(summary.steps.len(), 1);
        assert!(!summary.playing);
    }
}
