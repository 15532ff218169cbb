use std::{fmt::Display, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{error::Error, serial::Command};

/// Identifies a control channel. Unique within a configuration.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Create a new channel id.
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(id.as_ref().into())
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a channel is operated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// A continuous range, e.g. a servo angle. Commands are rate limited.
    Slider {
        /// Lowest allowed value.
        min: i32,

        /// Highest allowed value.
        max: i32,
    },

    /// On (1) or off (0). Commands pass through immediately.
    Toggle,
}

impl ChannelKind {
    fn check(&self, value: i32) -> Result<(), String> {
        let (min, max) = match self {
            ChannelKind::Slider { min, max } => (*min, *max),
            ChannelKind::Toggle => (0, 1),
        };

        if (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(format!("{value} is outside of {min}..={max}"))
        }
    }

    /// Whether commands from this kind of channel are rate limited.
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Slider { .. })
    }
}

/// A control channel as described by a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    /// The stable id.
    pub id: ChannelId,

    /// Shown to users.
    pub label: String,

    /// Commands are this prefix followed by the value, e.g. `BASE:` gives `BASE:90`.
    pub prefix: String,

    /// How the channel is operated.
    pub kind: ChannelKind,

    /// The value at startup.
    pub value: i32,

    /// Whether the channel starts out enabled.
    pub enabled: bool,

    /// Sent when the channel gets enabled, if set.
    #[serde(default)]
    pub on_enable: Option<Command>,

    /// Sent when the channel gets disabled, if set.
    #[serde(default)]
    pub on_disable: Option<Command>,
}

impl ChannelConfig {
    /// A slider channel which starts out enabled, without enable/disable commands.
    pub fn slider(id: &str, label: &str, prefix: &str, min: i32, max: i32, value: i32) -> Self {
        Self {
            id: ChannelId::new(id),
            label: label.into(),
            prefix: prefix.into(),
            kind: ChannelKind::Slider { min, max },
            value,
            enabled: true,
            on_enable: None,
            on_disable: None,
        }
    }

    /// A toggle channel which starts out off and disabled.
    pub fn toggle(id: &str, label: &str, prefix: &str) -> Self {
        Self {
            id: ChannelId::new(id),
            label: label.into(),
            prefix: prefix.into(),
            kind: ChannelKind::Toggle,
            value: 0,
            enabled: false,
            on_enable: None,
            on_disable: None,
        }
    }

    /// Set the commands sent when the channel is enabled and disabled.
    pub fn with_switch_commands(mut self, on_enable: &str, on_disable: &str) -> Self {
        self.on_enable = Some(on_enable.into());
        self.on_disable = Some(on_disable.into());
        self
    }

    /// Set whether the channel starts out enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.id.0.is_empty() {
            return Err(Error::BadConfig("A channel has an empty id".into()));
        }

        if self.prefix.is_empty() {
            return Err(Error::BadConfig(format!(
                "The channel `{}` has an empty prefix",
                self.id
            )));
        }

        if let ChannelKind::Slider { min, max } = self.kind {
            if min > max {
                return Err(Error::BadConfig(format!(
                    "The channel `{}` has min {min} above max {max}",
                    self.id
                )));
            }
        }

        self.kind.check(self.value).map_err(|problem| {
            Error::BadConfig(format!(
                "The channel `{}` starts at a bad value: {problem}",
                self.id
            ))
        })
    }
}

/// A control channel and its current state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlChannel {
    /// The stable id.
    pub id: ChannelId,

    /// Shown to users.
    pub label: String,

    /// Commands are this prefix followed by the value.
    pub prefix: String,

    /// How the channel is operated.
    pub kind: ChannelKind,

    /// The current value.
    pub value: i32,

    /// Whether the channel currently takes part in commands and recorded steps.
    pub enabled: bool,

    #[serde(skip)]
    on_enable: Option<Command>,

    #[serde(skip)]
    on_disable: Option<Command>,
}

impl From<ChannelConfig> for ControlChannel {
    fn from(config: ChannelConfig) -> Self {
        Self {
            id: config.id,
            label: config.label,
            prefix: config.prefix,
            kind: config.kind,
            value: config.value,
            enabled: config.enabled,
            on_enable: config.on_enable,
            on_disable: config.on_disable,
        }
    }
}

impl ControlChannel {
    /// The command for the current value.
    pub fn command(&self) -> Command {
        Command::with_value(&self.prefix, self.value)
    }

    /// The command to send for a change of the enabled flag, if any.
    pub fn switch_command(&self) -> Option<Command> {
        if self.enabled {
            self.on_enable.clone()
        } else {
            self.on_disable.clone()
        }
    }
}

impl Display for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.enabled { "on" } else { "off" };
        write!(f, "{}={} ({state})", self.id, self.value)
    }
}

/// All control channels, in declaration order. Cheap to clone, clones share state.
#[derive(Debug, Clone, Default)]
pub struct Channels(Arc<Mutex<Vec<ControlChannel>>>);

impl Channels {
    /// Create the channels from their configuration.
    pub fn new(configs: &[ChannelConfig]) -> Self {
        Self(Arc::new(Mutex::new(
            configs.iter().cloned().map(ControlChannel::from).collect(),
        )))
    }

    /// A copy of every channel.
    pub async fn snapshot(&self) -> Vec<ControlChannel> {
        self.0.lock().await.clone()
    }

    /// Set a channel's value. Returns the updated channel.
    pub async fn set_value(&self, id: &ChannelId, value: i32) -> Result<ControlChannel, Error> {
        let mut channels = self.0.lock().await;
        let channel = find(&mut channels, id)?;

        channel.kind.check(value).map_err(|problem| {
            Error::InvalidOperation(format!("Bad value for channel `{id}`: {problem}"))
        })?;

        channel.value = value;
        Ok(channel.clone())
    }

    /// Enable or disable a channel. Returns the updated channel.
    pub async fn set_enabled(&self, id: &ChannelId, enabled: bool) -> Result<ControlChannel, Error> {
        let mut channels = self.0.lock().await;
        let channel = find(&mut channels, id)?;

        channel.enabled = enabled;
        Ok(channel.clone())
    }

    /// The command of every enabled channel, in declaration order.
    pub async fn enabled_commands(&self) -> Vec<Command> {
        self.0
            .lock()
            .await
            .iter()
            .filter(|channel| channel.enabled)
            .map(ControlChannel::command)
            .collect()
    }
}

fn find<'a>(
    channels: &'a mut [ControlChannel],
    id: &ChannelId,
) -> Result<&'a mut ControlChannel, Error> {
    channels
        .iter_mut()
        .find(|channel| &channel.id == id)
        .ok_or_else(|| Error::UnknownChannel(id.to_string()))
}
