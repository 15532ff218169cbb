use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    channel::{ChannelId, ControlChannel},
    events::Event,
    sequence::SequenceSummary,
    serial::{Command, PortDescriptor},
};

/// Messages a client can send to the server.
///
/// On the wire these look like `{"type": "connect-port", "payload": "COM3"}`.
/// Messages without a payload leave it out, e.g. `{"type": "record-step"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Connect to the serial port at this path.
    /// Any current connection is closed first.
    ConnectPort(String),

    /// Close the serial connection.
    DisconnectPort,

    /// Ask for the list of ports again.
    RefreshPorts,

    /// Send this command to the device right away.
    Command(Command),

    /// Move a channel to a value.
    SetValue {
        /// Which channel.
        channel: ChannelId,

        /// The new value.
        value: i32,
    },

    /// Enable or disable a channel.
    SetEnabled {
        /// Which channel.
        channel: ChannelId,

        /// The new flag.
        enabled: bool,
    },

    /// Record the enabled channels as a new step.
    RecordStep,

    /// Forget all recorded steps.
    ClearSequence,

    /// Play the recorded steps.
    PlaySequence,

    /// Stop playing after the current step.
    StopSequence,
}

impl Display for ClientMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientMessage::ConnectPort(path) => write!(f, "connect: {path}"),
            ClientMessage::DisconnectPort => write!(f, "disconnect"),
            ClientMessage::RefreshPorts => write!(f, "refresh ports"),
            ClientMessage::Command(command) => write!(f, "command: {command}"),
            ClientMessage::SetValue { channel, value } => write!(f, "set {channel}: {value}"),
            ClientMessage::SetEnabled { channel, enabled } => {
                write!(f, "set {channel} enabled: {enabled}")
            }
            ClientMessage::RecordStep => write!(f, "record step"),
            ClientMessage::ClearSequence => write!(f, "clear sequence"),
            ClientMessage::PlaySequence => write!(f, "play sequence"),
            ClientMessage::StopSequence => write!(f, "stop sequence"),
        }
    }
}

impl ClientMessage {
    /// Create a connect message.
    pub fn connect_port(path: &str) -> Self {
        Self::ConnectPort(path.into())
    }

    /// An example of connecting to a port.
    pub fn example_connect_port() -> Self {
        Self::connect_port("/dev/ttyACM0")
    }

    /// Create a command message.
    pub fn command(command: &str) -> Self {
        Self::Command(command.into())
    }

    /// An example of sending a command.
    pub fn example_command() -> Self {
        Self::command("GRIP OPEN")
    }

    /// Create a set value message.
    pub fn set_value(channel: &str, value: i32) -> Self {
        Self::SetValue {
            channel: ChannelId::new(channel),
            value,
        }
    }

    /// An example of moving a channel.
    pub fn example_set_value() -> Self {
        Self::set_value("base", 90)
    }

    /// Create a set enabled message.
    pub fn set_enabled(channel: &str, enabled: bool) -> Self {
        Self::SetEnabled {
            channel: ChannelId::new(channel),
            enabled,
        }
    }

    /// Turn the message into serialized json.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("Should serialize well")
    }
}

/// Messages the server sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// The serial ports which may be connected to.
    PortsList(Vec<PortDescriptor>),

    /// The connection state, or a problem.
    Status(String),

    /// A line from the device.
    Telemetry(String),

    /// Every control channel.
    Channels(Vec<ControlChannel>),

    /// A control channel which changed.
    Channel(ControlChannel),

    /// The recorded sequence.
    Sequence(SequenceSummary),
}

impl From<Event> for ServerMessage {
    fn from(event: Event) -> Self {
        match event {
            Event::Status(status) => Self::Status(status),
            Event::Telemetry(line) => Self::Telemetry(line),
            Event::Channel(channel) => Self::Channel(channel),
            Event::Sequence(summary) => Self::Sequence(summary),
        }
    }
}

impl Display for ServerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerMessage::PortsList(ports) => write!(f, "{} port(s)", ports.len()),
            ServerMessage::Status(status) => write!(f, "status: {status}"),
            ServerMessage::Telemetry(line) => write!(f, "telemetry: {line}"),
            ServerMessage::Channels(channels) => write!(f, "{} channel(s)", channels.len()),
            ServerMessage::Channel(channel) => write!(f, "channel: {channel}"),
            ServerMessage::Sequence(summary) => write!(f, "sequence: {summary}"),
        }
    }
}

impl ServerMessage {
    /// An example ports list.
    pub fn example_ports_list() -> Self {
        Self::PortsList(vec![
            PortDescriptor::with_label("/dev/ttyACM0", "Arduino (www.arduino.cc)"),
            PortDescriptor::new("/dev/ttyS0"),
        ])
    }
}
