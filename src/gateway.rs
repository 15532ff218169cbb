//! The Gateway is what every session talks to.
//!
//! It routes client messages into the Connection Manager, the Command Relay and the Sequencer.
//! Replies meant for the requesting session only are returned from [`Gateway::handle`],
//! while anything everyone should see goes out as an [`Event`].

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelConfig, ChannelId, Channels},
    connection::ConnectionHandle,
    error::Error,
    events::{Event, Events},
    messages::{ClientMessage, ServerMessage},
    relay::CommandRelay,
    sequence::Sequencer,
    serial::{Connector, PortDescriptor},
};

/// Shared by all sessions. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    connector: Arc<dyn Connector>,
    connection: ConnectionHandle,
    relay: CommandRelay,
    channels: Channels,
    sequencer: Sequencer,
    events: Events,
}

impl Gateway {
    /// Set up every component on top of the given connector.
    pub fn new(connector: Arc<dyn Connector>, channels: &[ChannelConfig]) -> Self {
        let events = Events::default();
        let connection = ConnectionHandle::new(connector.clone(), events.clone());
        let relay = CommandRelay::new(connection.clone(), events.clone());
        let channels = Channels::new(channels);
        let sequencer = Sequencer::new(channels.clone(), relay.clone(), events.clone());

        Self {
            connector,
            connection,
            relay,
            channels,
            sequencer,
            events,
        }
    }

    /// Subscribe to what every session should hear about.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The shared connection.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// What a new session is told when it joins.
    pub async fn welcome(&self) -> Vec<ServerMessage> {
        vec![
            ServerMessage::PortsList(self.ports().await),
            ServerMessage::Status(self.connection.state().to_string()),
            ServerMessage::Channels(self.channels.snapshot().await),
            ServerMessage::Sequence(self.sequencer.summary().await),
        ]
    }

    /// Act on a message from a session.
    ///
    /// Returns the replies for that session only.
    /// Problems caused by the message are among them as a status.
    pub async fn handle(&self, message: ClientMessage) -> Vec<ServerMessage> {
        match self.dispatch(message).await {
            Ok(replies) => replies,
            Err(e) => {
                info!(%e, "Request failed");
                vec![ServerMessage::Status(e.status())]
            }
        }
    }

    async fn dispatch(&self, message: ClientMessage) -> Result<Vec<ServerMessage>, Error> {
        debug!(%message, "Handling");

        match message {
            ClientMessage::ConnectPort(path) => {
                self.connect(path);
            }
            ClientMessage::DisconnectPort => {
                self.connection.disconnect().await;
            }
            ClientMessage::RefreshPorts => {
                return Ok(vec![ServerMessage::PortsList(self.ports().await)]);
            }
            ClientMessage::Command(command) => {
                self.relay.send_discrete(command).await?;
            }
            ClientMessage::SetValue { channel, value } => {
                self.set_value(&channel, value).await?;
            }
            ClientMessage::SetEnabled { channel, enabled } => {
                self.set_enabled(&channel, enabled).await?;
            }
            ClientMessage::RecordStep => {
                self.sequencer.record_step().await?;
            }
            ClientMessage::ClearSequence => {
                self.sequencer.clear().await;
            }
            ClientMessage::PlaySequence => {
                // The playback reports its own progress as events.
                let _playback = self.sequencer.play().await?;
            }
            ClientMessage::StopSequence => {
                self.sequencer.stop().await?;
            }
        }

        Ok(vec![])
    }

    /// Connecting may take a while and may be interrupted, so only the request is
    /// queued here and the outcome is awaited on its own.
    /// The outcome is broadcast as a state transition.
    fn connect(&self, path: String) {
        let outcome = self.connection.request_connect(&path);

        tokio::spawn(async move {
            match ConnectionHandle::connect_outcome(outcome).await {
                Ok(()) => debug!(%path, "Connect done"),
                Err(Error::Cancelled(reason)) => debug!(%path, %reason, "Connect abandoned"),
                Err(e) => debug!(%path, %e, "Connect failed"),
            }
        });
    }

    async fn set_value(&self, id: &ChannelId, value: i32) -> Result<(), Error> {
        let channel = self.channels.set_value(id, value).await?;
        self.events.send(Event::Channel(channel.clone()));

        if !channel.enabled {
            debug!(%channel, "Disabled, not sending");
            return Ok(());
        }

        if channel.kind.is_continuous() {
            self.relay
                .send_continuous(&channel.id, channel.command())
                .await?;
        } else {
            self.relay.send_discrete(channel.command()).await?;
        }

        Ok(())
    }

    async fn set_enabled(&self, id: &ChannelId, enabled: bool) -> Result<(), Error> {
        let channel = self.channels.set_enabled(id, enabled).await?;
        self.events.send(Event::Channel(channel.clone()));

        if let Some(command) = channel.switch_command() {
            self.relay.send_discrete(command).await?;
        }

        Ok(())
    }

    /// Listing ports may touch the OS in blocking ways.
    async fn ports(&self) -> Vec<PortDescriptor> {
        let connector = self.connector.clone();

        match tokio::task::spawn_blocking(move || connector.available_ports()).await {
            Ok(ports) => ports,
            Err(e) => {
                warn!(?e, "Listing ports panicked");
                vec![]
            }
        }
    }
}
