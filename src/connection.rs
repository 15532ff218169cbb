//! The Connection Manager owns the one serial connection.
//!
//! It runs as a task and is reached through a [`ConnectionHandle`].
//! Since every request goes through the same queue, connects and disconnects
//! from different sessions are handled strictly one after the other.
//! Opening a port happens without blocking the queue, so a disconnect (or a newer connect)
//! can interrupt an attempt which is still in progress.

use std::{fmt::Display, io, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    error::Error,
    events::{Event, Events},
    serial::{
        link::{LinkEvent, LinkHandle, LinkMessage, WriteReply, WRITE_TIMEOUT},
        BoxedLink, Command, Connector, BAUD_RATE,
    },
};

/// The state of the shared serial connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection, and none requested.
    Disconnected,

    /// Waiting for the port at this path to open.
    Connecting(String),

    /// The port at this path is open.
    Connected(String),

    /// The last attempt failed, or the link broke.
    Failed(String),
}

impl ConnectionState {
    /// Is a port open right now?
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting(path) => write!(f, "Connecting to {path}..."),
            ConnectionState::Connected(path) => write!(f, "Connected to {path}"),
            ConnectionState::Failed(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// An open attempt in flight.
struct Opening {
    generation: u64,
    path: String,
    future: BoxFuture<'static, io::Result<BoxedLink>>,
    reply: oneshot::Sender<Result<(), Error>>,
}

enum Request {
    Connect {
        path: String,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Write {
        command: Command,
        reply: WriteReply,
    },
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Connect { path, .. } => write!(f, "connect: {path}"),
            Request::Disconnect { .. } => write!(f, "disconnect"),
            Request::Write { command, .. } => write!(f, "write: {command}"),
        }
    }
}

struct ConnectionManager {
    connector: Arc<dyn Connector>,

    requests: mpsc::UnboundedReceiver<Request>,

    link_events_tx: mpsc::UnboundedSender<LinkMessage>,
    link_events: mpsc::UnboundedReceiver<LinkMessage>,

    /// Bumped for every open attempt.
    generation: u64,

    opening: Option<Opening>,
    link: Option<LinkHandle>,

    state: watch::Sender<ConnectionState>,
    events: Events,
}

/// A handle to the Connection Manager. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionHandle {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Start a Connection Manager which opens ports via the given [`Connector`]
    /// and announces status changes on `events`.
    pub fn new(connector: Arc<dyn Connector>, events: Events) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (link_events_tx, link_events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let mut manager = ConnectionManager {
            connector,
            requests: requests_rx,
            link_events_tx,
            link_events: link_events_rx,
            generation: 0,
            opening: None,
            link: None,
            state: state_tx,
            events,
        };

        tokio::spawn(
            async move { manager.run().await }.instrument(info_span!("ConnectionManager")),
        );

        Self {
            requests: requests_tx,
            state: state_rx,
        }
    }

    fn request(&self, request: Request) {
        if self.requests.send(request).is_err() {
            // The manager only stops when every handle is gone, and we are a handle.
            warn!("Connection manager is not running");
        }
    }

    /// Connect to the port at `path`, closing any current connection first.
    ///
    /// Resolves when the port is open, or with the reason it could not be opened.
    /// If another connect or a disconnect arrives in the meantime this attempt
    /// is abandoned and resolves with [`Error::Cancelled`].
    pub async fn connect(&self, path: &str) -> Result<(), Error> {
        Self::connect_outcome(self.request_connect(path)).await
    }

    /// Queue a connect to the port at `path` right away.
    ///
    /// The request takes its place among other requests before this returns,
    /// so only the outcome is left to wait for. See [`ConnectionHandle::connect_outcome`].
    pub fn request_connect(&self, path: &str) -> oneshot::Receiver<Result<(), Error>> {
        let (tx, rx) = oneshot::channel();

        self.request(Request::Connect {
            path: path.to_owned(),
            reply: tx,
        });

        rx
    }

    /// Wait for the outcome of [`ConnectionHandle::request_connect`].
    pub async fn connect_outcome(rx: oneshot::Receiver<Result<(), Error>>) -> Result<(), Error> {
        rx.await
            .unwrap_or_else(|_| Err(Error::Cancelled("connection manager stopped".into())))
    }

    /// Close the connection, or abandon a connect in progress.
    /// Does nothing if already disconnected.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();

        self.request(Request::Disconnect { reply: tx });

        let _ = rx.await;
    }

    /// Put a command on the wire as a single line.
    pub async fn write(&self, command: Command) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();

        self.request(Request::Write { command, reply: tx });

        // The link applies its own timeout to the write itself,
        // this covers the time spent queued before it.
        match tokio::time::timeout(WRITE_TIMEOUT + Duration::from_secs(1), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::WriteFailure("timed out waiting for the link".into())),
        }
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// A receiver which sees the latest state.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

async fn poll_opening(opening: &mut Option<Opening>) -> io::Result<BoxedLink> {
    match opening {
        Some(opening) => (&mut opening.future).await,
        None => futures::future::pending().await,
    }
}

impl ConnectionManager {
    fn transition(&mut self, state: ConnectionState) {
        info!(%state, "Connection state");

        self.events.send(Event::Status(state.to_string()));
        self.state.send_replace(state);
    }

    /// Close whatever is open or opening.
    async fn close_current(&mut self, why: &str) {
        let mut was_active = false;

        if let Some(opening) = self.opening.take() {
            debug!(path = %opening.path, "Abandoning open attempt");
            let _ = opening.reply.send(Err(Error::Cancelled(why.to_owned())));
            was_active = true;
        }

        if let Some(link) = self.link.take() {
            link.close().await;
            was_active = true;
        }

        if was_active {
            self.transition(ConnectionState::Disconnected);
        }
    }

    async fn connect(&mut self, path: String, reply: oneshot::Sender<Result<(), Error>>) {
        self.close_current(&format!("superseded by connect to {path}"))
            .await;

        self.generation += 1;

        let future = self.connector.open(&path, BAUD_RATE);

        self.opening = Some(Opening {
            generation: self.generation,
            path: path.clone(),
            future,
            reply,
        });

        self.transition(ConnectionState::Connecting(path));
    }

    fn finish_open(&mut self, result: io::Result<BoxedLink>) {
        let Some(Opening {
            generation,
            path,
            reply,
            ..
        }) = self.opening.take()
        else {
            return;
        };

        match result {
            Ok(stream) => {
                info!(%path, "Connected");

                self.link = Some(LinkHandle::spawn(
                    &path,
                    generation,
                    stream,
                    self.link_events_tx.clone(),
                ));
                self.transition(ConnectionState::Connected(path));
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                warn!(%path, ?e, "Error opening port");

                let error = Error::port_unavailable(&path, &e);
                self.transition(ConnectionState::Failed(error.to_string()));
                let _ = reply.send(Err(error));
            }
        }
    }

    async fn disconnect(&mut self) {
        self.close_current("disconnect requested").await;

        // A failure is not a connection, but the user asked for a clean slate.
        if matches!(*self.state.borrow(), ConnectionState::Failed(_)) {
            self.transition(ConnectionState::Disconnected);
        }
    }

    fn write(&mut self, command: Command, reply: WriteReply) {
        match &self.link {
            Some(link) => {
                debug!(%command, path = %link.path, "Writing");
                link.write(command, reply);
            }
            None => {
                info!(%command, "Port not open, cannot send");
                let _ = reply.send(Err(Error::NotConnected));
            }
        }
    }

    fn handle_link_event(&mut self, LinkMessage { generation, event }: LinkMessage) {
        let current = self.link.as_ref().map(|link| link.generation);

        if current != Some(generation) {
            debug!(%generation, "Dropping event from a link which is no longer used");
            return;
        }

        match event {
            LinkEvent::Line(line) => {
                info!(%line, "Device");
                self.events.send(Event::Telemetry(line));
            }
            LinkEvent::Closed(reason) => {
                warn!(%reason, "Link closed unexpectedly");
                self.link = None;
                self.transition(ConnectionState::Failed(format!(
                    "Serial link closed: {reason}"
                )));
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        debug!(%request, "Got request");

        match request {
            Request::Connect { path, reply } => self.connect(path, reply).await,
            Request::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Request::Write { command, reply } => self.write(command, reply),
        }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
                result = poll_opening(&mut self.opening), if self.opening.is_some() => {
                    self.finish_open(result);
                }
                Some(message) = self.link_events.recv() => self.handle_link_event(message),
            }
        }

        debug!("All handles dropped, shutting down");
        self.close_current("shutting down").await;
    }
}
