use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    error::Error,
    events::Event,
    gateway::Gateway,
    messages::{ClientMessage, ServerMessage},
    session::Session,
};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(gateway): Extension<Gateway>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    }

    ws.on_upgrade(move |socket| {
        let session = Session::new(&addr.to_string());
        let span = info_span!("Session", %session);

        handle_websocket(socket, gateway).instrument(span)
    })
}

pub(crate) async fn read<S>(
    mut receiver: S,
    sender: mpsc::UnboundedSender<ServerMessage>,
    gateway: Gateway,
) where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(request_text) => {
                trace!(%request_text, "session request");

                let replies = match serde_json::from_str::<ClientMessage>(&request_text) {
                    Ok(request) => gateway.handle(request).await,
                    Err(e) => vec![ServerMessage::Status(
                        Error::BadJson {
                            request: request_text,
                            problem: e.to_string(),
                        }
                        .status(),
                    )],
                };

                for reply in replies {
                    if sender.send(reply).is_err() {
                        debug!("writer gone");
                        return;
                    }
                }
            }
            Message::Binary(_) => {
                debug!("client sent binary data");
            }
            Message::Ping(_) => {
                debug!("socket ping");
            }
            Message::Pong(_) => {
                debug!("socket pong");
            }
            Message::Close(_) => {
                debug!("client disconnected");
            }
        }
    }

    debug!("no more stuff");
}

pub(crate) async fn forward_events(
    mut events: BroadcastStream<Event>,
    sender: mpsc::UnboundedSender<ServerMessage>,
) {
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                if sender.send(event.into()).is_err() {
                    debug!("writer gone");
                    return;
                }
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(%skipped, "Session lagging behind, events lost");
            }
        }
    }
}

pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut receiver: mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(message) = receiver.recv().await {
        debug!("Message: <{message}>");

        let message = match serde_json::to_string(&message) {
            Ok(message) => message,
            Err(e) => {
                warn!(%e, "Could not serialize message");
                continue;
            }
        };

        if sender.send(Message::Text(message)).await.is_err() {
            debug!("client disconnected");
            return;
        }
        trace!("Message flushed");
    }
}

/// Runs one session until the client goes away.
/// Leaving does not touch the shared connection.
pub(crate) async fn handle_websocket(websocket: WebSocket, gateway: Gateway) {
    let (stream_sender, stream_receiver) = websocket.split();
    let (message_sender, message_receiver) = mpsc::unbounded_channel::<ServerMessage>();

    // Subscribe before the welcome so no change in between goes missing.
    let events = BroadcastStream::new(gateway.subscribe());

    for message in gateway.welcome().await {
        if message_sender.send(message).is_err() {
            return;
        }
    }

    let events_handle = tokio::spawn(
        forward_events(events, message_sender.clone()).instrument(info_span!("Events")),
    );
    let read_handle =
        tokio::spawn(read(stream_receiver, message_sender, gateway).instrument(info_span!("Read")));
    let write_handle =
        tokio::spawn(write(stream_sender, message_receiver).instrument(info_span!("Write")));

    match read_handle.await {
        Ok(()) => debug!("Read task joined"),
        Err(e) => warn!("Read task join error: {e:?}"),
    }

    debug!("Aborting event and write tasks");
    events_handle.abort();
    // This ensures the underlying TCP connection gets closed,
    // which signals the peer that the session is over.
    write_handle.abort();
}
