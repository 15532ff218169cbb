#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;
use color_eyre::Result;
use futures::SinkExt;
use futures::StreamExt;
use serial_bridge::{
    config::Config,
    messages::{ClientMessage, ServerMessage},
    mock::MockConnector,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const MOCK_PORT: &str = "/dev/ttyMock0";

pub fn mock_connector() -> MockConnector {
    MockConnector::new(&[MOCK_PORT, "/dev/ttyMock1"])
}

pub async fn start_server(connector: MockConnector) -> u16 {
    start_server_with_config(Config::default(), connector).await
}

pub async fn start_server_with_config(config: Config, connector: MockConnector) -> u16 {
    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move {
        serial_bridge::server::run_any_port(config, Arc::new(connector), port_tx).await
    });
    port_rx
        .await
        .expect("Server should reply with allocated port")
}

pub async fn connect(port: u16) -> Result<Client> {
    info!("Connecting to server on port {port}");
    let (stream, http_response) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/client")).await?;

    assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

    Ok(stream)
}

/// A plain HTTP GET, returning the whole response (status line, headers and body).
pub async fn http_get(port: u16, path: &str) -> Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    stream
        .write_all(
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .as_bytes(),
        )
        .await?;

    let mut response = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut response)).await??;

    Ok(response)
}

/// Connect and consume the welcome messages.
pub async fn join(port: u16) -> Result<Client> {
    let mut client = connect(port).await?;

    for _ in 0..4 {
        receive(&mut client).await?;
    }

    Ok(client)
}

pub async fn receive(client: &mut Client) -> Result<ServerMessage> {
    let response = timeout(Duration::from_secs(5), client.next())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

    let response = response.to_text()?;
    let response = serde_json::from_str(response)?;

    Ok(response)
}

/// Receive until a message matching the predicate shows up.
pub async fn receive_until<F>(client: &mut Client, mut predicate: F) -> Result<ServerMessage>
where
    F: FnMut(&ServerMessage) -> bool,
{
    loop {
        let message = receive(client).await?;
        if predicate(&message) {
            return Ok(message);
        }
    }
}

/// Check that nothing arrives for a little while.
pub async fn assert_silent(client: &mut Client) {
    let next = timeout(Duration::from_millis(300), client.next()).await;
    assert!(next.is_err(), "Expected silence, got {next:?}");
}

pub async fn send(client: &mut Client, message: ClientMessage) -> Result<()> {
    send_text(client, message.serialize()).await
}

pub async fn send_text(client: &mut Client, text: String) -> Result<()> {
    client.send(tungstenite::Message::Text(text)).await?;
    Ok(())
}

pub fn status(status: &str) -> ServerMessage {
    ServerMessage::Status(status.into())
}
