use std::io;

use color_eyre::Result;
use pretty_assertions::assert_eq;
use serial_bridge::{
    messages::{ClientMessage, ServerMessage},
    mock::Journal,
};

mod common;
use common::*;

#[tokio::test]
async fn connect_is_broadcast_to_everyone() -> Result<()> {
    let port = start_server(mock_connector()).await;
    let mut alice = join(port).await?;
    let mut bob = join(port).await?;

    send(&mut alice, ClientMessage::connect_port(MOCK_PORT)).await?;

    for client in [&mut alice, &mut bob] {
        assert_eq!(
            receive(client).await?,
            status("Connecting to /dev/ttyMock0...")
        );
        assert_eq!(receive(client).await?, status("Connected to /dev/ttyMock0"));
    }

    Ok(())
}

#[tokio::test]
async fn late_joiner_sees_current_state() -> Result<()> {
    let port = start_server(mock_connector()).await;
    let mut alice = join(port).await?;

    send(&mut alice, ClientMessage::connect_port(MOCK_PORT)).await?;
    receive_until(&mut alice, |m| m == &status("Connected to /dev/ttyMock0")).await?;

    let mut bob = connect(port).await?;
    receive(&mut bob).await?;
    assert_eq!(receive(&mut bob).await?, status("Connected to /dev/ttyMock0"));

    Ok(())
}

#[tokio::test]
async fn switching_ports_closes_the_old_one_first() -> Result<()> {
    let connector = mock_connector();
    let port = start_server(connector.clone()).await;
    let mut client = join(port).await?;

    send(&mut client, ClientMessage::connect_port(MOCK_PORT)).await?;
    receive_until(&mut client, |m| m == &status("Connected to /dev/ttyMock0")).await?;

    send(&mut client, ClientMessage::connect_port("/dev/ttyMock1")).await?;
    assert_eq!(receive(&mut client).await?, status("Disconnected"));
    assert_eq!(
        receive(&mut client).await?,
        status("Connecting to /dev/ttyMock1...")
    );
    assert_eq!(
        receive(&mut client).await?,
        status("Connected to /dev/ttyMock1")
    );

    assert_eq!(
        connector.journal(),
        vec![
            Journal::Opened(MOCK_PORT.into()),
            Journal::Closed(MOCK_PORT.into()),
            Journal::Opened("/dev/ttyMock1".into()),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn port_in_use_gets_a_hint() -> Result<()> {
    let connector = mock_connector();
    connector.fail_with(MOCK_PORT, io::ErrorKind::PermissionDenied, "Access denied");
    let port = start_server(connector).await;
    let mut client = join(port).await?;

    send(&mut client, ClientMessage::connect_port(MOCK_PORT)).await?;

    let failure = receive_until(&mut client, |m| {
        matches!(m, ServerMessage::Status(s) if s.starts_with("Error: "))
    })
    .await?;

    assert_eq!(
        failure,
        status("Error: Access denied. Check if another program (such as a serial monitor) has the port open.")
    );

    Ok(())
}

#[tokio::test]
async fn commands_and_telemetry() -> Result<()> {
    let connector = mock_connector();
    let mut devices = connector.devices();
    let port = start_server(connector).await;
    let mut alice = join(port).await?;
    let mut bob = join(port).await?;

    send(&mut alice, ClientMessage::connect_port(MOCK_PORT)).await?;
    let mut device = devices.recv().await.expect("A device should be opened");
    receive_until(&mut bob, |m| m == &status("Connected to /dev/ttyMock0")).await?;

    send(&mut alice, ClientMessage::command("HOME")).await?;
    assert_eq!(device.read_line().await?, "HOME");

    device.send_line("OK HOME").await?;
    assert_eq!(
        receive_until(&mut bob, |m| matches!(m, ServerMessage::Telemetry(_))).await?,
        ServerMessage::Telemetry("OK HOME".into())
    );

    Ok(())
}

#[tokio::test]
async fn moving_a_slider() -> Result<()> {
    let connector = mock_connector();
    let mut devices = connector.devices();
    let port = start_server(connector).await;
    let mut alice = join(port).await?;
    let mut bob = join(port).await?;

    send(&mut alice, ClientMessage::connect_port(MOCK_PORT)).await?;
    let mut device = devices.recv().await.expect("A device should be opened");
    receive_until(&mut alice, |m| m == &status("Connected to /dev/ttyMock0")).await?;

    send(&mut alice, ClientMessage::set_value("elbow", 30)).await?;
    assert_eq!(device.read_line().await?, "ELB:30");

    let ServerMessage::Channel(channel) =
        receive_until(&mut bob, |m| matches!(m, ServerMessage::Channel(_))).await?
    else {
        panic!("Expected a channel");
    };
    assert_eq!(channel.id.to_string(), "elbow");
    assert_eq!(channel.value, 30);

    Ok(())
}

#[tokio::test]
async fn disconnect() -> Result<()> {
    let connector = mock_connector();
    let port = start_server(connector.clone()).await;
    let mut client = join(port).await?;

    send(&mut client, ClientMessage::connect_port(MOCK_PORT)).await?;
    receive_until(&mut client, |m| m == &status("Connected to /dev/ttyMock0")).await?;

    send(&mut client, ClientMessage::DisconnectPort).await?;
    assert_eq!(receive(&mut client).await?, status("Disconnected"));

    // Already disconnected, nothing happens.
    send(&mut client, ClientMessage::DisconnectPort).await?;
    assert_silent(&mut client).await;

    assert_eq!(connector.open_count(), 0);

    Ok(())
}

#[tokio::test]
async fn connect_then_disconnect_back_to_back() -> Result<()> {
    let connector = mock_connector();
    let port = start_server(connector.clone()).await;
    let mut client = join(port).await?;

    send(&mut client, ClientMessage::connect_port(MOCK_PORT)).await?;
    send(&mut client, ClientMessage::DisconnectPort).await?;

    assert_eq!(
        receive(&mut client).await?,
        status("Connecting to /dev/ttyMock0...")
    );
    receive_until(&mut client, |m| m == &status("Disconnected")).await?;
    assert_silent(&mut client).await;

    assert_eq!(connector.open_count(), 0);

    Ok(())
}

#[tokio::test]
async fn connect_twice_back_to_back_ends_on_the_latest() -> Result<()> {
    let connector = mock_connector();
    let port = start_server(connector.clone()).await;
    let mut client = join(port).await?;

    send(&mut client, ClientMessage::connect_port(MOCK_PORT)).await?;
    send(&mut client, ClientMessage::connect_port("/dev/ttyMock1")).await?;

    receive_until(&mut client, |m| {
        m == &status("Connected to /dev/ttyMock1")
    })
    .await?;
    assert_silent(&mut client).await;

    assert_eq!(connector.open_count(), 1);
    assert_eq!(
        connector.journal().last(),
        Some(&Journal::Opened("/dev/ttyMock1".into()))
    );

    Ok(())
}
