use color_eyre::Result;
use pretty_assertions::assert_eq;
use serial_bridge::{
    messages::{ClientMessage, ServerMessage},
    serial::PortDescriptor,
};

mod common;
use common::*;

#[tokio::test]
async fn can_connect() -> Result<()> {
    let port = start_server(mock_connector()).await;

    connect(port).await?;

    Ok(())
}

#[tokio::test]
async fn welcome() -> Result<()> {
    let port = start_server(mock_connector()).await;
    let mut client = connect(port).await?;

    assert_eq!(
        receive(&mut client).await?,
        ServerMessage::PortsList(vec![
            PortDescriptor::with_label(MOCK_PORT, "Mock"),
            PortDescriptor::with_label("/dev/ttyMock1", "Mock"),
        ])
    );
    assert_eq!(receive(&mut client).await?, status("Disconnected"));

    let ServerMessage::Channels(channels) = receive(&mut client).await? else {
        panic!("Expected the channels");
    };
    let ids = channels
        .iter()
        .map(|channel| channel.id.to_string())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["base", "shoulder", "elbow", "wrist", "gripper"]);

    let ServerMessage::Sequence(summary) = receive(&mut client).await? else {
        panic!("Expected the sequence");
    };
    assert!(summary.steps.is_empty());
    assert!(!summary.playing);

    Ok(())
}

#[tokio::test]
async fn bad_json() -> Result<()> {
    let port = start_server(mock_connector()).await;
    let mut client = join(port).await?;

    send_text(&mut client, "{\"type\": \"self-destruct\"}".into()).await?;

    let ServerMessage::Status(status) = receive(&mut client).await? else {
        panic!("Expected a status");
    };
    assert!(status.starts_with("Error: The request"));

    Ok(())
}

#[tokio::test]
async fn refresh_ports() -> Result<()> {
    let port = start_server(mock_connector()).await;
    let mut client = join(port).await?;

    send(&mut client, ClientMessage::RefreshPorts).await?;

    assert!(matches!(
        receive(&mut client).await?,
        ServerMessage::PortsList(ports) if ports.len() == 2
    ));

    Ok(())
}

#[tokio::test]
async fn errors_only_reach_the_sender() -> Result<()> {
    let port = start_server(mock_connector()).await;
    let mut sender = join(port).await?;
    let mut bystander = join(port).await?;

    send(&mut sender, ClientMessage::command("GRIP OPEN")).await?;

    assert_eq!(receive(&mut sender).await?, status("Error: Port not open"));
    assert_silent(&mut bystander).await;

    Ok(())
}

#[tokio::test]
async fn leaving_keeps_the_connection() -> Result<()> {
    let connector = mock_connector();
    let mut devices = connector.devices();
    let port = start_server(connector).await;

    let mut leaver = join(port).await?;
    let mut stayer = join(port).await?;

    send(&mut leaver, ClientMessage::connect_port(MOCK_PORT)).await?;
    receive_until(&mut stayer, |m| m == &status("Connected to /dev/ttyMock0")).await?;
    let mut device = devices.recv().await.expect("A device should be opened");

    leaver.close(None).await?;
    drop(leaver);

    send(&mut stayer, ClientMessage::command("GRIP OPEN")).await?;
    assert_eq!(device.read_line().await?, "GRIP OPEN");

    Ok(())
}

#[tokio::test]
async fn version() -> Result<()> {
    let port = start_server(mock_connector()).await;

    let response = http_get(port, "/version").await?;

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("Serial Bridge v"));

    Ok(())
}
