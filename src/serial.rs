use std::{fmt::Display, io};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Codecs for encoding/decoding messages to/from wire.
pub(crate) mod codecs;

/// The task owning an open serial stream.
pub(crate) mod link;

/// The fixed baud rate used for every connection.
pub const BAUD_RATE: u32 = 38_400;

/// A command for the device.
///
/// The bridge never looks inside these, they are put on the wire as-is
/// (followed by a newline).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Command(String);

impl Command {
    /// Create a command from a prefix and a value, e.g. `BASE:` and `90`.
    pub fn with_value<V: Display>(prefix: &str, value: V) -> Self {
        Self(format!("{prefix}{value}"))
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Turn the command (utf8) into bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
}

impl<T: AsRef<str>> From<T> for Command {
    fn from(string_like: T) -> Self {
        Self(string_like.as_ref().into())
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.chars().take(48).collect::<String>();

        write!(f, "{}", s.trim())
    }
}

/// A serial port a client may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// The path to the port.
    /// Likely "/dev/ttyACMx" or "COMx".
    pub path: String,

    /// Something readable for humans, such as the manufacturer.
    pub label: Option<String>,
}

impl PortDescriptor {
    /// A port without a label.
    pub fn new(path: &str) -> Self {
        Self {
            path: path.into(),
            label: None,
        }
    }

    /// A port with a label.
    pub fn with_label(path: &str, label: &str) -> Self {
        Self {
            path: path.into(),
            label: Some(label.into()),
        }
    }
}

impl Display for PortDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} ({label})", self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// A byte stream to a device.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An opened link to a device.
pub type BoxedLink = Box<dyn LinkStream>;

/// Something which knows which ports exist and how to open them.
///
/// The real implementation is [`SerialConnector`].
/// Tests use [`crate::mock::MockConnector`].
pub trait Connector: Send + Sync + 'static {
    /// The ports available right now.
    fn available_ports(&self) -> Vec<PortDescriptor>;

    /// Open the port at the given path.
    ///
    /// The returned future must not block the executor.
    fn open(&self, path: &str, baud_rate: u32) -> BoxFuture<'static, io::Result<BoxedLink>>;
}

/// Opens real serial ports via `tokio-serial`.
#[derive(Debug, Default, Clone)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn available_ports(&self) -> Vec<PortDescriptor> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(?e, "Could not list serial ports");
                return vec![];
            }
        };

        if ports.is_empty() {
            info!("No serial ports available");
        }

        ports
            .into_iter()
            .map(|info| {
                let label = match info.port_type {
                    serialport::SerialPortType::UsbPort(usb) => usb.manufacturer.or(usb.product),
                    serialport::SerialPortType::BluetoothPort => Some("Bluetooth".to_owned()),
                    _ => None,
                };

                PortDescriptor {
                    path: info.port_name,
                    label,
                }
            })
            .collect()
    }

    fn open(&self, path: &str, baud_rate: u32) -> BoxFuture<'static, io::Result<BoxedLink>> {
        let path = path.to_owned();

        Box::pin(async move {
            debug!(%path, %baud_rate, "Opening serial port");

            let stream = tokio_serial::new(&path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()?;

            Ok(Box::new(stream) as BoxedLink)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_with_value() {
        assert_eq!(Command::with_value("BASE:", 90).as_str(), "BASE:90");
    }

    #[test]
    fn command_serializes_as_plain_string() {
        let json = serde_json::to_string(&Command::from("GRIP OPEN")).unwrap();
        assert_eq!(json, r#""GRIP OPEN""#);
    }

    #[test]
    fn port_descriptor_display() {
        assert_eq!(
            PortDescriptor::with_label("COM3", "Arduino LLC").to_string(),
            "COM3 (Arduino LLC)"
        );
        assert_eq!(PortDescriptor::new("/dev/ttyUSB0").to_string(), "/dev/ttyUSB0");
    }
}
