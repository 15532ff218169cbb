//! In-memory serial ports, useful to run the bridge without the actual hardware.
//!
//! Each opened port is one end of an in-memory pipe.
//! The other end is a [`MockDevice`], handed out on [`MockConnector::devices`]
//! (or answered by an echo task when the connector was made with [`MockConnector::echoing`]).

use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf},
    sync::mpsc,
};
use tracing::{debug, info, trace};

use crate::serial::{BoxedLink, Connector, PortDescriptor};

const PIPE_CAPACITY: usize = 4096;

/// What happened to the mock ports, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Journal {
    /// The port at this path was opened.
    Opened(String),

    /// The port at this path was closed (its stream dropped).
    Closed(String),
}

#[derive(Debug, Default)]
struct Shared {
    journal: Vec<Journal>,
    failures: HashMap<String, (io::ErrorKind, String)>,
    open_delay: Option<Duration>,
    devices: Option<mpsc::UnboundedSender<MockDevice>>,
}

/// A [`Connector`] with a fixed set of in-memory ports.
#[derive(Debug, Clone)]
pub struct MockConnector {
    ports: Vec<PortDescriptor>,
    echo: bool,
    shared: Arc<Mutex<Shared>>,
}

impl MockConnector {
    /// Ports with the given paths.
    /// Opening any other path fails as if the port did not exist.
    pub fn new<S: AsRef<str>>(paths: &[S]) -> Self {
        Self {
            ports: paths
                .iter()
                .map(|path| PortDescriptor::with_label(path.as_ref(), "Mock"))
                .collect(),
            echo: false,
            shared: Arc::default(),
        }
    }

    /// Ports whose devices send every line they receive straight back.
    pub fn echoing<S: AsRef<str>>(paths: &[S]) -> Self {
        Self {
            echo: true,
            ..Self::new(paths)
        }
    }

    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        // Nothing panics while holding the lock.
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Devices will be sent here as their ports are opened.
    /// Only the latest receiver gets them.
    pub fn devices(&self) -> mpsc::UnboundedReceiver<MockDevice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared().devices = Some(tx);
        rx
    }

    /// Opening this path will fail with the given error.
    pub fn fail_with(&self, path: &str, kind: io::ErrorKind, message: &str) {
        self.shared()
            .failures
            .insert(path.to_owned(), (kind, message.to_owned()));
    }

    /// Opening ports takes this long from now on.
    pub fn delay_open(&self, delay: Duration) {
        self.shared().open_delay = Some(delay);
    }

    /// Everything opened and closed so far.
    pub fn journal(&self) -> Vec<Journal> {
        self.shared().journal.clone()
    }

    /// How many ports are open right now.
    pub fn open_count(&self) -> usize {
        self.shared()
            .journal
            .iter()
            .fold(0, |open, entry| match entry {
                Journal::Opened(_) => open + 1,
                Journal::Closed(_) => open - 1,
            })
    }

    fn try_open(&self, path: &str) -> io::Result<BoxedLink> {
        let mut shared = self.shared();

        if let Some((kind, message)) = shared.failures.get(path) {
            return Err(io::Error::new(*kind, message.clone()));
        }

        if !self.ports.iter().any(|port| port.path == path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }

        let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
        shared.journal.push(Journal::Opened(path.to_owned()));
        info!(%path, "Mock port opened");

        let device = MockDevice::new(path, far);

        if self.echo {
            tokio::spawn(device.echo());
        } else {
            let unclaimed = match &shared.devices {
                Some(devices) => devices.send(device).err().map(|e| e.0),
                None => Some(device),
            };

            // Without an owner the device would look unplugged.
            if let Some(device) = unclaimed {
                debug!("Nobody wants the mock device, it will just listen");
                tokio::spawn(device.listen());
            }
        }

        Ok(Box::new(MockLink {
            path: path.to_owned(),
            inner: near,
            shared: self.shared.clone(),
        }))
    }
}

impl Connector for MockConnector {
    fn available_ports(&self) -> Vec<PortDescriptor> {
        self.ports.clone()
    }

    fn open(&self, path: &str, baud_rate: u32) -> BoxFuture<'static, io::Result<BoxedLink>> {
        let this = self.clone();
        let path = path.to_owned();
        let delay = self.shared().open_delay;

        Box::pin(async move {
            trace!(%path, %baud_rate, "Opening mock port");

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            this.try_open(&path)
        })
    }
}

/// The bridge's end of a mock port.
/// Notes in the journal when it is dropped.
struct MockLink {
    path: String,
    inner: DuplexStream,
    shared: Arc<Mutex<Shared>>,
}

impl Drop for MockLink {
    fn drop(&mut self) {
        debug!(path = %self.path, "Mock port closed");

        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.journal.push(Journal::Closed(self.path.clone()));
    }
}

impl AsyncRead for MockLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockLink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// The device's end of a mock port.
/// Dropping it looks like the device was unplugged.
#[derive(Debug)]
pub struct MockDevice {
    /// Which port this device sits behind.
    pub path: String,
    stream: BufReader<DuplexStream>,
}

impl MockDevice {
    fn new(path: &str, stream: DuplexStream) -> Self {
        Self {
            path: path.to_owned(),
            stream: BufReader::new(stream),
        }
    }

    /// Read the next line the bridge sent, without the newline.
    pub async fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();

        if self.stream.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "the bridge closed the port",
            ));
        }

        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }

    /// Send a line to the bridge, the way a device would (ending in `\r\n`).
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await
    }

    async fn echo(mut self) {
        while let Ok(line) = self.read_line().await {
            trace!(%line, "Echoing");

            if self.send_line(&line).await.is_err() {
                break;
            }
        }

        debug!(path = %self.path, "Echo device stopped");
    }

    async fn listen(mut self) {
        while let Ok(line) = self.read_line().await {
            trace!(%line, "Ignoring");
        }

        debug!(path = %self.path, "Listening device stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_path_does_not_open() {
        let connector = MockConnector::new(&["/dev/ttyMock0"]);

        let result = connector.open("/dev/ttyMock1", 9600).await;

        assert_eq!(result.err().map(|e| e.kind()), Some(io::ErrorKind::NotFound));
        assert!(connector.journal().is_empty());
    }

    #[tokio::test]
    async fn drop_is_journaled() {
        let connector = MockConnector::new(&["/dev/ttyMock0"]);

        let link = connector.open("/dev/ttyMock0", 9600).await.unwrap();
        assert_eq!(connector.open_count(), 1);

        drop(link);
        assert_eq!(connector.open_count(), 0);
    }

    #[tokio::test]
    async fn echo_device_answers() {
        let connector = MockConnector::echoing(&["/dev/ttyMock0"]);
        let link = connector.open("/dev/ttyMock0", 9600).await.unwrap();
        let (read, mut write) = tokio::io::split(link);

        write.write_all(b"hello\n").await.unwrap();

        let mut line = String::new();
        BufReader::new(read).read_line(&mut line).await.unwrap();
        assert_eq!(line, "hello\r\n");
    }
}
