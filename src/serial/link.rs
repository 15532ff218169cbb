use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::codec::Framed;
use tracing::{debug, error, info_span, trace, warn, Instrument};

use crate::{
    error::Error,
    serial::{codecs::lines::LinesCodec, BoxedLink, Command},
};

/// How long a single write may take before it is reported as failed.
pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkEvent {
    /// The device sent a line.
    Line(String),

    /// The link stopped by itself, e.g. the device was unplugged.
    Closed(String),
}

/// A [`LinkEvent`] tagged with the generation of the link which produced it,
/// so events from a link which has since been replaced can be told apart.
#[derive(Debug)]
pub(crate) struct LinkMessage {
    pub(crate) generation: u64,
    pub(crate) event: LinkEvent,
}

/// Where the outcome of a write goes.
pub(crate) type WriteReply = oneshot::Sender<Result<(), Error>>;

#[derive(Debug)]
struct WriteRequest {
    command: Command,
    reply: WriteReply,
}

/// A running link task. Dropping the handle does not close the link, use [`LinkHandle::close`].
#[derive(Debug)]
pub(crate) struct LinkHandle {
    pub(crate) path: String,
    pub(crate) generation: u64,
    writes: mpsc::UnboundedSender<WriteRequest>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Take ownership of an opened stream and start serving it.
    ///
    /// Lines read from the device and the end of the link are reported on `events`.
    pub(crate) fn spawn(
        path: &str,
        generation: u64,
        stream: BoxedLink,
        events: mpsc::UnboundedSender<LinkMessage>,
    ) -> Self {
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(
            run(generation, stream, writes_rx, events).instrument(info_span!("link", %path)),
        );

        Self {
            path: path.to_owned(),
            generation,
            writes: writes_tx,
            task,
        }
    }

    /// Queue a command for the wire. The outcome is sent on `reply`.
    pub(crate) fn write(&self, command: Command, reply: WriteReply) {
        if let Err(mpsc::error::SendError(request)) =
            self.writes.send(WriteRequest { command, reply })
        {
            // The task is gone, so there is nothing to write to.
            let _ = request.reply.send(Err(Error::NotConnected));
        }
    }

    /// Stop the task and wait until the stream has been dropped.
    pub(crate) async fn close(self) {
        debug!(path = %self.path, "Closing link");
        self.task.abort();

        match self.task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Link task join error: {e:?}"),
        }
    }
}

async fn run(
    generation: u64,
    stream: BoxedLink,
    mut writes: mpsc::UnboundedReceiver<WriteRequest>,
    events: mpsc::UnboundedSender<LinkMessage>,
) {
    // Sink: Send things (to serial port), stream: receive things (from serial port)
    let (mut sink, mut stream) = Framed::new(stream, LinesCodec::default()).split();

    let reason = loop {
        tokio::select! {
            request = writes.recv() => {
                let Some(WriteRequest { command, reply }) = request else {
                    break "link handle dropped".to_owned();
                };

                trace!(%command, "Putting on wire");

                let result = match tokio::time::timeout(WRITE_TIMEOUT, sink.send(command)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        error!(?e, "Serial port error in send");
                        Err(Error::WriteFailure(e.to_string()))
                    }
                    Err(_) => {
                        error!("Serial port write timed out");
                        Err(Error::WriteFailure(format!("timed out after {WRITE_TIMEOUT:?}")))
                    }
                };

                if reply.send(result).is_err() {
                    debug!("Writer left before the write finished");
                }
            }
            line = stream.next() => match line {
                Some(Ok(line)) => {
                    trace!(%line, "Line from port");

                    let message = LinkMessage { generation, event: LinkEvent::Line(line) };
                    if events.send(message).is_err() {
                        break "nobody is listening".to_owned();
                    }
                }
                Some(Err(e)) => {
                    error!(?e, "Serial port error, exiting");
                    break e.to_string();
                }
                None => break "end of stream".to_owned(),
            }
        }
    };

    debug!(%reason, "Link stopped");

    let _ = events.send(LinkMessage {
        generation,
        event: LinkEvent::Closed(reason),
    });
}
