use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::serial::Command;

/// Longer lines than this are noise, not telemetry.
pub(crate) const MAX_LINE_LENGTH: usize = 4096;

/// Splits incoming bytes into lines and writes commands as lines.
///
/// A trailing carriage return is dropped from incoming lines,
/// since devices commonly end lines with `\r\n`.
/// Bad utf8 is replaced lossily.
/// Bytes piling up past [`MAX_LINE_LENGTH`] without a delimiter are discarded.
#[derive(Debug, Clone)]
pub(crate) struct LinesCodec {
    /// The longest partial line we hold on to.
    max_length: usize,

    /// How far we have looked for a newline into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,

    /// Which byte to append when writing (encoding) commands.
    write_delimiter: u8,
}

impl LinesCodec {
    pub(crate) fn new(read_delimiter: u8, write_delimiter: u8) -> Self {
        Self {
            max_length: MAX_LINE_LENGTH,
            cursor: 0,
            read_delimiter,
            write_delimiter,
        }
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n', b'\n')
    }
}

impl Decoder for LinesCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            let line = src.split_to(actual_position);

            // Discard the delimiter.
            src.advance(1);

            let line = match line.last() {
                Some(b'\r') => &line[..line.len() - 1],
                _ => &line[..],
            };

            Ok(Some(String::from_utf8_lossy(line).into_owned()))
        } else if read_to > self.max_length {
            warn!(discarded = read_to, "No line delimiter in sight, discarding");

            src.clear();
            self.cursor = 0;

            Ok(None)
        } else {
            // No full frame yet. We will be handed the same buffer again with more data,
            // so remember how far we got.
            self.cursor = read_to;

            Ok(None)
        }
    }
}

impl Encoder<Command> for LinesCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_str().as_bytes());
        dst.extend_from_slice(&[self.write_delimiter]);

        Ok(())
    }
}
