/// IRC line codec: frames a byte stream into IRC messages.
///
/// Splits on `\n` and tolerates a missing `\r`, since not every server is
/// strict about CR-LF. Blank and unparseable lines are skipped, and bytes
/// that are not UTF-8 are replaced rather than rejected. Outgoing messages
/// get `\r\n`.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::message::Message;

/// Maximum buffered line length (including the terminator).
/// RFC 2812 says 512 bytes; IRCv3 `message-tags` can push this to 8191.
const MAX_LINE_LENGTH: usize = 8191;

/// Bytes no outgoing frame may carry.
const FORBIDDEN: [char; 3] = ['\r', '\n', '\0'];

/// Codec error: an oversized line, a frame that would split on the wire,
/// or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error("frame contains CR, LF or NUL")]
    ForbiddenByte,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames IRC messages on line boundaries.
#[derive(Debug, Default)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(lf) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };

            let line_bytes = src.split_to(lf);
            src.advance(1);

            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            match Message::parse(line) {
                Ok(msg) => return Ok(Some(msg)),
                // Not a shape we understand; drop it and keep reading.
                Err(e) => debug!(%line, "skipping unparseable line: {e}"),
            }
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        // A stray CR or LF would let one frame become two on the server.
        if wire.contains(FORBIDDEN) {
            return Err(CodecError::ForbiddenByte);
        }
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
