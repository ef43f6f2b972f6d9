//! Line framing for the agent's stdout stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving agent cannot make the parser buffer an unterminated line
//! forever. Each `\n`-terminated UTF-8 line is one protocol message; a
//! trailing `\r` is stripped.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted line length: 1 MiB.
///
/// Longer lines are discarded up to their terminating newline and reported
/// as [`AppError::Protocol`]`("line too long: …")`.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited framing for agent output.
///
/// # Examples
///
/// ```rust
/// use bytes::BytesMut;
/// use tokio_util::codec::Decoder;
/// use agent_conduit::stream::codec::LineCodec;
///
/// let mut codec = LineCodec::new();
/// let mut buf = BytesMut::from("{\"type\":\"result\"}\n{\"type\"");
/// assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"type\":\"result\"}"));
/// assert_eq!(codec.decode(&mut buf).unwrap(), None);
/// ```
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds only a partial line.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode whatever remains in `src` once the stream has ended, including
    /// a final line that was never newline-terminated.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        // LinesCodec reports invalid UTF-8 as an I/O error after consuming the line.
        LinesCodecError::Io(io_err) => AppError::Protocol(format!("invalid line: {io_err}")),
    }
}
