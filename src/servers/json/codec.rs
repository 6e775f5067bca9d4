use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::message::{ControlMessage, ControlResponse};

#[derive(Debug, Error)]
pub enum JsonCodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lines codec error: {0}")]
    Lines(#[from] LinesCodecError),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Maximum length of a request line
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Newline-delimited JSON codec
///
/// Requests that are not valid JSON messages are decoded as errors without closing the
/// stream, so the client can be told about them.
pub struct JsonCodec {
    lines: LinesCodec,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonCodec {
    type Item = Result<ControlMessage, serde_json::Error>;
    type Error = JsonCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self
            .lines
            .decode(src)?
            .map(|line| serde_json::from_str(&line)))
    }
}

impl Encoder<ControlResponse> for JsonCodec {
    type Error = JsonCodecError;

    fn encode(&mut self, item: ControlResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Ok(self.lines.encode(serde_json::to_string(&item)?, dst)?)
    }
}
