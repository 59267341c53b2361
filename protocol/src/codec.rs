//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use crate::consts::MAX_FRAME_LENGTH;
use crate::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// A codec splitting a byte stream into newline-terminated relay frames.
///
/// Each decoded item is one raw protocol message, without its terminator and
/// with a trailing carriage return removed. Bytes that are not valid UTF-8
/// are replaced rather than rejected.
///
/// Frames longer than `max_length` are discarded up to the next newline so
/// the stream can resynchronize; the number of discarded frames is available
/// from [`RelayCodec::discarded_frames`].
///
/// # Example
/// ```
/// use bytes::BytesMut;
/// use chatrelay_protocol::RelayCodec;
/// use tokio_util::codec::Decoder;
///
/// let mut codec = RelayCodec::new();
/// let mut buffer = BytesMut::from("/// DEBUG ///\r\n");
/// assert_eq!(codec.decode(&mut buffer).unwrap().as_deref(), Some("/// DEBUG ///"));
/// ```
#[derive(Debug, Clone)]
pub struct RelayCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
    discarded_frames: u64,
}

impl Default for RelayCodec {
    fn default() -> Self {
        RelayCodec::with_max_length(MAX_FRAME_LENGTH)
    }
}

impl RelayCodec {
    /// Creates a codec with the default maximum frame length.
    pub fn new() -> RelayCodec {
        RelayCodec::default()
    }

    /// Creates a codec with a custom maximum frame length.
    pub fn with_max_length(max_length: usize) -> RelayCodec {
        RelayCodec {
            max_length,
            next_index: 0,
            discarding: false,
            discarded_frames: 0,
        }
    }

    /// The maximum frame length in bytes
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Number of over-long frames dropped so far
    pub fn discarded_frames(&self) -> u64 {
        self.discarded_frames
    }

    fn frame_to_string(mut frame: &[u8]) -> String {
        if let Some(stripped) = frame.strip_suffix(b"\r") {
            frame = stripped;
        }
        String::from_utf8_lossy(frame).into_owned()
    }
}

impl Decoder for RelayCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        loop {
            // Never look further than one byte past the limit.
            let read_to = src.len().min(self.max_length.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|byte| *byte == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    src.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let frame = src.split_to(end + 1);
                    let frame = Self::frame_to_string(&frame[..end]);
                    trace!(length = frame.len(), "Decoded frame");
                    return Ok(Some(frame));
                }
                (false, None) if src.len() > self.max_length => {
                    warn!(
                        limit = self.max_length,
                        "Discarding frame exceeding maximum length"
                    );
                    self.discarding = true;
                    self.discarded_frames += 1;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() || self.discarding {
            src.clear();
            self.discarding = false;
            self.next_index = 0;
            return Ok(None);
        }
        // An unterminated trailing frame is still a frame.
        let frame = src.split_to(src.len());
        self.next_index = 0;
        Ok(Some(Self::frame_to_string(&frame)))
    }
}

impl<T> Encoder<T> for RelayCodec
where
    T: AsRef<str>,
{
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let frame = item.as_ref();
        if frame.contains('\n') {
            return Err(ProtocolError::EmbeddedNewline);
        }
        if frame.len() > self.max_length {
            return Err(ProtocolError::FrameTooLong {
                limit: self.max_length,
            });
        }
        dst.reserve(frame.len() + 1);
        dst.put_slice(frame.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
