use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FramingError;
use crate::proto::{Message, HEADER_LEN, LENGTH_FIELD_END, MAGIC, MAX_FRAME_LEN};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum FrameState {
    #[default]
    AwaitingHeader,
    /// Total size of the frame being buffered.
    AwaitingBody(usize),
}

/// Splits the control channel byte stream into whole frames.
///
/// Decoded items are raw frames, header included, so a frame that fails to
/// decode into a [`Message`] can be dropped without losing the stream.
#[derive(Debug, Default)]
pub struct FrameCodec {
    state: FrameState,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.state {
            FrameState::AwaitingBody(len) => len,
            FrameState::AwaitingHeader => {
                if src.len() < LENGTH_FIELD_END {
                    return Ok(None);
                }

                let magic = u16::from_be_bytes([src[0], src[1]]);
                if magic != MAGIC {
                    return Err(FramingError::BadMagic(magic));
                }

                let len = u16::from_be_bytes([src[3], src[4]]) as usize + HEADER_LEN;
                if len > MAX_FRAME_LEN {
                    return Err(FramingError::TooLarge {
                        size: len,
                        max: MAX_FRAME_LEN,
                    });
                }

                self.state = FrameState::AwaitingBody(len);
                len
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.state = FrameState::AwaitingHeader;
        Ok(Some(src.split_to(len)))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = FramingError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = item.encode()?;
        if frame.len() > MAX_FRAME_LEN {
            return Err(FramingError::TooLarge {
                size: frame.len(),
                max: MAX_FRAME_LEN,
            });
        }

        dst.extend_from_slice(&frame);
        Ok(())
    }
}
