//! Wire protocol of the control channel.
//!
//! Every frame is a 15 byte header followed by a body:
//!
//! ```text
//! +--------+------+--------+-------------+-------+------------------+
//! | magic  | type | length | device id   | seq   | body             |
//! | 2      | 1    | 2      | 8 (bcd)     | 2     | `length` bytes   |
//! +--------+------+--------+-------------+-------+------------------+
//! ```
//!
//! All integers are big-endian. A frame spans `length + HEADER_LEN` bytes.

pub mod body;
pub mod cursor;

use bytes::BytesMut;

use crate::error::{CodecError, DecodeError};
use body::BodyCodec;
use cursor::{Reader, Writer};

pub use body::{
    AddressNotify, PeerLookup, QueryUpgrade, RegisterAddress, SecondImage, UpgradeAck,
    UpgradeOffer, UpgradeResult,
};

pub const MAGIC: u16 = 0x6868;

const MAGIC_LEN: usize = 2;
const TYPE_LEN: usize = 1;
const LENGTH_LEN: usize = 2;
const DEVICE_ID_LEN: usize = 8;
const SEQ_LEN: usize = 2;

/// Bytes needed before the frame size is known.
pub const LENGTH_FIELD_END: usize = MAGIC_LEN + TYPE_LEN + LENGTH_LEN;

pub const HEADER_LEN: usize = LENGTH_FIELD_END + DEVICE_ID_LEN + SEQ_LEN;

/// Largest frame accepted on the control channel, header included.
pub const MAX_FRAME_LEN: usize = 10240;

macro_rules! registry {
    ($($(#[$doc:meta])* $variant:ident = $tag:literal,)*) => {
        /// Message type tag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum MessageType {
            $($(#[$doc])* $variant = $tag,)*
        }

        impl TryFrom<u8> for MessageType {
            type Error = DecodeError;

            fn try_from(tag: u8) -> Result<Self, Self::Error> {
                match tag {
                    $($tag => Ok(MessageType::$variant),)*
                    _ => Err(DecodeError::UnknownMessageType(tag)),
                }
            }
        }

        /// Message body, one variant per [`MessageType`].
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum Body {
            $($variant($variant),)*
        }

        impl Body {
            pub fn kind(&self) -> MessageType {
                match self {
                    $(Body::$variant(_) => MessageType::$variant,)*
                }
            }

            fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
                match self {
                    $(Body::$variant(b) => b.encode(w),)*
                }
            }

            fn decode(kind: MessageType, r: &mut Reader<'_>) -> Result<Self, CodecError> {
                match kind {
                    $(MessageType::$variant => $variant::decode(r).map(Body::$variant),)*
                }
            }
        }

        $(
            impl From<$variant> for Body {
                fn from(b: $variant) -> Self {
                    Body::$variant(b)
                }
            }
        )*
    };
}

registry! {
    QueryUpgrade = 0x11,
    UpgradeOffer = 0x91,
    UpgradeResult = 0x12,
    UpgradeAck = 0x92,
    RegisterAddress = 0x13,
    PeerLookup = 0x14,
    AddressNotify = 0x94,
}

/// One control channel frame. The type tag is always taken from `body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub device_id: u64,
    pub seq: u16,
    pub body: Body,
}

impl Message {
    pub fn new<B: Into<Body>>(device_id: u64, body: B) -> Self {
        Self {
            device_id,
            seq: 0,
            body: body.into(),
        }
    }

    /// A message answering `self`: same device id and sequence number.
    pub fn reply<B: Into<Body>>(&self, body: B) -> Self {
        Self {
            device_id: self.device_id,
            seq: self.seq,
            body: body.into(),
        }
    }

    pub fn kind(&self) -> MessageType {
        self.body.kind()
    }

    pub fn encode(&self) -> Result<BytesMut, CodecError> {
        let mut body = Writer::new();
        self.body.encode(&mut body)?;
        let body = body.into_bytes();
        let length = u16::try_from(body.len()).map_err(|_| CodecError::Overflow {
            len: body.len(),
            width: u16::MAX as usize,
        })?;

        let mut w = Writer::with_capacity(HEADER_LEN + body.len());
        w.put_u16(MAGIC);
        w.put_u8(self.kind() as u8);
        w.put_u16(length);
        w.put_bcd_u64(self.device_id, DEVICE_ID_LEN)?;
        w.put_u16(self.seq);
        w.put_slice(&body);

        Ok(w.into_bytes())
    }

    /// Decode one message from the start of `data`.
    ///
    /// Returns the message and the number of bytes it used. Trailing bytes
    /// beyond the body are not an error; callers holding a whole frame may
    /// compare the count with the frame size.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut r = Reader::new(data);

        let magic = r.get_u16()?;
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let kind = MessageType::try_from(r.get_u8()?)?;
        let _length = r.get_u16()?;
        let device_id = r.get_bcd_u64(DEVICE_ID_LEN)?;
        let seq = r.get_u16()?;
        let body = Body::decode(kind, &mut r)?;

        Ok((
            Self {
                device_id,
                seq,
                body,
            },
            r.position(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: u64 = 861193046916228;

    fn samples() -> Vec<Body> {
        vec![
            QueryUpgrade {
                device_type: "CAM".into(),
                serial: 42,
                current_version: "1.0".into(),
                location: vec![7; 10],
            }
            .into(),
            UpgradeOffer {
                flag: 1,
                kind: body::DUAL_IMAGE,
                task_id: 3,
                src_version: "1.0".into(),
                dst_version: "1.1".into(),
                url: "http://a".into(),
                checksum: "c1".into(),
                second: Some(SecondImage {
                    url: "http://b".into(),
                    checksum: "c2".into(),
                }),
            }
            .into(),
            UpgradeResult {
                task_id: 3,
                kind: 1,
                reason: 0,
                current_version: "1.1".into(),
            }
            .into(),
            UpgradeAck { task_id: 3 }.into(),
            RegisterAddress {
                key: "app1".into(),
                ip: "1.2.3.4".into(),
                port: 9,
            }
            .into(),
            PeerLookup {
                peer_key: "camera1".into(),
                local_key: "app1".into(),
            }
            .into(),
            AddressNotify::unknown("camera1").into(),
        ]
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_LEN, 15);
        assert_eq!(LENGTH_FIELD_END, 5);

        let mut msg = Message::new(
            DEVICE,
            RegisterAddress {
                key: "app1".into(),
                ip: "1.2.3.4".into(),
                port: 9,
            },
        );
        msg.seq = 0x0102;
        let buf = msg.encode().unwrap();

        assert_eq!(buf.len(), HEADER_LEN + 34);
        assert_eq!(&buf[..2], &[0x68, 0x68]);
        assert_eq!(buf[2], 0x13);
        assert_eq!(u16::from_be_bytes([buf[3], buf[4]]), 34);
        assert_eq!(&buf[5..13], &[0x08, 0x61, 0x19, 0x30, 0x46, 0x91, 0x62, 0x28]);
        assert_eq!(&buf[13..15], &[0x01, 0x02]);
        assert_eq!(&buf[15..19], b"app1");
    }

    #[test]
    fn test_round_trip_every_type() {
        for (seq, body) in samples().into_iter().enumerate() {
            let msg = Message {
                device_id: DEVICE,
                seq: seq as u16,
                body,
            };
            let buf = msg.encode().unwrap();
            let (decoded, used) = Message::decode(&buf).unwrap();
            assert_eq!(decoded, msg);
            assert_eq!(used, buf.len());
            assert_eq!(
                u16::from_be_bytes([buf[3], buf[4]]) as usize + HEADER_LEN,
                buf.len()
            );
        }
    }

    #[test]
    fn test_tag_matches_body() {
        for body in samples() {
            let kind = body.kind();
            let buf = Message::new(1, body).encode().unwrap();
            assert_eq!(MessageType::try_from(buf[2]).unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_type() {
        let mut buf = Message::new(1, UpgradeAck { task_id: 1 }).encode().unwrap();
        buf[2] = 0x7f;
        assert!(matches!(
            Message::decode(&buf),
            Err(DecodeError::UnknownMessageType(0x7f))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = Message::new(1, UpgradeAck { task_id: 1 }).encode().unwrap();
        buf[0] = 0x00;
        assert!(matches!(
            Message::decode(&buf),
            Err(DecodeError::BadMagic(0x0068))
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let buf = Message::new(1, AddressNotify::unknown("k")).encode().unwrap();
        for cut in [0, 4, HEADER_LEN, buf.len() - 1] {
            assert!(matches!(
                Message::decode(&buf[..cut]),
                Err(DecodeError::Codec(CodecError::Truncated { .. }))
            ));
        }
    }

    #[test]
    fn test_trailing_bytes_are_reported() {
        let mut buf = Message::new(1, UpgradeAck { task_id: 1 }).encode().unwrap();
        let len = buf.len();
        buf.extend_from_slice(&[0xaa, 0xbb]);
        let (_, used) = Message::decode(&buf).unwrap();
        assert_eq!(used, len);
    }

    #[test]
    fn test_reply_keeps_header() {
        let mut req = Message::new(
            DEVICE,
            PeerLookup {
                peer_key: "b".into(),
                local_key: "a".into(),
            },
        );
        req.seq = 7;
        let reply = req.reply(AddressNotify::unknown("b"));
        assert_eq!(reply.device_id, DEVICE);
        assert_eq!(reply.seq, 7);
        assert_eq!(reply.kind(), MessageType::AddressNotify);
    }
}
