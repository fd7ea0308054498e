//! Error types, one per layer.
//!
//! Cursor and body codecs fail with [`CodecError`]. Decoding a complete frame
//! fails with [`DecodeError`], which only ever drops that frame. The stream
//! framer fails with [`FramingError`], which ends the connection.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("value of {len} bytes does not fit a {width} byte field")]
    Overflow { len: usize, width: usize },
    #[error("invalid decimal digit {0:?}")]
    InvalidDigit(char),
    #[error("invalid bcd byte {0:#04x}")]
    InvalidBcd(u8),
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    #[error("missing {0}")]
    Missing(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid magic {0:#06x}")]
    BadMagic(u16),
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("invalid magic {0:#06x}")]
    BadMagic(u16),
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("encode error: {0}")]
    Codec(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(feature = "client")]
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("malformed discovery response: {0}")]
    Malformed(#[from] CodecError),
    #[error("discovery response is not a binding success ({0:#06x})")]
    NotSuccess(u16),
    #[error("no mapped address in discovery response")]
    NoMappedAddress,
    #[error("unknown address family {0}")]
    UnknownFamily(u8),
}

#[cfg(feature = "client")]
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unexpected payload from {from}: {payload:?}")]
    ProtocolViolation {
        from: std::net::SocketAddr,
        payload: String,
    },
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("control channel: {0}")]
    Framing(#[from] FramingError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
