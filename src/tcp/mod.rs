//! Rendezvous control channel over tcp.
//!
//! use `FrameCodec` to split the byte stream into frames.
//!
//! use `Server` to run a rendezvous server.

mod framer;
pub use framer::FrameCodec;

#[cfg(feature = "server")]
mod registry;
#[cfg(feature = "server")]
pub use registry::{ConnHandle, Endpoint, Registry};

#[cfg(feature = "server")]
mod server;
#[cfg(feature = "server")]
pub use server::{Server, ServerConfig};
