//! UDP hole punching.
//!
//! use `Client` to discover the public address, meet the peer through the
//! rendezvous server and punch through to it.

mod client;
pub use client::{
    Client, ClientConfig, Keepalive, Phase, Session, SessionReport, Tick, PING, PONG,
};

mod discovery;
pub use discovery::{Discovery, StunDiscovery};
