//!A rendezvous protocol and hole punching client, to get two peers behind NAT talking over udp.
//!
//!A peer behind a NAT or firewall only accepts traffic from addresses it sent traffic to first.
//!To reach it you need its public address, and it needs to send you a packet.
//!
//!## How it works
//!Each peer learns its public udp address from a discovery (STUN) service, using the same socket
//!it will later talk to the peer with. It registers that address under a unique key with a public
//!rendezvous server over a tcp control channel.
//!
//!A peer looking for another one asks the server for its address. The server answers with it and
//!tells the looked up peer who is asking, so both sides learn each other's address at about the same time.
//!
//!Both peers then send `ping` to each other. A peer that hears `ping` answers `pong` from then on.
//!Once a peer has both sent and received `pong`, the path is open both ways and the session ends
//!after a short grace period.
//!
//!The control channel carries framed binary messages, see [`proto`]. Besides address exchange the
//!registry also knows the firmware upgrade messages devices send on the same channel.
//!
//!## Feature flags
//!For convenient, the crate include both client and server code by default.
//!Mostly you only use client or server code, set features to `client` or `server` instead.
//!
//!```toml
//!natpunch = { version = "0.1", default-features=false, features=["client"]}
//!```
//!
//!- `client`: udp hole punching client
//!- `server`: rendezvous server

pub mod error;
pub mod proto;
pub mod tcp;
#[cfg(feature = "client")]
pub mod udp;
