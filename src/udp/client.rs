use futures::{SinkExt, StreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{
    lookup_host,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream, UdpSocket,
};
use tokio::select;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::discovery::{Discovery, StunDiscovery};
use crate::error::{FramingError, SessionError};
use crate::proto::{AddressNotify, Body, Message, PeerLookup, RegisterAddress};
use crate::tcp::FrameCodec;

pub const PING: &[u8] = b"ping";
pub const PONG: &[u8] = b"pong";

type ControlReader = FramedRead<OwnedReadHalf, FrameCodec>;
type ControlWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Key this endpoint registers under.
    pub local_key: String,
    /// Key of the endpoint to look up. Without one the client only registers
    /// and waits to be told who is looking for it.
    pub peer_key: Option<String>,
    pub device_id: u64,
    /// Discovery (STUN) service, `host:port`.
    pub discovery_addr: String,
    /// Rendezvous server, `host:port`.
    pub rendezvous_addr: Option<String>,
    /// Known peer address; skips the rendezvous server.
    pub peer_addr: Option<SocketAddr>,
    pub bind_addr: Option<SocketAddr>,
    pub keepalive_interval: Duration,
    /// Time to keep answering the peer once both sides confirmed.
    pub grace_period: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            local_key: "app1".to_string(),
            peer_key: None,
            device_id: 0,
            discovery_addr: "stun.voipgate.com:3478".to_string(),
            rendezvous_addr: None,
            peer_addr: None,
            bind_addr: None,
            keepalive_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovering,
    Registering,
    AwaitingPeer,
    Handshaking,
    Confirmed,
    Closing,
}

/// Payload this side sends on each keepalive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keepalive {
    Ping,
    Pong,
}

impl Keepalive {
    pub fn payload(self) -> &'static [u8] {
        match self {
            Keepalive::Ping => PING,
            Keepalive::Pong => PONG,
        }
    }
}

/// What a keepalive tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Peer unknown: refresh the public address (and the nat binding).
    Discover,
    Send(&'static [u8], SocketAddr),
}

/// Outcome of a successful session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub public_addr: Option<SocketAddr>,
    pub peer_addr: SocketAddr,
}

/// Hole punching session state. Does no io.
#[derive(Debug)]
pub struct Session {
    local_key: String,
    peer_key: Option<String>,
    public_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    mode: Keepalive,
    received_pong: bool,
    sent_pong: bool,
    phase: Phase,
}

impl Session {
    pub fn new<A: Into<String>>(local_key: A, peer_key: Option<String>) -> Self {
        Self {
            local_key: local_key.into(),
            peer_key,
            public_addr: None,
            peer_addr: None,
            mode: Keepalive::Ping,
            received_pong: false,
            sent_pong: false,
            phase: Phase::Discovering,
        }
    }

    /// Start with a known peer address.
    pub fn with_peer(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self.phase = Phase::Handshaking;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn public_addr(&self) -> Option<SocketAddr> {
        self.public_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn mode(&self) -> Keepalive {
        self.mode
    }

    /// Record a discovered public address.
    ///
    /// Returns the control messages announcing it, none when it is unchanged.
    pub fn on_public_addr(&mut self, addr: SocketAddr) -> Vec<Body> {
        if self.public_addr == Some(addr) {
            return vec![];
        }
        log::info!("public address {}", addr);
        self.public_addr = Some(addr);

        let mut bodies: Vec<Body> = vec![RegisterAddress {
            key: self.local_key.clone(),
            ip: addr.ip().to_string(),
            port: addr.port().into(),
        }
        .into()];
        if let Some(peer_key) = &self.peer_key {
            bodies.push(
                PeerLookup {
                    peer_key: peer_key.clone(),
                    local_key: self.local_key.clone(),
                }
                .into(),
            );
        }

        if self.peer_addr.is_none() {
            self.phase = Phase::Registering;
        }
        bodies
    }

    /// Registration messages went out.
    pub fn on_registered(&mut self) {
        if self.phase == Phase::Registering {
            self.phase = Phase::AwaitingPeer;
        }
    }

    /// Handle an address notification. Returns the peer address when it names
    /// our peer with a usable address.
    pub fn on_notify(&mut self, n: &AddressNotify) -> Option<SocketAddr> {
        let wanted = match &self.peer_key {
            Some(k) => &n.key == k,
            None => n.key != self.local_key,
        };
        if !wanted {
            log::debug!("ignoring address of {}", n.key);
            return None;
        }
        if n.is_unknown() {
            log::info!("address of {} not known yet", n.key);
            return None;
        }

        let addr = match (n.ip.parse::<IpAddr>(), u16::try_from(n.port)) {
            (Ok(ip), Ok(port)) => SocketAddr::new(ip, port),
            _ => {
                log::warn!("invalid address of {}: {}:{}", n.key, n.ip, n.port);
                return None;
            }
        };

        if self.peer_addr != Some(addr) {
            log::info!("peer {} is at {}", n.key, addr);
        }
        self.peer_addr = Some(addr);
        if matches!(self.phase, Phase::Discovering | Phase::Registering | Phase::AwaitingPeer) {
            self.phase = Phase::Handshaking;
        }
        Some(addr)
    }

    pub fn on_tick(&self) -> Tick {
        match self.peer_addr {
            Some(peer) => Tick::Send(self.mode.payload(), peer),
            None => Tick::Discover,
        }
    }

    /// A keepalive payload reached the peer socket.
    pub fn on_sent(&mut self, payload: &[u8]) {
        if payload == PONG {
            self.sent_pong = true;
        }
    }

    /// Handle a keepalive payload. Returns false when it is not one.
    pub fn on_keepalive(&mut self, payload: &[u8]) -> bool {
        if payload == PING {
            if self.mode == Keepalive::Ping {
                log::info!("received ping");
            }
            self.mode = Keepalive::Pong;
        } else if payload == PONG {
            if !self.received_pong {
                log::info!("received pong");
            }
            // a side that learns the peer late may never send ping
            self.mode = Keepalive::Pong;
            self.received_pong = true;
        } else {
            return false;
        }
        true
    }

    pub fn is_confirmed(&self) -> bool {
        self.received_pong && self.sent_pong
    }

    pub fn confirm(&mut self) {
        self.phase = Phase::Confirmed;
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closing;
    }
}

/// Nat traversal client
///
/// discover the public address, publish it through the rendezvous server,
/// learn the peer address and exchange ping/pong with the peer until both
/// sides saw a pong.
///
/// # example
/// ```no_run
/// use natpunch::udp::{Client, ClientConfig};
///
/// # async fn run() {
/// let config = ClientConfig {
///     local_key: "app1".into(),
///     peer_key: Some("camera1".into()),
///     rendezvous_addr: Some("rendezvous.example:8882".into()),
///     ..Default::default()
/// };
/// let report = Client::new(config).run().await.unwrap();
/// println!("peer at {}", report.peer_addr);
/// # }
/// ```
pub struct Client<D = StunDiscovery> {
    config: ClientConfig,
    discovery: D,
    seq: u16,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_discovery(config, StunDiscovery::new())
    }
}

impl<D: Discovery> Client<D> {
    pub fn with_discovery(config: ClientConfig, discovery: D) -> Self {
        Self {
            config,
            discovery,
            seq: 0,
        }
    }

    pub async fn run(mut self) -> Result<SessionReport, SessionError> {
        let interval = self.config.keepalive_interval;
        if interval.is_zero() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero keepalive interval").into());
        }

        let discovery_addr =
            Self::resolve(&self.config.discovery_addr, self.config.bind_addr).await?;
        let local_addr = self.config.bind_addr.unwrap_or(match discovery_addr {
            SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        });
        let socket = Self::bind(local_addr)?;
        log::info!("listening on {}", socket.local_addr()?);

        let (mut control_rx, mut control_tx) = match &self.config.rendezvous_addr {
            Some(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                log::info!("connected to rendezvous server {}", stream.peer_addr()?);
                let (r, w) = stream.into_split();
                (
                    Some(FramedRead::new(r, FrameCodec::new())),
                    Some(FramedWrite::new(w, FrameCodec::new())),
                )
            }
            None => (None, None),
        };

        let mut session = Session::new(self.config.local_key.clone(), self.config.peer_key.clone());
        if let Some(peer) = self.config.peer_addr {
            session = session.with_peer(peer);
        }

        self.discover(&socket, discovery_addr).await;

        let mut keepalive = interval_at(Instant::now() + interval, interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deadline: Option<Instant> = None;
        let mut buf = [0u8; 1500];

        loop {
            select! {
                r = socket.recv_from(&mut buf) => {
                    let (n, from) = r?;
                    self.handle_datagram(&mut session, &buf[..n], from, &mut control_tx).await?;
                }
                frame = Self::next_frame(&mut control_rx) => match frame {
                    Some(Ok(frame)) => Self::handle_frame(&mut session, &frame),
                    Some(Err(e)) => {
                        log::warn!("control channel: {}", e);
                        control_rx = None;
                    }
                    None => {
                        log::info!("control channel closed");
                        control_rx = None;
                    }
                },
                _ = keepalive.tick() => match session.on_tick() {
                    Tick::Discover => self.discover(&socket, discovery_addr).await,
                    Tick::Send(payload, peer) => match socket.send_to(payload, peer).await {
                        Ok(_) => {
                            log::debug!("sent {} to {}", String::from_utf8_lossy(payload), peer);
                            session.on_sent(payload);
                        }
                        Err(e) => log::warn!("keepalive to {}: {}", peer, e),
                    },
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    session.close();
                    drop(socket);

                    let peer_addr = session.peer_addr().ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotConnected, "confirmed without peer")
                    })?;
                    return Ok(SessionReport {
                        public_addr: session.public_addr(),
                        peer_addr,
                    });
                }
            }

            if deadline.is_none() && session.is_confirmed() {
                log::info!("Success! closing in {:?}", self.config.grace_period);
                session.confirm();
                deadline = Some(Instant::now() + self.config.grace_period);
            }
        }
    }

    /// Resolve `addr` to an address the socket bound at `bind_addr` can reach.
    /// Without a bind address only ipv4 is used, as registered addresses have
    /// to fit the ip field.
    async fn resolve(addr: &str, bind_addr: Option<SocketAddr>) -> Result<SocketAddr, SessionError> {
        lookup_host(addr)
            .await
            .ok()
            .and_then(|addrs| pick_addr(addrs, bind_addr))
            .ok_or_else(|| SessionError::Resolve(addr.to_string()))
    }

    fn bind(local_addr: SocketAddr) -> io::Result<UdpSocket> {
        let socket = Socket::new(
            Domain::for_address(local_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&local_addr.into())?;

        UdpSocket::from_std(socket.into())
    }

    async fn next_frame(
        control: &mut Option<ControlReader>,
    ) -> Option<Result<bytes::BytesMut, FramingError>> {
        match control {
            Some(r) => r.next().await,
            None => std::future::pending().await,
        }
    }

    async fn discover(&mut self, socket: &UdpSocket, addr: SocketAddr) {
        let req = self.discovery.request();
        if let Err(e) = socket.send_to(&req, addr).await {
            log::warn!("discovery request to {}: {}", addr, e);
        }
    }

    async fn handle_datagram(
        &mut self,
        session: &mut Session,
        payload: &[u8],
        from: SocketAddr,
        control: &mut Option<ControlWriter>,
    ) -> Result<(), SessionError> {
        if session.on_keepalive(payload) {
            return Ok(());
        }
        if !self.discovery.is_response(payload) {
            return Err(SessionError::ProtocolViolation {
                from,
                payload: String::from_utf8_lossy(payload).into_owned(),
            });
        }

        match self.discovery.parse_response(payload) {
            Ok(addr) => {
                for body in session.on_public_addr(addr) {
                    self.send_control(control, body).await;
                }
                session.on_registered();
            }
            Err(e) => log::warn!("discovery: {}", e),
        }
        Ok(())
    }

    fn handle_frame(session: &mut Session, frame: &[u8]) {
        match Message::decode(frame) {
            Ok((msg, _)) => match msg.body {
                Body::AddressNotify(n) => {
                    session.on_notify(&n);
                }
                other => log::debug!("ignoring {:?}", other.kind()),
            },
            Err(e) => log::warn!("dropping frame: {}", e),
        }
    }

    async fn send_control(&mut self, control: &mut Option<ControlWriter>, body: Body) {
        let Some(w) = control.as_mut() else {
            log::debug!("no control channel, {:?} not sent", body.kind());
            return;
        };

        let kind = body.kind();
        self.seq = self.seq.wrapping_add(1);
        let mut msg = Message::new(self.config.device_id, body);
        msg.seq = self.seq;

        match w.send(msg).await {
            Ok(()) => {}
            // nothing was written, the stream is still in sync
            Err(FramingError::Codec(e)) => log::warn!("dropping {:?}: {}", kind, e),
            Err(e) => {
                log::warn!("control channel: {}", e);
                *control = None;
            }
        }
    }
}

fn pick_addr<I>(addrs: I, bind_addr: Option<SocketAddr>) -> Option<SocketAddr>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let want_v6 = bind_addr.is_some_and(|a| a.is_ipv6());
    addrs.into_iter().find(|a| a.is_ipv6() == want_v6)
}
