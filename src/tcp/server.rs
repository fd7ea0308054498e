use futures::{SinkExt, StreamExt};
use socket2::{SockRef, TcpKeepalive};
use std::io::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener, TcpStream, ToSocketAddrs,
};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::{select, task, time};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::framer::FrameCodec;
use super::registry::{ConnHandle, Endpoint, Registry};
use crate::error::FramingError;
use crate::proto::{AddressNotify, Body, Message, PeerLookup, RegisterAddress};

const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Forget addresses not refreshed for this long once their connection is gone.
    /// `None` keeps them forever.
    pub address_ttl: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], 8882).into(),
            address_ttl: None,
        }
    }
}

/// Tcp rendezvous server
///
/// keep traces of every registered endpoint, answer address lookups and tell
/// the looked up endpoint who is asking for it.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    address_ttl: Option<Duration>,
    count: u64,
}

impl Server {
    pub async fn new<A: ToSocketAddrs>(listen_addr: A) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;

        Ok(Self {
            listener,
            registry: Default::default(),
            address_ttl: None,
            count: 0,
        })
    }

    pub async fn with_config(config: ServerConfig) -> Result<Self> {
        if config.address_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(Error::new(ErrorKind::InvalidInput, "zero address ttl"));
        }

        let mut s = Self::new(config.listen_addr).await?;
        s.address_ttl = config.address_ttl;
        Ok(s)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    fn next_id(&mut self) -> u64 {
        self.count += 1;
        self.count
    }

    pub async fn run(mut self) -> Result<()> {
        if let Some(ttl) = self.address_ttl {
            let registry = self.registry.clone();
            task::spawn(async move {
                let mut gc = time::interval(ttl);
                loop {
                    gc.tick().await;
                    let n = registry.expire(ttl);
                    if n > 0 {
                        log::debug!("expired {} stale entries", n);
                    }
                }
            });
        }

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("accept error: {}", e);
                    continue;
                }
            };
            let id = self.next_id();
            let registry = self.registry.clone();

            task::spawn(async move {
                log::info!("connection {} from {}", id, addr);
                if let Err(e) = Self::set_keepalive(&stream) {
                    log::debug!("connection {}: keepalive not set: {}", id, e);
                }

                let (tx, rx) = channel(10);
                let (r, w) = stream.into_split();
                let h = PeerHandler {
                    writer: FramedWrite::new(w, FrameCodec::new()),
                    registry,
                    keys: vec![],
                    id,
                    tx,
                    rx,
                };

                h.handle_stream(FramedRead::new(r, FrameCodec::new())).await;
            });
        }
    }

    fn set_keepalive(stream: &TcpStream) -> Result<()> {
        let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)
    }
}

struct PeerHandler {
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    registry: Arc<Registry>,
    /// Keys registered over this connection.
    keys: Vec<String>,
    id: u64,
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

type FrameResult<T> = std::result::Result<T, FramingError>;

impl PeerHandler {
    async fn handle_stream(mut self, mut r: FramedRead<OwnedReadHalf, FrameCodec>) {
        match self.serve(&mut r).await {
            Ok(()) => log::info!("connection {} closed", self.id),
            Err(e) => log::info!("connection {} dropped: {}", self.id, e),
        }

        for key in &self.keys {
            self.registry.release(key, self.id);
        }
    }

    async fn serve(&mut self, r: &mut FramedRead<OwnedReadHalf, FrameCodec>) -> FrameResult<()> {
        loop {
            select! {
                frame = r.next() => match frame {
                    Some(frame) => self.handle_frame(&frame?).await?,
                    None => return Ok(()),
                },
                Some(msg) = self.rx.recv() => self.writer.send(msg).await?,
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) -> FrameResult<()> {
        let msg = match Message::decode(frame) {
            Ok((msg, used)) => {
                if used != frame.len() {
                    log::debug!(
                        "connection {}: {:?} used {} of {} bytes",
                        self.id,
                        msg.kind(),
                        used,
                        frame.len()
                    );
                }
                msg
            }
            Err(e) => {
                log::warn!("connection {}: dropping frame: {}", self.id, e);
                return Ok(());
            }
        };

        match &msg.body {
            Body::RegisterAddress(reg) => {
                self.handle_register(reg);
                Ok(())
            }
            Body::PeerLookup(lookup) => self.handle_lookup(&msg, lookup).await,
            _ => {
                log::trace!("connection {}: ignoring {:?}", self.id, msg.kind());
                Ok(())
            }
        }
    }

    fn handle_register(&mut self, reg: &RegisterAddress) {
        let addr = Endpoint {
            ip: reg.ip.clone(),
            port: reg.port,
        };
        log::debug!("save {} -> {}", reg.key, addr);

        let conn = ConnHandle {
            id: self.id,
            tx: self.tx.clone(),
        };
        self.registry.register(&reg.key, conn, addr);

        if !self.keys.contains(&reg.key) {
            self.keys.push(reg.key.clone());
        }
    }

    async fn handle_lookup(&mut self, req: &Message, lookup: &PeerLookup) -> FrameResult<()> {
        log::debug!("{} looks up {}", lookup.local_key, lookup.peer_key);

        let answer = match self.registry.address(&lookup.peer_key) {
            Some(addr) => AddressNotify {
                key: lookup.peer_key.clone(),
                ip: addr.ip,
                port: addr.port,
            },
            None => {
                log::debug!("{} not found", lookup.peer_key);
                AddressNotify::unknown(&lookup.peer_key)
            }
        };
        self.writer.send(req.reply(answer)).await?;

        // tell the looked up endpoint where the requester is
        let Some(addr) = self.registry.address(&lookup.local_key) else {
            return Ok(());
        };
        let Some(peer) = self.registry.connection(&lookup.peer_key) else {
            return Ok(());
        };
        let notify = req.reply(AddressNotify {
            key: lookup.local_key.clone(),
            ip: addr.ip,
            port: addr.port,
        });

        if peer.id == self.id {
            return self.writer.send(notify).await;
        }
        if let Err(e) = peer.tx.try_send(notify) {
            log::warn!("can not notify {}: {}", lookup.peer_key, e);
        }
        Ok(())
    }
}
