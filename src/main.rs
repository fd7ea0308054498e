use std::io::Result;
use std::net::SocketAddr;
use std::time::Duration;
use structopt::StructOpt;

use natpunch::tcp::{Server, ServerConfig};
use natpunch::udp::{Client, ClientConfig};

#[derive(StructOpt, Debug)]
#[structopt(name = "natpunch")]
enum Opt {
    Client(ClientOpt),
    Server(ServerOpt),
}

#[derive(StructOpt, Debug)]
struct ClientOpt {
    #[structopt(long = "local-key", default_value = "app1")]
    local_key: String,

    /// Key of the peer to look up; without it only register and wait.
    #[structopt(long = "peer-key")]
    peer_key: Option<String>,

    #[structopt(long = "rendezvous-server")]
    rendezvous_server: Option<String>,

    /// Skip the rendezvous server and punch straight to this address.
    #[structopt(long = "peer-addr")]
    peer_addr: Option<SocketAddr>,

    #[structopt(long = "discovery-server", default_value = "stun.voipgate.com:3478")]
    discovery_server: String,

    #[structopt(long = "device-id", default_value = "0")]
    device_id: u64,

    #[structopt(long = "bind-addr")]
    bind_addr: Option<SocketAddr>,

    #[structopt(long = "keepalive-ms", default_value = "5000")]
    keepalive_ms: u64,

    #[structopt(long = "grace-ms", default_value = "2000")]
    grace_ms: u64,
}

#[derive(StructOpt, Debug)]
struct ServerOpt {
    #[structopt(long = "listen-addr", default_value = "0.0.0.0:8882")]
    listen_addr: SocketAddr,

    /// Forget addresses of disconnected endpoints after this many seconds.
    #[structopt(long = "address-ttl")]
    address_ttl: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt: Opt = StructOpt::from_args();

    match opt {
        Opt::Server(opt) => run_server(opt).await,
        Opt::Client(opt) => run_client(opt).await,
    }
}

async fn run_server(opt: ServerOpt) -> Result<()> {
    let s = Server::with_config(ServerConfig {
        listen_addr: opt.listen_addr,
        address_ttl: opt.address_ttl.map(Duration::from_secs),
    })
    .await?;
    log::info!("listening on {}", s.local_addr()?);
    s.run().await
}

async fn run_client(opt: ClientOpt) -> Result<()> {
    if opt.rendezvous_server.is_none() && opt.peer_addr.is_none() {
        log::warn!("neither --rendezvous-server nor --peer-addr given, the peer can not be found");
    }

    let c = Client::new(ClientConfig {
        local_key: opt.local_key,
        peer_key: opt.peer_key,
        device_id: opt.device_id,
        discovery_addr: opt.discovery_server,
        rendezvous_addr: opt.rendezvous_server,
        peer_addr: opt.peer_addr,
        bind_addr: opt.bind_addr,
        keepalive_interval: Duration::from_millis(opt.keepalive_ms),
        grace_period: Duration::from_millis(opt.grace_ms),
    });

    match c.run().await {
        Ok(report) => {
            log::info!("punched through to {}", report.peer_addr);
            Ok(())
        }
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
    }
}
