use clap::Parser;
use eibd_core::IndividualAddress;
use eibd_datalink::eibnet::router::{DEFAULT_MULTICAST, DEFAULT_PORT};
use eibd_server::{EibnetServer, GroupCache, GroupCacheConfig, Layer3, ServerConfig};
use eibd_tools::DriverUrl;
use std::net::Ipv4Addr;

#[derive(Parser, Debug)]
#[command(name = "eibd", about = "EIB/KNX bus-access daemon")]
struct Args {
    /// Medium: `ip:[MCAST[:PORT]]`, `ipt:HOST[:PORT[:SPORT]]` or `loopback:`.
    url: DriverUrl,
    /// Individual address of this daemon on the bus.
    #[arg(short = 'e', long, default_value = "0.0.1")]
    eibaddr: IndividualAddress,
    /// Run the EIBnet/IP server.
    #[arg(short = 'S', long)]
    server: bool,
    /// Accept tunneling clients on the server.
    #[arg(short = 'T', long, requires = "server")]
    tunnel: bool,
    /// Route frames as multicast on the server.
    #[arg(short = 'R', long, requires = "server")]
    route: bool,
    /// Answer search and description requests on the server.
    #[arg(short = 'D', long, requires = "server")]
    discover: bool,
    #[arg(long, default_value_t = DEFAULT_MULTICAST)]
    multicast: Ipv4Addr,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Keep a cache of group values seen on the bus.
    #[arg(short = 'c', long)]
    group_cache: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let medium = args.url.open(args.eibaddr)?;
    let layer3 = Layer3::new(medium)?;

    let server = if args.server {
        let config = ServerConfig {
            multicast: args.multicast,
            port: args.port,
            tunnel: args.tunnel,
            route: args.route,
            discover: args.discover,
            ..ServerConfig::default()
        };
        Some(EibnetServer::start(layer3.handle(), config)?)
    } else {
        None
    };

    let cache = if args.group_cache {
        let cache = GroupCache::new(layer3.handle(), GroupCacheConfig::default())?;
        cache.enable()?;
        Some(cache)
    } else {
        None
    };

    log::info!("eibd running as {} (Ctrl+C to stop)", layer3.handle().default_address());
    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");

    if let Some(cache) = cache {
        cache.stop();
    }
    if let Some(server) = server {
        server.stop();
    }
    layer3.stop();
    Ok(())
}
