use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;

use eibd_core::IndividualAddress;
use eibd_datalink::eibnet::router::{DEFAULT_MULTICAST, DEFAULT_PORT};
use eibd_datalink::{
    DataLinkError, EibnetRouter, EibnetTunnel, Layer2Interface, Loopback, RouterConfig,
    TunnelConfig,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("unknown driver `{0}`")]
    UnknownDriver(String),
    #[error("invalid port `{0}`")]
    InvalidPort(String),
    #[error("cannot resolve `{0}` to an IPv4 address")]
    Unresolved(String),
}

/// Medium selected on the command line.
///
/// - `ip:[MCAST[:PORT]]` routes over EIBnet/IP multicast,
/// - `ipt:HOST[:PORT[:SPORT]]` tunnels through a gateway,
/// - `loopback:` keeps everything in-process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverUrl {
    Routing { multicast: Ipv4Addr, port: u16 },
    Tunnel { gateway: SocketAddrV4, local_port: u16 },
    Loopback,
}

fn parse_port(s: &str) -> Result<u16, UrlError> {
    s.parse().map_err(|_| UrlError::InvalidPort(s.to_owned()))
}

fn resolve(host: &str, port: u16) -> Result<SocketAddrV4, UrlError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| UrlError::Unresolved(host.to_owned()))?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| UrlError::Unresolved(host.to_owned()))
}

impl FromStr for DriverUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s.split_once(':').unwrap_or((s, ""));
        let parts: Vec<&str> = rest.split(':').filter(|p| !p.is_empty()).collect();
        match scheme {
            "ip" => {
                let multicast = match parts.first() {
                    Some(host) => *resolve(host, DEFAULT_PORT)?.ip(),
                    None => DEFAULT_MULTICAST,
                };
                let port = parts.get(1).map_or(Ok(DEFAULT_PORT), |p| parse_port(p))?;
                Ok(Self::Routing { multicast, port })
            }
            "ipt" => {
                let host = parts
                    .first()
                    .ok_or_else(|| UrlError::Unresolved(String::new()))?;
                let port = parts.get(1).map_or(Ok(DEFAULT_PORT), |p| parse_port(p))?;
                let local_port = parts.get(2).map_or(Ok(0), |p| parse_port(p))?;
                Ok(Self::Tunnel {
                    gateway: resolve(host, port)?,
                    local_port,
                })
            }
            "loopback" => Ok(Self::Loopback),
            other => Err(UrlError::UnknownDriver(other.to_owned())),
        }
    }
}

impl DriverUrl {
    /// Opens the medium; `address` is its individual address where the
    /// medium does not assign one itself.
    pub fn open(&self, address: IndividualAddress) -> Result<Arc<dyn Layer2Interface>, DataLinkError> {
        Ok(match *self {
            Self::Routing { multicast, port } => Arc::new(EibnetRouter::bind(RouterConfig {
                multicast,
                port,
                listen_port: port,
                address,
            })?),
            Self::Tunnel {
                gateway,
                local_port,
            } => Arc::new(EibnetTunnel::connect(
                gateway,
                TunnelConfig {
                    local_port,
                    ..TunnelConfig::default()
                },
            )?),
            Self::Loopback => Arc::new(Loopback::new(address)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_urls() {
        assert_eq!(
            "ip:".parse::<DriverUrl>().unwrap(),
            DriverUrl::Routing {
                multicast: DEFAULT_MULTICAST,
                port: 3671
            }
        );
        assert_eq!(
            "ip:224.0.23.13:3700".parse::<DriverUrl>().unwrap(),
            DriverUrl::Routing {
                multicast: Ipv4Addr::new(224, 0, 23, 13),
                port: 3700
            }
        );
    }

    #[test]
    fn tunnel_urls() {
        assert_eq!(
            "ipt:127.0.0.1".parse::<DriverUrl>().unwrap(),
            DriverUrl::Tunnel {
                gateway: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3671),
                local_port: 0
            }
        );
        assert_eq!(
            "ipt:127.0.0.1:3672:4000".parse::<DriverUrl>().unwrap(),
            DriverUrl::Tunnel {
                gateway: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3672),
                local_port: 4000
            }
        );
        assert!(matches!(
            "ipt:".parse::<DriverUrl>(),
            Err(UrlError::Unresolved(_))
        ));
    }

    #[test]
    fn bad_urls() {
        assert_eq!(
            "ft12:/dev/ttyS0".parse::<DriverUrl>(),
            Err(UrlError::UnknownDriver("ft12".to_owned()))
        );
        assert_eq!(
            "ip:224.0.23.12:port".parse::<DriverUrl>(),
            Err(UrlError::InvalidPort("port".to_owned()))
        );
    }

    #[test]
    fn loopback_opens() {
        let url: DriverUrl = "loopback:".parse().unwrap();
        let medium = url.open(IndividualAddress::new(1, 1, 9)).unwrap();
        assert_eq!(medium.default_address(), IndividualAddress::new(1, 1, 9));
    }
}
