//! Datagram endpoints shared by the forwarder and the interpreter
//!
//! An endpoint is either a UDP `host:port` or a local datagram socket path.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

/// Transport setup errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint '{0}' (expected host:port or a socket path)")]
    InvalidEndpoint(String),

    #[error("cannot resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} resolves to no address")]
    NoAddress(String),

    #[error("cannot bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("local socket {0} does not exist yet")]
    MissingSocket(PathBuf),
}

/// Where frames are sent to and where the interpreter listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Udp { host: String, port: u16 },
    Local(PathBuf),
}

impl Endpoint {
    /// Resolve a UDP endpoint to its first socket address
    pub fn socket_addr(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
        let endpoint = format!("{}:{}", host, port);
        (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                endpoint: endpoint.clone(),
                source,
            })?
            .next()
            .ok_or(TransportError::NoAddress(endpoint))
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            return Ok(Self::Local(PathBuf::from(s)));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidEndpoint(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| TransportError::InvalidEndpoint(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(TransportError::InvalidEndpoint(s.to_string()));
        }
        Ok(Self::Udp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp { host, port } if host.contains(':') => write!(f, "udp://[{}]:{}", host, port),
            Self::Udp { host, port } => write!(f, "udp://{}:{}", host, port),
            Self::Local(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Sending side of a datagram endpoint, owned by one capture worker
pub enum Transport {
    Udp { socket: UdpSocket, dest: SocketAddr },
    Local { socket: UnixDatagram, path: PathBuf },
    Closed,
}

impl Transport {
    pub fn connect(endpoint: &Endpoint) -> Result<Self, TransportError> {
        match endpoint {
            Endpoint::Udp { host, port } => {
                let dest = Endpoint::socket_addr(host, *port)?;
                let local: SocketAddr = if dest.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(local).map_err(|source| TransportError::Bind {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
                info!("Forwarding to UDP socket {}", dest);
                Ok(Self::Udp { socket, dest })
            }
            Endpoint::Local(path) => {
                if !path.exists() {
                    return Err(TransportError::MissingSocket(path.clone()));
                }
                let socket = UnixDatagram::unbound().map_err(|source| TransportError::Bind {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
                info!("Forwarding to local socket {}", path.display());
                Ok(Self::Local {
                    socket,
                    path: path.clone(),
                })
            }
        }
    }

    /// Best-effort send, 0 when the datagram could not be delivered
    pub fn send(&self, datagram: &[u8]) -> usize {
        let result = match self {
            Self::Udp { socket, dest } => socket.send_to(datagram, dest),
            Self::Local { socket, path } => socket.send_to(datagram, path),
            Self::Closed => return 0,
        };
        match result {
            Ok(n) => n,
            Err(e) => {
                debug!("Datagram send failed: {}", e);
                0
            }
        }
    }

    pub fn close(&mut self) {
        *self = Self::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_udp_endpoint() {
        let ep: Endpoint = "localhost:2154".parse().unwrap();
        assert_eq!(
            ep,
            Endpoint::Udp {
                host: "localhost".to_string(),
                port: 2154
            }
        );
        assert_eq!(ep.to_string(), "udp://localhost:2154");

        let ep: Endpoint = "[::1]:9000".parse().unwrap();
        assert_eq!(
            ep,
            Endpoint::Udp {
                host: "::1".to_string(),
                port: 9000
            }
        );
    }

    #[test]
    fn test_parse_local_endpoint() {
        let ep: Endpoint = "/tmp/cc2531_server".parse().unwrap();
        assert_eq!(ep, Endpoint::Local(PathBuf::from("/tmp/cc2531_server")));
        let ep: Endpoint = "./sock".parse().unwrap();
        assert!(matches!(ep, Endpoint::Local(_)));
    }

    #[test]
    fn test_parse_invalid_endpoint() {
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!("localhost:http".parse::<Endpoint>().is_err());
        assert!(":2154".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_udp_send_reaches_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = Transport::connect(&Endpoint::Udp {
            host: "127.0.0.1".to_string(),
            port,
        })
        .unwrap();

        assert_eq!(transport.send(b"hello"), 5);
        let mut buf = [0u8; 16];
        let n = listener.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_local_socket_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");
        let err = Transport::connect(&Endpoint::Local(path)).err().unwrap();
        assert!(matches!(err, TransportError::MissingSocket(_)));
    }

    #[test]
    fn test_local_send_and_closed_transport() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.sock");
        let server = UnixDatagram::bind(&path).unwrap();

        let mut transport = Transport::connect(&Endpoint::Local(path)).unwrap();
        assert_eq!(transport.send(&[1, 2, 3]), 3);
        let mut buf = [0u8; 8];
        assert_eq!(server.recv(&mut buf).unwrap(), 3);

        transport.close();
        assert_eq!(transport.send(&[1, 2, 3]), 0);
    }

    #[test]
    fn test_send_to_vanished_local_socket_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.sock");
        let server = UnixDatagram::bind(&path).unwrap();
        let transport = Transport::connect(&Endpoint::Local(path.clone())).unwrap();
        drop(server);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(transport.send(&[0xff]), 0);
    }
}
