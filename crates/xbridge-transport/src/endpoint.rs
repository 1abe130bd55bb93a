use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::stream::SerialStream;

/// Address of a serial gateway.
///
/// Parsed from `host:port` or `unix:/path/to/socket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Endpoint {
    /// TCP endpoint from host and port.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Unix(_) => "unix-domain-socket",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Bracket bare IPv6 literals so the output parses back.
            Self::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidEndpoint(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(TransportError::InvalidEndpoint(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| TransportError::InvalidEndpoint(s.to_string()))?;
        Ok(Self::tcp(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

/// Opens a fresh gateway connection on every call.
///
/// The supervisor calls this once per (re)connect attempt.
pub trait Connector: Send + Sync {
    /// Open a new connection.
    fn connect(&self) -> Result<SerialStream>;

    /// Where this connector points, for logs.
    fn describe(&self) -> String;
}

/// [`Connector`] for a fixed [`Endpoint`].
#[derive(Debug, Clone)]
pub struct EndpointConnector {
    endpoint: Endpoint,
    timeout: Duration,
}

impl EndpointConnector {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Connector for EndpointConnector {
    fn connect(&self) -> Result<SerialStream> {
        connect(&self.endpoint, self.timeout)
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

/// Connect to a gateway endpoint (blocking, bounded by `timeout` for TCP).
pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<SerialStream> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let addrs = (host.as_str(), *port)
                .to_socket_addrs()
                .map_err(|e| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source: e,
                })?;

            let mut last_err = None;
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, timeout) {
                    Ok(stream) => {
                        debug!(%addr, "connected to serial gateway");
                        return SerialStream::from_tcp(stream);
                    }
                    Err(err) => last_err = Some(err),
                }
            }

            match last_err {
                Some(source) => Err(TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                }),
                None => Err(TransportError::Resolve(endpoint.to_string())),
            }
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = std::os::unix::net::UnixStream::connect(path).map_err(|e| {
                TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source: e,
                }
            })?;
            debug!(?path, "connected to unix serial gateway");
            Ok(SerialStream::from_unix(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(TransportError::Connect {
            endpoint: endpoint.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix socket gateways require a unix platform",
            ),
        }),
    }
}
