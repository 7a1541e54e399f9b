//! Transport names, security modes and the drivers that carry raw stream bytes

use crate::errors::{BenchError, Result};

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Byte stream produced by a transport driver
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type IoStream = Box<dyn AsyncStream>;

/// Transports a host can be asked for by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    WebSocket,
    Quic,
    WebRtc,
    WebTransport,
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::WebSocket => "websocket",
            Transport::Quic => "quic",
            Transport::WebRtc => "webrtc",
            Transport::WebTransport => "webtransport",
        }
    }

    /// Whether this build ships a driver for the transport
    pub fn is_available(&self) -> bool {
        matches!(self, Transport::Tcp | Transport::WebSocket)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Peer identity policy of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityMode {
    /// Remote peer ids are verified and both ends must run secured
    Secured,
    /// No identity verification
    Insecure,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SecurityMode::Secured => "secured",
            SecurityMode::Insecure => "insecure",
        })
    }
}

impl FromStr for SecurityMode {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "secured" => Ok(SecurityMode::Secured),
            "insecure" => Ok(SecurityMode::Insecure),
            other => Err(BenchError::transport(format!(
                "Unknown security mode '{}'",
                other
            ))),
        }
    }
}

/// Carries the raw bytes of one connection
#[async_trait]
pub trait TransportDriver: Send + Sync {
    fn transport(&self) -> Transport;

    /// Open an outbound byte stream to `addr`
    async fn dial(&self, addr: SocketAddr) -> io::Result<IoStream>;

    /// Upgrade an accepted socket into a byte stream
    async fn accept(&self, socket: TcpStream) -> io::Result<IoStream>;
}

/// Plain TCP with Nagle disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDriver;

#[async_trait]
impl TransportDriver for TcpDriver {
    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    async fn dial(&self, addr: SocketAddr) -> io::Result<IoStream> {
        let socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        Ok(Box::new(socket))
    }

    async fn accept(&self, socket: TcpStream) -> io::Result<IoStream> {
        socket.set_nodelay(true)?;
        Ok(Box::new(socket))
    }
}

/// Look up the driver for a transport
pub fn driver_for(transport: Transport) -> Result<Arc<dyn TransportDriver>> {
    if !transport.is_available() {
        return Err(BenchError::startup(format!(
            "Transport '{}' is not available in this build (available: tcp, websocket)",
            transport
        )));
    }

    match transport {
        Transport::WebSocket => Ok(Arc::new(super::ws::WsDriver)),
        _ => Ok(Arc::new(TcpDriver)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_names() {
        assert_eq!(Transport::Tcp.to_string(), "tcp");
        assert_eq!(Transport::WebSocket.to_string(), "websocket");
        assert_eq!(Transport::WebTransport.to_string(), "webtransport");
    }

    #[test]
    fn test_unavailable_transports_fail_at_startup() {
        for transport in [Transport::Quic, Transport::WebRtc, Transport::WebTransport] {
            assert!(!transport.is_available());
            assert!(matches!(driver_for(transport), Err(BenchError::Startup(_))));
        }
    }

    #[test]
    fn test_drivers_report_their_transport() {
        for transport in [Transport::Tcp, Transport::WebSocket] {
            let driver = driver_for(transport).unwrap();
            assert_eq!(driver.transport(), transport);
        }
    }

    #[test]
    fn test_security_mode_round_trip() {
        for mode in [SecurityMode::Secured, SecurityMode::Insecure] {
            assert_eq!(mode.to_string().parse::<SecurityMode>().unwrap(), mode);
        }
        assert!("plaintext".parse::<SecurityMode>().is_err());
    }
}
