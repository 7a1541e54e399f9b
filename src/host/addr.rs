//! Peer identities and peer addresses

use crate::errors::{BenchError, Result};
use crate::host::transport::Transport;

use rand::{Rng, SeedableRng, rngs::StdRng};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// 128-bit peer identity, rendered as 32 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 16]);

impl PeerId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Deterministic identity for a non-zero seed
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        StdRng::seed_from_u64(seed).fill(&mut bytes);
        Self(bytes)
    }

    /// Seed 0 means a random identity
    pub fn generate(seed: u64) -> Self {
        if seed == 0 {
            Self::random()
        } else {
            Self::from_seed(seed)
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for PeerId {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 32 || !s.is_ascii() {
            return Err(BenchError::startup(format!(
                "Invalid peer id '{}': expected 32 hex characters",
                s
            )));
        }

        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| {
                BenchError::startup(format!("Invalid peer id '{}': not hexadecimal", s))
            })?;
        }
        Ok(Self(bytes))
    }
}

/// Address of a peer: `/ip4/<ip>/tcp/<port>[/ws][/p2p/<peer-id>]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    pub ip: IpAddr,
    pub port: u16,
    pub transport: Transport,
    pub peer: Option<PeerId>,
}

impl PeerAddr {
    pub fn new(socket: SocketAddr, transport: Transport, peer: Option<PeerId>) -> Self {
        Self {
            ip: socket.ip(),
            port: socket.port(),
            transport,
            peer,
        }
    }

    /// Address advertised for a bound socket; wildcard binds advertise loopback
    pub fn advertised(bound: SocketAddr, transport: Transport, peer: PeerId) -> Self {
        let ip = match bound.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Self::new(SocketAddr::new(ip, bound.port()), transport, Some(peer))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "/ip4/{}", ip)?,
            IpAddr::V6(ip) => write!(f, "/ip6/{}", ip)?,
        }
        write!(f, "/tcp/{}", self.port)?;
        if self.transport == Transport::WebSocket {
            f.write_str("/ws")?;
        }
        if let Some(peer) = self.peer {
            write!(f, "/p2p/{}", peer)?;
        }
        Ok(())
    }
}

impl FromStr for PeerAddr {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            BenchError::startup(format!("Invalid peer address '{}': {}", s, reason))
        };

        let rest = s
            .trim()
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;
        let mut parts = rest.split('/');

        let ip = match (parts.next(), parts.next()) {
            (Some("ip4"), Some(ip)) => IpAddr::V4(
                ip.parse::<Ipv4Addr>()
                    .map_err(|_| invalid("bad ip4 address"))?,
            ),
            (Some("ip6"), Some(ip)) => IpAddr::V6(
                ip.parse::<Ipv6Addr>()
                    .map_err(|_| invalid("bad ip6 address"))?,
            ),
            _ => return Err(invalid("expected /ip4/<ip> or /ip6/<ip>")),
        };

        let port = match (parts.next(), parts.next()) {
            (Some("tcp"), Some(port)) => port.parse::<u16>().map_err(|_| invalid("bad tcp port"))?,
            (Some("udp"), _) => {
                return Err(invalid(
                    "udp transports (quic, webrtc, webtransport) are not available",
                ));
            }
            _ => return Err(invalid("expected /tcp/<port>")),
        };

        let mut transport = Transport::Tcp;
        let mut peer = None;
        let mut next = parts.next();

        if next == Some("ws") {
            transport = Transport::WebSocket;
            next = parts.next();
        }

        if next == Some("p2p") {
            let id = parts.next().ok_or_else(|| invalid("missing peer id after /p2p"))?;
            peer = Some(id.parse::<PeerId>()?);
            next = parts.next();
        }

        if let Some(extra) = next
            && !extra.is_empty()
        {
            return Err(invalid(&format!("unexpected component '{}'", extra)));
        }

        Ok(Self {
            ip,
            port,
            transport,
            peer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "00112233445566778899aabbccddeeff";

    #[test]
    fn test_peer_id_display_and_parse() {
        let id: PeerId = ID.parse().unwrap();
        assert_eq!(id.to_string(), ID);
        assert!("0011".parse::<PeerId>().is_err());
        assert!("zz112233445566778899aabbccddeeff".parse::<PeerId>().is_err());
    }

    #[test]
    fn test_seeded_peer_ids_are_stable() {
        assert_eq!(PeerId::from_seed(7), PeerId::from_seed(7));
        assert_ne!(PeerId::from_seed(7), PeerId::from_seed(8));
        assert_eq!(PeerId::generate(42), PeerId::from_seed(42));
        assert_ne!(PeerId::generate(0), PeerId::generate(0));
    }

    #[test]
    fn test_parse_tcp_address() {
        let addr: PeerAddr = format!("/ip4/127.0.0.1/tcp/9999/p2p/{}", ID).parse().unwrap();
        assert_eq!(addr.transport, Transport::Tcp);
        assert_eq!(addr.socket_addr(), "127.0.0.1:9999".parse().unwrap());
        assert_eq!(addr.peer.unwrap().to_string(), ID);
    }

    #[test]
    fn test_parse_websocket_ip6_address() {
        let text = format!("/ip6/::1/tcp/4001/ws/p2p/{}", ID);
        let addr: PeerAddr = text.parse().unwrap();
        assert_eq!(addr.transport, Transport::WebSocket);
        assert_eq!(addr.to_string(), text);
    }

    #[test]
    fn test_parse_address_without_peer() {
        let addr: PeerAddr = "/ip4/10.0.0.1/tcp/80".parse().unwrap();
        assert!(addr.peer.is_none());
        assert_eq!(addr.to_string(), "/ip4/10.0.0.1/tcp/80");
    }

    #[test]
    fn test_parse_rejects_bad_addresses() {
        for bad in [
            "127.0.0.1:9999",
            "/ip4/999.0.0.1/tcp/1",
            "/ip4/127.0.0.1/tcp/99999",
            "/ip4/127.0.0.1/udp/9999/quic",
            "/ip4/127.0.0.1/tcp/1/p2p",
            "/ip4/127.0.0.1/tcp/1/p2p/nothex",
            "/ip4/127.0.0.1/tcp/1/tls",
        ] {
            let result = bad.parse::<PeerAddr>();
            assert!(matches!(result, Err(BenchError::Startup(_))), "{}", bad);
        }
    }

    #[test]
    fn test_advertised_replaces_wildcard() {
        let peer = PeerId::from_seed(1);
        let addr = PeerAddr::advertised("0.0.0.0:9999".parse().unwrap(), Transport::Tcp, peer);
        assert_eq!(addr.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.peer, Some(peer));
    }
}
