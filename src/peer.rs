//! # Peer Addresses
//!
//! Trackers return peers in a compact binary form: 6 bytes per peer, the
//! IPv4 address in the first four bytes and the port in network byte order
//! in the last two.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use crate::tracker::TrackerError;

/// Size of one entry in a compact peer list.
pub const COMPACT_PEER_LEN: usize = 6;

/// Network address of a peer in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    /// IPv4 address of the peer
    pub ip: Ipv4Addr,
    /// Port the peer listens on
    pub port: u16,
}

impl PeerAddr {
    /// Build an address from its parts.
    pub fn new(ip: Ipv4Addr, port: u16) -> PeerAddr {
        PeerAddr { ip, port }
    }

    /// The address in the form `TcpStream::connect` wants.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sock: SocketAddrV4 = s.parse()?;
        Ok(PeerAddr::new(*sock.ip(), sock.port()))
    }
}

impl From<SocketAddrV4> for PeerAddr {
    fn from(sock: SocketAddrV4) -> PeerAddr {
        PeerAddr::new(*sock.ip(), sock.port())
    }
}

/// Cut a compact peer blob into addresses.
pub fn from_compact(blob: &[u8]) -> Result<Vec<PeerAddr>, TrackerError> {
    if blob.len() % COMPACT_PEER_LEN != 0 {
        return Err(TrackerError::BadPeers(blob.len()));
    }

    let peers = blob
        .chunks_exact(COMPACT_PEER_LEN)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            PeerAddr::new(ip, port)
        })
        .collect();

    Ok(peers)
}
