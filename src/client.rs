//! # Peer Session
//!
//! One [`Client`] wraps one TCP connection to one remote peer and speaks
//! the wire protocol over it: the initial handshake, then length-prefixed
//! messages. TCP does not preserve message boundaries, so every read loops
//! with `read_exact` until the frame is complete.
//!
//! The session tracks the four standard connection flags. Both sides start
//! choking and not interested:
//!
//! - `am_choking` / `am_interested`: our side of the relationship
//! - `peer_choking` / `peer_interested`: the peer's side
//!
//! It also remembers the peer's advertised bitfield, one bit per piece with
//! bit 7 of byte 0 standing for piece 0.

use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use byteorder::{BigEndian, ReadBytesExt};

use crate::handshake::{Handshake, HANDSHAKE_LEN};
use crate::message::{self, Message, WireError, MAX_FRAME_LEN, MESSAGE_KEEPALIVE};
use crate::peer::PeerAddr;

/// Deadline for opening the TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Socket deadline while exchanging control frames.
pub const CONTROL_TIMEOUT_SECS: u64 = 10;
/// Socket deadline while block transfers are expected.
pub const BLOCK_TIMEOUT_SECS: u64 = 20;

/// Choke and interest flags for one connection.
#[derive(Debug, Clone, Copy)]
pub struct StateFlags {
    /// We are refusing to serve the peer's requests
    pub am_choking: bool,
    /// We want pieces from the peer
    pub am_interested: bool,
    /// The peer is refusing to serve our requests
    pub peer_choking: bool,
    /// The peer wants pieces from us
    pub peer_interested: bool,
}

impl Default for StateFlags {
    fn default() -> StateFlags {
        StateFlags {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// The peer's advertised piece bitmap, MSB first within each byte.
#[derive(Debug, Default, Clone)]
pub struct Bitfield(Vec<u8>);

impl Bitfield {
    /// Whether the peer ever advertised any bits.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check one piece's bit. Indexes past the bitmap read as absent.
    pub fn has_piece(&self, index: u32) -> bool {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;
        match self.0.get(byte_index) {
            Some(byte) => byte >> (7 - offset) & 1 != 0,
            None => false,
        }
    }

    /// Mark one piece as available, growing the bitmap if needed.
    pub fn set_piece(&mut self, index: u32) {
        let byte_index = (index / 8) as usize;
        let offset = index % 8;
        if byte_index >= self.0.len() {
            self.0.resize(byte_index + 1, 0);
        }
        self.0[byte_index] |= 1 << (7 - offset);
    }
}

impl From<Vec<u8>> for Bitfield {
    fn from(bytes: Vec<u8>) -> Bitfield {
        Bitfield(bytes)
    }
}

/// A connected session with a remote peer.
pub struct Client {
    /// Network address of the remote peer
    addr: PeerAddr,
    /// This client's 20-byte identity
    peer_id: [u8; 20],
    /// SHA-1 of the torrent's info dictionary
    info_hash: [u8; 20],
    /// TCP stream carrying the session
    conn: TcpStream,
    /// Choke and interest state of both sides
    flags: StateFlags,
    /// Pieces the peer has advertised
    bitfield: Bitfield,
    /// The peer's identity, known once the handshake completes
    remote_peer_id: Option<[u8; 20]>,
}

impl Client {
    /// Open a TCP connection to the peer. The handshake is a separate step.
    pub fn connect(addr: PeerAddr, peer_id: [u8; 20], info_hash: [u8; 20]) -> Result<Client> {
        let conn = TcpStream::connect_timeout(&addr.socket_addr(), CONNECT_TIMEOUT)
            .with_context(|| format!("could not connect to peer {}", addr))?;

        info!("connected to peer {}", addr);

        Ok(Client {
            addr,
            peer_id,
            info_hash,
            conn,
            flags: StateFlags::default(),
            bitfield: Bitfield::default(),
            remote_peer_id: None,
        })
    }

    /// The peer's network address.
    pub fn addr(&self) -> PeerAddr {
        self.addr
    }

    /// The current choke/interest flags of the connection.
    pub fn flags(&self) -> StateFlags {
        self.flags
    }

    /// Whether the peer is currently refusing to serve our requests.
    pub fn is_choked(&self) -> bool {
        self.flags.peer_choking
    }

    /// The peer id received during the handshake, if one happened yet.
    pub fn remote_peer_id(&self) -> Option<[u8; 20]> {
        self.remote_peer_id
    }

    /// Apply one read/write deadline to the socket.
    pub fn set_connection_timeout(&self, secs: u64) -> Result<()> {
        self.conn
            .set_read_timeout(Some(Duration::from_secs(secs)))
            .context("could not set read timeout")?;
        self.conn
            .set_write_timeout(Some(Duration::from_secs(secs)))
            .context("could not set write timeout")?;
        Ok(())
    }

    /// Exchange handshakes and validate the peer's info hash against ours.
    ///
    /// Returns the peer's id. A hash mismatch is fatal for the session: the
    /// peer is serving a different torrent.
    pub fn handshake(&mut self) -> Result<[u8; 20]> {
        let ours = Handshake::new(self.info_hash, self.peer_id);
        self.conn
            .write_all(&ours.serialize())
            .with_context(|| format!("could not send handshake to peer {}", self.addr))?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        self.conn
            .read_exact(&mut buf)
            .with_context(|| format!("could not read handshake from peer {}", self.addr))?;

        let theirs = Handshake::parse(&buf)
            .with_context(|| format!("invalid handshake from peer {}", self.addr))?;
        if theirs.info_hash != self.info_hash {
            return Err(anyhow!("peer {} answered with a different info hash", self.addr));
        }

        debug!("handshake complete with peer {}", self.addr);
        self.remote_peer_id = Some(theirs.peer_id);

        Ok(theirs.peer_id)
    }

    /// Read the next frame off the wire.
    ///
    /// Keep-alives come back with the keep-alive marker id. Frames with an
    /// unknown id are read to their declared length and handed to the
    /// caller to discard, which keeps the stream correctly framed.
    pub fn read_message(&mut self) -> Result<Message> {
        let mut header = [0u8; 5];
        self.conn
            .read_exact(&mut header[..4])
            .with_context(|| format!("could not read message length from peer {}", self.addr))?;

        let length = Cursor::new(&header[..4]).read_u32::<BigEndian>()? as usize;
        if length == 0 {
            debug!("keep-alive from peer {}", self.addr);
            return Ok(Message::new(MESSAGE_KEEPALIVE));
        }
        if length > MAX_FRAME_LEN {
            return Err(anyhow!("peer {} declared an oversized frame", self.addr));
        }

        self.conn
            .read_exact(&mut header[4..5])
            .with_context(|| format!("could not read message id from peer {}", self.addr))?;

        let body_len = match message::parse_header(&header) {
            Ok((_, body_len)) => body_len,
            Err(WireError::UnknownId(id)) => {
                debug!("unknown message id {} from peer {}", id, self.addr);
                length - 1
            }
            Err(e) => return Err(e).context("invalid frame header"),
        };

        let mut payload = vec![0u8; body_len];
        self.conn
            .read_exact(&mut payload)
            .with_context(|| format!("could not read message body from peer {}", self.addr))?;

        Ok(Message::new_with_payload(header[4], payload))
    }

    fn send(&mut self, message: Message) -> Result<()> {
        self.conn
            .write_all(&message.serialize())
            .with_context(|| format!("could not send message to peer {}", self.addr))
    }

    /// Declare interest in the peer's pieces.
    pub fn send_interested(&mut self) -> Result<()> {
        debug!("sending INTERESTED to peer {}", self.addr);
        self.flags.am_interested = true;
        self.send(Message::interested())
    }

    /// Ask for one block of one piece.
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        debug!(
            "requesting piece {} [{}..{}] from peer {}",
            index,
            begin,
            begin + length,
            self.addr
        );
        self.send(Message::request(index, begin, length))
    }

    /// Tell the peer we now have a verified piece.
    pub fn send_have(&mut self, index: u32) -> Result<()> {
        debug!("sending HAVE {} to peer {}", index, self.addr);
        self.send(Message::have(index))
    }

    /// Record a CHOKE from the peer; requests will go unanswered until it
    /// unchokes us again.
    pub fn on_choke(&mut self) {
        debug!("peer {} choked us", self.addr);
        self.flags.peer_choking = true;
    }

    /// Record an INTERESTED from the peer.
    pub fn on_interested(&mut self) {
        self.flags.peer_interested = true;
    }

    /// Record a NOT INTERESTED from the peer.
    pub fn on_not_interested(&mut self) {
        self.flags.peer_interested = false;
    }

    /// Record an UNCHOKE from the peer; requests may now be served.
    pub fn on_unchoke(&mut self) {
        debug!("peer {} unchoked us", self.addr);
        self.flags.peer_choking = false;
    }

    /// Replace the peer's piece bitmap with a received BITFIELD payload.
    pub fn set_bitfield(&mut self, bytes: Vec<u8>) {
        self.bitfield = Bitfield::from(bytes);
    }

    /// Whether the peer ever advertised a bitfield.
    pub fn has_bitfield(&self) -> bool {
        !self.bitfield.is_empty()
    }

    /// Whether the peer claims to have a piece.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Mark a piece the peer announced through a HAVE message.
    pub fn set_piece(&mut self, index: u32) {
        self.bitfield.set_piece(index);
    }
}
