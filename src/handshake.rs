//! # Peer Handshake
//!
//! The handshake is the first exchange on every peer connection and is a
//! fixed 68-byte frame:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte, always 19
//! - **pstr**: the 19 bytes `"BitTorrent protocol"`
//! - **reserved**: 8 bytes, all zero
//! - **info_hash**: 20 bytes identifying the torrent
//! - **peer_id**: 20 opaque bytes identifying the peer
//!
//! A peer answering with a different info hash is talking about a different
//! torrent and the connection must be dropped.

use crate::message::WireError;

/// Protocol identifier carried in every handshake.
pub const PROTOCOL_ID: &[u8] = b"BitTorrent protocol";

/// Total size of a handshake frame.
pub const HANDSHAKE_LEN: usize = 68;

/// The variable fields of a handshake; the protocol identifier and the
/// reserved block are fixed for every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// 20-byte SHA-1 of the torrent's info dictionary
    pub info_hash: [u8; 20],
    /// 20 opaque bytes identifying the sending peer
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Build a handshake for one torrent and one local identity.
    ///
    /// # Arguments
    ///
    /// * `info_hash` - SHA-1 of the torrent's info dictionary.
    /// * `peer_id` - This client's 20-byte identity.
    ///
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake { info_hash, peer_id }
    }

    /// Serialize into the 68-byte wire form. The reserved block stays zero.
    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_ID.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_ID);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parse a received handshake, validating the protocol identifier.
    pub fn parse(buf: &[u8]) -> Result<Handshake, WireError> {
        if buf.len() < HANDSHAKE_LEN {
            return Err(WireError::Incomplete);
        }
        if buf[0] as usize != PROTOCOL_ID.len() {
            return Err(WireError::Malformed("bad protocol length byte"));
        }
        if &buf[1..20] != PROTOCOL_ID {
            return Err(WireError::Malformed("unknown protocol identifier"));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Handshake { info_hash, peer_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let handshake = Handshake::new(*b"aabbccddeeffgghhiijj", *b"00112233445566778899");
        let bytes = handshake.serialize();

        assert_eq!(bytes.len(), HANDSHAKE_LEN);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL_ID);
        assert_eq!(&bytes[20..28], &[0u8; 8]);

        assert_eq!(Handshake::parse(&bytes).unwrap(), handshake);
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(Handshake::parse(&[0x13; 67]), Err(WireError::Incomplete));
    }

    #[test]
    fn rejects_foreign_protocols() {
        let mut bytes = Handshake::new([1; 20], [2; 20]).serialize();
        bytes[0] = 18;
        assert!(matches!(
            Handshake::parse(&bytes),
            Err(WireError::Malformed(_))
        ));

        let mut bytes = Handshake::new([1; 20], [2; 20]).serialize();
        bytes[5] ^= 0xFF;
        assert!(matches!(
            Handshake::parse(&bytes),
            Err(WireError::Malformed(_))
        ));
    }
}
