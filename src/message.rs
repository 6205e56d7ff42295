//! # Peer Wire Messages
//!
//! Every post-handshake message shares one frame layout:
//!
//! ```text
//! <length: u32 big-endian><id: u8><payload: length-1 bytes>
//! ```
//!
//! A length of zero is a keep-alive and carries no id byte.
//!
//! | ID | Name           | Payload                          |
//! |----|----------------|----------------------------------|
//! | 0  | CHOKE          | empty                            |
//! | 1  | UNCHOKE        | empty                            |
//! | 2  | INTERESTED     | empty                            |
//! | 3  | NOT INTERESTED | empty                            |
//! | 4  | HAVE           | piece index                      |
//! | 5  | BITFIELD       | piece bitmap, MSB first          |
//! | 6  | REQUEST        | index, begin, length             |
//! | 7  | PIECE          | index, begin, block bytes        |
//! | 8  | CANCEL         | index, begin, length             |

use thiserror::Error;

pub type MessageId = u8;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
pub const MESSAGE_CANCEL: MessageId = 8;
/// Internal marker for a keep-alive frame, which has no id byte on the wire.
pub const MESSAGE_KEEPALIVE: MessageId = 255;

/// Upper bound on a frame's declared length: one id byte plus a full block
/// payload, with headroom for a bitfield of a very large torrent.
pub const MAX_FRAME_LEN: usize = 32 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame is incomplete")]
    Incomplete,
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("unknown message id {0}")]
    UnknownId(u8),
}

/// One peer wire message, already stripped of its length prefix.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type identifier
    pub id: MessageId,
    /// Message payload bytes, possibly empty
    pub payload: Vec<u8>,
}

/// One block carried by a PIECE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceBlock {
    /// Zero-based index of the piece the block belongs to
    pub index: u32,
    /// Byte offset of the block within its piece
    pub begin: u32,
    /// The block contents
    pub block: Vec<u8>,
}

impl Message {
    /// Build a message with no payload.
    ///
    /// # Arguments
    ///
    /// * `id` - The type of the message.
    ///
    pub fn new(id: MessageId) -> Message {
        Message { id, payload: vec![] }
    }

    /// Build a message carrying a payload.
    ///
    /// # Arguments
    ///
    /// * `id` - The type of the message.
    /// * `payload` - The content of the message.
    ///
    pub fn new_with_payload(id: MessageId, payload: Vec<u8>) -> Message {
        Message { id, payload }
    }

    /// An INTERESTED message.
    pub fn interested() -> Message {
        Message::new(MESSAGE_INTERESTED)
    }

    /// A HAVE message announcing one piece.
    pub fn have(index: u32) -> Message {
        Message::new_with_payload(MESSAGE_HAVE, index.to_be_bytes().to_vec())
    }

    /// A REQUEST message asking for one block of one piece.
    pub fn request(index: u32, begin: u32, length: u32) -> Message {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(&begin.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());
        Message::new_with_payload(MESSAGE_REQUEST, payload)
    }

    /// Serialize into the length-prefixed wire form.
    pub fn serialize(&self) -> Vec<u8> {
        if self.id == MESSAGE_KEEPALIVE {
            return vec![0u8; 4];
        }
        let mut buf = Vec::with_capacity(5 + self.payload.len());
        buf.extend_from_slice(&((1 + self.payload.len()) as u32).to_be_bytes());
        buf.push(self.id);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Parse a frame header.
///
/// Needs the 4-byte length prefix plus, for non-keep-alive frames, the id
/// byte. Returns the message id and the number of payload bytes that follow
/// the id on the wire.
pub fn parse_header(buf: &[u8]) -> Result<(MessageId, usize), WireError> {
    if buf.len() < 4 {
        return Err(WireError::Incomplete);
    }
    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length == 0 {
        return Ok((MESSAGE_KEEPALIVE, 0));
    }
    if length > MAX_FRAME_LEN {
        return Err(WireError::Malformed("frame length out of range"));
    }
    if buf.len() < 5 {
        return Err(WireError::Incomplete);
    }
    let id = buf[4];
    if id > MESSAGE_CANCEL {
        return Err(WireError::UnknownId(id));
    }
    Ok((id, length - 1))
}

/// Parse the payload of a PIECE message.
pub fn parse_piece(body: &[u8]) -> Result<PieceBlock, WireError> {
    if body.len() < 8 {
        return Err(WireError::Incomplete);
    }
    Ok(PieceBlock {
        index: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
        begin: u32::from_be_bytes([body[4], body[5], body[6], body[7]]),
        block: body[8..].to_vec(),
    })
}

/// Parse the payload of a HAVE message.
pub fn parse_have(body: &[u8]) -> Result<u32, WireError> {
    if body.len() != 4 {
        return Err(WireError::Malformed("have payload must be 4 bytes"));
    }
    Ok(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
}
