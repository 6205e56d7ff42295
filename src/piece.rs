//! # Piece Work Units
//!
//! Work units exchanged between the scheduler and peer workers. A piece is
//! the unit of verification; it travels to a worker as a [`PieceWork`] and
//! comes back, hash-checked, as a [`PieceResult`].
//!
//! ## Download State Tracking
//!
//! `PieceWork` carries the assembly buffer plus three counters:
//!
//! - `requests`: block requests currently outstanding on the wire
//! - `requested`: bytes requested so far
//! - `downloaded`: bytes received so far
//!
//! Pieces have a fixed length, so completion is detected by comparing
//! `downloaded` against `length` rather than by an end marker.

use crate::metainfo::SHA1_LEN;

/// One piece waiting to be downloaded, together with its assembly buffer
/// and request bookkeeping.
#[derive(Debug, Clone)]
pub struct PieceWork {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// Expected SHA-1 of the piece contents
    pub hash: [u8; SHA1_LEN],
    /// Total length of the piece in bytes
    pub length: u32,
    /// Assembly buffer, filled block by block at each block's offset
    pub data: Vec<u8>,
    /// Requests currently outstanding on the wire
    pub requests: u32,
    /// Bytes requested so far
    pub requested: u32,
    /// Bytes received so far
    pub downloaded: u32,
}

/// A verified piece on its way back to the scheduler.
#[derive(Debug, Clone)]
pub struct PieceResult {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// Total length of the piece in bytes
    pub length: u32,
    /// Complete, hash-checked piece contents
    pub data: Vec<u8>,
}

impl PieceWork {
    /// Build a fresh work unit for one piece.
    ///
    /// The assembly buffer is allocated zeroed at the piece's full length
    /// and all counters start at zero.
    ///
    /// # Arguments
    ///
    /// * `index` - Zero-based piece index in the torrent.
    /// * `hash` - Expected SHA-1 digest of the piece.
    /// * `length` - Size of the piece in bytes.
    ///
    pub fn new(index: u32, hash: [u8; SHA1_LEN], length: u32) -> PieceWork {
        PieceWork {
            index,
            hash,
            length,
            data: vec![0; length as usize],
            requests: 0,
            requested: 0,
            downloaded: 0,
        }
    }
}

impl PieceResult {
    /// Wrap a completed piece for the trip back to the scheduler.
    ///
    /// # Arguments
    ///
    /// * `index` - Zero-based piece index in the torrent.
    /// * `length` - Size of the piece in bytes.
    /// * `data` - The verified piece contents.
    ///
    pub fn new(index: u32, length: u32, data: Vec<u8>) -> PieceResult {
        PieceResult { index, length, data }
    }
}
