//! # Torrent Metainfo
//!
//! Parses a single-file `.torrent` into an immutable [`Metainfo`] record.
//! The info hash is the SHA-1 of the raw `info` dictionary bytes as they
//! appear in the file, taken from the span the bencode decoder reports.

use std::fs;
use std::path::Path;

use boring::sha::Sha1;
use thiserror::Error;

use crate::bencode::{self, BencodeError, Value};

/// Size of a SHA-1 digest in bytes.
pub const SHA1_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("could not read torrent file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Bencode(#[from] BencodeError),
    #[error("missing field `{0}` in metainfo")]
    MissingField(&'static str),
    #[error("field `{0}` has an invalid type or value")]
    BadType(&'static str),
    #[error("`pieces` length does not match the torrent geometry")]
    BadLength,
}

/// Everything the client needs to know about a torrent, parsed once and
/// shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Tracker URL for peer discovery
    pub announce: String,
    /// 20-byte SHA-1 of the raw bencoded `info` dictionary
    pub info_hash: [u8; SHA1_LEN],
    /// Size of each piece in bytes (except possibly the last)
    pub piece_length: u32,
    /// Total payload size in bytes
    pub total_length: u64,
    /// One 20-byte SHA-1 digest per piece, in piece order
    pub piece_hashes: Vec<[u8; SHA1_LEN]>,
    /// Suggested output filename
    pub name: String,
}

impl Metainfo {
    /// Read and parse a torrent file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Metainfo, MetainfoError> {
        let buf = fs::read(path)?;
        Self::from_bytes(&buf)
    }

    /// Parse torrent metainfo from its bencoded bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Metainfo, MetainfoError> {
        let root = bencode::decode(data)?;

        let announce = root
            .get(b"announce")
            .ok_or(MetainfoError::MissingField("announce"))?
            .as_str()
            .ok_or(MetainfoError::BadType("announce"))?
            .to_string();

        let info = root.get(b"info").ok_or(MetainfoError::MissingField("info"))?;
        if info.as_dict().is_none() {
            return Err(MetainfoError::BadType("info"));
        }

        let total_length = info
            .get(b"length")
            .ok_or(MetainfoError::MissingField("length"))?
            .as_int()
            .filter(|&n| n > 0)
            .ok_or(MetainfoError::BadType("length"))? as u64;

        let piece_length = info
            .get(b"piece length")
            .ok_or(MetainfoError::MissingField("piece length"))?
            .as_int()
            .filter(|&n| n > 0 && n <= u32::MAX as i64)
            .ok_or(MetainfoError::BadType("piece length"))? as u32;

        let pieces = info
            .get(b"pieces")
            .ok_or(MetainfoError::MissingField("pieces"))?
            .as_bytes()
            .ok_or(MetainfoError::BadType("pieces"))?;
        if pieces.is_empty() || pieces.len() % SHA1_LEN != 0 {
            return Err(MetainfoError::BadLength);
        }
        let piece_hashes: Vec<[u8; SHA1_LEN]> = pieces
            .chunks_exact(SHA1_LEN)
            .map(|chunk| {
                let mut hash = [0u8; SHA1_LEN];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        // One hash per piece, where piece count is the rounded-up division.
        if piece_hashes.len() as u64 != total_length.div_ceil(piece_length as u64) {
            return Err(MetainfoError::BadLength);
        }

        let name = info
            .get(b"name")
            .and_then(Value::as_bytes)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();

        let span = bencode::dict_value_span(data, b"info")?
            .ok_or(MetainfoError::MissingField("info"))?;
        let mut hasher = Sha1::new();
        hasher.update(&data[span]);
        let info_hash = hasher.finish();

        Ok(Metainfo {
            announce,
            info_hash,
            piece_length,
            total_length,
            piece_hashes,
            name,
        })
    }

    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Expected SHA-1 digest of one piece.
    pub fn piece_hash(&self, index: u32) -> [u8; SHA1_LEN] {
        self.piece_hashes[index as usize]
    }

    /// Byte offset of a piece within the payload.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }

    /// Length of a piece. Every piece is `piece_length` bytes except the
    /// last, which holds whatever remains of the payload.
    pub fn piece_len(&self, index: u32) -> u32 {
        let begin = self.piece_offset(index);
        let end = (begin + self.piece_length as u64).min(self.total_length);
        (end - begin) as u32
    }
}
