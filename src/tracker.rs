//! # Tracker Client
//!
//! Announces to the HTTP tracker named by the metainfo and parses the peer
//! list out of its bencoded response. The `info_hash` and `peer_id` query
//! parameters are raw 20-byte values, so they are percent-encoded byte by
//! byte instead of going through a text-oriented query builder.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::bencode::{self, BencodeError};
use crate::metainfo::Metainfo;
use crate::peer::{self, PeerAddr};

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid announce url: {0}")]
    Url(#[from] url::ParseError),
    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tracker returned status {0}")]
    Status(u16),
    #[error("could not decode tracker response: {0}")]
    Bencode(#[from] BencodeError),
    #[error("tracker failure: {0}")]
    Failure(String),
    #[error("tracker response has no `peers`")]
    MissingPeers,
    #[error("compact peers blob length {0} is not a multiple of 6")]
    BadPeers(usize),
}

/// Ask the tracker for peers.
pub fn announce(
    meta: &Metainfo,
    peer_id: &[u8; 20],
    port: u16,
) -> Result<Vec<PeerAddr>, TrackerError> {
    let url = build_announce_url(meta, peer_id, port)?;
    debug!("querying tracker: {}", url);

    let client = reqwest::blocking::Client::builder()
        .timeout(ANNOUNCE_TIMEOUT)
        .build()?;
    let response = client.get(&url).send()?;

    let status = response.status();
    if !status.is_success() {
        return Err(TrackerError::Status(status.as_u16()));
    }

    let body = response.bytes()?;
    parse_response(&body)
}

fn build_announce_url(
    meta: &Metainfo,
    peer_id: &[u8; 20],
    port: u16,
) -> Result<String, TrackerError> {
    let base = Url::parse(&meta.announce)?;

    let mut url = base.to_string();
    url.push(if base.query().is_some() { '&' } else { '?' });
    url.push_str(&format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        percent_encode(&meta.info_hash),
        percent_encode(peer_id),
        port,
        meta.total_length,
    ));

    Ok(url)
}

/// Percent-encode raw bytes, letting unreserved ASCII through as-is.
fn percent_encode(data: &[u8]) -> String {
    let mut encoded = String::with_capacity(data.len() * 3);
    for &byte in data {
        match byte {
            b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn parse_response(data: &[u8]) -> Result<Vec<PeerAddr>, TrackerError> {
    let value = bencode::decode(data)?;

    if let Some(reason) = value.get(b"failure reason") {
        let reason = reason
            .as_bytes()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_else(|| "unspecified".to_string());
        return Err(TrackerError::Failure(reason));
    }

    if let Some(interval) = value.get(b"interval").and_then(|v| v.as_int()) {
        debug!("tracker suggests a {}s announce interval", interval);
    }

    let peers = value
        .get(b"peers")
        .ok_or(TrackerError::MissingPeers)?
        .as_bytes()
        .ok_or(TrackerError::MissingPeers)?;

    peer::from_compact(peers)
}
