//! Shared test fixtures: a deterministic torrent and an in-process peer
//! that serves it over real TCP sockets.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use boring::sha::Sha1;

use marmot::bencode::Value;
use marmot::handshake::{Handshake, HANDSHAKE_LEN};
use marmot::message::{
    Message, MESSAGE_BITFIELD, MESSAGE_CHOKE, MESSAGE_INTERESTED, MESSAGE_PIECE, MESSAGE_REQUEST,
    MESSAGE_UNCHOKE,
};
use marmot::metainfo::Metainfo;
use marmot::peer::PeerAddr;

pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finish()
}

/// A complete single-file torrent: payload, metainfo bytes and the parsed
/// record, all consistent with each other.
pub struct Fixture {
    pub payload: Vec<u8>,
    pub metainfo_bytes: Vec<u8>,
    pub meta: Metainfo,
}

pub fn build_fixture(piece_length: u32, total_length: usize) -> Fixture {
    let payload: Vec<u8> = (0..total_length).map(|i| (i * 31 % 251) as u8).collect();

    let mut hashes = Vec::new();
    for chunk in payload.chunks(piece_length as usize) {
        hashes.extend_from_slice(&sha1(chunk));
    }

    let mut info = BTreeMap::new();
    info.insert(b"length".to_vec(), Value::Int(total_length as i64));
    info.insert(b"name".to_vec(), Value::Bytes(b"fixture.bin".to_vec()));
    info.insert(b"piece length".to_vec(), Value::Int(piece_length as i64));
    info.insert(b"pieces".to_vec(), Value::Bytes(hashes));

    let mut root = BTreeMap::new();
    root.insert(
        b"announce".to_vec(),
        Value::Bytes(b"http://127.0.0.1:1/announce".to_vec()),
    );
    root.insert(b"info".to_vec(), Value::Dict(info));

    let metainfo_bytes = Value::Dict(root).encode();
    let meta = Metainfo::from_bytes(&metainfo_bytes).expect("fixture metainfo parses");

    Fixture {
        payload,
        metainfo_bytes,
        meta,
    }
}

/// Knobs for misbehaving fixture peers.
#[derive(Clone)]
pub struct PeerBehavior {
    /// Answer the handshake with a flipped info hash
    pub wrong_info_hash: bool,
    /// Advertise a full bitfield right after the handshake
    pub send_bitfield: bool,
    /// After serving this many blocks, send a choke (then an unchoke) and
    /// drop the request that triggered it
    pub choke_after: Option<u32>,
    /// Serve a corrupted block for this piece, once, on its first request
    pub corrupt_first_piece: Option<u32>,
}

impl Default for PeerBehavior {
    fn default() -> PeerBehavior {
        PeerBehavior {
            wrong_info_hash: false,
            send_bitfield: true,
            choke_after: None,
            corrupt_first_piece: None,
        }
    }
}

/// Start a peer serving the fixture on a fresh local port. The listener
/// runs on a background thread for the rest of the test process.
pub fn spawn_fixture_peer(fixture: &Fixture, behavior: PeerBehavior) -> PeerAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture peer");
    let addr = match listener.local_addr().expect("fixture peer addr") {
        SocketAddr::V4(v4) => PeerAddr::from(v4),
        SocketAddr::V6(_) => unreachable!("fixture peer binds v4"),
    };

    let payload = Arc::new(fixture.payload.clone());
    let info_hash = fixture.meta.info_hash;
    let piece_length = fixture.meta.piece_length;
    let piece_count = fixture.meta.piece_count();
    let corrupted = Arc::new(AtomicBool::new(false));

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let payload = Arc::clone(&payload);
            let behavior = behavior.clone();
            let corrupted = Arc::clone(&corrupted);
            thread::spawn(move || {
                let _ = serve_connection(
                    stream,
                    &payload,
                    info_hash,
                    piece_length,
                    piece_count,
                    &behavior,
                    &corrupted,
                );
            });
        }
    });

    addr
}

fn serve_connection(
    mut stream: TcpStream,
    payload: &[u8],
    info_hash: [u8; 20],
    piece_length: u32,
    piece_count: u32,
    behavior: &PeerBehavior,
    corrupted: &AtomicBool,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(30)))?;

    let mut incoming = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut incoming)?;
    assert!(Handshake::parse(&incoming).is_ok(), "client handshake parses");

    let mut reply_hash = info_hash;
    if behavior.wrong_info_hash {
        reply_hash[0] ^= 0xFF;
    }
    let reply = Handshake::new(reply_hash, *b"-FX0001-000000000000");
    stream.write_all(&reply.serialize())?;

    if behavior.send_bitfield {
        let mut bits = vec![0u8; (piece_count as usize + 7) / 8];
        for index in 0..piece_count {
            bits[(index / 8) as usize] |= 1 << (7 - index % 8);
        }
        stream.write_all(&Message::new_with_payload(MESSAGE_BITFIELD, bits).serialize())?;
    }

    let mut served = 0u32;
    let mut choke_sent = false;
    loop {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf)?;
        let frame_len = u32::from_be_bytes(len_buf) as usize;
        if frame_len == 0 {
            continue;
        }
        let mut body = vec![0u8; frame_len];
        stream.read_exact(&mut body)?;

        match body[0] {
            MESSAGE_INTERESTED => {
                stream.write_all(&Message::new(MESSAGE_UNCHOKE).serialize())?;
            }
            MESSAGE_REQUEST => {
                let index = u32::from_be_bytes(body[1..5].try_into().unwrap());
                let begin = u32::from_be_bytes(body[5..9].try_into().unwrap());
                let length = u32::from_be_bytes(body[9..13].try_into().unwrap());

                if let Some(limit) = behavior.choke_after {
                    if !choke_sent && served >= limit {
                        choke_sent = true;
                        stream.write_all(&Message::new(MESSAGE_CHOKE).serialize())?;
                        stream.write_all(&Message::new(MESSAGE_UNCHOKE).serialize())?;
                        continue;
                    }
                }

                let offset = index as usize * piece_length as usize + begin as usize;
                let mut block = payload[offset..offset + length as usize].to_vec();
                if behavior.corrupt_first_piece == Some(index)
                    && !corrupted.swap(true, Ordering::SeqCst)
                {
                    for byte in &mut block {
                        *byte = !*byte;
                    }
                }

                let mut piece_payload = index.to_be_bytes().to_vec();
                piece_payload.extend_from_slice(&begin.to_be_bytes());
                piece_payload.extend_from_slice(&block);
                stream
                    .write_all(&Message::new_with_payload(MESSAGE_PIECE, piece_payload).serialize())?;
                served += 1;
            }
            // haves, keep-alives and anything else are irrelevant here
            _ => {}
        }
    }
}
