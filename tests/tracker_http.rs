//! Tracker announces against a minimal in-process HTTP server.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

use marmot::bencode::Value;
use marmot::metainfo::Metainfo;
use marmot::tracker::{self, TrackerError};

fn sample_meta(announce: String) -> Metainfo {
    Metainfo {
        announce,
        info_hash: *b"\x01\x02\x03aZ~\xff\x00\x10\x20\x30\x40\x50\x60\x70\x80\x90\xa0\xb0\xc0",
        piece_length: 256,
        total_length: 600,
        piece_hashes: vec![[0u8; 20]; 3],
        name: "sample.bin".to_string(),
    }
}

/// Serve exactly one HTTP request with the given body, handing the request
/// head back through a channel.
fn spawn_one_shot_tracker(body: Vec<u8>) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let announce = format!("http://{}/announce", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        tx.send(String::from_utf8_lossy(&head).into_owned()).unwrap();

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(header.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
    });

    (announce, rx)
}

#[test]
fn announces_and_parses_compact_peers() {
    let mut root = BTreeMap::new();
    root.insert(b"interval".to_vec(), Value::Int(1800));
    root.insert(
        b"peers".to_vec(),
        Value::Bytes(vec![
            10, 0, 0, 1, 0x1A, 0xE1, // 10.0.0.1:6881
            192, 168, 1, 2, 0x1A, 0xE2, // 192.168.1.2:6882
        ]),
    );
    let (announce, request_rx) = spawn_one_shot_tracker(Value::Dict(root).encode());

    let meta = sample_meta(announce);
    let peers = tracker::announce(&meta, b"00112233445566778899", 6881).unwrap();

    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0].to_string(), "10.0.0.1:6881");
    assert_eq!(peers[1].to_string(), "192.168.1.2:6882");

    let request = request_rx.recv().unwrap();
    let request_line = request.lines().next().unwrap();
    assert!(request_line.starts_with("GET /announce?info_hash=%01%02%03aZ~%FF%00"));
    assert!(request_line.contains("&peer_id=00112233445566778899"));
    assert!(request_line.contains("&port=6881"));
    assert!(request_line.contains("&uploaded=0&downloaded=0&left=600&compact=1"));
}

#[test]
fn surfaces_the_tracker_failure_reason() {
    let mut root = BTreeMap::new();
    root.insert(
        b"failure reason".to_vec(),
        Value::Bytes(b"unregistered torrent".to_vec()),
    );
    let (announce, _request_rx) = spawn_one_shot_tracker(Value::Dict(root).encode());

    let meta = sample_meta(announce);
    match tracker::announce(&meta, b"00112233445566778899", 6881) {
        Err(TrackerError::Failure(reason)) => assert_eq!(reason, "unregistered torrent"),
        other => panic!("expected a tracker failure, got {:?}", other.map(|_| ())),
    }
}
