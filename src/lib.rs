//! # Marmot BitTorrent Client
//!
//! A command-line BitTorrent download client written in Rust.
//!
//! ## Features
//!
//! - Bencode codec with raw-span access for info-hash computation
//! - HTTP tracker discovery with compact peer lists
//! - Peer wire protocol: handshake, framing, choke/interest management
//! - Multi-peer concurrent downloading with per-piece SHA-1 verification
//! - Progress tracking with a visual progress bar
//!
//! ## Architecture
//!
//! The client follows a multi-threaded architecture:
//!
//! - **Main thread**: Parses arguments, loads the torrent, coordinates the download
//! - **Worker threads**: Each owns one TCP connection to one peer
//! - **Channels**: Distribute piece work and collect verified results

#[macro_use]
extern crate log;

pub mod bencode;
pub mod client;
pub mod handshake;
pub mod message;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;
pub mod worker;
