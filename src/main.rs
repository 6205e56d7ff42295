//! Command-line entry point.
//!
//! Each subcommand exercises one layer of the client, from the bencode
//! codec up to the full multi-peer download. Errors print to stderr and
//! exit non-zero; all diagnostics go through the logger (`RUST_LOG`).

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use marmot::bencode;
use marmot::client::Client;
use marmot::metainfo::Metainfo;
use marmot::peer::PeerAddr;
use marmot::torrent::Torrent;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A command-line BitTorrent download client, written in Rust."
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode {
        /// The bencoded value
        value: String,
    },
    /// Print the metainfo summary of a torrent
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
    /// Ask the tracker for peers and print one address per line
    Peers {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
    /// Handshake with a single peer and print its peer id
    Handshake {
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Peer address as <ip>:<port>
        peer: String,
    },
    /// Download one verified piece
    #[command(name = "download_piece")]
    DownloadPiece {
        /// Where to write the piece
        #[arg(short, long)]
        output: PathBuf,
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Zero-based piece index
        piece: u32,
    },
    /// Download the whole file
    Download {
        /// Where to write the file
        #[arg(short, long)]
        output: PathBuf,
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Decode { value } => {
            let decoded = bencode::decode(value.as_bytes())?;
            println!("{}", decoded.to_json());
        }
        Command::Info { torrent } => {
            let meta = Metainfo::from_file(&torrent)
                .with_context(|| format!("could not load torrent {}", torrent.display()))?;
            println!("Tracker URL: {}", meta.announce);
            println!("Length: {}", meta.total_length);
            println!("Info Hash: {}", hex::encode(meta.info_hash));
            println!("Piece Length: {}", meta.piece_length);
            println!("Piece Hashes:");
            for hash in &meta.piece_hashes {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { torrent } => {
            let torrent = Torrent::open(&torrent)?;
            for peer in torrent.request_peers()? {
                println!("{}", peer);
            }
        }
        Command::Handshake { torrent, peer } => {
            let torrent = Torrent::open(&torrent)?;
            let peer: PeerAddr = peer.parse().context("expected peer as <ip>:<port>")?;
            let mut client =
                Client::connect(peer, torrent.peer_id(), torrent.metainfo().info_hash)?;
            let peer_id = client.handshake()?;
            println!("Peer ID: {}", hex::encode(peer_id));
        }
        Command::DownloadPiece {
            output,
            torrent,
            piece,
        } => {
            let torrent = Torrent::open(&torrent)?;
            let peers = torrent.request_peers()?;
            let data = torrent.download_piece(&peers, piece)?;
            fs::write(&output, &data)
                .with_context(|| format!("could not write to {}", output.display()))?;
            println!("Piece {} downloaded to {}.", piece, output.display());
        }
        Command::Download { output, torrent } => {
            let opened = Torrent::open(&torrent)?;
            let peers = opened.request_peers()?;
            let data = opened.download(&peers)?;
            fs::write(&output, &data)
                .with_context(|| format!("could not write to {}", output.display()))?;
            println!("Downloaded {} to {}.", torrent.display(), output.display());
        }
    }

    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }

    // Exit success
    std::process::exit(0);
}
