//! # Peer Worker
//!
//! One worker drives one peer connection through its whole life: connect,
//! handshake, wait for the peer to unchoke us, then serve piece assignments
//! until the work runs out or the connection dies. Workers never touch the
//! output file; verified pieces travel back to the scheduler over a channel,
//! and failed pieces go back onto the work channel so another worker can
//! pick them up.

use std::io::Write;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use boring::sha::Sha1;
use crossbeam_channel::{Receiver, Sender};

use crate::client::{Client, BLOCK_TIMEOUT_SECS, CONTROL_TIMEOUT_SECS};
use crate::message::{
    self, MESSAGE_BITFIELD, MESSAGE_CHOKE, MESSAGE_HAVE, MESSAGE_INTERESTED, MESSAGE_KEEPALIVE,
    MESSAGE_NOT_INTERESTED, MESSAGE_PIECE, MESSAGE_UNCHOKE,
};
use crate::peer::PeerAddr;
use crate::piece::{PieceResult, PieceWork};

/// Largest block a request may ask for. Peers commonly reject or ignore
/// anything bigger.
pub const BLOCK_SIZE_MAX: u32 = 16384;

/// Cap on pipelined block requests per connection.
pub const NB_REQUESTS_MAX: u32 = 5;

/// Lifecycle of one peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Opening the TCP connection
    Connecting,
    /// Exchanging and validating handshakes
    Handshaking,
    /// Interest declared, consuming frames until the peer unchokes us
    AwaitingUnchoke,
    /// Idle, able to accept a piece assignment
    Ready,
    /// Fetching the blocks of one piece
    Downloading(u32),
    /// Connection is gone; terminal
    Failed,
}

/// Why a piece attempt ended without a verified piece.
enum PieceFailure {
    /// The peer choked us mid-piece; the connection is still usable.
    Choked,
    /// The connection is no longer usable.
    Connection(anyhow::Error),
}

/// Downloads pieces from a single peer.
pub struct Worker {
    /// Address of the peer this worker owns
    peer: PeerAddr,
    /// This client's 20-byte identity
    peer_id: [u8; 20],
    /// SHA-1 of the torrent's info dictionary
    info_hash: [u8; 20],
    /// Where the connection currently is in its lifecycle
    state: WorkerState,
    /// Both ends of the shared piece queue
    work_chan: (Sender<PieceWork>, Receiver<PieceWork>),
    /// Delivery channel for verified pieces
    result_tx: Sender<PieceResult>,
}

impl Worker {
    /// Set up a worker for one peer.
    ///
    /// # Arguments
    ///
    /// * `peer` - Address of the peer this worker owns.
    /// * `peer_id` - This client's 20-byte identity.
    /// * `info_hash` - SHA-1 of the torrent's info dictionary.
    /// * `work_chan` - Both ends of the shared piece queue; the sender is
    ///   used to return failed pieces.
    /// * `result_tx` - Where verified pieces are delivered.
    ///
    pub fn new(
        peer: PeerAddr,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        work_chan: (Sender<PieceWork>, Receiver<PieceWork>),
        result_tx: Sender<PieceResult>,
    ) -> Worker {
        Worker {
            peer,
            peer_id,
            info_hash,
            state: WorkerState::Connecting,
            work_chan,
            result_tx,
        }
    }

    fn transition(&mut self, next: WorkerState) {
        debug!("peer {}: {:?} -> {:?}", self.peer, self.state, next);
        self.state = next;
    }

    /// Drive the connection until the work runs out or it fails. Meant to
    /// run on its own thread; all failures end here.
    pub fn run(&mut self) {
        let mut client = match self.establish() {
            Ok(client) => client,
            Err(e) => {
                debug!("peer {}: giving up: {:#}", self.peer, e);
                self.transition(WorkerState::Failed);
                return;
            }
        };

        if let Err(e) = self.serve(&mut client) {
            debug!("peer {}: connection lost: {:#}", self.peer, e);
            self.transition(WorkerState::Failed);
        }
    }

    /// Open the socket, exchange handshakes, declare interest and wait for
    /// the unchoke. Ends in Ready on success.
    fn establish(&mut self) -> Result<Client> {
        let mut client = Client::connect(self.peer, self.peer_id, self.info_hash)?;
        client.set_connection_timeout(CONTROL_TIMEOUT_SECS)?;

        self.transition(WorkerState::Handshaking);
        client.handshake()?;

        self.transition(WorkerState::AwaitingUnchoke);
        client.send_interested()?;
        wait_for_unchoke(&mut client)?;

        self.transition(WorkerState::Ready);
        Ok(client)
    }

    /// Serve piece assignments until the scheduler goes away.
    fn serve(&mut self, client: &mut Client) -> Result<()> {
        loop {
            let mut piece = match self.work_chan.1.recv() {
                Ok(piece) => piece,
                Err(_) => {
                    info!("peer {}: no more work", self.peer);
                    return Ok(());
                }
            };

            // A peer that advertised a bitfield without this piece cannot
            // serve it; put it back for someone else. A peer that sent no
            // bitfield at all gets the benefit of the doubt.
            if client.has_bitfield() && !client.has_piece(piece.index) {
                self.requeue(piece)?;
                // Let another worker grab it instead of spinning on it.
                thread::sleep(Duration::from_millis(10));
                continue;
            }

            self.transition(WorkerState::Downloading(piece.index));
            match fetch_piece(client, &mut piece) {
                Ok(()) => {}
                Err(PieceFailure::Choked) => {
                    warn!("peer {} choked us mid-piece {}", self.peer, piece.index);
                    self.requeue(piece)?;
                    self.transition(WorkerState::Ready);
                    continue;
                }
                Err(PieceFailure::Connection(e)) => {
                    self.requeue(piece)?;
                    return Err(e);
                }
            }

            if !verify_integrity(&piece) {
                warn!("piece {} failed its hash check, rescheduling", piece.index);
                self.requeue(piece)?;
                self.transition(WorkerState::Ready);
                continue;
            }
            info!("piece {} verified", piece.index);

            if let Err(e) = client.send_have(piece.index) {
                debug!("peer {}: could not send HAVE: {:#}", self.peer, e);
            }

            let result = PieceResult::new(piece.index, piece.length, piece.data);
            if self.result_tx.send(result).is_err() {
                // Scheduler is gone; the download finished or was abandoned.
                return Ok(());
            }
            self.transition(WorkerState::Ready);
        }
    }

    /// Return a piece to the work channel with a fresh assembly buffer.
    fn requeue(&self, piece: PieceWork) -> Result<()> {
        self.work_chan
            .0
            .send(PieceWork::new(piece.index, piece.hash, piece.length))
            .map_err(|_| anyhow!("work channel closed"))
    }
}

/// Download exactly one piece from one peer and write it to `out`.
///
/// This is the smallest useful unit of the engine: it walks the same
/// connect/handshake/unchoke sequence as a worker, fetches a single piece,
/// verifies it and exits.
pub fn download_piece_from(
    peer: PeerAddr,
    peer_id: [u8; 20],
    info_hash: [u8; 20],
    mut piece: PieceWork,
    out: &mut dyn Write,
) -> Result<()> {
    let mut client = Client::connect(peer, peer_id, info_hash)?;
    client.set_connection_timeout(CONTROL_TIMEOUT_SECS)?;
    client.handshake()?;
    client.send_interested()?;
    wait_for_unchoke(&mut client)?;

    match fetch_piece(&mut client, &mut piece) {
        Ok(()) => {}
        Err(PieceFailure::Choked) => {
            return Err(anyhow!("peer {} choked us before the piece completed", peer));
        }
        Err(PieceFailure::Connection(e)) => return Err(e),
    }

    if !verify_integrity(&piece) {
        return Err(anyhow!("piece {} failed its hash check", piece.index));
    }

    out.write_all(&piece.data)?;
    Ok(())
}

/// Consume frames until the peer unchokes us.
///
/// Bitfields, haves, chokes and keep-alives may all arrive first and are
/// folded into the session state. An unchoke with no preceding bitfield is
/// legal. Anything else this early is a protocol violation.
fn wait_for_unchoke(client: &mut Client) -> Result<()> {
    loop {
        let message = client.read_message()?;
        match message.id {
            MESSAGE_UNCHOKE => {
                client.on_unchoke();
                return Ok(());
            }
            MESSAGE_BITFIELD => client.set_bitfield(message.payload),
            MESSAGE_HAVE => client.set_piece(message::parse_have(&message.payload)?),
            MESSAGE_CHOKE => client.on_choke(),
            MESSAGE_KEEPALIVE => {}
            id => {
                return Err(anyhow!(
                    "unexpected message id {} while waiting for unchoke",
                    id
                ))
            }
        }
    }
}

/// Fetch every block of one piece into its assembly buffer.
///
/// Requests go out in a small pipeline; completion is by byte count since
/// pieces have a fixed length. A choke from the peer aborts the attempt but
/// keeps the connection; read or write failures end the connection.
fn fetch_piece(client: &mut Client, piece: &mut PieceWork) -> Result<(), PieceFailure> {
    client
        .set_connection_timeout(BLOCK_TIMEOUT_SECS)
        .map_err(PieceFailure::Connection)?;

    piece.requests = 0;
    piece.requested = 0;
    piece.downloaded = 0;

    while piece.downloaded < piece.length {
        if !client.is_choked() {
            while piece.requests < NB_REQUESTS_MAX && piece.requested < piece.length {
                let block_len = (piece.length - piece.requested).min(BLOCK_SIZE_MAX);
                client
                    .send_request(piece.index, piece.requested, block_len)
                    .map_err(PieceFailure::Connection)?;
                piece.requests += 1;
                piece.requested += block_len;
            }
        }

        let message = client.read_message().map_err(PieceFailure::Connection)?;
        match message.id {
            MESSAGE_CHOKE => {
                client.on_choke();
                return Err(PieceFailure::Choked);
            }
            MESSAGE_UNCHOKE => client.on_unchoke(),
            MESSAGE_HAVE => {
                if let Ok(index) = message::parse_have(&message.payload) {
                    client.set_piece(index);
                }
            }
            MESSAGE_PIECE => apply_block(piece, &message.payload).map_err(PieceFailure::Connection)?,
            MESSAGE_INTERESTED => client.on_interested(),
            MESSAGE_NOT_INTERESTED => client.on_not_interested(),
            MESSAGE_KEEPALIVE => {}
            id => debug!("ignoring message id {} during download", id),
        }
    }

    Ok(())
}

/// Fold one PIECE payload into the assembly buffer, matching it to the
/// in-flight piece by index and placing it at its begin offset.
fn apply_block(piece: &mut PieceWork, payload: &[u8]) -> Result<()> {
    let block = message::parse_piece(payload)?;

    if block.index != piece.index {
        return Err(anyhow!(
            "peer sent a block of piece {} while piece {} was in flight",
            block.index,
            piece.index
        ));
    }

    let begin = block.begin as usize;
    let len = block.block.len();
    if begin + len > piece.data.len() {
        return Err(anyhow!("peer sent a block outside the piece bounds"));
    }

    piece.data[begin..begin + len].copy_from_slice(&block.block);
    piece.downloaded += len as u32;
    piece.requests = piece.requests.saturating_sub(1);

    Ok(())
}

/// Check a completed piece against its expected hash.
fn verify_integrity(piece: &PieceWork) -> bool {
    let mut hasher = Sha1::new();
    hasher.update(&piece.data);
    hasher.finish() == piece.hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finish()
    }

    #[test]
    fn verifies_piece_hashes() {
        let data = vec![0x5A; 1000];
        let mut piece = PieceWork::new(0, hash_of(&data), 1000);
        piece.data = data;
        assert!(verify_integrity(&piece));

        piece.data[999] ^= 1;
        assert!(!verify_integrity(&piece));
    }

    #[test]
    fn applies_blocks_at_their_offsets() {
        let mut piece = PieceWork::new(3, [0; 20], 32);

        let mut payload = 3u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&16u32.to_be_bytes());
        payload.extend_from_slice(&[0xBB; 16]);
        apply_block(&mut piece, &payload).unwrap();

        let mut payload = 3u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&[0xAA; 16]);
        apply_block(&mut piece, &payload).unwrap();

        assert_eq!(piece.downloaded, 32);
        assert_eq!(&piece.data[..16], &[0xAA; 16]);
        assert_eq!(&piece.data[16..], &[0xBB; 16]);
    }

    #[test]
    fn rejects_blocks_for_other_pieces() {
        let mut piece = PieceWork::new(1, [0; 20], 32);
        let mut payload = 2u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&[0; 16]);
        assert!(apply_block(&mut piece, &payload).is_err());
    }

    #[test]
    fn rejects_blocks_past_the_piece_end() {
        let mut piece = PieceWork::new(0, [0; 20], 16);
        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&8u32.to_be_bytes());
        payload.extend_from_slice(&[0; 16]);
        assert!(apply_block(&mut piece, &payload).is_err());
    }
}
