//! # Download Coordination
//!
//! The [`Torrent`] type owns the scheduler: it seeds a work channel with
//! every piece, spawns one worker thread per peer, and then sits in a
//! single reactor loop collecting verified pieces and writing them into the
//! output buffer at their offsets. Workers never write output themselves,
//! so the final file is the concatenation of pieces in index order no
//! matter what order they finish in.
//!
//! Failure isolation: a dying worker puts its piece back on the work
//! channel and drops its result sender. When every worker is gone the
//! result channel disconnects, and if pieces are still outstanding at that
//! point the download fails rather than hanging.

use std::path::Path;
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::metainfo::Metainfo;
use crate::peer::PeerAddr;
use crate::piece::{PieceResult, PieceWork};
use crate::tracker;
use crate::worker::{self, Worker};

/// Port advertised to the tracker.
pub const PORT: u16 = 6881;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no peers available")]
    NoPeersAvailable,
}

/// A loaded torrent plus the identity this client session uses in the swarm.
pub struct Torrent {
    /// Parsed metainfo, shared read-only with the workers
    meta: Metainfo,
    /// Random 20-byte identity picked at load time
    peer_id: [u8; 20],
}

impl Torrent {
    /// Load a torrent file and pick a random peer id for this session.
    pub fn open(path: impl AsRef<Path>) -> Result<Torrent> {
        let meta = Metainfo::from_file(path.as_ref())
            .with_context(|| format!("could not load torrent {}", path.as_ref().display()))?;
        Ok(Self::from_metainfo(meta))
    }

    /// Wrap already-parsed metainfo, picking a random peer id.
    pub fn from_metainfo(meta: Metainfo) -> Torrent {
        let mut peer_id = [0u8; 20];
        rand::thread_rng().fill(&mut peer_id[..]);
        Torrent { meta, peer_id }
    }

    /// The parsed metainfo record.
    pub fn metainfo(&self) -> &Metainfo {
        &self.meta
    }

    /// The 20-byte identity this session presents to trackers and peers.
    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Ask the tracker for the current swarm.
    pub fn request_peers(&self) -> Result<Vec<PeerAddr>> {
        let peers = tracker::announce(&self.meta, &self.peer_id, PORT)?;
        info!("tracker returned {} peers", peers.len());
        if peers.is_empty() {
            return Err(DownloadError::NoPeersAvailable.into());
        }
        Ok(peers)
    }

    /// Download the whole payload from the given peers.
    pub fn download(&self, peers: &[PeerAddr]) -> Result<Vec<u8>> {
        if peers.is_empty() {
            return Err(DownloadError::NoPeersAvailable.into());
        }

        info!(
            "downloading {:?} ({} pieces from {} peers)",
            self.meta.name,
            self.meta.piece_count(),
            peers.len()
        );

        let (work_tx, work_rx) = unbounded::<PieceWork>();
        let (result_tx, result_rx) = unbounded::<PieceResult>();

        // Shuffle so a swarm of slow peers doesn't hammer a prefix of the
        // file while the tail starves.
        let mut indices: Vec<u32> = (0..self.meta.piece_count()).collect();
        indices.shuffle(&mut rand::thread_rng());
        for index in indices {
            let piece = PieceWork::new(index, self.meta.piece_hash(index), self.meta.piece_len(index));
            work_tx
                .send(piece)
                .map_err(|_| anyhow!("work channel closed before the download started"))?;
        }

        for &peer in peers {
            let mut worker = Worker::new(
                peer,
                self.peer_id,
                self.meta.info_hash,
                (work_tx.clone(), work_rx.clone()),
                result_tx.clone(),
            );
            thread::spawn(move || worker.run());
        }
        // Workers hold the only remaining senders; once they all exit, the
        // result channel disconnects and the loop below notices.
        drop(work_tx);
        drop(result_tx);

        let pb = ProgressBar::new(self.meta.total_length);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}%")
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut data = vec![0u8; self.meta.total_length as usize];
        let mut completed = 0;
        while completed < self.meta.piece_count() {
            let piece: PieceResult = result_rx
                .recv()
                .map_err(|_| DownloadError::NoPeersAvailable)?;

            let begin = self.meta.piece_offset(piece.index) as usize;
            data[begin..begin + piece.length as usize].copy_from_slice(&piece.data);

            pb.inc(piece.length as u64);
            completed += 1;
        }
        pb.finish_and_clear();

        Ok(data)
    }

    /// Download a single piece, trying each peer in turn until one serves it.
    pub fn download_piece(&self, peers: &[PeerAddr], index: u32) -> Result<Vec<u8>> {
        if index >= self.meta.piece_count() {
            return Err(anyhow!(
                "piece {} is out of range (torrent has {} pieces)",
                index,
                self.meta.piece_count()
            ));
        }

        for &peer in peers {
            let piece = PieceWork::new(index, self.meta.piece_hash(index), self.meta.piece_len(index));
            let mut out = Vec::with_capacity(piece.length as usize);
            match worker::download_piece_from(peer, self.peer_id, self.meta.info_hash, piece, &mut out)
            {
                Ok(()) => return Ok(out),
                Err(e) => warn!("peer {}: {:#}", peer, e),
            }
        }

        Err(DownloadError::NoPeersAvailable.into())
    }
}
