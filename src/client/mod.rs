pub mod peer_session;
mod qualify;
mod reassembler;
mod worker;

pub use peer_session::{probe, Timeouts};
pub use reassembler::DownloadReport;

use crate::constants::{DEFAULT_PIECE_RETRIES, DEFAULT_WORKER_COUNT};
use crate::error::Result;
use crate::shutdown;
use crate::transcoding::metainfo::Torrent;
use std::net::SocketAddr;
use std::path::Path;
use qualify::qualify_peers;
use reassembler::Reassembler;
use std::sync::Arc;
use tracing::{info, instrument};
use worker::{spawn_workers, WorkQueue, WorkerContext};

#[derive(Debug, Clone, Copy)]
pub struct DownloadOptions {
    pub workers: usize,
    pub retries: usize,
    pub timeouts: Timeouts,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            retries: DEFAULT_PIECE_RETRIES,
            timeouts: Timeouts::default(),
        }
    }
}

/// Fetches every piece of `torrent` from the candidates that qualify and
/// writes the reassembled file to `output`.
#[instrument(skip_all, fields(name = %torrent.info.name, content_id = %torrent.info_hash))]
pub async fn download(
    torrent: &Torrent,
    candidates: &[SocketAddr],
    output: impl AsRef<Path>,
    options: &DownloadOptions,
    shutdown_rx: shutdown::Receiver,
) -> Result<DownloadReport> {
    let peers = qualify_peers(candidates, &torrent.info_hash, &options.timeouts).await?;

    info!(
        peers = peers.len(),
        pieces = torrent.count_pieces(),
        "downloading"
    );

    let context = Arc::new(WorkerContext {
        content_id: torrent.info_hash,
        peers,
        retries: options.retries,
        timeouts: options.timeouts,
    });

    let mut result_rx = spawn_workers(
        options.workers,
        WorkQueue::new(&torrent.info),
        context,
        shutdown_rx,
    );

    let mut reassembler = Reassembler::new(&torrent.info);

    // closes when the last worker is done
    while let Some(result) = result_rx.recv().await {
        reassembler.accept(result);
    }

    reassembler.write(output).await
}
