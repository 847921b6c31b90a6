use super::peer_session::{self, PeerSession, Timeouts};
use crate::data_structures::ID;
use crate::error::{Error, Result};
use crate::shutdown;
use crate::transcoding::metainfo::Info;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::select;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, instrument, trace, warn};

const RESULT_CHANNEL_BUFFER: usize = 1 << 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceWork {
    pub index: usize,
    pub digest: ID,
    pub size: usize,
}

/// Outcome of one attempt at one piece. Workers report failed attempts too,
/// so the reassembler sees what went wrong before a retry succeeded.
#[derive(Debug)]
pub struct PieceResult {
    pub index: usize,
    pub attempt: usize,
    pub peer: SocketAddr,
    pub outcome: Result<Bytes>,
}

/// Pieces waiting for a worker. Every piece is queued before the first worker
/// starts and the sending side is gone, so an empty queue means done.
#[derive(Clone)]
pub struct WorkQueue(Arc<Mutex<mpsc::Receiver<PieceWork>>>);

impl WorkQueue {
    pub fn new(info: &Info) -> Self {
        let (tx, rx) = mpsc::channel(info.number_of_pieces().max(1));

        for (index, digest) in info.pieces.iter().enumerate() {
            let size = info.piece_size(index).unwrap_or_default() as usize;

            let queued = tx.try_send(PieceWork {
                index,
                digest: *digest,
                size,
            });
            debug_assert!(queued.is_ok(), "queue capacity covers every piece");
        }

        Self(Arc::new(Mutex::new(rx)))
    }

    /// Hands out each queued piece exactly once across all clones.
    pub async fn next(&self) -> Option<PieceWork> {
        self.0.lock().await.recv().await
    }
}

pub struct WorkerContext {
    pub content_id: ID,
    pub peers: Vec<SocketAddr>,
    pub retries: usize,
    pub timeouts: Timeouts,
}

impl WorkerContext {
    /// Attempt `a` at piece `i` goes to `peers[(i + a) % n]`, so a retry
    /// lands on a different peer whenever there is more than one.
    pub fn peer_for(&self, index: usize, attempt: usize) -> SocketAddr {
        self.peers[(index + attempt) % self.peers.len()]
    }
}

/// Starts `workers` tasks draining `queue`. The returned receiver closes once
/// every worker has finished.
pub fn spawn_workers(
    workers: usize,
    queue: WorkQueue,
    context: Arc<WorkerContext>,
    shutdown_rx: shutdown::Receiver,
) -> mpsc::Receiver<PieceResult> {
    let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_BUFFER);

    for id in 0..workers.max(1) {
        let queue = queue.clone();
        let context = context.clone();
        let result_tx = result_tx.clone();
        let shutdown_rx = shutdown_rx.clone();

        tokio::spawn(async move {
            run_worker(id, queue, context, result_tx, shutdown_rx).await;
        });
    }

    result_rx
}

#[instrument(skip_all, fields(worker = id))]
async fn run_worker(
    id: usize,
    queue: WorkQueue,
    context: Arc<WorkerContext>,
    result_tx: mpsc::Sender<PieceResult>,
    mut shutdown_rx: shutdown::Receiver,
) {
    let mut sessions = HashMap::new();

    loop {
        // shutdown is only seen between pieces, an attempt in flight runs to
        // completion or to its deadline
        let work = select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!("cancelled");
                return;
            }
            work = queue.next() => work,
        };

        let Some(work) = work else {
            trace!("queue drained");
            return;
        };

        for attempt in 0..=context.retries {
            let peer = context.peer_for(work.index, attempt);
            let outcome = fetch_piece(&mut sessions, peer, &work, &context).await;

            let retry = match &outcome {
                Ok(_) => false,
                Err(e) => {
                    warn!(piece = work.index, attempt, %peer, ?e);
                    e.is_retryable() && attempt < context.retries
                }
            };

            let result = PieceResult {
                index: work.index,
                attempt,
                peer,
                outcome,
            };

            if result_tx.send(result).await.is_err() {
                debug!("nobody is collecting results");
                return;
            }

            if !retry {
                break;
            }
        }
    }
}

/// One attempt, on a connection kept per peer by this worker. A connection
/// that failed in any way is dropped and reopened next time.
async fn fetch_piece(
    sessions: &mut HashMap<SocketAddr, PeerSession>,
    peer: SocketAddr,
    work: &PieceWork,
    context: &WorkerContext,
) -> Result<Bytes> {
    let mut session = match sessions.remove(&peer) {
        Some(session) => session,
        None => peer_session::open(peer, &context.content_id, context.timeouts.handshake).await?,
    };

    let (_, payload) = session
        .request_piece_within(work.index, work.size, context.timeouts.piece_transfer)
        .await?;

    // the digest the peer sent along is not trusted, only the metadata's
    if ID::digest(&payload) != work.digest {
        return Err(Error::Integrity { index: work.index });
    }

    sessions.insert(peer, session);

    Ok(payload)
}
