use crate::constants::{HANDSHAKE_TIMEOUT, PIECE_TRANSFER_TIMEOUT, PROBE_TIMEOUT};
use crate::data_structures::ID;
use crate::error::{Error, Result};
use crate::protocol::{read_line, read_piece_frame, Request};
use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub probe: Duration,
    pub handshake: Duration,
    pub piece_transfer: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: PROBE_TIMEOUT,
            handshake: HANDSHAKE_TIMEOUT,
            piece_transfer: PIECE_TRANSFER_TIMEOUT,
        }
    }
}

async fn within<T>(
    deadline: Duration,
    what: &str,
    addr: &SocketAddr,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout(deadline, fut)
        .await
        .map_err(|_| Error::Transport(format!("{what} with {addr} timed out after {deadline:?}")))?
}

/// Connects and checks that `addr` answers the liveness probe. Any answer
/// line counts, it is handed back as received.
pub async fn probe(addr: SocketAddr, deadline: Duration) -> Result<String> {
    within(deadline, "probe", &addr, async {
        let mut session = PeerSession::connect(addr).await?;
        session.probe().await
    })
    .await
}

/// Connects and binds the connection to `content_id`.
pub async fn open(addr: SocketAddr, content_id: &ID, deadline: Duration) -> Result<PeerSession> {
    within(deadline, "handshake", &addr, async {
        let mut session = PeerSession::connect(addr).await?;
        session.handshake(content_id).await?;
        Ok(session)
    })
    .await
}

/// Client side of one connection to a seeding peer.
pub struct PeerSession {
    addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl PeerSession {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(Error::transport)?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            addr,
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn send(&mut self, request: Request) -> Result<()> {
        trace!(peer = %self.addr, ?request);

        self.writer
            .write_all(&request.into_bytes())
            .await
            .map_err(Error::transport)
    }

    async fn expect_line(&mut self, expected: &str) -> Result<()> {
        match read_line(&mut self.reader).await? {
            Some(line) if line == expected => Ok(()),
            Some(line) => Err(Error::Protocol(format!(
                "{} answered {line:?}, expected {expected:?}",
                self.addr
            ))),
            None => Err(Error::Transport(format!(
                "{} closed the connection",
                self.addr
            ))),
        }
    }

    pub async fn probe(&mut self) -> Result<String> {
        self.send(Request::Probe).await?;

        read_line(&mut self.reader).await?.ok_or(Error::Transport(format!(
            "{} closed the connection",
            self.addr
        )))
    }

    pub async fn handshake(&mut self, content_id: &ID) -> Result<()> {
        self.send(Request::Handshake(Some(*content_id))).await?;
        self.expect_line("OK").await
    }

    pub async fn check_pieces(&mut self) -> Result<()> {
        self.send(Request::CheckPieces).await?;
        self.expect_line("HAVE_PIECES").await
    }

    pub async fn check_pieces_within(&mut self, deadline: Duration) -> Result<()> {
        let addr = self.addr;
        within(deadline, "availability check", &addr, self.check_pieces()).await
    }

    /// Asks for piece `index` and reads exactly `size` payload bytes back.
    /// The payload is returned unverified along with the digest the peer sent.
    pub async fn request_piece(&mut self, index: usize, size: usize) -> Result<(ID, Bytes)> {
        self.send(Request::Piece(Some(index))).await?;
        read_piece_frame(&mut self.reader, size).await
    }

    pub async fn request_piece_within(
        &mut self,
        index: usize,
        size: usize,
        deadline: Duration,
    ) -> Result<(ID, Bytes)> {
        let addr = self.addr;
        within(deadline, "piece transfer", &addr, self.request_piece(index, size)).await
    }
}
