use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("local file access failed: {0}")]
    Io(#[from] io::Error),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("piece {index} failed hash verification")]
    Integrity { index: usize },
    #[error("piece index {index} is out of range (piece count {count})")]
    OutOfRange { index: usize, count: usize },
    #[error("download incomplete, missing pieces {missing:?}")]
    IncompleteDownload { missing: Vec<usize> },
    #[error("no peer passed probe and handshake")]
    NoPeersAvailable,
}

impl Error {
    pub fn transport(e: impl std::fmt::Display) -> Self {
        Self::Transport(e.to_string())
    }

    pub fn protocol(e: impl std::fmt::Display) -> Self {
        Self::Protocol(e.to_string())
    }

    /// Errors a worker absorbs and retries against another peer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Protocol(_) | Self::Integrity { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
