use crate::data_structures::ID;
use crate::error::{Error, Result};
use crate::transcoding::metainfo::Info;
use bytes::{Bytes, BytesMut};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// A seeded file split into pieces. Digests are computed once, when the
/// store is opened; piece bytes are read from disk on every request.
#[derive(Debug)]
pub struct PieceStore {
    path: PathBuf,
    info: Info,
}

impl PieceStore {
    pub async fn open(path: impl AsRef<Path>, piece_length: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let info = Info::split(&path, piece_length).await?;

        debug!(
            ?path,
            pieces = info.number_of_pieces(),
            length = info.length,
            "piece store ready"
        );

        Ok(Self { path, info })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn piece_count(&self) -> usize {
        self.info.number_of_pieces()
    }

    pub fn digest(&self, index: usize) -> Result<ID> {
        self.info
            .pieces
            .get(index)
            .copied()
            .ok_or(Error::OutOfRange {
                index,
                count: self.piece_count(),
            })
    }

    /// Piece bytes as they are on disk now, paired with the digest computed
    /// at open time.
    pub async fn piece_at(&self, index: usize) -> Result<(Bytes, ID)> {
        let digest = self.digest(index)?;
        let size = self.info.piece_size(index).ok_or(Error::OutOfRange {
            index,
            count: self.piece_count(),
        })?;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.info.piece_offset(index)))
            .await?;

        let mut data = BytesMut::zeroed(size as usize);
        file.read_exact(&mut data).await?;

        Ok((data.freeze(), digest))
    }
}
