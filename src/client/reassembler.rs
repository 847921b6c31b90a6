use super::worker::PieceResult;
use crate::error::{Error, Result};
use crate::transcoding::metainfo::Info;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub output: PathBuf,
    pub pieces: usize,
    pub bytes: u64,
    pub retried: usize,
}

/// Collects verified pieces and writes the file once all of them are in.
pub struct Reassembler<'a> {
    info: &'a Info,
    pieces: BTreeMap<usize, Bytes>,
    failures: HashMap<usize, Error>,
    retried: BTreeSet<usize>,
}

impl<'a> Reassembler<'a> {
    pub fn new(info: &'a Info) -> Self {
        Self {
            info,
            pieces: BTreeMap::new(),
            failures: HashMap::new(),
            retried: BTreeSet::new(),
        }
    }

    pub fn accept(&mut self, result: PieceResult) {
        let PieceResult {
            index,
            attempt,
            peer,
            outcome,
        } = result;

        if attempt > 0 {
            self.retried.insert(index);
        }

        let data = match outcome {
            Ok(data) => data,
            Err(e) => {
                debug!(piece = index, attempt, %peer, %e, "attempt failed");
                self.failures.insert(index, e);
                return;
            }
        };

        let Some(expected) = self.info.piece_size(index) else {
            warn!(piece = index, "piece index out of range, dropped");
            return;
        };

        if data.len() as u64 != expected {
            warn!(piece = index, len = data.len(), expected, "wrong piece size, dropped");
            return;
        }

        if self.pieces.contains_key(&index) {
            warn!(piece = index, "duplicate piece ignored");
            return;
        }

        self.failures.remove(&index);
        self.pieces.insert(index, data);
    }

    pub fn missing(&self) -> Vec<usize> {
        (0..self.info.number_of_pieces())
            .filter(|index| !self.pieces.contains_key(index))
            .collect()
    }

    pub fn last_failure(&self, index: usize) -> Option<&Error> {
        self.failures.get(&index)
    }

    /// Writes every piece at its offset. Nothing is created unless all
    /// pieces are present.
    pub async fn write(self, output: impl AsRef<Path>) -> Result<DownloadReport> {
        let output = output.as_ref();
        let missing = self.missing();

        if !missing.is_empty() {
            for index in missing.iter() {
                if let Some(e) = self.failures.get(index) {
                    warn!(piece = index, %e, "gave up on piece");
                }
            }
            return Err(Error::IncompleteDownload { missing });
        }

        let mut file = File::create(output).await?;

        for (index, data) in self.pieces.iter() {
            file.seek(SeekFrom::Start(self.info.piece_offset(*index)))
                .await?;
            file.write_all(data).await?;
        }

        file.set_len(self.info.length).await?;
        file.flush().await?;

        info!(?output, pieces = self.pieces.len(), "download written");

        Ok(DownloadReport {
            output: output.to_path_buf(),
            pieces: self.pieces.len(),
            bytes: self.info.length,
            retried: self.retried.len(),
        })
    }
}
