use crate::constants::{APP_DIR_NAME, CONTENT_INDEX_FILE};
use crate::data_structures::ID;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirBuilder, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub piece_length: u64,
}

/// Resolves a handshake's content id to the file being seeded.
#[async_trait]
pub trait ContentLookup: Send + Sync {
    async fn lookup(&self, content_id: &ID) -> Option<IndexEntry>;
}

/// Content id → seeded file, persisted with bincode next to the user's home.
pub struct ContentIndex {
    location: PathBuf,
    entries: RwLock<HashMap<ID, IndexEntry>>,
}

impl ContentIndex {
    pub fn default_location() -> Result<PathBuf> {
        let mut path = home::home_dir().ok_or(anyhow!("can't find home dir"))?;
        path.push(APP_DIR_NAME);
        path.push(CONTENT_INDEX_FILE);

        Ok(path)
    }

    pub async fn load(location: impl AsRef<Path>) -> Result<Self> {
        let location = location.as_ref().to_path_buf();

        let entries = match File::open(&location).await {
            Ok(mut file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                bincode::deserialize(&buf)?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(?location, "no index on disk yet");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            location,
            entries: RwLock::new(entries),
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Records the entry and writes the whole index back to disk.
    pub async fn insert(&self, content_id: ID, entry: IndexEntry) -> Result<()> {
        // held through the write so concurrent inserts reach disk in order
        let mut entries = self.entries.write().await;
        entries.insert(content_id, entry);

        let encoded = bincode::serialize(&*entries)?;
        self.store(&encoded).await
    }

    async fn store(&self, encoded: &[u8]) -> Result<()> {
        if let Some(dir) = self.location.parent() {
            DirBuilder::new().recursive(true).create(dir).await?;
        }

        let tmp = self.location.with_extension("tmp");

        let mut file = File::create(&tmp).await?;
        file.write_all(encoded).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&tmp, &self.location).await?;

        Ok(())
    }
}

#[async_trait]
impl ContentLookup for ContentIndex {
    async fn lookup(&self, content_id: &ID) -> Option<IndexEntry> {
        self.entries.read().await.get(content_id).cloned()
    }
}
