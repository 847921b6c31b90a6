use super::piece_store::PieceStore;
use crate::content_index::IndexEntry;
use crate::error::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

type StoreCell = Arc<OnceCell<Arc<PieceStore>>>;

/// Piece stores shared by every connection. A file is hashed at most once
/// per piece length, even when many peers handshake for it at the same time.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: Arc<Mutex<HashMap<(PathBuf, u64), StoreCell>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_open(&self, entry: &IndexEntry) -> Result<Arc<PieceStore>> {
        let cell = self
            .stores
            .lock()
            .await
            .entry((entry.path.clone(), entry.piece_length))
            .or_default()
            .clone();

        // a failed open leaves the cell empty, the next handshake tries again
        let store = cell
            .get_or_try_init(|| async {
                PieceStore::open(&entry.path, entry.piece_length)
                    .await
                    .map(Arc::new)
            })
            .await?;

        Ok(store.clone())
    }

    #[cfg(test)]
    async fn opened(&self) -> usize {
        self.stores
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::StoreRegistry;
    use crate::content_index::IndexEntry;
    use crate::test_util::{random_file, scratch_dir};
    use futures::future::join_all;
    use std::sync::Arc;
    use tokio::fs::remove_dir_all;

    #[tokio::test]
    async fn concurrent_opens_share_one_store() {
        let dir = scratch_dir("stores_shared").await;
        let (path, _) = random_file(&dir, "file.bin", 5000).await;
        let entry = IndexEntry {
            path,
            piece_length: 1024,
        };

        let registry = StoreRegistry::new();
        let stores = join_all((0..8).map(|_| registry.get_or_open(&entry))).await;

        let first = stores[0].as_ref().unwrap();
        for store in stores.iter() {
            assert!(Arc::ptr_eq(first, store.as_ref().unwrap()));
        }
        assert_eq!(1, registry.opened().await);

        remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn failed_open_is_retried() {
        let dir = scratch_dir("stores_retry").await;
        let entry = IndexEntry {
            path: dir.join("later.bin"),
            piece_length: 1024,
        };

        let registry = StoreRegistry::new();
        assert!(registry.get_or_open(&entry).await.is_err());
        assert_eq!(0, registry.opened().await);

        random_file(&dir, "later.bin", 100).await;
        assert_eq!(1, registry.get_or_open(&entry).await.unwrap().piece_count());

        remove_dir_all(dir).await.unwrap();
    }
}
