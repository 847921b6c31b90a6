mod connection;
mod piece_store;
mod stores;

use crate::content_index::ContentLookup;
use crate::shutdown;
use anyhow::Result;
use connection::serve_connection;
use std::net::SocketAddr;
use std::sync::Arc;
use stores::StoreRegistry;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::select;
use tracing::{debug, info, instrument, warn};

pub struct Server {
    listener: TcpListener,
    lookup: Arc<dyn ContentLookup>,
    stores: StoreRegistry,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs, lookup: Arc<dyn ContentLookup>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            lookup,
            stores: StoreRegistry::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts peers until shutdown, one task per connection.
    #[instrument(skip_all, fields(addr = ?self.listener.local_addr().ok()))]
    pub async fn serve(self, mut shutdown_rx: shutdown::Receiver) {
        info!("seeding");

        loop {
            select! {
                _ = shutdown_rx.recv() => {
                    debug!("shutting down");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted");

                        let lookup = self.lookup.clone();
                        let stores = self.stores.clone();
                        tokio::spawn(serve_connection(stream, peer, lookup, stores));
                    }
                    Err(e) => warn!(?e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Server;
    use crate::content_index::{ContentIndex, IndexEntry};
    use crate::data_structures::ID;
    use crate::protocol::{read_line, Request};
    use crate::shutdown;
    use crate::test_util::{random_file, scratch_dir};
    use std::sync::Arc;
    use tokio::fs::remove_dir_all;
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn serves_over_tcp_until_shutdown() {
        let dir = scratch_dir("server_tcp").await;
        let (path, _) = random_file(&dir, "file.bin", 1000).await;
        let content_id = ID::digest(b"file.bin");

        let index = ContentIndex::load(dir.join("index")).await.unwrap();
        index
            .insert(
                content_id,
                IndexEntry {
                    path,
                    piece_length: 256,
                },
            )
            .await
            .unwrap();

        let server = Server::bind("127.0.0.1:0", Arc::new(index)).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let handle = tokio::spawn(server.serve(shutdown_rx));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer
            .write_all(&Request::Handshake(Some(content_id)).into_bytes())
            .await
            .unwrap();
        assert_eq!(Some("OK".into()), read_line(&mut reader).await.unwrap());

        shutdown_tx.send().wait().await;
        handle.await.unwrap();

        assert!(TcpStream::connect(addr).await.is_err());

        remove_dir_all(dir).await.unwrap();
    }
}
