use crate::content_index::{ContentIndex, IndexEntry};
use crate::data_structures::ID;
use crate::protocol::{read_line, Request};
use crate::server::Server;
use crate::shutdown;
use crate::transcoding::metainfo::Torrent;
use bytes::Bytes;
use rand::RngCore;
use std::future::pending;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{DirBuilder, File};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

// tests run concurrently, so every test passes its own name
pub async fn scratch_dir(name: &str) -> PathBuf {
    let path = PathBuf::from(format!("scratch_{name}"));

    DirBuilder::new()
        .recursive(true)
        .create(&path)
        .await
        .unwrap();

    path
}

pub async fn random_file(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);

    let path = dir.join(name);
    let mut file = File::create(&path).await.unwrap();
    file.write_all(&data).await.unwrap();
    file.flush().await.unwrap();

    (path, data)
}

pub struct Seeder {
    pub addr: SocketAddr,
    pub content_id: ID,
    pub torrent: Torrent,
    shutdown_tx: shutdown::Sender,
    handle: JoinHandle<()>,
}

impl Seeder {
    pub async fn stop(self) {
        self.shutdown_tx.send().wait().await;
        self.handle.await.unwrap();
    }
}

/// Loopback server seeding `path`, with its index kept under `dir`.
pub async fn seeding_server(dir: &Path, path: &Path, piece_length: u64) -> Seeder {
    let torrent = Torrent::create(path, piece_length, None).await.unwrap();
    let content_id = torrent.info_hash;

    let index = ContentIndex::load(dir.join("index")).await.unwrap();
    index
        .insert(
            content_id,
            IndexEntry {
                path: path.to_path_buf(),
                piece_length,
            },
        )
        .await
        .unwrap();

    let server = Server::bind("127.0.0.1:0", Arc::new(index)).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let handle = tokio::spawn(server.serve(shutdown_rx));

    Seeder {
        addr,
        content_id,
        torrent,
        shutdown_tx,
        handle,
    }
}

/// Loopback peer answering every request with whatever `answer` returns.
/// `None` leaves that request unanswered and the connection open.
pub async fn scripted_peer<F>(answer: F) -> SocketAddr
where
    F: Fn(&Request) -> Option<Bytes> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let answer = Arc::new(answer);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let answer = answer.clone();

            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut reader = BufReader::new(reader);

                while let Ok(Some(line)) = read_line(&mut reader).await {
                    let Some(response) = answer(&Request::parse(&line)) else {
                        pending::<()>().await;
                        return;
                    };

                    if writer.write_all(&response).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}
