use crate::client::{self, DownloadOptions, Timeouts};
use crate::config::Config;
use crate::constants::DEFAULT_ANNOUNCE;
use crate::content_index::{ContentIndex, IndexEntry};
use crate::shutdown;
use crate::transcoding::metainfo::Torrent;
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::lookup_host;
use tracing::{info, instrument};

pub const USAGE: &str = "\
Commands:
  download <torrent-file>  download the file a .torrent describes
  test <ip:port>           check that a peer answers
  create <file>            write <file>.torrent and start seeding it
  open <torrent-file>      show what a .torrent contains
  clear                    clear the terminal
  exit                     stop seeding and quit";

const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Download(PathBuf),
    Test(String),
    Create(PathBuf),
    Open(PathBuf),
    Clear,
    Exit,
    Empty,
    Usage(&'static str),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();

        let Some(name) = words.next() else {
            return Command::Empty;
        };
        let argument = words.next();

        match (name, argument) {
            ("download", Some(path)) => Command::Download(path.into()),
            ("download", None) => Command::Usage("download <torrent-file>"),
            ("test", Some(addr)) => Command::Test(addr.to_string()),
            ("test", None) => Command::Usage("test <ip:port>"),
            ("create", Some(path)) => Command::Create(path.into()),
            ("create", None) => Command::Usage("create <file>"),
            ("open", Some(path)) => Command::Open(path.into()),
            ("open", None) => Command::Usage("open <torrent-file>"),
            ("clear", _) => Command::Clear,
            ("exit", _) => Command::Exit,
            (other, _) => Command::Unknown(other.to_string()),
        }
    }
}

/// What the interactive loop needs to carry out commands.
pub struct App {
    config: Config,
    index: Arc<ContentIndex>,
    shutdown_rx: shutdown::Receiver,
}

impl App {
    pub fn new(config: Config, index: Arc<ContentIndex>, shutdown_rx: shutdown::Receiver) -> Self {
        Self {
            config,
            index,
            shutdown_rx,
        }
    }

    /// Runs one command and returns what to print. `Ok(None)` means exit.
    pub async fn execute(&self, command: Command) -> Result<Option<String>> {
        let output = match command {
            Command::Download(path) => self.download(&path).await?,
            Command::Test(addr) => self.test(&addr).await?,
            Command::Create(path) => self.create(&path).await?,
            Command::Open(path) => Torrent::from_file(&path).await?.to_string(),
            Command::Clear => CLEAR_SCREEN.to_string(),
            Command::Exit => return Ok(None),
            Command::Empty => String::new(),
            Command::Usage(usage) => format!("usage: {usage}"),
            Command::Unknown(name) => format!("unknown command {name:?}\n{USAGE}"),
        };

        Ok(Some(output))
    }

    #[instrument(skip(self))]
    async fn download(&self, path: &Path) -> Result<String> {
        let torrent = Torrent::from_file(path).await?;

        let name = Path::new(&torrent.info.name)
            .file_name()
            .ok_or(anyhow!("metainfo has no usable file name"))?;
        let output = self.config.out_dir.join(name);

        let options = DownloadOptions {
            workers: self.config.workers,
            retries: self.config.retries,
            timeouts: Timeouts::default(),
        };

        let report = client::download(
            &torrent,
            &self.config.peers,
            &output,
            &options,
            self.shutdown_rx.clone(),
        )
        .await?;

        Ok(format!(
            "downloaded {} pieces ({} bytes, {} retried) to {}",
            report.pieces,
            report.bytes,
            report.retried,
            report.output.display()
        ))
    }

    async fn test(&self, addr: &str) -> Result<String> {
        let addr: SocketAddr = lookup_host(addr)
            .await?
            .next()
            .ok_or(anyhow!("{addr} doesn't resolve"))?;

        let answer = client::probe(addr, Timeouts::default().probe).await?;

        Ok(format!("{addr} is up, answered {answer:?}"))
    }

    /// Writes `<file>.torrent` and adds the file to the content index, so the
    /// background server starts answering handshakes for it.
    #[instrument(skip(self))]
    async fn create(&self, path: &Path) -> Result<String> {
        let torrent = Torrent::create(
            path,
            self.config.piece_length,
            Some(DEFAULT_ANNOUNCE.to_string()),
        )
        .await?;

        let mut torrent_path = path.as_os_str().to_owned();
        torrent_path.push(".torrent");
        let torrent_path = PathBuf::from(torrent_path);

        torrent.write_to_file(&torrent_path).await?;

        self.index
            .insert(
                torrent.info_hash,
                IndexEntry {
                    path: tokio::fs::canonicalize(path).await?,
                    piece_length: torrent.info.piece_length,
                },
            )
            .await?;

        info!(content_id = %torrent.info_hash, "seeding");

        Ok(format!(
            "created {} (content id {})",
            torrent_path.display(),
            torrent.info_hash
        ))
    }
}
