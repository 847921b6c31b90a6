use crate::constants::{
    DEFAULT_LISTEN_ADDR, DEFAULT_PIECE_LENGTH, DEFAULT_PIECE_RETRIES, DEFAULT_WORKER_COUNT,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)] // Read from `Cargo.toml`
pub struct Config {
    /// address the seeding server listens on
    #[clap(short, long, value_parser, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// candidate peer for downloads, can be repeated
    #[clap(short, long = "peer", value_parser, default_value = "127.0.0.1:8080")]
    pub peers: Vec<SocketAddr>,

    /// concurrent piece downloads
    #[clap(short, long, value_parser, default_value_t = DEFAULT_WORKER_COUNT)]
    pub workers: usize,

    /// extra attempts per piece, each against the next peer
    #[clap(short, long, value_parser, default_value_t = DEFAULT_PIECE_RETRIES)]
    pub retries: usize,

    /// piece length used by `create`
    #[clap(long, value_parser, default_value_t = DEFAULT_PIECE_LENGTH)]
    pub piece_length: u64,

    /// directory downloads are written to
    #[clap(short, long, value_parser, default_value = ".")]
    pub out_dir: PathBuf,

    /// content index file, ~/.piecemeal/content_index when omitted
    #[clap(long, value_parser)]
    pub index: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Config {
        Config::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use clap::Parser;
    use std::net::SocketAddr;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["piecemeal"]).unwrap();

        assert_eq!("0.0.0.0:8080", config.listen.to_string());
        assert_eq!(
            vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()],
            config.peers
        );
        assert_eq!(3, config.workers);
        assert_eq!(1, config.retries);
        assert_eq!(262144, config.piece_length);
        assert_eq!(None, config.index);
    }

    #[test]
    fn repeated_peers() {
        let config = Config::try_parse_from([
            "piecemeal",
            "--peer",
            "10.0.0.1:8080",
            "-p",
            "10.0.0.2:9000",
            "--workers",
            "8",
        ])
        .unwrap();

        assert_eq!(2, config.peers.len());
        assert_eq!(9000, config.peers[1].port());
        assert_eq!(8, config.workers);
    }
}
