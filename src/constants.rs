use std::time::Duration;

pub const DEFAULT_PIECE_LENGTH: u64 = 1 << 18;
pub const DEFAULT_WORKER_COUNT: usize = 3;
pub const DEFAULT_PIECE_RETRIES: usize = 1;
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_ANNOUNCE: &str = "http://localhost:8080/announce";

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const PIECE_TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

// longest legal request is a handshake: "HANDSHAKE:" + 40 hex chars
pub const MAX_CONTROL_LINE_LEN: usize = 1 << 10;

pub const APP_DIR_NAME: &str = ".piecemeal";
pub const CONTENT_INDEX_FILE: &str = "content_index";
