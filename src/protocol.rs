use crate::constants::MAX_CONTROL_LINE_LEN;
use crate::data_structures::{HEX_ID_LEN, ID};
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

const PROBE: &str = "test";
const HANDSHAKE_PREFIX: &str = "HANDSHAKE:";
const CHECK_PIECES: &str = "CHECK_PIECES";
const PIECE_REQUEST_PREFIX: &str = "Requesting piece:";

const OK: &[u8] = b"OK\n";
const HAVE_PIECES: &[u8] = b"HAVE_PIECES\n";
const ERROR_PREFIX: &[u8] = b"ERROR:";
const DIGEST_SEPARATOR: u8 = b':';
const LINE_END: u8 = b'\n';

/// Request line decoded into its kind. Arguments that fail to parse are kept
/// as `None` so the handler can still answer with the right error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Probe,
    Handshake(Option<ID>),
    CheckPieces,
    Piece(Option<usize>),
    Unknown(String),
}

impl Request {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        if line == PROBE || line.starts_with("test:") {
            Request::Probe
        } else if let Some(hex) = line.strip_prefix(HANDSHAKE_PREFIX) {
            Request::Handshake(ID::from_hex(hex.trim()).ok())
        } else if line == CHECK_PIECES {
            Request::CheckPieces
        } else if let Some(index) = line.strip_prefix(PIECE_REQUEST_PREFIX) {
            Request::Piece(index.trim().parse().ok())
        } else {
            Request::Unknown(line.to_string())
        }
    }

    pub fn into_bytes(self) -> Bytes {
        let line = match self {
            Request::Probe => PROBE.to_string(),
            Request::Handshake(Some(content_id)) => format!("{HANDSHAKE_PREFIX}{content_id}"),
            Request::Handshake(None) => HANDSHAKE_PREFIX.to_string(),
            Request::CheckPieces => CHECK_PIECES.to_string(),
            Request::Piece(Some(index)) => format!("{PIECE_REQUEST_PREFIX} {index}"),
            Request::Piece(None) => PIECE_REQUEST_PREFIX.to_string(),
            Request::Unknown(line) => line,
        };

        let mut buf = BytesMut::with_capacity(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(LINE_END);
        buf.freeze()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    HandshakeRequired,
    InvalidContentId,
    UnknownContentId,
    UnableToProcessFile,
    InvalidPieceIndex,
    UnreadablePiece,
    UnknownMessage,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Refusal::HandshakeRequired => "handshake required",
            Refusal::InvalidContentId => "invalid content id",
            Refusal::UnknownContentId => "unknown content id",
            Refusal::UnableToProcessFile => "unable to process file",
            Refusal::InvalidPieceIndex => "invalid piece index",
            Refusal::UnreadablePiece => "unable to read piece",
            Refusal::UnknownMessage => "unknown message",
        })
    }
}

#[derive(Debug)]
pub enum Response<'a> {
    Ok,
    HavePieces,
    Piece { digest: ID, data: &'a [u8] },
    Error(Refusal),
}

impl<'a> Response<'a> {
    /// Whole response in one buffer, so it reaches the socket in one write.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Response::Ok => Bytes::from_static(OK),
            Response::HavePieces => Bytes::from_static(HAVE_PIECES),
            Response::Piece { digest, data } => {
                let mut buf = BytesMut::with_capacity(HEX_ID_LEN + data.len() + 2);
                buf.put_slice(digest.to_hex().as_bytes());
                buf.put_u8(DIGEST_SEPARATOR);
                buf.put_slice(data);
                buf.put_u8(LINE_END);
                buf.freeze()
            }
            Response::Error(refusal) => Bytes::from(format!("ERROR: {refusal}\n")),
        }
    }
}

/// Reads one `\n`-terminated control line. `Ok(None)` means the peer closed
/// the stream between lines; a partial or oversized line is a framing error.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    let mut limited = (&mut *reader).take(MAX_CONTROL_LINE_LEN as u64 + 1);

    if limited
        .read_until(LINE_END, &mut buf)
        .await
        .map_err(Error::transport)?
        == 0
    {
        return Ok(None);
    }

    if buf.last() != Some(&LINE_END) {
        return Err(Error::protocol(format!(
            "control line unterminated after {} bytes",
            buf.len()
        )));
    }

    buf.pop();

    Ok(Some(String::from_utf8_lossy(&buf).trim_end_matches('\r').to_string()))
}

/// Reads the answer to a piece request: either `<hex digest>:<payload>\n`
/// with exactly `size` payload bytes, or an `ERROR:` line.
pub async fn read_piece_frame<R>(reader: &mut R, size: usize) -> Result<(ID, Bytes)>
where
    R: AsyncBufRead + Unpin,
{
    let mut header = [0u8; HEX_ID_LEN + 1];

    read_exact(reader, &mut header[..ERROR_PREFIX.len()]).await?;

    if &header[..ERROR_PREFIX.len()] == ERROR_PREFIX {
        let reason = read_line(reader).await?.unwrap_or_default();
        return Err(Error::protocol(format!("peer refused: {}", reason.trim())));
    }

    read_exact(reader, &mut header[ERROR_PREFIX.len()..]).await?;

    if header[HEX_ID_LEN] != DIGEST_SEPARATOR {
        return Err(Error::protocol("piece frame has no digest separator"));
    }

    let hex = std::str::from_utf8(&header[..HEX_ID_LEN]).map_err(Error::protocol)?;
    let digest = ID::from_hex(hex).map_err(Error::protocol)?;

    let mut payload = BytesMut::zeroed(size);
    read_exact(reader, &mut payload).await?;

    let mut line_end = [0u8; 1];
    read_exact(reader, &mut line_end).await?;

    if line_end[0] != LINE_END {
        return Err(Error::protocol(format!(
            "piece frame longer than the expected {size} bytes"
        )));
    }

    Ok((digest, payload.freeze()))
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    reader
        .read_exact(buf)
        .await
        .map(|_| ())
        .map_err(Error::transport)
}

#[cfg(test)]
mod tests {
    use super::{read_line, read_piece_frame, Refusal, Request, Response};
    use crate::constants::MAX_CONTROL_LINE_LEN;
    use crate::data_structures::ID;
    use crate::error::Error;
    use tokio::io::BufReader;

    #[test]
    fn parse_requests() {
        let id = ID::digest(b"content");

        assert_eq!(Request::Probe, Request::parse("test"));
        assert_eq!(
            Request::Handshake(Some(id)),
            Request::parse(&format!("HANDSHAKE:{id}"))
        );
        assert_eq!(Request::Handshake(None), Request::parse("HANDSHAKE:beef"));
        assert_eq!(Request::CheckPieces, Request::parse("CHECK_PIECES\r"));
        assert_eq!(Request::Piece(Some(7)), Request::parse("Requesting piece: 7"));
        assert_eq!(Request::Piece(None), Request::parse("Requesting piece: -1"));
        assert_eq!(Request::Piece(None), Request::parse("Requesting piece: x"));
        assert_eq!(
            Request::Unknown("GET / HTTP/1.1".into()),
            Request::parse("GET / HTTP/1.1")
        );
    }

    #[test]
    fn encoded_requests_parse_back() {
        let id = ID::digest(b"content");

        for request in [
            Request::Probe,
            Request::Handshake(Some(id)),
            Request::CheckPieces,
            Request::Piece(Some(12)),
        ] {
            let bytes = request.clone().into_bytes();
            assert_eq!(Some(&b'\n'), bytes.last());

            let line = std::str::from_utf8(&bytes[..bytes.len() - 1]).unwrap();
            assert_eq!(request, Request::parse(line));
        }
    }

    #[test]
    fn encode_responses() {
        assert_eq!(&b"OK\n"[..], &Response::Ok.into_bytes()[..]);
        assert_eq!(&b"HAVE_PIECES\n"[..], &Response::HavePieces.into_bytes()[..]);
        assert_eq!(
            &b"ERROR: handshake required\n"[..],
            &Response::Error(Refusal::HandshakeRequired).into_bytes()[..]
        );

        let digest = ID::digest(b"a\nb");
        let frame = Response::Piece {
            digest,
            data: b"a\nb",
        }
        .into_bytes();

        assert_eq!(format!("{}:a\nb\n", digest.to_hex()).as_bytes(), &frame[..]);
    }

    #[tokio::test]
    async fn piece_frame_with_newlines_in_payload() {
        let data = b"\n\n0123\n".to_vec();
        let digest = ID::digest(&data);
        let frame = Response::Piece {
            digest,
            data: &data,
        }
        .into_bytes();

        let mut reader = BufReader::new(frame.as_ref());
        let (received_digest, payload) = read_piece_frame(&mut reader, data.len()).await.unwrap();

        assert_eq!(digest, received_digest);
        assert_eq!(data, payload.as_ref());
    }

    #[tokio::test]
    async fn piece_frame_refusal() {
        let frame = Response::Error(Refusal::InvalidPieceIndex).into_bytes();
        let mut reader = BufReader::new(frame.as_ref());

        match read_piece_frame(&mut reader, 1024).await {
            Err(Error::Protocol(reason)) => assert!(reason.contains("invalid piece index")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn piece_frame_short_payload_is_transport_error() {
        let data = b"short".to_vec();
        let frame = Response::Piece {
            digest: ID::digest(&data),
            data: &data,
        }
        .into_bytes();
        let mut reader = BufReader::new(frame.as_ref());

        assert!(matches!(
            read_piece_frame(&mut reader, 1024).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn lines() {
        let mut reader = BufReader::new(&b"OK\nHAVE_PIECES\r\npartial"[..]);

        assert_eq!(Some("OK".to_string()), read_line(&mut reader).await.unwrap());
        assert_eq!(
            Some("HAVE_PIECES".to_string()),
            read_line(&mut reader).await.unwrap()
        );
        assert!(matches!(
            read_line(&mut reader).await,
            Err(Error::Protocol(_))
        ));
        assert_eq!(None, read_line(&mut reader).await.unwrap());
    }

    #[tokio::test]
    async fn oversized_line_is_framing_error() {
        let long = vec![b'a'; MAX_CONTROL_LINE_LEN * 2];
        let mut reader = BufReader::new(long.as_slice());

        assert!(matches!(
            read_line(&mut reader).await,
            Err(Error::Protocol(_))
        ));
    }
}
