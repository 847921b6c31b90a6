use crate::data_structures::{ID, ID_LEN};
use crate::error::{Error, Result};
use crate::{ok_or_missing_field, unsigned_ceil_div};
use anyhow::anyhow;
use bendy::decoding::{FromBencode, Object};
use bendy::encoding::{AsString, SingleItemEncoder, ToBencode};
use std::fmt;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub name: String,
    pub piece_length: u64,
    pub pieces: Vec<ID>,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    pub info: Info,
    pub info_hash: ID,
    pub announce: Option<String>,
}

/// Fills `window` from `reader`, stopping early only at end of input.
pub async fn read_window<R>(reader: &mut R, window: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;

    while filled < window.len() {
        match reader.read(&mut window[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }

    Ok(filled)
}

impl Info {
    /// Hashes `path` one `piece_length` window at a time.
    pub async fn split(path: impl AsRef<Path>, piece_length: u64) -> Result<Info> {
        let path = path.as_ref();

        if piece_length == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "piece length must be positive",
            )));
        }

        let mut file = File::open(path).await?;
        let expected_length = file.metadata().await?.len();

        let mut window = vec![0u8; piece_length as usize];
        let mut pieces = Vec::with_capacity(unsigned_ceil_div!(expected_length, piece_length) as usize);
        let mut length = 0;

        loop {
            let filled = read_window(&mut file, &mut window).await?;

            if filled == 0 {
                break;
            }

            pieces.push(ID::digest(&window[..filled]));
            length += filled as u64;

            if filled < window.len() {
                break;
            }
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Info {
            name,
            piece_length,
            pieces,
            length,
        })
    }

    pub fn number_of_pieces(&self) -> usize {
        self.pieces.len()
    }

    pub fn piece_offset(&self, index: usize) -> u64 {
        index as u64 * self.piece_length
    }

    pub fn piece_size(&self, index: usize) -> Option<u64> {
        match index {
            idx if idx + 1 < self.pieces.len() => Some(self.piece_length),
            idx if idx + 1 == self.pieces.len() => Some(self.length - self.piece_offset(idx)),
            _ => None,
        }
    }

    /// SHA-1 of the bencoded info dictionary. Announce is not part of it, so
    /// metadata created by different origins for the same file compares equal.
    pub fn content_id(&self) -> anyhow::Result<ID> {
        let encoded = self
            .to_bencode()
            .map_err(|e| anyhow!("info dictionary can't be encoded: {e:?}"))?;

        Ok(ID::digest(&encoded))
    }

    fn check_consistency(&self) -> std::result::Result<(), bendy::decoding::Error> {
        if self.piece_length == 0 {
            return Err(bendy::decoding::Error::missing_field(
                "Info::piece_length must be positive",
            ));
        }

        let expected = unsigned_ceil_div!(self.length, self.piece_length);

        if expected != self.pieces.len() as u64 {
            return Err(bendy::decoding::Error::missing_field(format!(
                "Info::pieces has {} hashes but length={} and piece length={} need {}",
                self.pieces.len(),
                self.length,
                self.piece_length,
                expected
            )));
        }

        Ok(())
    }
}

fn deserialize_pieces(raw: Vec<u8>) -> std::result::Result<Vec<ID>, bendy::decoding::Error> {
    if raw.len() % ID_LEN > 0 {
        return Err(bendy::decoding::Error::missing_field(format!(
            "Info::pieces must be 20-byte SHA1 hash values but it has len={}",
            raw.len()
        )));
    }

    raw.chunks_exact(ID_LEN)
        .map(|chunk| {
            ID::try_from(chunk).map_err(|e| bendy::decoding::Error::missing_field(e.to_string()))
        })
        .collect()
}

fn serialize_pieces(pieces: &[ID]) -> Vec<u8> {
    pieces
        .iter()
        .flat_map(|id| id.as_byte_ref().iter().copied())
        .collect()
}

impl FromBencode for Info {
    const EXPECTED_RECURSION_DEPTH: usize = 10;

    fn decode_bencode_object(object: Object) -> std::result::Result<Self, bendy::decoding::Error> {
        let mut piece_length = None;
        let mut pieces = None;
        let mut length = None;
        let mut name = None;

        let mut info = object.try_into_dictionary()?;
        while let Some(kv) = info.next_pair()? {
            match kv {
                (b"name", value) => {
                    name = Some(String::decode_bencode_object(value)?);
                }
                (b"pieces", value) => {
                    pieces = {
                        let raw = AsString::decode_bencode_object(value)?.0;
                        Some(deserialize_pieces(raw)?)
                    };
                }
                (b"length", value) => {
                    length = Some(u64::decode_bencode_object(value)?);
                }
                (b"piece length", value) => {
                    piece_length = Some(u64::decode_bencode_object(value)?);
                }
                _ => (),
            }
        }

        let info = Info {
            piece_length: ok_or_missing_field!(piece_length)?,
            pieces: ok_or_missing_field!(pieces)?,
            name: ok_or_missing_field!(name)?,
            length: ok_or_missing_field!(length)?,
        };

        info.check_consistency()?;

        Ok(info)
    }
}

impl ToBencode for Info {
    const MAX_DEPTH: usize = 1;

    // keys in byte order: "piece length" sorts before "pieces"
    fn encode(&self, encoder: SingleItemEncoder) -> std::result::Result<(), bendy::encoding::Error> {
        encoder.emit_dict(|mut e| {
            e.emit_pair(b"length", self.length)?;
            e.emit_pair(b"name", &self.name)?;
            e.emit_pair(b"piece length", self.piece_length)?;
            e.emit_pair(b"pieces", AsString(serialize_pieces(&self.pieces)))?;
            Ok(())
        })
    }
}

impl FromBencode for Torrent {
    const EXPECTED_RECURSION_DEPTH: usize = 10;

    fn decode_bencode_object(object: Object) -> std::result::Result<Self, bendy::decoding::Error> {
        let mut info = None;
        let mut announce = None;

        let mut torrent = object.try_into_dictionary()?;
        while let Some(kv) = torrent.next_pair()? {
            match kv {
                (b"info", value) => {
                    info = Some(Info::decode_bencode_object(value)?);
                }
                (b"announce", value) => {
                    announce = Some(String::decode_bencode_object(value)?);
                }
                _ => (),
            }
        }

        let info = ok_or_missing_field!(info)?;
        let info_hash = info
            .content_id()
            .map_err(|e| bendy::decoding::Error::missing_field(e.to_string()))?;

        Ok(Torrent {
            info,
            info_hash,
            announce,
        })
    }
}

impl ToBencode for Torrent {
    const MAX_DEPTH: usize = 2;

    fn encode(&self, encoder: SingleItemEncoder) -> std::result::Result<(), bendy::encoding::Error> {
        encoder.emit_dict(|mut e| {
            if let Some(announce) = &self.announce {
                e.emit_pair(b"announce", announce)?;
            }
            e.emit_pair(b"info", &self.info)?;
            Ok(())
        })
    }
}

impl Torrent {
    pub fn new(info: Info, announce: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            info_hash: info.content_id()?,
            info,
            announce,
        })
    }

    pub async fn create(
        path: impl AsRef<Path>,
        piece_length: u64,
        announce: Option<String>,
    ) -> anyhow::Result<Self> {
        let info = Info::split(path, piece_length).await?;

        Self::new(info, announce)
    }

    pub fn from_buffer(buffer: &[u8]) -> anyhow::Result<Self> {
        Torrent::from_bencode(buffer).map_err(|e| anyhow!("metainfo: not bencoded ({e:?})"))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut buffer = Vec::new();

        let mut file = File::open(path).await?;
        file.read_to_end(&mut buffer).await?;

        Self::from_buffer(buffer.as_slice())
    }

    pub async fn write_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let encoded = self
            .to_bencode()
            .map_err(|e| anyhow!("metainfo can't be encoded: {e:?}"))?;

        let mut file = File::create(path).await?;
        file.write_all(&encoded).await?;
        file.flush().await?;

        Ok(())
    }

    pub fn count_pieces(&self) -> usize {
        self.info.number_of_pieces()
    }
}

impl fmt::Display for Torrent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "announce:\t{}\n\
            name:\t\t{}\n\
            info hash:\t{}\n\
            piece length:\t{}\n\
            piece count:\t{}\n\
            length:\t\t{}\n",
            self.announce.as_deref().unwrap_or("-"),
            self.info.name,
            self.info_hash,
            self.info.piece_length,
            self.info.pieces.len(),
            self.info.length,
        )
    }
}
