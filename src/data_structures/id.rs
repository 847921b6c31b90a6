use anyhow::{anyhow, bail, Result};
use openssl::sha;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

pub const ID_LEN: usize = 20;
pub const HEX_ID_LEN: usize = ID_LEN * 2;

/// 20-byte SHA-1 digest. Identifies a piece's content and, computed over the
/// encoded info dictionary, a whole shared file.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ID([u8; ID_LEN]);

impl ID {
    pub fn new(id_array: [u8; ID_LEN]) -> Self {
        Self(id_array)
    }

    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = sha::Sha1::new();
        hasher.update(data);
        Self(hasher.finish())
    }

    pub fn as_byte_ref(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        if encoded.len() != HEX_ID_LEN {
            bail!("hex id must be {} chars long, got {}", HEX_ID_LEN, encoded.len());
        }

        let mut rv = [0u8; ID_LEN];
        hex::decode_to_slice(encoded, &mut rv)
            .map_err(|e| anyhow!("bad hex id {encoded:?}: {e}"))?;

        Ok(Self(rv))
    }
}

impl FromStr for ID {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<&[u8]> for ID {
    type Error = anyhow::Error;

    fn try_from(buf: &[u8]) -> Result<Self> {
        let arr: [u8; ID_LEN] = buf
            .try_into()
            .map_err(|_| anyhow!("id must be {} bytes long, got {}", ID_LEN, buf.len()))?;

        Ok(Self(arr))
    }
}

impl Serialize for ID {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for ID {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = ID;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("20 byte string")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ID::try_from(v).map_err(|_| serde::de::Error::invalid_length(v.len(), &self))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut rv = [0u8; ID_LEN];

                for (i, byte) in rv.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }

                Ok(ID(rv))
            }
        }

        deserializer.deserialize_byte_buf(Visitor {})
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID({})", self.to_hex())
    }
}
