//! Per-object encryption metadata and its persisted JSON form.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "aes-256-ctr")]
    Aes256Ctr,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Aes256Ctr => write!(f, "aes-256-ctr"),
        }
    }
}

/// Encryption parameters of one stored object.
///
/// `key` is the object key encrypted under the master key, framed
/// `[16-byte IV][ciphertext]`. `key_plaintext` is only ever held in memory;
/// it is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptMetadata {
    pub algorithm: Algorithm,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub key: Vec<u8>,
    #[serde(skip)]
    pub key_plaintext: Option<Vec<u8>>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(&encoded).map_err(serde::de::Error::custom)
    }
}
