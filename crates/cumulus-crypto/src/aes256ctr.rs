//! Seekable AES-256-CTR cipher filter over an encrypted byte stream.
//!
//! The keystream position is kept aligned with the absolute byte offset of
//! the underlying object: for position `P` the counter is the metadata IV
//! (as a 128-bit big-endian integer) plus `P / 16`, advanced by `P % 16`
//! discard bytes. This makes arbitrary-range reads of large objects possible
//! without decrypting from the start.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::keywrap::{wrap_key, Aes256Ctr};
use crate::masterkey::MasterKeyVault;
use crate::metadata::{Algorithm, EncryptMetadata};
use crate::{CryptoError, IV_SIZE, KEY_SIZE};

const BLOCK_SIZE: usize = 16;

/// A readable encrypted byte source, optionally seekable.
pub enum Source {
    Stream(Box<dyn Read + Send>),
    Seekable(Box<dyn ReadSeek + Send>),
}

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

impl Source {
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Source::Stream(Box::new(reader))
    }

    pub fn seekable(reader: impl Read + Seek + Send + 'static) -> Self {
        Source::Seekable(Box::new(reader))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Stream(reader) => reader.read(buf),
            Source::Seekable(reader) => reader.read(buf),
        }
    }
}

struct Active {
    source: Source,
    stream: Aes256Ctr,
}

/// Encrypt/decrypt cursor over one object.
///
/// Usage: [`load_metadata`](Self::load_metadata) (or
/// [`generate_metadata`](Self::generate_metadata) +
/// [`load_metadata`](Self::load_metadata) for new objects), then
/// [`set_source`](Self::set_source), then `Read`/`Seek`. CTR encryption and
/// decryption are the same operation, so feeding plaintext through the
/// cursor produces ciphertext and vice versa.
pub struct Aes256CtrCryptor {
    vault: Arc<dyn MasterKeyVault>,
    metadata: Option<EncryptMetadata>,
    active: Option<Active>,
    /// Absolute byte offset of the object at which the source begins.
    counter_offset: u64,
    /// Bytes consumed since the source start.
    pos: u64,
    /// Total encrypted size, if known. Required for [`SeekFrom::End`].
    size: Option<u64>,
    eof: bool,
}

impl Aes256CtrCryptor {
    pub fn new(vault: Arc<dyn MasterKeyVault>) -> Self {
        Self {
            vault,
            metadata: None,
            active: None,
            counter_offset: 0,
            pos: 0,
            size: None,
            eof: false,
        }
    }

    /// Draw a fresh object key and IV and wrap the key under the master key.
    /// The returned metadata carries both the wrapped and the plaintext form.
    pub fn generate_metadata(&self) -> Result<EncryptMetadata, CryptoError> {
        let mut key = vec![0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);

        let mut iv = vec![0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let master_key = self.vault.master_key()?;
        let wrapped = wrap_key(&master_key, &key)?;

        Ok(EncryptMetadata {
            algorithm: Algorithm::Aes256Ctr,
            iv,
            key: wrapped,
            key_plaintext: Some(key),
        })
    }

    /// Load metadata, unwrapping the object key under the master key unless
    /// a plaintext key is already present.
    pub fn load_metadata(&mut self, metadata: &EncryptMetadata) -> Result<(), CryptoError> {
        if metadata.algorithm != Algorithm::Aes256Ctr {
            return Err(CryptoError::UnsupportedAlgorithm(
                metadata.algorithm.to_string(),
            ));
        }
        if metadata.iv.len() != IV_SIZE {
            return Err(CryptoError::MetadataInvalid(format!(
                "expected {IV_SIZE}-byte iv, got {}",
                metadata.iv.len()
            )));
        }

        let key_plaintext = match &metadata.key_plaintext {
            Some(key) => key.clone(),
            None => {
                let master_key = self.vault.master_key()?;
                crate::keywrap::unwrap_key(&master_key, &metadata.key)?
            }
        };
        if key_plaintext.len() != KEY_SIZE {
            return Err(CryptoError::MetadataInvalid(format!(
                "expected {KEY_SIZE}-byte key, got {}",
                key_plaintext.len()
            )));
        }

        self.metadata = Some(EncryptMetadata {
            algorithm: metadata.algorithm,
            iv: metadata.iv.clone(),
            key: metadata.key.clone(),
            key_plaintext: Some(key_plaintext),
        });
        Ok(())
    }

    /// Bind the encrypted source and align the keystream with absolute byte
    /// position `counter_offset`, the offset of the object at which the
    /// source begins.
    pub fn set_source(
        &mut self,
        source: Source,
        size: Option<u64>,
        counter_offset: u64,
    ) -> Result<(), CryptoError> {
        let stream = self.keystream_at(counter_offset)?;

        self.active = Some(Active { source, stream });
        self.counter_offset = counter_offset;
        self.pos = 0;
        self.size = size;
        self.eof = false;
        Ok(())
    }

    /// Current position relative to the source start.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Release the underlying source.
    pub fn close(&mut self) {
        self.active = None;
    }

    /// Keystream whose next output byte corresponds to absolute position
    /// `absolute` of the object.
    fn keystream_at(&self, absolute: u64) -> Result<Aes256Ctr, CryptoError> {
        let metadata = self.metadata.as_ref().ok_or(CryptoError::MetadataMissing)?;
        let key = metadata
            .key_plaintext
            .as_ref()
            .ok_or(CryptoError::MetadataMissing)?;

        let mut counter = [0u8; IV_SIZE];
        counter.copy_from_slice(&metadata.iv);
        increment_counter(&mut counter, absolute / BLOCK_SIZE as u64);

        let mut stream = Aes256Ctr::new_from_slices(key, &counter)
            .map_err(|e| CryptoError::MetadataInvalid(e.to_string()))?;

        // Advance within the block so the next keystream byte matches the
        // requested position exactly.
        let in_block = (absolute % BLOCK_SIZE as u64) as usize;
        if in_block > 0 {
            let mut discard = [0u8; BLOCK_SIZE];
            stream.apply_keystream(&mut discard[..in_block]);
        }

        Ok(stream)
    }
}

impl Read for Aes256CtrCryptor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| io::Error::other(CryptoError::SourceMissing))?;

        if self.eof {
            return Ok(0);
        }

        let n = active.source.read(buf)?;
        if n == 0 {
            self.eof = true;
            return Ok(0);
        }

        active.stream.apply_keystream(&mut buf[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for Aes256CtrCryptor {
    /// Seek within the decrypted view of the source. Requires a seekable
    /// source; [`SeekFrom::End`] additionally requires a known size. On
    /// error the cursor state is unchanged.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.metadata.is_none() {
            return Err(io::Error::other(CryptoError::MetadataMissing));
        }

        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => match self.size {
                Some(size) => size as i64 + delta,
                None => return Err(io::Error::other(CryptoError::SizeUnknown)),
            },
        };
        if new_pos < 0 {
            return Err(io::Error::other(CryptoError::NegativePosition(new_pos)));
        }
        let new_pos = new_pos as u64;
        let absolute = self.counter_offset + new_pos;

        let stream = self.keystream_at(absolute).map_err(io::Error::other)?;

        let active = self
            .active
            .as_mut()
            .ok_or_else(|| io::Error::other(CryptoError::SourceMissing))?;
        let seeker = match &mut active.source {
            Source::Seekable(seeker) => seeker,
            Source::Stream(_) => {
                return Err(io::Error::other(CryptoError::SourceNotSeekable));
            }
        };

        seeker.seek(SeekFrom::Start(absolute))?;
        active.stream = stream;
        self.pos = new_pos;
        self.eof = false;
        Ok(new_pos)
    }
}

/// Add `blocks` to a 128-bit big-endian counter in place, propagating carries
/// from the low byte upward. Overflow past the top byte wraps.
pub fn increment_counter(counter: &mut [u8; IV_SIZE], mut blocks: u64) {
    for i in (0..IV_SIZE).rev() {
        if blocks == 0 {
            break;
        }

        let sum = counter[i] as u64 + (blocks & 0xff);
        counter[i] = (sum & 0xff) as u8;
        blocks >>= 8;

        let mut carry = sum >> 8;
        let mut j = i;
        while carry > 0 && j > 0 {
            j -= 1;
            let sum = counter[j] as u64 + carry;
            counter[j] = (sum & 0xff) as u8;
            carry = sum >> 8;
        }
    }
}
