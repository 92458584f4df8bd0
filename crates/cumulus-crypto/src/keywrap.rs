//! Wrapping of per-object keys under the master key.
//!
//! Wire format: `[16-byte random IV][AES-256-CTR ciphertext]`, so the wrapped
//! form is exactly 16 bytes longer than the plaintext.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::masterkey::MasterKey;
use crate::{CryptoError, IV_SIZE};

pub(crate) type Aes256Ctr = Ctr128BE<Aes256>;

/// Encrypt `plaintext` under the master key with a freshly drawn IV.
pub fn wrap_key(master_key: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let mut cipher = Aes256Ctr::new_from_slices(master_key, &iv)
        .map_err(|e| CryptoError::MasterKeyInvalid(e.to_string()))?;

    let mut out = Vec::with_capacity(IV_SIZE + plaintext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(plaintext);
    cipher.apply_keystream(&mut out[IV_SIZE..]);
    Ok(out)
}

/// Decrypt a `[IV][ciphertext]` frame produced by [`wrap_key`].
pub fn unwrap_key(master_key: &MasterKey, wrapped: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if wrapped.len() < IV_SIZE {
        return Err(CryptoError::WrappedKeyTooShort(wrapped.len()));
    }

    let (iv, ciphertext) = wrapped.split_at(IV_SIZE);
    let mut cipher = Aes256Ctr::new_from_slices(master_key, iv)
        .map_err(|e| CryptoError::MasterKeyInvalid(e.to_string()))?;

    let mut out = ciphertext.to_vec();
    cipher.apply_keystream(&mut out);
    Ok(out)
}
