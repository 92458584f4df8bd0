//! Encryption of object bodies at rest.
//!
//! Every object gets a fresh 32-byte AES-256-CTR key, wrapped under a
//! deployment-wide master key obtained from a [`MasterKeyVault`]. The
//! [`Aes256CtrCryptor`] is a seekable cipher filter over an encrypted byte
//! stream: its keystream position always matches the absolute byte offset of
//! the underlying object, so arbitrary ranges of large objects can be read
//! without decrypting a prefix.

pub mod aes256ctr;
pub mod keywrap;
pub mod masterkey;
pub mod metadata;

mod error;

use std::sync::Arc;

pub use aes256ctr::{increment_counter, Aes256CtrCryptor, Source};
pub use error::CryptoError;
pub use keywrap::{unwrap_key, wrap_key};
pub use masterkey::{
    EnvMasterKeyVault, FileMasterKeyVault, MasterKey, MasterKeyVault, StaticMasterKeyVault,
    MASTER_KEY_ENV,
};
pub use metadata::{Algorithm, EncryptMetadata};

/// File key size in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// IV size in bytes (one AES block)
pub const IV_SIZE: usize = 16;

/// Construct a cryptor for the given algorithm.
pub fn new_cryptor(
    algorithm: Algorithm,
    vault: Arc<dyn MasterKeyVault>,
) -> Result<Aes256CtrCryptor, CryptoError> {
    match algorithm {
        Algorithm::Aes256Ctr => Ok(Aes256CtrCryptor::new(vault)),
    }
}
