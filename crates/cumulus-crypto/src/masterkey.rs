//! Sources for the deployment-wide master encryption key.

use std::path::PathBuf;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::{CryptoError, KEY_SIZE};

/// Environment variable holding the base64-encoded master key.
pub const MASTER_KEY_ENV: &str = "CR_ENCRYPT_MASTER_KEY";

pub type MasterKey = [u8; KEY_SIZE];

/// Provider of the master key under which per-object keys are wrapped.
///
/// Implementations are safe for concurrent use; lookups are cached
/// write-once in process.
pub trait MasterKeyVault: Send + Sync {
    fn master_key(&self) -> Result<MasterKey, CryptoError>;
}

/// Vault backed by the settings store: the key is handed over at
/// construction time, already decoded.
pub struct StaticMasterKeyVault {
    key: MasterKey,
}

impl StaticMasterKeyVault {
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            key: decode_master_key(encoded)?,
        })
    }
}

impl MasterKeyVault for StaticMasterKeyVault {
    fn master_key(&self) -> Result<MasterKey, CryptoError> {
        Ok(self.key)
    }
}

/// Vault reading the base64-encoded key from [`MASTER_KEY_ENV`].
#[derive(Default)]
pub struct EnvMasterKeyVault {
    cache: OnceLock<MasterKey>,
}

impl EnvMasterKeyVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MasterKeyVault for EnvMasterKeyVault {
    fn master_key(&self) -> Result<MasterKey, CryptoError> {
        if let Some(key) = self.cache.get() {
            return Ok(*key);
        }

        let encoded = std::env::var(MASTER_KEY_ENV).map_err(|_| CryptoError::MasterKeyMissing)?;
        if encoded.is_empty() {
            return Err(CryptoError::MasterKeyMissing);
        }

        let key = decode_master_key(&encoded)?;
        Ok(*self.cache.get_or_init(|| key))
    }
}

/// Vault reading the base64-encoded key from a file.
pub struct FileMasterKeyVault {
    path: PathBuf,
    cache: OnceLock<MasterKey>,
}

impl FileMasterKeyVault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: OnceLock::new(),
        }
    }
}

impl MasterKeyVault for FileMasterKeyVault {
    fn master_key(&self) -> Result<MasterKey, CryptoError> {
        if let Some(key) = self.cache.get() {
            return Ok(*key);
        }

        let encoded = std::fs::read_to_string(&self.path)
            .map_err(|e| CryptoError::MasterKeyInvalid(format!("unreadable key file: {e}")))?;

        let key = decode_master_key(&encoded)?;
        Ok(*self.cache.get_or_init(|| key))
    }
}

fn decode_master_key(encoded: &str) -> Result<MasterKey, CryptoError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::MasterKeyInvalid(e.to_string()))?;

    MasterKey::try_from(bytes.as_slice()).map_err(|_| {
        CryptoError::MasterKeyInvalid(format!("expected {KEY_SIZE} bytes, got {}", bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn static_vault_returns_the_key() {
        let vault = StaticMasterKeyVault::new([7u8; KEY_SIZE]);
        assert_eq!(vault.master_key().unwrap(), [7u8; KEY_SIZE]);
    }

    #[test]
    fn static_vault_decodes_base64() {
        let encoded = BASE64.encode([0xABu8; KEY_SIZE]);
        let vault = StaticMasterKeyVault::from_base64(&encoded).unwrap();
        assert_eq!(vault.master_key().unwrap(), [0xABu8; KEY_SIZE]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let encoded = BASE64.encode([1u8; 16]);
        assert!(StaticMasterKeyVault::from_base64(&encoded).is_err());
    }

    #[test]
    fn garbage_base64_is_rejected() {
        assert!(StaticMasterKeyVault::from_base64("!!! not base64 !!!").is_err());
    }

    #[test]
    fn file_vault_reads_and_caches() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", BASE64.encode([0x42u8; KEY_SIZE])).unwrap();

        let vault = FileMasterKeyVault::new(file.path());
        assert_eq!(vault.master_key().unwrap(), [0x42u8; KEY_SIZE]);

        // Cached: deleting the file no longer matters.
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
        assert_eq!(vault.master_key().unwrap(), [0x42u8; KEY_SIZE]);
    }

    #[test]
    fn file_vault_missing_file_errors() {
        let vault = FileMasterKeyVault::new("/nonexistent/master.key");
        assert!(vault.master_key().is_err());
    }

    #[test]
    fn env_vault_reads_the_variable() {
        // Run the unset and set cases in one test; the variable is process
        // global.
        std::env::remove_var(MASTER_KEY_ENV);
        let vault = EnvMasterKeyVault::new();
        assert!(matches!(
            vault.master_key(),
            Err(CryptoError::MasterKeyMissing)
        ));

        std::env::set_var(MASTER_KEY_ENV, BASE64.encode([9u8; KEY_SIZE]));
        let vault = EnvMasterKeyVault::new();
        assert_eq!(vault.master_key().unwrap(), [9u8; KEY_SIZE]);
        std::env::remove_var(MASTER_KEY_ENV);
    }
}
