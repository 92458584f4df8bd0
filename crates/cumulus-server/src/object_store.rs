//! On-disk store for encrypted object bodies and their metadata sidecars.
//!
//! Bodies are written as `<uuid>.enc`; the encryption parameters live next
//! to them in `<uuid>.meta.json` (algorithm, base64 IV, base64 wrapped key;
//! the plaintext key is never serialized).

use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use cumulus_crypto::EncryptMetadata;

use crate::error::ServerError;

#[derive(Debug, Clone)]
pub struct ObjectStore {
    base_path: PathBuf,
    max_size: usize,
}

impl ObjectStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::ObjectStorage(format!(
                "Failed to create object directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Object store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Store an encrypted body with its metadata; returns the object id.
    pub async fn store_object(
        &self,
        ciphertext: &[u8],
        metadata: &EncryptMetadata,
    ) -> Result<Uuid, ServerError> {
        if ciphertext.is_empty() {
            return Err(ServerError::ObjectStorage("Empty object".to_string()));
        }
        if ciphertext.len() > self.max_size {
            return Err(ServerError::ObjectTooLarge {
                size: ciphertext.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let metadata_json = serde_json::to_vec(metadata)
            .map_err(|e| ServerError::ObjectStorage(format!("Failed to encode metadata: {e}")))?;

        fs::write(self.metadata_path(&id), metadata_json)
            .await
            .map_err(|e| {
                ServerError::ObjectStorage(format!("Failed to write metadata {id}: {e}"))
            })?;
        fs::write(self.body_path(&id), ciphertext)
            .await
            .map_err(|e| ServerError::ObjectStorage(format!("Failed to write object {id}: {e}")))?;

        debug!(id = %id, size = ciphertext.len(), "Stored object");
        Ok(id)
    }

    /// Load the metadata sidecar of an object.
    pub async fn read_metadata(&self, id: Uuid) -> Result<EncryptMetadata, ServerError> {
        let path = self.metadata_path(&id);
        if !path.exists() {
            return Err(ServerError::ObjectNotFound(id));
        }

        let raw = fs::read(&path)
            .await
            .map_err(|e| ServerError::ObjectStorage(format!("Failed to read metadata {id}: {e}")))?;
        serde_json::from_slice(&raw)
            .map_err(|e| ServerError::ObjectStorage(format!("Corrupt metadata {id}: {e}")))
    }

    /// Size of the encrypted body in bytes.
    pub async fn body_size(&self, id: Uuid) -> Result<u64, ServerError> {
        let path = self.body_path(&id);
        if !path.exists() {
            return Err(ServerError::ObjectNotFound(id));
        }
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| ServerError::ObjectStorage(format!("Failed to stat object {id}: {e}")))?;
        Ok(meta.len())
    }

    pub async fn delete_object(&self, id: Uuid) -> Result<(), ServerError> {
        let body = self.body_path(&id);
        if !body.exists() {
            return Err(ServerError::ObjectNotFound(id));
        }

        fs::remove_file(&body)
            .await
            .map_err(|e| ServerError::ObjectStorage(format!("Failed to delete object {id}: {e}")))?;
        fs::remove_file(self.metadata_path(&id)).await.map_err(|e| {
            ServerError::ObjectStorage(format!("Failed to delete metadata {id}: {e}"))
        })?;

        debug!(id = %id, "Deleted object");
        Ok(())
    }

    /// Path of the encrypted body; the caller opens it for seekable reads.
    pub fn body_path(&self, id: &Uuid) -> PathBuf {
        self.base_path.join(format!("{id}.enc"))
    }

    fn metadata_path(&self, id: &Uuid) -> PathBuf {
        self.base_path.join(format!("{id}.meta.json"))
    }
}
