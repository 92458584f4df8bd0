use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use cumulus_crypto::{
    EnvMasterKeyVault, FileMasterKeyVault, MasterKeyVault, StaticMasterKeyVault,
};
use cumulus_shared::constants::DEFAULT_HTTP_PORT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterKeyVaultKind {
    /// Key carried in the settings store (`MASTER_KEY`, base64).
    Setting,
    /// Key read from the `CR_ENCRYPT_MASTER_KEY` environment variable.
    Env,
    /// Key read from the file named by `MASTER_KEY_FILE`.
    File,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    /// Overrides the platform data directory for the database and objects.
    pub data_dir: Option<PathBuf>,
    pub instance_name: String,
    pub master_key_vault: MasterKeyVaultKind,
    pub master_key: Option<String>,
    pub master_key_file: Option<PathBuf>,
    /// API token granted to the bootstrap admin user on first start.
    pub bootstrap_token: Option<String>,
    pub max_object_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            data_dir: None,
            instance_name: "Cumulus".to_string(),
            master_key_vault: MasterKeyVaultKind::Setting,
            master_key: None,
            master_key_file: None,
            bootstrap_token: None,
            max_object_size: 256 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(path) = std::env::var("DATA_DIR") {
            config.data_dir = Some(PathBuf::from(path));
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(kind) = std::env::var("MASTER_KEY_VAULT") {
            match kind.as_str() {
                "setting" => config.master_key_vault = MasterKeyVaultKind::Setting,
                "env" => config.master_key_vault = MasterKeyVaultKind::Env,
                "file" => config.master_key_vault = MasterKeyVaultKind::File,
                other => tracing::warn!(
                    value = %other,
                    "Unknown MASTER_KEY_VAULT (expected setting/env/file), using default"
                ),
            }
        }

        if let Ok(key) = std::env::var("MASTER_KEY") {
            if !key.is_empty() {
                config.master_key = Some(key);
            }
        }

        if let Ok(path) = std::env::var("MASTER_KEY_FILE") {
            config.master_key_file = Some(PathBuf::from(path));
        }

        if let Ok(token) = std::env::var("BOOTSTRAP_TOKEN") {
            if !token.is_empty() {
                config.bootstrap_token = Some(token);
            }
        }

        if let Ok(val) = std::env::var("MAX_OBJECT_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_object_size = n;
            }
        }

        config
    }

    /// Build the master key vault selected by the configuration.
    pub fn master_key_vault(&self) -> anyhow::Result<Arc<dyn MasterKeyVault>> {
        match self.master_key_vault {
            MasterKeyVaultKind::Setting => {
                let encoded = self
                    .master_key
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("MASTER_KEY is not set"))?;
                Ok(Arc::new(StaticMasterKeyVault::from_base64(encoded)?))
            }
            MasterKeyVaultKind::Env => Ok(Arc::new(EnvMasterKeyVault::new())),
            MasterKeyVaultKind::File => {
                let path = self
                    .master_key_file
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("MASTER_KEY_FILE is not set"))?;
                Ok(Arc::new(FileMasterKeyVault::new(path.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into());
        assert_eq!(config.master_key_vault, MasterKeyVaultKind::Setting);
    }

    #[test]
    fn setting_vault_requires_a_key() {
        let config = ServerConfig::default();
        assert!(config.master_key_vault().is_err());
    }

    #[test]
    fn setting_vault_decodes_the_key() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;

        let config = ServerConfig {
            master_key: Some(STANDARD.encode([0x55u8; 32])),
            ..ServerConfig::default()
        };
        let vault = config.master_key_vault().unwrap();
        assert_eq!(vault.master_key().unwrap(), [0x55u8; 32]);
    }

    #[test]
    fn file_vault_requires_a_path() {
        let config = ServerConfig {
            master_key_vault: MasterKeyVaultKind::File,
            ..ServerConfig::default()
        };
        assert!(config.master_key_vault().is_err());
    }
}
