use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::EngineSettings;
use crate::error::{Error, Result};
use crate::store::{MemoryStore, Store};

/// Where network state lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local, lost on exit.
    Memory,
    /// Process-local, snapshotted to a JSON file on every write.
    File { path: PathBuf },
    /// etcd v3 cluster. Requires the `etcd` cargo feature.
    Etcd { endpoints: Vec<String> },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("kvlease-store.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub request_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub pool_lease_ttl_seconds: u64,
    pub commit_attempts: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            request_timeout_ms: 2000,
            store_timeout_ms: 500,
            pool_lease_ttl_seconds: 3600,
            commit_attempts: 3,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path).await?;
            Ok(config)
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.store_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.store_timeout_ms > self.request_timeout_ms {
            return Err(Error::InvalidConfig(
                "store_timeout_ms must not exceed request_timeout_ms".to_string(),
            ));
        }

        if self.pool_lease_ttl_seconds == 0 {
            return Err(Error::InvalidConfig(
                "pool_lease_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.commit_attempts == 0 {
            return Err(Error::InvalidConfig(
                "commit_attempts must be greater than 0".to_string(),
            ));
        }

        match &self.store {
            StoreConfig::Memory => {}
            StoreConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::InvalidConfig(
                        "file store path must not be empty".to_string(),
                    ));
                }
            }
            StoreConfig::Etcd { endpoints } => {
                if endpoints.is_empty() {
                    return Err(Error::InvalidConfig(
                        "etcd store needs at least one endpoint".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            pool_lease_ttl: Duration::from_secs(self.pool_lease_ttl_seconds),
            commit_attempts: self.commit_attempts,
        }
    }

    /// Opens the configured store backend.
    pub async fn open_store(&self) -> Result<Arc<dyn Store>> {
        match &self.store {
            StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreConfig::File { path } => Ok(Arc::new(MemoryStore::open(path).await?)),
            #[cfg(feature = "etcd")]
            StoreConfig::Etcd { endpoints } => Ok(Arc::new(
                crate::store::EtcdStore::connect(endpoints).await?,
            )),
            #[cfg(not(feature = "etcd"))]
            StoreConfig::Etcd { .. } => Err(Error::InvalidConfig(
                "etcd backend requires building with the `etcd` feature".to_string(),
            )),
        }
    }
}
