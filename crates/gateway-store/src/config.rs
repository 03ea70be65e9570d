use std::path::PathBuf;

use serde::{
    Deserialize,
    Serialize,
};
use sled::Config as DbConfig;
use tokio_util::sync::CancellationToken;

use crate::{
    StoreError,
    store::SledEpochBlockMapStore,
};

/// Settings of the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database directory, a temporary database is used when unset.
    pub path: Option<PathBuf>,
    /// Cache size in bytes.
    #[serde(default = "default_cache_capacity_bytes")]
    pub cache_capacity_bytes: usize,
}

const fn default_cache_capacity_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            cache_capacity_bytes: default_cache_capacity_bytes(),
        }
    }
}

impl StoreConfig {
    /// Opens the database, creating it when absent, and spawns its listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open_or_create(
        &self,
        cancel_token: CancellationToken,
    ) -> Result<SledEpochBlockMapStore, StoreError> {
        let db = match &self.path {
            Some(path) => {
                DbConfig::new()
                    .path(path.clone())
                    .cache_capacity_bytes(self.cache_capacity_bytes)
                    .open()?
            }
            None => DbConfig::tmp()?.open()?,
        };

        tracing::info!(path = ?self.path, "Opened epoch block map store");
        Ok(SledEpochBlockMapStore::spawn(db, cancel_token))
    }
}
