//! Keeper configuration.

use serde::{Deserialize, Serialize};

use vaultkeeper_perms::KdfParams;
use vaultkeeper_share::{EngineConfig, WorkerConfig};

use crate::error::{KeeperError, Result};

/// Configuration for the Keeper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// Share process execution.
    pub engine: EngineConfig,
    /// Background job worker.
    pub worker: WorkerConfig,
    /// Argon2id cost for passphrase locking.
    pub kdf: KdfParams,
}

impl KeeperConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| KeeperError::Config(e.to_string()))
    }

    /// Cheap key derivation and small batches. For tests only.
    pub fn insecure_for_tests() -> Self {
        Self {
            engine: EngineConfig {
                batch_size: 50,
                ..EngineConfig::default()
            },
            kdf: KdfParams::fast_insecure(),
            ..Self::default()
        }
    }
}
