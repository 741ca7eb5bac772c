//! Work items for the asynchronous job facility.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{GroupId, ShareProcessId, VaultId};

/// A unit of background work.
///
/// Jobs carry identifiers only. Key material needed to execute a share
/// process is handed to the worker out of band and never queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    /// Execute a share process.
    ShareProcess(ShareProcessId),

    /// Reap unjustified partial grants.
    ///
    /// No vault sweeps every vault; empty `group_ids` means all groups.
    PartialAccessCleanup {
        vault_id: Option<VaultId>,
        group_ids: Vec<GroupId>,
    },
}

impl Job {
    /// Storage discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Job::ShareProcess(_) => "share_process",
            Job::PartialAccessCleanup { .. } => "partial_access_cleanup",
        }
    }

    /// Cleanup of a single vault, all groups.
    pub fn cleanup_vault(vault_id: VaultId) -> Self {
        Job::PartialAccessCleanup {
            vault_id: Some(vault_id),
            group_ids: Vec::new(),
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, CoreError> {
        serde_json::from_str(s).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_json_roundtrip() {
        let job = Job::PartialAccessCleanup {
            vault_id: Some(VaultId::new()),
            group_ids: vec![GroupId::new(), GroupId::new()],
        };
        let json = job.to_json().unwrap();
        assert_eq!(Job::from_json(&json).unwrap(), job);
    }

    #[test]
    fn test_job_kind() {
        assert_eq!(Job::ShareProcess(ShareProcessId::new()).kind(), "share_process");
        assert_eq!(Job::cleanup_vault(VaultId::new()).kind(), "partial_access_cleanup");
    }
}
