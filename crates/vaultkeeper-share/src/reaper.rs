//! Partial-access cleanup.
//!
//! Share processes and permission changes leave demoted rows behind on
//! vaults and folders. A demoted row is only useful while the group still
//! reaches something below it; the reaper deletes the rest.

use std::collections::BTreeSet;
use std::sync::Arc;

use vaultkeeper_core::{GroupId, VaultId};
use vaultkeeper_store::Store;

use crate::error::Result;

/// Summary of one cleanup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Vaults examined.
    pub vaults: usize,
    /// Demoted rows deleted.
    pub deleted: u64,
}

/// Deletes demoted grant rows that no longer lead to anything.
pub struct PartialAccessReaper<S: Store> {
    store: Arc<S>,
}

impl<S: Store> PartialAccessReaper<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Clean one vault, or every vault when `vault_id` is `None`.
    ///
    /// An empty `group_ids` considers every group.
    pub async fn clean_up(
        &self,
        vault_id: Option<VaultId>,
        group_ids: &[GroupId],
    ) -> Result<ReapReport> {
        let vaults = match vault_id {
            Some(id) => vec![id],
            None => self.store.list_vault_ids().await?,
        };
        let groups: Option<BTreeSet<GroupId>> =
            (!group_ids.is_empty()).then(|| group_ids.iter().copied().collect());

        let mut report = ReapReport::default();
        for vault_id in vaults {
            // Deleted since the job was queued.
            let Some(deleted) = self.store.reap_vault(vault_id, groups.as_ref()).await? else {
                continue;
            };
            report.vaults += 1;
            if deleted > 0 {
                tracing::info!(%vault_id, deleted, "partial access cleaned up");
            }
            report.deleted += deleted;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use vaultkeeper_core::{Access, NodeRef};
    use vaultkeeper_store::StoreExt;

    #[tokio::test]
    async fn test_dangling_demoted_rows_are_deleted() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let carol = fx.member("carol").await;
        // Bob's demoted vault row leads nowhere; carol's leads to her folder.
        let vault = fx
            .vault_with(&[
                (&alice, Access::write()),
                (&bob, Access::demoted()),
                (&carol, Access::demoted()),
            ])
            .await;
        let folder = fx.folder(&carol, vault, None).await;

        let reaper = PartialAccessReaper::new(fx.store.clone());
        let report = reaper.clean_up(Some(vault), &[]).await.unwrap();
        assert_eq!(report, ReapReport { vaults: 1, deleted: 1 });

        let graph = fx.store.require_graph(vault).await.unwrap();
        assert_eq!(graph.grant(NodeRef::Vault(vault), bob.group), None);
        assert_eq!(graph.grant(NodeRef::Vault(vault), carol.group), Some(Access::demoted()));
        assert_eq!(graph.grant(NodeRef::Folder(folder), carol.group), Some(Access::write()));
        assert_eq!(graph.grant(NodeRef::Vault(vault), alice.group), Some(Access::write()));
    }

    #[tokio::test]
    async fn test_group_filter_and_unscoped_run() {
        let fx = Fixture::new().await;
        let alice = fx.member("alice").await;
        let bob = fx.member("bob").await;
        let carol = fx.member("carol").await;
        let v1 = fx
            .vault_with(&[
                (&alice, Access::write()),
                (&bob, Access::demoted()),
                (&carol, Access::demoted()),
            ])
            .await;
        let v2 = fx.vault_with(&[(&alice, Access::write()), (&bob, Access::demoted())]).await;

        let reaper = PartialAccessReaper::new(fx.store.clone());
        let report = reaper.clean_up(None, &[bob.group]).await.unwrap();
        assert_eq!(report, ReapReport { vaults: 2, deleted: 2 });

        let g1 = fx.store.require_graph(v1).await.unwrap();
        assert_eq!(g1.grant(NodeRef::Vault(v1), carol.group), Some(Access::demoted()));
        let g2 = fx.store.require_graph(v2).await.unwrap();
        assert_eq!(g2.grant(NodeRef::Vault(v2), bob.group), None);

        // Nothing left for bob; a second run is a no-op.
        let again = reaper.clean_up(None, &[bob.group]).await.unwrap();
        assert_eq!(again.deleted, 0);
    }

    #[tokio::test]
    async fn test_missing_vault_is_skipped() {
        let fx = Fixture::new().await;
        let reaper = PartialAccessReaper::new(fx.store.clone());
        let report = reaper.clean_up(Some(VaultId::new()), &[]).await.unwrap();
        assert_eq!(report, ReapReport::default());
    }
}
