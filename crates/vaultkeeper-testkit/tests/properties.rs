//! Property tests over generated vault trees.

use std::collections::BTreeSet;

use proptest::prelude::*;
use proptest::sample::Index;

use vaultkeeper_core::{NodeRef, ScopeRef};
use vaultkeeper_perms::{
    open_payload, plan_cleanup, seal_payload, KeyVault, PermissionPropagator,
};
use vaultkeeper_testkit::generators::{blocks, grant_set, tree, writer};
use vaultkeeper_testkit::violations;

fn scope_at(tree: &vaultkeeper_testkit::GeneratedTree, pick: Index) -> ScopeRef {
    let n = tree.folders.len() + 1;
    match pick.index(n) {
        0 => ScopeRef::Vault(tree.graph.vault_id()),
        i => ScopeRef::Folder(tree.folders[i - 1]),
    }
}

proptest! {
    #[test]
    fn test_permission_diff_keeps_tree_valid(
        mut tree in tree(),
        pick in any::<Index>(),
        requested in grant_set(),
    ) {
        let scope = scope_at(&tree, pick);
        let caller = BTreeSet::from([writer()]);

        let diff = PermissionPropagator::new(&tree.graph)
            .diff(scope, &requested, &caller)
            .unwrap();
        diff.apply(&mut tree.graph);

        let found = violations(&tree.graph);
        prop_assert!(found.is_empty(), "violations: {:?}", found);
        for (group_id, access) in requested.iter() {
            let stored = tree.graph.grant(scope.into(), group_id);
            if access.partial {
                // Partial requests never create a row.
                prop_assert!(stored.map_or(true, |a| a.is_demoted()));
            } else {
                prop_assert_eq!(stored, Some(access));
            }
        }
    }

    #[test]
    fn test_diff_is_idempotent(
        mut tree in tree(),
        pick in any::<Index>(),
        requested in grant_set(),
    ) {
        let scope = scope_at(&tree, pick);
        let caller = BTreeSet::from([writer()]);

        let first = PermissionPropagator::new(&tree.graph)
            .diff(scope, &requested, &caller)
            .unwrap();
        first.apply(&mut tree.graph);
        let second = PermissionPropagator::new(&tree.graph)
            .diff(scope, &requested, &caller)
            .unwrap();

        prop_assert!(second.plan.add.is_empty());
        prop_assert!(second.ancestor_rows.is_empty());
    }

    #[test]
    fn test_cleanup_keeps_tree_valid_and_converges(mut tree in tree()) {
        let plan = plan_cleanup(&tree.graph, None);
        for (folder_id, group_id) in &plan.folder_rows {
            let access = tree.graph.grant(NodeRef::Folder(*folder_id), *group_id);
            prop_assert!(access.is_some_and(|a| a.is_demoted()));
        }
        plan.apply(&mut tree.graph);

        let found = violations(&tree.graph);
        prop_assert!(found.is_empty(), "violations: {:?}", found);
        prop_assert!(plan_cleanup(&tree.graph, None).is_empty());
    }

    #[test]
    fn test_cleanup_never_touches_the_writer(mut tree in tree()) {
        plan_cleanup(&tree.graph, None).apply(&mut tree.graph);
        for node in tree.nodes() {
            prop_assert!(tree.graph.grant(node, writer()).is_some_and(|a| a.is_full_write()));
        }
    }

    #[test]
    fn test_wrapped_content_key_opens_payload(plain in blocks(4, 256)) {
        let (group_secret, group_public) = KeyVault::generate_key_pair();
        let content_key = KeyVault::generate_content_key();
        let sealed = seal_payload(&content_key, &plain).unwrap();
        let wrapped = KeyVault::wrap_for_group(content_key.as_bytes(), &group_public).unwrap();

        let recovered = KeyVault::unwrap_content_key(&wrapped, &group_secret).unwrap();
        let opened = open_payload(&recovered, &sealed).unwrap();

        prop_assert_eq!(opened.len(), plain.len());
        for (got, want) in opened.iter().zip(&plain) {
            prop_assert_eq!(got.as_bytes(), want.as_slice());
        }
    }
}
