//! Proptest generators for property-based testing.
//!
//! Generated vault trees always satisfy the tree invariants: group 0 holds
//! write on every node, and every extra grant comes with demoted rows on
//! the ancestors that lack one.

use proptest::prelude::*;
use proptest::sample::Index;
use uuid::Uuid;

use vaultkeeper_core::{Access, FolderId, GrantRequest, GroupId, NodeRef, SecretId, VaultId};
use vaultkeeper_perms::{missing_ancestor_rows, AccessGraph, GrantSet};

/// Number of groups a generated graph draws from, the writer included.
pub const GROUPS: usize = 4;

/// A deterministic group id for index `n`.
pub fn group(n: usize) -> GroupId {
    GroupId::from(Uuid::from_u128(n as u128 + 1))
}

/// The group that writes every node of a generated graph.
pub fn writer() -> GroupId {
    group(0)
}

/// Generate an access level, demoted rows included.
pub fn access() -> impl Strategy<Value = Access> {
    prop_oneof![
        Just(Access::write()),
        Just(Access::read()),
        Just(Access::demoted()),
    ]
}

/// Generate a permission request for one group.
pub fn grant_request(group_id: GroupId) -> impl Strategy<Value = GrantRequest> {
    prop_oneof![
        Just(GrantRequest::write(group_id)),
        Just(GrantRequest::read(group_id)),
        Just(GrantRequest::partial(group_id)),
    ]
}

/// Generate plaintext blocks for a secret payload.
pub fn blocks(max_blocks: usize, max_len: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..=max_len), 1..=max_blocks)
}

/// Parameters for generating a vault tree.
#[derive(Debug, Clone)]
pub struct GraphParams {
    /// Parent of folder `i`; `Some(j)` points at an earlier folder.
    pub folder_parents: Vec<Option<Index>>,
    /// Containing folder of each secret.
    pub secret_folders: Vec<Option<Index>>,
    /// Extra grants as (node, group 1.., access).
    pub extra_grants: Vec<(Index, usize, Access)>,
}

impl Arbitrary for GraphParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            prop::collection::vec(any::<Option<Index>>(), 0..8),
            prop::collection::vec(any::<Option<Index>>(), 0..12),
            prop::collection::vec((any::<Index>(), 1..GROUPS, access()), 0..16),
        )
            .prop_map(|(folder_parents, secret_folders, extra_grants)| GraphParams {
                folder_parents,
                secret_folders,
                extra_grants,
            })
            .boxed()
    }
}

/// A generated tree together with its node list.
#[derive(Debug, Clone)]
pub struct GeneratedTree {
    pub graph: AccessGraph,
    pub folders: Vec<FolderId>,
    pub secrets: Vec<SecretId>,
}

impl GeneratedTree {
    /// Every node, the vault first.
    pub fn nodes(&self) -> Vec<NodeRef> {
        let mut nodes = vec![NodeRef::Vault(self.graph.vault_id())];
        nodes.extend(self.folders.iter().map(|id| NodeRef::Folder(*id)));
        nodes.extend(self.secrets.iter().map(|id| NodeRef::Secret(*id)));
        nodes
    }
}

/// Build a vault tree from parameters.
pub fn tree_from_params(params: &GraphParams) -> GeneratedTree {
    let vault_id = VaultId::from(Uuid::from_u128(u128::MAX));
    let mut graph = AccessGraph::new(vault_id, None);
    graph.set_grant(NodeRef::Vault(vault_id), writer(), Access::write());

    let mut folders = Vec::with_capacity(params.folder_parents.len());
    for (i, parent) in params.folder_parents.iter().enumerate() {
        let id = FolderId::from(Uuid::from_u128(1_000 + i as u128));
        let parent = parent.filter(|_| i > 0).map(|p| folders[p.index(i)]);
        graph.add_folder(id, parent);
        graph.set_grant(NodeRef::Folder(id), writer(), Access::write());
        folders.push(id);
    }

    let mut secrets = Vec::with_capacity(params.secret_folders.len());
    for (i, folder) in params.secret_folders.iter().enumerate() {
        let id = SecretId::from(Uuid::from_u128(2_000 + i as u128));
        let folder = folder
            .filter(|_| !folders.is_empty())
            .map(|f| folders[f.index(folders.len())]);
        graph.add_secret(id, folder);
        graph.set_grant(NodeRef::Secret(id), writer(), Access::write());
        secrets.push(id);
    }

    let mut tree = GeneratedTree {
        graph,
        folders,
        secrets,
    };
    let nodes = tree.nodes();
    for (node, n, access) in &params.extra_grants {
        let node = nodes[node.index(nodes.len())];
        let access = match node {
            // Secrets carry no partial rows.
            NodeRef::Secret(_) if access.partial => Access::read(),
            _ => *access,
        };
        let group_id = group(*n);
        tree.graph.set_grant(node, group_id, access);
        for row in missing_ancestor_rows(&tree.graph, node, [group_id]) {
            tree.graph.set_grant(row.node, row.group_id, row.access);
        }
    }
    tree
}

/// Generate a valid vault tree.
pub fn tree() -> impl Strategy<Value = GeneratedTree> {
    any::<GraphParams>().prop_map(|params| tree_from_params(&params))
}

/// Generate a resolved grant set that keeps the writer.
pub fn grant_set() -> impl Strategy<Value = GrantSet> {
    prop::collection::vec(prop::option::of(access()), GROUPS - 1).prop_map(|extra| {
        let entries = extra
            .into_iter()
            .enumerate()
            .filter_map(|(i, access)| access.map(|a| (group(i + 1), a)));
        GrantSet::from_groups(std::iter::once((writer(), Access::write())).chain(entries))
    })
}
