//! In-memory snapshot of one vault's tree and its grants.
//!
//! The graph is an arena: folders and secrets are addressed by id and point
//! at their parent by id. It only ever contains live nodes and grants of
//! live groups; tombstoned rows are filtered out when the snapshot is loaded.
//!
//! Walks over the tree are iterative and keep a visited set, so malformed
//! parent pointers (cycles) terminate.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use vaultkeeper_core::{Access, FolderId, GroupId, NodeRef, ScopeRef, SecretId, UserId, VaultId};

/// Grants on one node, keyed by group.
pub type Grants = BTreeMap<GroupId, Access>;

#[derive(Debug, Clone)]
struct FolderNode {
    parent: Option<FolderId>,
    grants: Grants,
}

#[derive(Debug, Clone)]
struct SecretNode {
    folder: Option<FolderId>,
    /// Secret grants carry no partial flag; stored as non-partial access.
    grants: Grants,
}

/// Containment and grants of a single vault.
#[derive(Debug, Clone)]
pub struct AccessGraph {
    vault_id: VaultId,
    owner: Option<UserId>,
    vault_grants: Grants,
    folders: HashMap<FolderId, FolderNode>,
    secrets: HashMap<SecretId, SecretNode>,
    /// `None` is the vault root.
    child_folders: HashMap<Option<FolderId>, BTreeSet<FolderId>>,
    folder_secrets: HashMap<Option<FolderId>, BTreeSet<SecretId>>,
}

impl AccessGraph {
    pub fn new(vault_id: VaultId, owner: Option<UserId>) -> Self {
        Self {
            vault_id,
            owner,
            vault_grants: Grants::new(),
            folders: HashMap::new(),
            secrets: HashMap::new(),
            child_folders: HashMap::new(),
            folder_secrets: HashMap::new(),
        }
    }

    pub fn vault_id(&self) -> VaultId {
        self.vault_id
    }

    /// Owner of a personal vault.
    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    // ─────────────────────────────────────────────────────────────────────
    // Building
    // ─────────────────────────────────────────────────────────────────────

    /// Add a folder, or move an existing one. A moved folder keeps its grants.
    pub fn add_folder(&mut self, id: FolderId, parent: Option<FolderId>) {
        match self.folders.get_mut(&id) {
            Some(node) => {
                let old = std::mem::replace(&mut node.parent, parent);
                if let Some(siblings) = self.child_folders.get_mut(&old) {
                    siblings.remove(&id);
                }
            }
            None => {
                self.folders.insert(
                    id,
                    FolderNode {
                        parent,
                        grants: Grants::new(),
                    },
                );
            }
        }
        self.child_folders.entry(parent).or_default().insert(id);
    }

    /// Add a secret, or move an existing one. A moved secret keeps its grants.
    pub fn add_secret(&mut self, id: SecretId, folder: Option<FolderId>) {
        match self.secrets.get_mut(&id) {
            Some(node) => {
                let old = std::mem::replace(&mut node.folder, folder);
                if let Some(siblings) = self.folder_secrets.get_mut(&old) {
                    siblings.remove(&id);
                }
            }
            None => {
                self.secrets.insert(
                    id,
                    SecretNode {
                        folder,
                        grants: Grants::new(),
                    },
                );
            }
        }
        self.folder_secrets.entry(folder).or_default().insert(id);
    }

    /// Set a grant. Returns `false` if the node is not in the graph.
    pub fn set_grant(&mut self, node: NodeRef, group_id: GroupId, access: Access) -> bool {
        match self.grants_mut(node) {
            Some(grants) => {
                grants.insert(group_id, access);
                true
            }
            None => false,
        }
    }

    pub fn remove_grant(&mut self, node: NodeRef, group_id: GroupId) -> Option<Access> {
        self.grants_mut(node)?.remove(&group_id)
    }

    fn grants_mut(&mut self, node: NodeRef) -> Option<&mut Grants> {
        match node {
            NodeRef::Vault(id) if id == self.vault_id => Some(&mut self.vault_grants),
            NodeRef::Vault(_) => None,
            NodeRef::Folder(id) => self.folders.get_mut(&id).map(|f| &mut f.grants),
            NodeRef::Secret(id) => self.secrets.get_mut(&id).map(|s| &mut s.grants),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    pub fn contains(&self, node: NodeRef) -> bool {
        self.grants(node).is_some()
    }

    /// All grants on a node, or `None` if the node is not in the graph.
    pub fn grants(&self, node: NodeRef) -> Option<&Grants> {
        match node {
            NodeRef::Vault(id) if id == self.vault_id => Some(&self.vault_grants),
            NodeRef::Vault(_) => None,
            NodeRef::Folder(id) => self.folders.get(&id).map(|f| &f.grants),
            NodeRef::Secret(id) => self.secrets.get(&id).map(|s| &s.grants),
        }
    }

    pub fn grant(&self, node: NodeRef, group_id: GroupId) -> Option<Access> {
        self.grants(node)?.get(&group_id).copied()
    }

    fn any_grant(
        &self,
        node: NodeRef,
        groups: &BTreeSet<GroupId>,
        pred: impl Fn(&Access) -> bool,
    ) -> bool {
        self.grants(node).map_or(false, |grants| {
            grants
                .iter()
                .any(|(g, access)| groups.contains(g) && pred(access))
        })
    }

    /// Any grant on the node for one of `groups`.
    pub fn has_read(&self, node: NodeRef, groups: &BTreeSet<GroupId>) -> bool {
        self.any_grant(node, groups, |_| true)
    }

    /// Any grant with `can_write` for one of `groups`.
    pub fn has_write(&self, node: NodeRef, groups: &BTreeSet<GroupId>) -> bool {
        self.any_grant(node, groups, |a| a.can_write)
    }

    /// Any explicit (non-partial) write grant for one of `groups`.
    pub fn has_full_write(&self, node: NodeRef, groups: &BTreeSet<GroupId>) -> bool {
        self.any_grant(node, groups, Access::is_full_write)
    }

    /// The container directly above a node.
    pub fn parent(&self, node: NodeRef) -> Option<ScopeRef> {
        let folder = match node {
            NodeRef::Vault(_) => return None,
            NodeRef::Folder(id) => self.folders.get(&id)?.parent,
            NodeRef::Secret(id) => self.secrets.get(&id)?.folder,
        };
        Some(self.container_ref(folder))
    }

    /// Containers above a node, nearest first, always ending with the vault.
    ///
    /// A parent pointer to a folder missing from the graph ends the folder
    /// chain; the vault is still reported.
    pub fn ancestors(&self, node: NodeRef) -> Vec<ScopeRef> {
        let mut out = Vec::new();
        if matches!(node, NodeRef::Vault(_)) || !self.contains(node) {
            return out;
        }

        let mut visited = HashSet::new();
        if let NodeRef::Folder(id) = node {
            visited.insert(id);
        }
        let mut next = match node {
            NodeRef::Folder(id) => self.folders.get(&id).and_then(|f| f.parent),
            NodeRef::Secret(id) => self.secrets.get(&id).and_then(|s| s.folder),
            NodeRef::Vault(_) => None,
        };
        while let Some(folder_id) = next {
            if !visited.insert(folder_id) {
                tracing::warn!(
                    vault_id = %self.vault_id,
                    folder_id = %folder_id,
                    "cycle in folder tree"
                );
                break;
            }
            match self.folders.get(&folder_id) {
                Some(folder) => {
                    out.push(ScopeRef::Folder(folder_id));
                    next = folder.parent;
                }
                None => break,
            }
        }
        out.push(ScopeRef::Vault(self.vault_id));
        out
    }

    /// Folders below a scope: direct children, or the whole subtree when
    /// `cascade` is set. The scope itself is excluded. Sorted by id.
    pub fn folders_in(&self, scope: ScopeRef, cascade: bool) -> Vec<FolderId> {
        let Some(root) = self.container_key(scope) else {
            return Vec::new();
        };
        let mut out: Vec<FolderId> = if cascade {
            self.subtree(root).into_iter().filter(|f| Some(*f) != root).collect()
        } else {
            self.children(root).collect()
        };
        out.sort();
        out
    }

    /// Secrets below a scope: directly inside it, or anywhere in its subtree
    /// when `cascade` is set. Sorted by id.
    pub fn secrets_in(&self, scope: ScopeRef, cascade: bool) -> Vec<SecretId> {
        let Some(root) = self.container_key(scope) else {
            return Vec::new();
        };
        let mut out: Vec<SecretId> = if cascade {
            let mut containers = vec![root];
            containers.extend(
                self.subtree(root)
                    .into_iter()
                    .filter(|f| Some(*f) != root)
                    .map(Some),
            );
            containers
                .into_iter()
                .flat_map(|c| self.secrets_directly_in(c))
                .collect()
        } else {
            self.secrets_directly_in(root).collect()
        };
        out.sort();
        out
    }

    /// Folder ids in breadth-first order from a container (root included if
    /// it is a folder).
    pub(crate) fn subtree(&self, root: Option<FolderId>) -> Vec<FolderId> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut frontier = VecDeque::new();

        if let Some(id) = root {
            visited.insert(id);
            out.push(id);
        }
        frontier.push_back(root);

        while let Some(container) = frontier.pop_front() {
            for child in self.children(container) {
                if visited.insert(child) {
                    out.push(child);
                    frontier.push_back(Some(child));
                }
            }
        }
        out
    }

    pub(crate) fn children(
        &self,
        container: Option<FolderId>,
    ) -> impl Iterator<Item = FolderId> + '_ {
        self.child_folders
            .get(&container)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    pub(crate) fn secrets_directly_in(
        &self,
        container: Option<FolderId>,
    ) -> impl Iterator<Item = SecretId> + '_ {
        self.folder_secrets
            .get(&container)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Every folder in the graph with its grants.
    pub fn folders(&self) -> impl Iterator<Item = (FolderId, &Grants)> + '_ {
        self.folders.iter().map(|(id, f)| (*id, &f.grants))
    }

    /// Every secret in the graph with its grants.
    pub fn secrets(&self) -> impl Iterator<Item = (SecretId, &Grants)> + '_ {
        self.secrets.iter().map(|(id, s)| (*id, &s.grants))
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    fn container_key(&self, scope: ScopeRef) -> Option<Option<FolderId>> {
        match scope {
            ScopeRef::Vault(id) if id == self.vault_id => Some(None),
            ScopeRef::Vault(_) => None,
            ScopeRef::Folder(id) => self.folders.contains_key(&id).then_some(Some(id)),
        }
    }

    fn container_ref(&self, folder: Option<FolderId>) -> ScopeRef {
        match folder {
            Some(id) => ScopeRef::Folder(id),
            None => ScopeRef::Vault(self.vault_id),
        }
    }
}
