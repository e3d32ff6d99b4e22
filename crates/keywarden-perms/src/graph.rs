//! Permission graph.
//!
//! Group membership and grant edges over the vault → folder → password
//! hierarchy. The graph is hydrated from storage for each operation, mutated
//! in memory, and the resulting edges are committed back.
//!
//! Inheritance: a folder or password without its own grant for a group takes
//! the grant of the nearest ancestor that has one (folder, then vault). An
//! own grant overrides inheritance for that group only.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use keywarden_core::{Access, Grant, GrantOrigin, GroupId, Resource, ResourceId, UserId};

use crate::error::{PermsError, Result};

#[derive(Debug, Clone, Default)]
struct GroupNode {
    private: bool,
    members: BTreeSet<UserId>,
}

/// In-memory model of membership and grants.
#[derive(Debug, Clone, Default)]
pub struct PermissionGraph {
    resources: HashMap<ResourceId, Resource>,
    groups: HashMap<GroupId, GroupNode>,
    grants: HashMap<ResourceId, BTreeMap<GroupId, Grant>>,
}

/// Whether a grant set has a writer: an own write grant, or an inherited
/// write grant for a group without an own grant.
pub fn has_writer<'a>(
    own: impl IntoIterator<Item = &'a Grant>,
    inherited: impl IntoIterator<Item = &'a Grant>,
) -> bool {
    let mut own_groups = BTreeSet::new();
    for grant in own {
        if grant.can_write {
            return true;
        }
        own_groups.insert(grant.group_id);
    }
    inherited
        .into_iter()
        .any(|g| g.can_write && !own_groups.contains(&g.group_id))
}

impl PermissionGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // ---- hydration ----

    /// Register a resource node.
    pub fn insert_resource(&mut self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    /// Register a group node with no members.
    pub fn insert_group(&mut self, group_id: GroupId, private: bool) {
        self.groups.entry(group_id).or_insert_with(|| GroupNode {
            private,
            members: BTreeSet::new(),
        });
    }

    /// Load stored grants for a resource without re-validating them.
    pub fn hydrate_grants(&mut self, resource_id: ResourceId, grants: impl IntoIterator<Item = Grant>) {
        let entry = self.grants.entry(resource_id).or_default();
        for grant in grants {
            entry.insert(grant.group_id, Grant { resource_id, ..grant });
        }
    }

    pub fn resource(&self, resource_id: &ResourceId) -> Option<&Resource> {
        self.resources.get(resource_id)
    }

    pub fn is_private_group(&self, group_id: &GroupId) -> bool {
        self.groups.get(group_id).map(|g| g.private).unwrap_or(false)
    }

    // ---- membership ----

    /// Add `user_id` to a group.
    pub fn add_member(&mut self, group_id: GroupId, user_id: UserId) -> Result<()> {
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or(PermsError::UnknownGroup(group_id))?;

        if group.members.contains(&user_id) {
            return Err(PermsError::DuplicateMember { group_id, user_id });
        }
        if group.private && !group.members.is_empty() {
            return Err(PermsError::PrivateGroupFull(group_id));
        }

        group.members.insert(user_id);
        Ok(())
    }

    /// Remove `user_id` from a group. The last member cannot be removed.
    pub fn remove_member(&mut self, group_id: GroupId, user_id: UserId) -> Result<()> {
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or(PermsError::UnknownGroup(group_id))?;

        if !group.members.contains(&user_id) {
            return Err(PermsError::NotAMember { group_id, user_id });
        }
        if group.members.len() == 1 {
            return Err(PermsError::LastMemberViolation(group_id));
        }

        group.members.remove(&user_id);
        Ok(())
    }

    pub fn members(&self, group_id: &GroupId) -> Vec<UserId> {
        self.groups
            .get(group_id)
            .map(|g| g.members.iter().copied().collect())
            .unwrap_or_default()
    }

    // ---- grants ----

    /// The resource's own grants, ordered by group id.
    pub fn grants(&self, resource_id: &ResourceId) -> Vec<Grant> {
        self.grants
            .get(resource_id)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn grant_for(&self, resource_id: &ResourceId, group_id: &GroupId) -> Option<&Grant> {
        self.grants.get(resource_id).and_then(|m| m.get(group_id))
    }

    fn ensure_resource(&self, resource_id: &ResourceId) -> Result<()> {
        if self.resources.contains_key(resource_id) {
            Ok(())
        } else {
            Err(PermsError::UnknownResource(*resource_id))
        }
    }

    /// Validate a candidate own-grant set and install it.
    fn commit_own(&mut self, resource_id: ResourceId, candidate: BTreeMap<GroupId, Grant>) -> Result<()> {
        let inherited = self.inherited_grants(&resource_id);
        if !has_writer(candidate.values(), inherited.iter()) {
            return Err(PermsError::NoWriterViolation(resource_id));
        }
        self.grants.insert(resource_id, candidate);
        Ok(())
    }

    /// Create or update the grant of `group_id` on a resource.
    pub fn grant(
        &mut self,
        resource_id: ResourceId,
        group_id: GroupId,
        can_write: bool,
        origin: GrantOrigin,
    ) -> Result<()> {
        self.ensure_resource(&resource_id)?;
        let mut candidate = self.grants.get(&resource_id).cloned().unwrap_or_default();
        candidate.insert(group_id, Grant::new(resource_id, group_id, can_write, origin));
        self.commit_own(resource_id, candidate)
    }

    /// Delete the grant of `group_id` on a resource.
    pub fn revoke(&mut self, resource_id: ResourceId, group_id: GroupId) -> Result<Grant> {
        self.ensure_resource(&resource_id)?;
        let mut candidate = self.grants.get(&resource_id).cloned().unwrap_or_default();
        let removed = candidate
            .remove(&group_id)
            .ok_or(PermsError::GrantNotFound {
                resource_id,
                group_id,
            })?;
        self.commit_own(resource_id, candidate)?;
        Ok(removed)
    }

    /// Replace the resource's own grants in one step. Only the resulting set
    /// is checked.
    pub fn replace_grants(&mut self, resource_id: ResourceId, grants: impl IntoIterator<Item = Grant>) -> Result<()> {
        self.ensure_resource(&resource_id)?;
        let candidate = grants
            .into_iter()
            .map(|g| (g.group_id, Grant { resource_id, ..g }))
            .collect();
        self.commit_own(resource_id, candidate)
    }

    // ---- queries ----

    /// Grants a resource inherits from its ancestors, for groups without an
    /// own grant. Each carries the id of the ancestor it comes from.
    pub fn inherited_grants(&self, resource_id: &ResourceId) -> Vec<Grant> {
        let own = self.grants.get(resource_id);
        let mut seen: BTreeMap<GroupId, Grant> = BTreeMap::new();

        let ancestors = self
            .resources
            .get(resource_id)
            .map(|r| r.ancestors())
            .unwrap_or_default();
        for ancestor in ancestors {
            let Some(grants) = self.grants.get(&ancestor) else {
                continue;
            };
            for (group_id, grant) in grants {
                if own.map(|m| m.contains_key(group_id)).unwrap_or(false) {
                    continue;
                }
                seen.entry(*group_id).or_insert(*grant);
            }
        }

        seen.into_values().collect()
    }

    /// The deciding grant for one group: its own grant on the resource, or
    /// the nearest ancestor's.
    pub fn deciding_grant(&self, resource_id: &ResourceId, group_id: &GroupId) -> Option<Grant> {
        if let Some(grant) = self.grant_for(resource_id, group_id) {
            return Some(*grant);
        }
        let resource = self.resources.get(resource_id)?;
        resource
            .ancestors()
            .iter()
            .find_map(|ancestor| self.grant_for(ancestor, group_id).copied())
    }

    /// Own grants plus inherited grants, keyed by group.
    pub fn effective_grants(&self, resource_id: &ResourceId) -> BTreeMap<GroupId, Grant> {
        let mut out: BTreeMap<GroupId, Grant> = self
            .inherited_grants(resource_id)
            .into_iter()
            .map(|g| (g.group_id, g))
            .collect();
        if let Some(own) = self.grants.get(resource_id) {
            out.extend(own.iter().map(|(k, v)| (*k, *v)));
        }
        out
    }

    /// Access of a set of groups (typically a user's groups) on a resource.
    pub fn effective_permission(&self, resource_id: &ResourceId, group_ids: &[GroupId]) -> Access {
        let mut access = Access::NONE;
        for group_id in group_ids {
            if let Some(grant) = self.deciding_grant(resource_id, group_id) {
                access.can_read = true;
                access.can_write |= grant.can_write;
            }
        }
        access
    }

    /// True only if some deciding grant is write-capable and explicit.
    pub fn full_write_permission(&self, resource_id: &ResourceId, group_ids: &[GroupId]) -> bool {
        group_ids.iter().any(|group_id| {
            self.deciding_grant(resource_id, group_id)
                .map(|g| g.is_full_write())
                .unwrap_or(false)
        })
    }

    /// Every group with effective read access.
    pub fn readers(&self, resource_id: &ResourceId) -> BTreeSet<GroupId> {
        self.effective_grants(resource_id).into_keys().collect()
    }

    pub fn has_writer(&self, resource_id: &ResourceId) -> bool {
        let own = self.grants(resource_id);
        let inherited = self.inherited_grants(resource_id);
        has_writer(own.iter(), inherited.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Tree {
        graph: PermissionGraph,
        vault: ResourceId,
        folder: ResourceId,
        password: ResourceId,
        loose_password: ResourceId,
    }

    fn tree() -> Tree {
        let vault = ResourceId::new();
        let folder = ResourceId::new();
        let password = ResourceId::new();
        let loose_password = ResourceId::new();

        let mut graph = PermissionGraph::new();
        graph.insert_resource(Resource::vault(vault));
        graph.insert_resource(Resource::folder(folder, vault));
        graph.insert_resource(Resource::password(password, vault, Some(folder)));
        graph.insert_resource(Resource::password(loose_password, vault, None));

        Tree {
            graph,
            vault,
            folder,
            password,
            loose_password,
        }
    }

    fn group(graph: &mut PermissionGraph, private: bool) -> GroupId {
        let id = GroupId::new();
        graph.insert_group(id, private);
        id
    }

    #[test]
    fn test_membership() {
        let mut graph = PermissionGraph::new();
        let team = group(&mut graph, false);
        let alice = UserId::new();
        let bob = UserId::new();

        graph.add_member(team, alice).unwrap();
        graph.add_member(team, bob).unwrap();
        assert!(matches!(
            graph.add_member(team, alice),
            Err(PermsError::DuplicateMember { .. })
        ));

        graph.remove_member(team, bob).unwrap();
        assert!(matches!(
            graph.remove_member(team, alice),
            Err(PermsError::LastMemberViolation(g)) if g == team
        ));
        assert_eq!(graph.members(&team), vec![alice]);
    }

    #[test]
    fn test_private_group_single_member() {
        let mut graph = PermissionGraph::new();
        let personal = group(&mut graph, true);

        graph.add_member(personal, UserId::new()).unwrap();
        assert!(matches!(
            graph.add_member(personal, UserId::new()),
            Err(PermsError::PrivateGroupFull(_))
        ));
    }

    #[test]
    fn test_first_grant_must_write() {
        let mut t = tree();
        let a = group(&mut t.graph, false);

        assert!(matches!(
            t.graph.grant(t.vault, a, false, GrantOrigin::Explicit),
            Err(PermsError::NoWriterViolation(_))
        ));
        assert!(t.graph.grants(&t.vault).is_empty());

        t.graph.grant(t.vault, a, true, GrantOrigin::Explicit).unwrap();
        assert!(t.graph.has_writer(&t.vault));
    }

    #[test]
    fn test_revoke_last_writer_rejected() {
        let mut t = tree();
        let a = group(&mut t.graph, false);
        let b = group(&mut t.graph, false);
        t.graph.grant(t.vault, a, true, GrantOrigin::Explicit).unwrap();
        t.graph.grant(t.vault, b, false, GrantOrigin::Explicit).unwrap();

        assert!(matches!(
            t.graph.revoke(t.vault, a),
            Err(PermsError::NoWriterViolation(_))
        ));
        assert_eq!(t.graph.grants(&t.vault).len(), 2);

        let removed = t.graph.revoke(t.vault, b).unwrap();
        assert_eq!(removed.group_id, b);
        assert!(matches!(
            t.graph.revoke(t.vault, b),
            Err(PermsError::GrantNotFound { .. })
        ));
    }

    #[test]
    fn test_replace_checks_result_only() {
        let mut t = tree();
        let a = group(&mut t.graph, false);
        t.graph.grant(t.vault, a, true, GrantOrigin::Inherited).unwrap();

        // Swap the partial grant for the explicit grant it stood in for.
        t.graph
            .replace_grants(t.vault, vec![Grant::new(t.vault, a, true, GrantOrigin::Explicit)])
            .unwrap();
        assert_eq!(
            t.graph.grant_for(&t.vault, &a).map(|g| g.origin),
            Some(GrantOrigin::Explicit)
        );

        assert!(t.graph.replace_grants(t.vault, Vec::new()).is_err());
        assert_eq!(t.graph.grants(&t.vault).len(), 1);
    }

    #[test]
    fn test_folder_writer_may_be_inherited() {
        let mut t = tree();
        let a = group(&mut t.graph, false);
        let b = group(&mut t.graph, false);
        t.graph.grant(t.vault, a, true, GrantOrigin::Explicit).unwrap();

        // Read-only own grant is fine because the vault writer is inherited.
        t.graph.grant(t.folder, b, false, GrantOrigin::Explicit).unwrap();

        // Overriding the inherited writer with a read-only grant is not.
        assert!(matches!(
            t.graph.grant(t.folder, a, false, GrantOrigin::Explicit),
            Err(PermsError::NoWriterViolation(_))
        ));
    }

    #[test]
    fn test_nearest_ancestor_decides() {
        let mut t = tree();
        let a = group(&mut t.graph, false);
        t.graph.grant(t.vault, a, true, GrantOrigin::Explicit).unwrap();
        t.graph.grant(t.folder, a, false, GrantOrigin::Inherited).unwrap_err();

        let b = group(&mut t.graph, false);
        t.graph.grant(t.folder, b, true, GrantOrigin::Explicit).unwrap();
        t.graph.grant(t.folder, a, false, GrantOrigin::Explicit).unwrap();

        // Folder's own read-only grant overrides the vault's write grant.
        assert_eq!(t.graph.effective_permission(&t.password, &[a]), Access::READ);
        // The loose password sits directly under the vault.
        assert_eq!(t.graph.effective_permission(&t.loose_password, &[a]), Access::WRITE);
        assert_eq!(t.graph.effective_permission(&t.loose_password, &[b]), Access::NONE);
    }

    #[test]
    fn test_effective_permission_ors_groups() {
        let mut t = tree();
        let a = group(&mut t.graph, false);
        let b = group(&mut t.graph, false);
        t.graph.grant(t.vault, a, true, GrantOrigin::Explicit).unwrap();
        t.graph.grant(t.vault, b, false, GrantOrigin::Inherited).unwrap();

        assert_eq!(t.graph.effective_permission(&t.vault, &[b]), Access::READ);
        assert_eq!(t.graph.effective_permission(&t.vault, &[a, b]), Access::WRITE);
        assert_eq!(t.graph.effective_permission(&t.vault, &[]), Access::NONE);
    }

    #[test]
    fn test_full_write_requires_explicit() {
        let mut t = tree();
        let a = group(&mut t.graph, false);
        let b = group(&mut t.graph, false);
        t.graph.grant(t.vault, a, true, GrantOrigin::Explicit).unwrap();
        t.graph.grant(t.vault, b, true, GrantOrigin::Inherited).unwrap();

        assert!(t.graph.full_write_permission(&t.vault, &[a]));
        assert!(!t.graph.full_write_permission(&t.vault, &[b]));
        assert!(t.graph.effective_permission(&t.vault, &[b]).can_write);
        assert!(t.graph.full_write_permission(&t.password, &[a]));
    }

    #[test]
    fn test_readers_include_inherited() {
        let mut t = tree();
        let a = group(&mut t.graph, false);
        let b = group(&mut t.graph, false);
        let c = group(&mut t.graph, false);
        t.graph.grant(t.vault, a, true, GrantOrigin::Explicit).unwrap();
        t.graph.grant(t.folder, b, false, GrantOrigin::Explicit).unwrap();
        t.graph.grant(t.loose_password, c, false, GrantOrigin::Explicit).unwrap();

        assert_eq!(t.graph.readers(&t.password), BTreeSet::from([a, b]));
        assert_eq!(t.graph.readers(&t.loose_password), BTreeSet::from([a, c]));
        assert_eq!(t.graph.readers(&t.vault), BTreeSet::from([a]));
    }

    #[test]
    fn test_unknown_resource() {
        let mut graph = PermissionGraph::new();
        assert!(matches!(
            graph.grant(ResourceId::new(), GroupId::new(), true, GrantOrigin::Explicit),
            Err(PermsError::UnknownResource(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Grant { group: usize, can_write: bool, partial: bool },
        Revoke { group: usize },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4, any::<bool>(), any::<bool>()).prop_map(|(group, can_write, partial)| Op::Grant {
                group,
                can_write,
                partial
            }),
            (0usize..4).prop_map(|group| Op::Revoke { group }),
        ]
    }

    proptest! {
        #[test]
        fn prop_never_orphaned(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut t = tree();
            let groups: Vec<GroupId> = (0..4).map(|_| group(&mut t.graph, false)).collect();
            t.graph.grant(t.vault, groups[0], true, GrantOrigin::Explicit).unwrap();

            for op in ops {
                let before = t.graph.grants(&t.vault);
                let result = match op {
                    Op::Grant { group, can_write, partial } => t.graph.grant(
                        t.vault,
                        groups[group],
                        can_write,
                        GrantOrigin::from_partial(partial),
                    ),
                    Op::Revoke { group } => t.graph.revoke(t.vault, groups[group]).map(|_| ()),
                };

                prop_assert!(t.graph.has_writer(&t.vault));
                if result.is_err() {
                    prop_assert_eq!(t.graph.grants(&t.vault), before);
                }
            }
        }
    }
}
