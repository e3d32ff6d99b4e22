//! Permission diffing.
//!
//! Turns a requested permission set into the grant changes it implies for one
//! resource, given the resource's current grants and what it inherits. The
//! computation is pure: no storage, no crypto.
//!
//! Rules, per group:
//!
//! - requested but not present: created, unless the request marks it partial.
//!   Created grants are `Inherited` when the caller lacks full write.
//! - present and requested: skipped if the request marks it partial. A full
//!   writer makes it explicit with the requested write flag; anyone else may
//!   only revise grants that are already `Inherited`.
//! - present but not requested: demoted to a read-only `Inherited` grant,
//!   never deleted. Protected groups are left alone.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use keywarden_core::{Grant, GrantOrigin, GroupId, RequestedGrant, ResourceId};

use crate::error::{PermsError, Result};
use crate::graph::has_writer;

/// Everything the diff needs to know about one resource.
#[derive(Debug, Clone)]
pub struct DiffInput {
    pub resource_id: ResourceId,
    /// The resource's own grants.
    pub current: Vec<Grant>,
    /// The requested permission set.
    pub requested: Vec<RequestedGrant>,
    /// Grants inherited from ancestors, for groups without an own grant.
    pub inherited: Vec<Grant>,
    pub caller_has_full_write: bool,
    pub cascade: bool,
    /// Groups whose current grants must not change (private groups during
    /// cascaded descendant edits).
    pub protected_groups: BTreeSet<GroupId>,
}

/// A grant being created or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantChange {
    pub group_id: GroupId,
    pub from: Option<Grant>,
    pub to: Grant,
}

/// The audited view of one group's access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSnapshot {
    pub can_write: bool,
}

/// One entry of the audit diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditChange {
    pub group_id: GroupId,
    pub from: Option<GrantSnapshot>,
    pub to: Option<GrantSnapshot>,
}

/// Result of diffing a request against a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDiff {
    pub resource_id: ResourceId,
    pub changes: Vec<GrantChange>,
    /// Own grants after applying the changes.
    pub target: Vec<Grant>,
    pub audit: Vec<AuditChange>,
    pub no_op: bool,
    pub cascade: bool,
}

impl PermissionDiff {
    /// Whether the operation goes ahead: something changed, or the caller
    /// forced a cascade.
    pub fn should_proceed(&self) -> bool {
        !self.no_op || self.cascade
    }

    /// Group ids that gained a grant.
    pub fn added_groups(&self) -> Vec<GroupId> {
        self.changes
            .iter()
            .filter(|c| c.from.is_none())
            .map(|c| c.group_id)
            .collect()
    }
}

fn snapshot(grant: &Grant) -> GrantSnapshot {
    GrantSnapshot {
        can_write: grant.can_write,
    }
}

/// Compute the grant changes a request implies.
///
/// Fails with [`PermsError::NoWriterViolation`] if the target state would
/// leave the resource without a writer.
pub fn compute_diff(input: &DiffInput) -> Result<PermissionDiff> {
    let resource_id = input.resource_id;

    let current: BTreeMap<GroupId, Grant> = input
        .current
        .iter()
        .map(|g| (g.group_id, Grant { resource_id, ..*g }))
        .collect();
    let requested: BTreeMap<GroupId, RequestedGrant> =
        input.requested.iter().map(|r| (r.group_id, *r)).collect();

    let created_origin = if input.caller_has_full_write {
        GrantOrigin::Explicit
    } else {
        GrantOrigin::Inherited
    };

    let mut target = current.clone();

    // to_add
    for (group_id, req) in requested.iter().filter(|(g, _)| !current.contains_key(g)) {
        if req.partial {
            continue;
        }
        target.insert(
            *group_id,
            Grant::new(resource_id, *group_id, req.can_write, created_origin),
        );
    }

    // to_keep
    for (group_id, req) in requested.iter().filter(|(g, _)| current.contains_key(g)) {
        if req.partial {
            continue;
        }
        target.insert(
            *group_id,
            Grant::new(resource_id, *group_id, req.can_write, created_origin),
        );
    }

    // to_remove
    for (group_id, existing) in current.iter().filter(|(g, _)| !requested.contains_key(g)) {
        if input.protected_groups.contains(group_id) {
            continue;
        }
        let demoted = Grant::new(resource_id, *group_id, false, GrantOrigin::Inherited);
        if *existing == demoted {
            continue;
        }
        target.insert(*group_id, demoted);
    }

    if !has_writer(target.values(), input.inherited.iter()) {
        return Err(PermsError::NoWriterViolation(resource_id));
    }

    let mut changes = Vec::new();
    let mut audit = Vec::new();
    for (group_id, to) in target.iter() {
        let from = current.get(group_id).copied();
        if from.as_ref() == Some(to) {
            continue;
        }
        changes.push(GrantChange {
            group_id: *group_id,
            from,
            to: *to,
        });

        let from_snapshot = from.as_ref().map(snapshot);
        let to_snapshot = Some(snapshot(to));
        if from_snapshot != to_snapshot {
            audit.push(AuditChange {
                group_id: *group_id,
                from: from_snapshot,
                to: to_snapshot,
            });
        }
    }

    let no_op = changes.is_empty();
    Ok(PermissionDiff {
        resource_id,
        changes,
        target: target.into_values().collect(),
        audit,
        no_op,
        cascade: input.cascade,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(current: Vec<Grant>, requested: Vec<RequestedGrant>, full: bool) -> DiffInput {
        DiffInput {
            resource_id: current
                .first()
                .map(|g| g.resource_id)
                .unwrap_or_else(ResourceId::new),
            current,
            requested,
            inherited: Vec::new(),
            caller_has_full_write: full,
            cascade: false,
            protected_groups: BTreeSet::new(),
        }
    }

    fn explicit(resource: ResourceId, group: GroupId, can_write: bool) -> Grant {
        Grant::new(resource, group, can_write, GrantOrigin::Explicit)
    }

    fn partial(resource: ResourceId, group: GroupId, can_write: bool) -> Grant {
        Grant::new(resource, group, can_write, GrantOrigin::Inherited)
    }

    #[test]
    fn test_add_reader() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();

        let diff = compute_diff(&input(
            vec![explicit(vault, a, true)],
            vec![RequestedGrant::new(a, true), RequestedGrant::new(b, false)],
            true,
        ))
        .unwrap();

        assert!(!diff.no_op);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].to, explicit(vault, b, false));
        assert_eq!(
            diff.audit,
            vec![AuditChange {
                group_id: b,
                from: None,
                to: Some(GrantSnapshot { can_write: false }),
            }]
        );
        assert_eq!(diff.added_groups(), vec![b]);
    }

    #[test]
    fn test_identical_request_is_noop() {
        let vault = ResourceId::new();
        let a = GroupId::new();

        let diff = compute_diff(&input(
            vec![explicit(vault, a, true)],
            vec![RequestedGrant::new(a, true)],
            true,
        ))
        .unwrap();

        assert!(diff.no_op);
        assert!(diff.audit.is_empty());
        assert!(!diff.should_proceed());
    }

    #[test]
    fn test_cascade_forces_proceed() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let mut request = input(vec![explicit(vault, a, true)], vec![RequestedGrant::new(a, true)], true);
        request.cascade = true;

        let diff = compute_diff(&request).unwrap();
        assert!(diff.no_op);
        assert!(diff.should_proceed());
    }

    #[test]
    fn test_removing_only_writer_rejected() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();

        let result = compute_diff(&input(
            vec![explicit(vault, a, true)],
            vec![RequestedGrant::new(b, false)],
            true,
        ));

        assert!(matches!(result, Err(PermsError::NoWriterViolation(r)) if r == vault));
    }

    #[test]
    fn test_removal_demotes() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();

        let diff = compute_diff(&input(
            vec![explicit(vault, a, true), explicit(vault, b, true)],
            vec![RequestedGrant::new(a, true)],
            true,
        ))
        .unwrap();

        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].to, partial(vault, b, false));
        assert_eq!(diff.target.len(), 2);
    }

    #[test]
    fn test_demoted_grant_left_alone() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();

        let diff = compute_diff(&input(
            vec![explicit(vault, a, true), partial(vault, b, false)],
            vec![RequestedGrant::new(a, true)],
            true,
        ))
        .unwrap();

        assert!(diff.no_op);
    }

    #[test]
    fn test_protected_group_untouched() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let personal = GroupId::new();
        let mut request = input(
            vec![explicit(vault, a, true), explicit(vault, personal, true)],
            vec![RequestedGrant::new(a, true)],
            true,
        );
        request.protected_groups.insert(personal);

        assert!(compute_diff(&request).unwrap().no_op);
    }

    #[test]
    fn test_partial_request_entries_skipped() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();

        let diff = compute_diff(&input(
            vec![explicit(vault, a, true)],
            vec![RequestedGrant::partial(a, false), RequestedGrant::partial(b, true)],
            true,
        ))
        .unwrap();

        assert!(diff.no_op);
    }

    #[test]
    fn test_non_full_writer_creates_inherited() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();

        let diff = compute_diff(&input(
            vec![explicit(vault, a, true)],
            vec![RequestedGrant::new(a, true), RequestedGrant::new(b, true)],
            false,
        ))
        .unwrap();

        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].to, partial(vault, b, true));
    }

    #[test]
    fn test_non_full_writer_marks_kept_grants_inherited() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();

        let diff = compute_diff(&input(
            vec![explicit(vault, a, true), explicit(vault, b, true)],
            vec![RequestedGrant::new(a, true), RequestedGrant::new(b, false)],
            false,
        ))
        .unwrap();

        assert_eq!(diff.changes.len(), 2);
        assert!(diff.target.contains(&partial(vault, a, true)));
        assert!(diff.target.contains(&partial(vault, b, false)));
        // Only b's access changed; a's origin change is not audited.
        assert_eq!(diff.audit.len(), 1);
        assert_eq!(diff.audit[0].group_id, b);
    }

    #[test]
    fn test_non_full_writer_listing_matches_omitting() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();
        let current = vec![explicit(vault, a, true), explicit(vault, b, true)];

        let listed = compute_diff(&input(
            current.clone(),
            vec![RequestedGrant::new(a, true), RequestedGrant::new(b, false)],
            false,
        ))
        .unwrap();
        let omitted = compute_diff(&input(current, vec![RequestedGrant::new(a, true)], false)).unwrap();

        let b_listed = listed.target.iter().find(|g| g.group_id == b).unwrap();
        let b_omitted = omitted.target.iter().find(|g| g.group_id == b).unwrap();
        assert_eq!(b_listed, b_omitted);
    }

    #[test]
    fn test_non_full_writer_revises_inherited() {
        let vault = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();

        let diff = compute_diff(&input(
            vec![explicit(vault, a, true), partial(vault, b, false)],
            vec![RequestedGrant::new(a, true), RequestedGrant::new(b, true)],
            false,
        ))
        .unwrap();

        assert!(diff.target.contains(&partial(vault, b, true)));
        assert_eq!(diff.audit.len(), 1);
        assert_eq!(diff.audit[0].group_id, b);
        assert_eq!(
            diff.audit[0].from,
            Some(GrantSnapshot { can_write: false })
        );
    }

    #[test]
    fn test_inherited_writer_satisfies_check() {
        let vault = ResourceId::new();
        let folder = ResourceId::new();
        let a = GroupId::new();
        let b = GroupId::new();

        let mut request = input(Vec::new(), vec![RequestedGrant::new(b, false)], true);
        request.resource_id = folder;
        request.inherited = vec![explicit(vault, a, true)];

        let diff = compute_diff(&request).unwrap();
        assert_eq!(diff.target, vec![explicit(folder, b, false)]);
    }

    #[test]
    fn test_origin_only_change_not_audited() {
        let vault = ResourceId::new();
        let a = GroupId::new();

        let diff = compute_diff(&input(
            vec![partial(vault, a, true)],
            vec![RequestedGrant::new(a, true)],
            true,
        ))
        .unwrap();

        assert_eq!(diff.changes.len(), 1);
        assert!(diff.audit.is_empty());
    }

    #[test]
    fn test_audit_serializes_as_from_to() {
        let change = AuditChange {
            group_id: GroupId::new(),
            from: None,
            to: Some(GrantSnapshot { can_write: false }),
        };
        let value = serde_json::to_value(change).unwrap();

        assert_eq!(value["from"], serde_json::Value::Null);
        assert_eq!(value["to"], serde_json::json!({ "can_write": false }));
    }

    fn request_strategy() -> impl Strategy<Value = Vec<(usize, bool, bool)>> {
        prop::collection::vec((0usize..5, any::<bool>(), any::<bool>()), 0..6)
    }

    fn current_strategy() -> impl Strategy<Value = Vec<(usize, bool, bool)>> {
        prop::collection::vec((1usize..5, any::<bool>(), any::<bool>()), 0..5)
    }

    fn build(
        groups: &[GroupId],
        vault: ResourceId,
        current: &[(usize, bool, bool)],
        requested: &[(usize, bool, bool)],
        full: bool,
    ) -> DiffInput {
        // Group 0 is always an explicit writer so most requests are valid.
        let mut own = vec![explicit(vault, groups[0], true)];
        for (g, can_write, is_partial) in current {
            own.retain(|x| x.group_id != groups[*g]);
            own.push(Grant::new(vault, groups[*g], *can_write, GrantOrigin::from_partial(*is_partial)));
        }
        let requested = requested
            .iter()
            .map(|(g, can_write, is_partial)| RequestedGrant {
                group_id: groups[*g],
                can_write: *can_write,
                partial: *is_partial,
            })
            .collect();
        DiffInput {
            resource_id: vault,
            current: own,
            requested,
            inherited: Vec::new(),
            caller_has_full_write: full,
            cascade: false,
            protected_groups: BTreeSet::new(),
        }
    }

    proptest! {
        #[test]
        fn prop_diff_is_idempotent(
            current in current_strategy(),
            requested in request_strategy(),
            full in any::<bool>(),
        ) {
            let vault = ResourceId::new();
            let groups: Vec<GroupId> = (0..5).map(|_| GroupId::new()).collect();
            let first = build(&groups, vault, &current, &requested, full);

            if let Ok(diff) = compute_diff(&first) {
                let second = DiffInput { current: diff.target.clone(), ..first };
                let again = compute_diff(&second).unwrap();
                prop_assert!(again.no_op);
            }
        }

        #[test]
        fn prop_non_full_writer_yields_inherited(
            current in current_strategy(),
            requested in request_strategy(),
        ) {
            let vault = ResourceId::new();
            let groups: Vec<GroupId> = (0..5).map(|_| GroupId::new()).collect();
            let request = build(&groups, vault, &current, &requested, false);

            if let Ok(diff) = compute_diff(&request) {
                for change in &diff.changes {
                    prop_assert_eq!(change.to.origin, GrantOrigin::Inherited);
                }
            }
        }

        #[test]
        fn prop_target_keeps_a_writer(
            current in current_strategy(),
            requested in request_strategy(),
            full in any::<bool>(),
        ) {
            let vault = ResourceId::new();
            let groups: Vec<GroupId> = (0..5).map(|_| GroupId::new()).collect();
            let request = build(&groups, vault, &current, &requested, full);

            match compute_diff(&request) {
                Ok(diff) => prop_assert!(diff.target.iter().any(|g| g.can_write)),
                Err(e) => prop_assert!(matches!(e, PermsError::NoWriterViolation(_))),
            }
        }
    }
}
