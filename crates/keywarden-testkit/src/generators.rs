//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use keywarden_core::{Grant, GrantOrigin, GroupId, RequestedGrant, ResourceId};
use keywarden_perms::DiffInput;

/// Groups drawn by the generators below. A small pool makes overlaps
/// between current and requested grants likely.
pub const GROUP_POOL: [GroupId; 5] = [
    GroupId::from_bytes([1; 16]),
    GroupId::from_bytes([2; 16]),
    GroupId::from_bytes([3; 16]),
    GroupId::from_bytes([4; 16]),
    GroupId::from_bytes([5; 16]),
];

/// Generate a random ResourceId.
pub fn resource_id() -> impl Strategy<Value = ResourceId> {
    any::<[u8; 16]>().prop_map(ResourceId::from_bytes)
}

/// Generate a group from the pool.
pub fn pooled_group() -> impl Strategy<Value = GroupId> {
    (0..GROUP_POOL.len()).prop_map(|i| GROUP_POOL[i])
}

/// Generate a GrantOrigin.
pub fn origin() -> impl Strategy<Value = GrantOrigin> {
    prop_oneof![Just(GrantOrigin::Explicit), Just(GrantOrigin::Inherited)]
}

/// Generate grants on `resource_id`, at most one per pooled group.
pub fn grants(resource_id: ResourceId) -> impl Strategy<Value = Vec<Grant>> {
    prop::collection::btree_map(pooled_group(), (any::<bool>(), origin()), 0..=GROUP_POOL.len())
        .prop_map(move |entries| {
            entries
                .into_iter()
                .map(|(group_id, (can_write, origin))| {
                    Grant::new(resource_id, group_id, can_write, origin)
                })
                .collect()
        })
}

/// Generate a requested permission set, at most one entry per pooled group.
pub fn requested() -> impl Strategy<Value = Vec<RequestedGrant>> {
    prop::collection::btree_map(pooled_group(), (any::<bool>(), any::<bool>()), 0..=GROUP_POOL.len())
        .prop_map(|entries| {
            entries
                .into_iter()
                .map(|(group_id, (can_write, partial))| RequestedGrant {
                    group_id,
                    can_write,
                    partial,
                })
                .collect()
        })
}

/// Parameters for a diff computation.
#[derive(Debug, Clone)]
pub struct DiffScenario {
    pub resource_id: ResourceId,
    pub current: Vec<Grant>,
    pub requested: Vec<RequestedGrant>,
    pub inherited: Vec<Grant>,
    pub caller_has_full_write: bool,
    pub cascade: bool,
    pub protected_groups: BTreeSet<GroupId>,
}

impl DiffScenario {
    pub fn input(&self) -> DiffInput {
        DiffInput {
            resource_id: self.resource_id,
            current: self.current.clone(),
            requested: self.requested.clone(),
            inherited: self.inherited.clone(),
            caller_has_full_write: self.caller_has_full_write,
            cascade: self.cascade,
            protected_groups: self.protected_groups.clone(),
        }
    }
}

impl Arbitrary for DiffScenario {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (resource_id(), resource_id())
            .prop_flat_map(|(resource_id, parent_id)| {
                (
                    Just(resource_id),
                    grants(resource_id),
                    requested(),
                    grants(parent_id),
                    any::<bool>(),
                    any::<bool>(),
                    prop::collection::btree_set(pooled_group(), 0..=2),
                )
            })
            .prop_map(
                |(resource_id, current, requested, inherited, full, cascade, protected)| {
                    DiffScenario {
                        resource_id,
                        current,
                        requested,
                        inherited,
                        caller_has_full_write: full,
                        cascade,
                        protected_groups: protected,
                    }
                },
            )
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_perms::{compute_diff, PermsError};

    proptest! {
        #[test]
        fn test_applied_diff_is_stable(scenario: DiffScenario) {
            let Ok(diff) = compute_diff(&scenario.input()) else {
                return Ok(());
            };

            let mut again = scenario.input();
            again.current = diff.target.clone();
            let second = compute_diff(&again).unwrap();

            prop_assert!(second.no_op);
            prop_assert_eq!(second.target, diff.target);
        }

        #[test]
        fn test_target_keeps_a_writer(scenario: DiffScenario) {
            match compute_diff(&scenario.input()) {
                Ok(diff) => {
                    let writer = diff.target.iter().any(|g| g.can_write)
                        || scenario.inherited.iter().any(|g| g.can_write);
                    prop_assert!(writer);
                }
                Err(e) => {
                    prop_assert!(matches!(e, PermsError::NoWriterViolation(_)));
                }
            }
        }

        #[test]
        fn test_partial_caller_never_creates_explicit(scenario: DiffScenario) {
            let mut scenario = scenario;
            scenario.caller_has_full_write = false;
            if let Ok(diff) = compute_diff(&scenario.input()) {
                for change in &diff.changes {
                    prop_assert_eq!(change.to.origin, GrantOrigin::Inherited);
                }
            }
        }

        #[test]
        fn test_protected_groups_untouched(scenario: DiffScenario) {
            if let Ok(diff) = compute_diff(&scenario.input()) {
                for change in &diff.changes {
                    let requested = scenario.requested.iter().any(|r| r.group_id == change.group_id);
                    if !requested {
                        prop_assert!(!scenario.protected_groups.contains(&change.group_id));
                    }
                }
            }
        }
    }
}
