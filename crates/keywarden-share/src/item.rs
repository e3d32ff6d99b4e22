//! Per-item reconciliation.
//!
//! One descendant of a share target is brought in line with the process:
//! its grants are diffed against the requested set (cascaded processes
//! only), its readers are recomputed, and its content key copies are added
//! or dropped to match. Everything for the item is committed at once.
//!
//! Reconciling an item that already matches commits nothing, so a process
//! can be re-run after a crash. The commit only lands while the process is
//! still Running; once a newer process cancels it, its items are left alone.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Context};

use keywarden_core::{GroupId, RequestedGrant, Resource, ResourceKey, ShareProcess};
use keywarden_envelope::{wrap_for_recipient, X25519StaticSecret};
use keywarden_perms::{compute_diff, DiffInput, PermissionGraph};
use keywarden_store::{GrantCommit, Store, StoreError};

/// Group private keys recovered from a process escrow.
pub type EscrowKeys = BTreeMap<GroupId, X25519StaticSecret>;

/// What reconciling one item changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemOutcome {
    pub grants_changed: usize,
    pub keys_added: usize,
    pub keys_removed: usize,
}

impl ItemOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.grants_changed == 0 && self.keys_added == 0 && self.keys_removed == 0
    }
}

/// Reconcile one item, retrying once if its grants move underneath us.
pub async fn reconcile_item<S: Store + ?Sized>(
    store: &S,
    process: &ShareProcess,
    escrow: &EscrowKeys,
    item: &Resource,
) -> anyhow::Result<ItemOutcome> {
    match reconcile_once(store, process, escrow, item).await {
        Err(e) if is_conflict(&e) => {
            tracing::debug!(resource_id = %item.id, "grant conflict on item, retrying");
            reconcile_once(store, process, escrow, item).await
        }
        other => other,
    }
}

fn is_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StoreError>()
        .map(StoreError::is_conflict)
        .unwrap_or(false)
}

/// Whether the item commit was refused because the process stopped running.
pub(crate) fn is_superseded(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Superseded(_)))
}

async fn reconcile_once<S: Store + ?Sized>(
    store: &S,
    process: &ShareProcess,
    escrow: &EscrowKeys,
    item: &Resource,
) -> anyhow::Result<ItemOutcome> {
    let (mut graph, version) = hydrate(store, item).await?;
    let current = graph.grants(&item.id);
    let mut commit = GrantCommit::new(item.id, Some(version));
    commit.require_running = Some(process.id);

    if process.cascade {
        let protected = private_groups(store, current.iter().map(|g| g.group_id)).await?;
        let diff = compute_diff(&DiffInput {
            resource_id: item.id,
            current: current.clone(),
            requested: process.requested_groups.clone(),
            inherited: graph.inherited_grants(&item.id),
            caller_has_full_write: process.caller_full_write,
            cascade: true,
            protected_groups: protected,
        })
        .context("diffing requested grants")?;

        graph
            .replace_grants(item.id, diff.target.iter().copied())
            .context("applying requested grants")?;
        commit.upserts = diff.changes.iter().map(|c| c.to).collect();
    }

    let readers = graph.readers(&item.id);
    let keys = store.list_resource_keys(&item.id).await?;
    let holders: BTreeSet<GroupId> = keys.iter().map(|k| k.group_id).collect();

    commit.keys_removed = holders.difference(&readers).copied().collect();

    let missing: Vec<GroupId> = readers.difference(&holders).copied().collect();
    if !missing.is_empty() {
        commit.keys_added = wrap_for_new_readers(store, item, &keys, escrow, &missing).await?;
    }

    let outcome = ItemOutcome {
        grants_changed: commit.upserts.len(),
        keys_added: commit.keys_added.len(),
        keys_removed: commit.keys_removed.len(),
    };
    if outcome.is_unchanged() {
        return Ok(outcome);
    }

    store.commit_grants(commit).await?;
    Ok(outcome)
}

/// Load the item and its ancestors with their grants. Returns the graph and
/// the item's grants version.
async fn hydrate<S: Store + ?Sized>(
    store: &S,
    item: &Resource,
) -> anyhow::Result<(PermissionGraph, u64)> {
    let mut graph = PermissionGraph::new();

    for ancestor_id in item.ancestors() {
        let ancestor = store
            .get_resource(&ancestor_id)
            .await?
            .ok_or_else(|| anyhow!("ancestor {} not found", ancestor_id))?;
        let grants = store.get_grants(&ancestor_id).await?;
        graph.insert_resource(ancestor);
        graph.hydrate_grants(ancestor_id, grants.grants);
    }

    let own = store.get_grants(&item.id).await?;
    graph.insert_resource(item.clone());
    graph.hydrate_grants(item.id, own.grants);
    Ok((graph, own.version))
}

async fn private_groups<S: Store + ?Sized>(
    store: &S,
    group_ids: impl Iterator<Item = GroupId>,
) -> anyhow::Result<BTreeSet<GroupId>> {
    let mut out = BTreeSet::new();
    for group_id in group_ids {
        if let Some(group) = store.get_group(&group_id).await? {
            if group.private {
                out.insert(group_id);
            }
        }
    }
    Ok(out)
}

/// Recover the item's content key through an escrowed group and wrap it for
/// each missing reader.
async fn wrap_for_new_readers<S: Store + ?Sized>(
    store: &S,
    item: &Resource,
    keys: &[ResourceKey],
    escrow: &EscrowKeys,
    missing: &[GroupId],
) -> anyhow::Result<Vec<ResourceKey>> {
    let (holder, group_secret) = keys
        .iter()
        .find_map(|k| escrow.get(&k.group_id).map(|secret| (k, secret)))
        .ok_or_else(|| anyhow!("no escrowed group holds a key for {}", item.id))?;

    let content_key = holder
        .wrapped
        .unwrap(group_secret)
        .with_context(|| format!("unwrapping key held by group {}", holder.group_id))?;

    let mut added = Vec::with_capacity(missing.len());
    for group_id in missing {
        let group = store
            .get_group(group_id)
            .await?
            .ok_or_else(|| anyhow!("group {} not found", group_id))?;
        let wrapped = wrap_for_recipient(&content_key, &group.public_key)
            .with_context(|| format!("wrapping key for group {}", group_id))?;
        added.push(ResourceKey {
            resource_id: item.id,
            group_id: *group_id,
            wrapped,
        });
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_core::{
        now_millis, Grant, GrantOrigin, Group, GroupMember, NewShareProcess, ResourceId, UserId,
    };
    use keywarden_envelope::{generate_keypair, EncryptionKey, X25519PublicKey};
    use keywarden_store::{MemoryStore, StoreExt};

    struct TestGroup {
        id: GroupId,
        public: X25519PublicKey,
        secret: X25519StaticSecret,
    }

    async fn group(store: &MemoryStore, private: bool) -> TestGroup {
        let (public, secret) = generate_keypair();
        let id = GroupId::new();
        let (member_public, _) = generate_keypair();
        store
            .insert_group(
                &Group {
                    id,
                    name: format!("group-{}", id),
                    private,
                    public_key: public,
                },
                &GroupMember {
                    group_id: id,
                    user_id: UserId::new(),
                    wrapped_group_key: wrap_for_recipient(
                        secret.to_bytes().as_slice(),
                        &member_public,
                    )
                    .unwrap(),
                    is_manager: true,
                },
            )
            .await
            .unwrap();
        TestGroup { id, public, secret }
    }

    fn key_for(resource: &Resource, content: &EncryptionKey, group: &TestGroup) -> ResourceKey {
        ResourceKey {
            resource_id: resource.id,
            group_id: group.id,
            wrapped: wrap_for_recipient(content.as_bytes(), &group.public).unwrap(),
        }
    }

    fn pending(target: &Resource, requested: Vec<RequestedGrant>, cascade: bool) -> ShareProcess {
        ShareProcess::new(
            NewShareProcess {
                target_type: target.kind,
                target_id: target.id,
                actor_id: UserId::new(),
                requested_groups: requested,
                requested_users: Vec::new(),
                cascade,
                caller_full_write: true,
                total_items: 0,
                escrow: Vec::new(),
            },
            now_millis(),
        )
        .unwrap()
    }

    /// Insert a process on `target` and claim it.
    async fn running(
        store: &MemoryStore,
        target: &Resource,
        requested: Vec<RequestedGrant>,
        cascade: bool,
    ) -> ShareProcess {
        let process = pending(target, requested, cascade);
        let mut commit = GrantCommit::new(target.id, None);
        commit.share_process = Some(process.clone());
        store.commit_grants(commit).await.unwrap();
        store
            .claim_share_process(&process.id, 1, now_millis())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_inherited_reader_gets_key() {
        let store = MemoryStore::new();
        let owner = group(&store, false).await;
        let reader = group(&store, false).await;

        let vault = Resource::vault(ResourceId::new());
        let password = Resource::password(ResourceId::new(), vault.id, None);
        let content = EncryptionKey::generate();

        store
            .insert_resource(
                &vault,
                &[
                    Grant::new(vault.id, owner.id, true, GrantOrigin::Explicit),
                    Grant::new(vault.id, reader.id, false, GrantOrigin::Explicit),
                ],
                &[],
            )
            .await
            .unwrap();
        store
            .insert_resource(&password, &[], &[key_for(&password, &content, &owner)])
            .await
            .unwrap();

        let escrow: EscrowKeys = [(owner.id, owner.secret.clone())].into_iter().collect();
        let proc = running(&store, &vault, Vec::new(), false).await;

        let outcome = reconcile_item(&store, &proc, &escrow, &password).await.unwrap();
        assert_eq!(outcome.keys_added, 1);

        let key = store
            .get_resource_key(&password.id, &reader.id)
            .await
            .unwrap()
            .unwrap();
        let recovered = key.wrapped.unwrap_key(&reader.secret).unwrap();
        assert_eq!(recovered.as_bytes(), content.as_bytes());

        // Second run finds nothing to do.
        let again = reconcile_item(&store, &proc, &escrow, &password).await.unwrap();
        assert!(again.is_unchanged());
    }

    #[tokio::test]
    async fn test_missing_escrow_fails_item() {
        let store = MemoryStore::new();
        let owner = group(&store, false).await;
        let reader = group(&store, false).await;

        let vault = Resource::vault(ResourceId::new());
        let password = Resource::password(ResourceId::new(), vault.id, None);
        let content = EncryptionKey::generate();
        store
            .insert_resource(
                &vault,
                &[
                    Grant::new(vault.id, owner.id, true, GrantOrigin::Explicit),
                    Grant::new(vault.id, reader.id, false, GrantOrigin::Explicit),
                ],
                &[],
            )
            .await
            .unwrap();
        store
            .insert_resource(&password, &[], &[key_for(&password, &content, &owner)])
            .await
            .unwrap();

        let proc = running(&store, &vault, Vec::new(), false).await;
        let err = reconcile_item(&store, &proc, &EscrowKeys::new(), &password)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no escrowed group"));
        assert!(store
            .get_resource_key(&password.id, &reader.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cascade_demotes_but_protects_private_groups() {
        let store = MemoryStore::new();
        let owner = group(&store, false).await;
        let team = group(&store, false).await;
        let personal = group(&store, true).await;

        let vault = Resource::vault(ResourceId::new());
        let password = Resource::password(ResourceId::new(), vault.id, None);
        let content = EncryptionKey::generate();
        store
            .insert_resource(
                &vault,
                &[Grant::new(vault.id, owner.id, true, GrantOrigin::Explicit)],
                &[],
            )
            .await
            .unwrap();
        store
            .insert_resource(
                &password,
                &[
                    Grant::new(password.id, team.id, true, GrantOrigin::Explicit),
                    Grant::new(password.id, personal.id, true, GrantOrigin::Explicit),
                ],
                &[
                    key_for(&password, &content, &owner),
                    key_for(&password, &content, &team),
                    key_for(&password, &content, &personal),
                ],
            )
            .await
            .unwrap();

        let escrow: EscrowKeys = [(owner.id, owner.secret.clone())].into_iter().collect();
        let proc = running(&store, &vault, vec![RequestedGrant::new(owner.id, true)], true).await;

        let outcome = reconcile_item(&store, &proc, &escrow, &password).await.unwrap();
        assert_eq!(outcome.grants_changed, 2);

        let grants = store.get_grants(&password.id).await.unwrap().grants;
        let team_grant = grants.iter().find(|g| g.group_id == team.id).unwrap();
        assert!(!team_grant.can_write);
        assert!(team_grant.is_partial());
        let personal_grant = grants.iter().find(|g| g.group_id == personal.id).unwrap();
        assert!(personal_grant.is_full_write());
    }

    #[tokio::test]
    async fn test_canceled_process_leaves_item_alone() {
        let store = MemoryStore::new();
        let owner = group(&store, false).await;
        let team = group(&store, false).await;

        let vault = Resource::vault(ResourceId::new());
        let first = Resource::password(ResourceId::new(), vault.id, None);
        let second = Resource::password(ResourceId::new(), vault.id, None);
        let content = EncryptionKey::generate();
        store
            .insert_resource(
                &vault,
                &[Grant::new(vault.id, owner.id, true, GrantOrigin::Explicit)],
                &[],
            )
            .await
            .unwrap();
        for password in [&first, &second] {
            store
                .insert_resource(
                    password,
                    &[Grant::new(password.id, team.id, true, GrantOrigin::Explicit)],
                    &[
                        key_for(password, &content, &owner),
                        key_for(password, &content, &team),
                    ],
                )
                .await
                .unwrap();
        }

        let escrow: EscrowKeys = [(owner.id, owner.secret.clone())].into_iter().collect();
        let proc = running(&store, &vault, vec![RequestedGrant::new(owner.id, true)], true).await;

        let outcome = reconcile_item(&store, &proc, &escrow, &first).await.unwrap();
        assert_eq!(outcome.grants_changed, 2);

        // A newer share of the vault cancels the running one between items.
        let mut commit = GrantCommit::new(vault.id, None);
        commit.share_process = Some(pending(&vault, Vec::new(), false));
        store.commit_grants(commit).await.unwrap();
        let before = store.get_grants(&second.id).await.unwrap();

        let err = reconcile_item(&store, &proc, &escrow, &second)
            .await
            .unwrap_err();
        assert!(is_superseded(&err));

        let after = store.get_grants(&second.id).await.unwrap();
        assert_eq!(after, before);
        let team_grant = after.grants.iter().find(|g| g.group_id == team.id).unwrap();
        assert!(team_grant.is_full_write());
        assert!(store
            .get_resource_key(&second.id, &team.id)
            .await
            .unwrap()
            .is_some());
    }
}
