//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use keywarden_core::{
    now_millis, Grant, Group, GroupId, GroupMember, Resource, ResourceId, ResourceKey,
    ResourceKind, ShareProcess, ShareProcessId, ShareStatus, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::traits::{CommitResult, GrantCommit, Store, VersionedGrants};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    users: HashMap<UserId, User>,
    groups: HashMap<GroupId, Group>,
    members: BTreeMap<(GroupId, UserId), GroupMember>,

    resources: HashMap<ResourceId, Resource>,
    /// Insertion order, for stable descendant listing.
    resource_order: Vec<ResourceId>,
    versions: HashMap<ResourceId, u64>,
    grants: HashMap<ResourceId, BTreeMap<GroupId, Grant>>,
    keys: HashMap<ResourceId, BTreeMap<GroupId, ResourceKey>>,

    processes: HashMap<ShareProcessId, ShareProcess>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut inner = self.write()?;
        if inner.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate(format!("user {}", user.id)));
        }
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate(format!("email {}", user.email)));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.read()?.users.get(id).cloned())
    }

    async fn insert_group(&self, group: &Group, first_member: &GroupMember) -> Result<()> {
        let mut inner = self.write()?;
        if inner.groups.contains_key(&group.id) {
            return Err(StoreError::Duplicate(format!("group {}", group.id)));
        }
        if first_member.group_id != group.id {
            return Err(StoreError::InvalidData(
                "first member belongs to another group".into(),
            ));
        }
        inner.groups.insert(group.id, group.clone());
        inner
            .members
            .insert((group.id, first_member.user_id), first_member.clone());
        Ok(())
    }

    async fn get_group(&self, id: &GroupId) -> Result<Option<Group>> {
        Ok(self.read()?.groups.get(id).cloned())
    }

    async fn insert_member(&self, member: &GroupMember) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.groups.contains_key(&member.group_id) {
            return Err(StoreError::NotFound(format!("group {}", member.group_id)));
        }
        let key = (member.group_id, member.user_id);
        if inner.members.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "member {} of {}",
                member.user_id, member.group_id
            )));
        }
        inner.members.insert(key, member.clone());
        Ok(())
    }

    async fn delete_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .members
            .remove(&(*group_id, *user_id))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("member {} of {}", user_id, group_id)))
    }

    async fn get_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<Option<GroupMember>> {
        Ok(self.read()?.members.get(&(*group_id, *user_id)).cloned())
    }

    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<GroupMember>> {
        let inner = self.read()?;
        Ok(inner
            .members
            .values()
            .filter(|m| &m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn list_user_groups(&self, user_id: &UserId) -> Result<Vec<GroupId>> {
        let inner = self.read()?;
        Ok(inner
            .members
            .keys()
            .filter(|(_, u)| u == user_id)
            .map(|(g, _)| *g)
            .collect())
    }

    async fn insert_resource(
        &self,
        resource: &Resource,
        grants: &[Grant],
        keys: &[ResourceKey],
    ) -> Result<()> {
        let mut inner = self.write()?;
        if inner.resources.contains_key(&resource.id) {
            return Err(StoreError::Duplicate(format!("resource {}", resource.id)));
        }
        inner.resources.insert(resource.id, resource.clone());
        inner.resource_order.push(resource.id);
        inner.versions.insert(resource.id, 0);
        inner.grants.insert(
            resource.id,
            grants.iter().map(|g| (g.group_id, *g)).collect(),
        );
        inner.keys.insert(
            resource.id,
            keys.iter().map(|k| (k.group_id, k.clone())).collect(),
        );
        Ok(())
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        Ok(self.read()?.resources.get(id).cloned())
    }

    async fn list_descendants(&self, id: &ResourceId) -> Result<Vec<Resource>> {
        let inner = self.read()?;
        let Some(root) = inner.resources.get(id) else {
            return Ok(Vec::new());
        };

        let mut out: Vec<Resource> = inner
            .resource_order
            .iter()
            .filter_map(|rid| inner.resources.get(rid))
            .filter(|r| match root.kind {
                ResourceKind::Vault => r.vault_id == Some(root.id),
                ResourceKind::Folder => r.folder_id == Some(root.id),
                ResourceKind::Password => false,
            })
            .cloned()
            .collect();
        // Stable: folders first, insertion order within a kind.
        out.sort_by_key(|r| r.kind != ResourceKind::Folder);
        Ok(out)
    }

    async fn get_grants(&self, resource_id: &ResourceId) -> Result<VersionedGrants> {
        let inner = self.read()?;
        let version = *inner
            .versions
            .get(resource_id)
            .ok_or_else(|| StoreError::NotFound(format!("resource {}", resource_id)))?;
        let grants = inner
            .grants
            .get(resource_id)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default();
        Ok(VersionedGrants { grants, version })
    }

    async fn commit_grants(&self, commit: GrantCommit) -> Result<CommitResult> {
        let mut inner = self.write()?;
        let resource_id = commit.resource_id;

        if let Some(process_id) = commit.require_running {
            let running = inner
                .processes
                .get(&process_id)
                .map(|p| p.status == ShareStatus::Running)
                .unwrap_or(false);
            if !running {
                return Err(StoreError::Superseded(process_id));
            }
        }

        let actual = *inner
            .versions
            .get(&resource_id)
            .ok_or_else(|| StoreError::NotFound(format!("resource {}", resource_id)))?;
        if let Some(expected) = commit.expected_version {
            if expected != actual {
                return Err(StoreError::Conflict {
                    resource_id,
                    expected,
                    actual,
                });
            }
        }

        let version = actual + 1;
        inner.versions.insert(resource_id, version);

        let grants = inner.grants.entry(resource_id).or_default();
        for group_id in &commit.removals {
            grants.remove(group_id);
        }
        for grant in &commit.upserts {
            grants.insert(grant.group_id, Grant { resource_id, ..*grant });
        }

        let keys = inner.keys.entry(resource_id).or_default();
        for group_id in &commit.keys_removed {
            keys.remove(group_id);
        }
        for key in commit.keys_added {
            keys.insert(key.group_id, key);
        }

        let mut canceled = Vec::new();
        if let Some(process) = commit.share_process {
            let now = now_millis();
            for older in inner.processes.values_mut() {
                if older.target_id == process.target_id && !older.is_terminal() {
                    older
                        .cancel(now)
                        .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                    canceled.push(older.id);
                }
            }
            inner.processes.insert(process.id, process);
        }

        Ok(CommitResult { version, canceled })
    }

    async fn list_resource_keys(&self, resource_id: &ResourceId) -> Result<Vec<ResourceKey>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .get(resource_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_resource_key(
        &self,
        resource_id: &ResourceId,
        group_id: &GroupId,
    ) -> Result<Option<ResourceKey>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .get(resource_id)
            .and_then(|m| m.get(group_id))
            .cloned())
    }

    async fn get_share_process(&self, id: &ShareProcessId) -> Result<Option<ShareProcess>> {
        Ok(self.read()?.processes.get(id).cloned())
    }

    async fn update_share_process(&self, process: &ShareProcess, expected: ShareStatus) -> Result<()> {
        let mut inner = self.write()?;
        let stored = inner
            .processes
            .get_mut(&process.id)
            .ok_or_else(|| StoreError::NotFound(format!("share process {}", process.id)))?;
        if stored.status != expected {
            return Err(StoreError::Superseded(process.id));
        }
        *stored = process.clone();
        Ok(())
    }

    async fn list_share_processes(&self, status: ShareStatus) -> Result<Vec<ShareProcess>> {
        let inner = self.read()?;
        let mut out: Vec<ShareProcess> = inner
            .processes
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.created_at);
        Ok(out)
    }

    async fn list_share_processes_for_target(&self, target_id: &ResourceId) -> Result<Vec<ShareProcess>> {
        let inner = self.read()?;
        let mut out: Vec<ShareProcess> = inner
            .processes
            .values()
            .filter(|p| &p.target_id == target_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.created_at);
        Ok(out)
    }
}
