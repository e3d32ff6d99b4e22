//! A store wrapper that injects grant conflicts.
//!
//! Stands in for a concurrent writer: each armed conflict makes one
//! `commit_grants` fail with `StoreError::Conflict` before reaching the
//! inner store, so nothing is written.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use keywarden_core::{
    Group, GroupId, GroupMember, Grant, Resource, ResourceId, ResourceKey, ShareProcess,
    ShareProcessId, ShareStatus, User, UserId,
};
use keywarden_store::{
    CommitResult, GrantCommit, MemoryStore, Result, Store, StoreError, VersionedGrants,
};

/// In-memory store whose next grant commits can be made to conflict.
#[derive(Default)]
pub struct ConflictingStore {
    inner: MemoryStore,
    pending: AtomicUsize,
    injected: AtomicUsize,
}

impl ConflictingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` grant commits fail with a conflict.
    pub fn fail_next_commits(&self, count: usize) {
        self.pending.store(count, Ordering::SeqCst);
    }

    /// Conflicts returned so far.
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn take_conflict(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for ConflictingStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.inner.insert_user(user).await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn insert_group(&self, group: &Group, first_member: &GroupMember) -> Result<()> {
        self.inner.insert_group(group, first_member).await
    }

    async fn get_group(&self, id: &GroupId) -> Result<Option<Group>> {
        self.inner.get_group(id).await
    }

    async fn insert_member(&self, member: &GroupMember) -> Result<()> {
        self.inner.insert_member(member).await
    }

    async fn delete_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<()> {
        self.inner.delete_member(group_id, user_id).await
    }

    async fn get_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<Option<GroupMember>> {
        self.inner.get_member(group_id, user_id).await
    }

    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<GroupMember>> {
        self.inner.list_members(group_id).await
    }

    async fn list_user_groups(&self, user_id: &UserId) -> Result<Vec<GroupId>> {
        self.inner.list_user_groups(user_id).await
    }

    async fn insert_resource(
        &self,
        resource: &Resource,
        grants: &[Grant],
        keys: &[ResourceKey],
    ) -> Result<()> {
        self.inner.insert_resource(resource, grants, keys).await
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        self.inner.get_resource(id).await
    }

    async fn list_descendants(&self, id: &ResourceId) -> Result<Vec<Resource>> {
        self.inner.list_descendants(id).await
    }

    async fn get_grants(&self, resource_id: &ResourceId) -> Result<VersionedGrants> {
        self.inner.get_grants(resource_id).await
    }

    async fn commit_grants(&self, commit: GrantCommit) -> Result<CommitResult> {
        if self.take_conflict() {
            self.injected.fetch_add(1, Ordering::SeqCst);
            let actual = self.inner.get_grants(&commit.resource_id).await?.version;
            return Err(StoreError::Conflict {
                resource_id: commit.resource_id,
                expected: commit.expected_version.unwrap_or(actual),
                actual: actual + 1,
            });
        }
        self.inner.commit_grants(commit).await
    }

    async fn list_resource_keys(&self, resource_id: &ResourceId) -> Result<Vec<ResourceKey>> {
        self.inner.list_resource_keys(resource_id).await
    }

    async fn get_resource_key(
        &self,
        resource_id: &ResourceId,
        group_id: &GroupId,
    ) -> Result<Option<ResourceKey>> {
        self.inner.get_resource_key(resource_id, group_id).await
    }

    async fn get_share_process(&self, id: &ShareProcessId) -> Result<Option<ShareProcess>> {
        self.inner.get_share_process(id).await
    }

    async fn update_share_process(&self, process: &ShareProcess, expected: ShareStatus) -> Result<()> {
        self.inner.update_share_process(process, expected).await
    }

    async fn list_share_processes(&self, status: ShareStatus) -> Result<Vec<ShareProcess>> {
        self.inner.list_share_processes(status).await
    }

    async fn list_share_processes_for_target(&self, target_id: &ResourceId) -> Result<Vec<ShareProcess>> {
        self.inner.list_share_processes_for_target(target_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_armed_conflicts_are_consumed() {
        let store = ConflictingStore::new();
        let vault = Resource::vault(ResourceId::new());
        store.insert_resource(&vault, &[], &[]).await.unwrap();

        store.fail_next_commits(1);
        let commit = GrantCommit::new(vault.id, Some(0));
        assert!(store.commit_grants(commit.clone()).await.unwrap_err().is_conflict());
        assert_eq!(store.get_grants(&vault.id).await.unwrap().version, 0);

        store.commit_grants(commit).await.unwrap();
        assert_eq!(store.injected(), 1);
    }
}
