//! Store trait: the abstract interface for persistence.
//!
//! The engine and the share worker only talk to storage through this trait.
//! Implementations include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;

use keywarden_core::{
    Grant, Group, GroupId, GroupMember, Resource, ResourceId, ResourceKey, ShareProcess,
    ShareProcessId, ShareStatus, User, UserId,
};

use crate::error::Result;

/// A resource's grants together with the version they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedGrants {
    pub grants: Vec<Grant>,
    pub version: u64,
}

/// One atomic change to a resource's grants and wrapped keys.
///
/// When `share_process` is set it is inserted in the same transaction, and
/// every older non-terminal process on the same target is canceled.
#[derive(Debug, Clone)]
pub struct GrantCommit {
    pub resource_id: ResourceId,
    /// Version read before computing the change. `None` skips the check.
    pub expected_version: Option<u64>,
    pub upserts: Vec<Grant>,
    pub removals: Vec<GroupId>,
    pub keys_added: Vec<ResourceKey>,
    pub keys_removed: Vec<GroupId>,
    pub share_process: Option<ShareProcess>,
    /// Apply only while this process is still Running. Fails with
    /// `Superseded` otherwise, leaving everything untouched.
    pub require_running: Option<ShareProcessId>,
}

impl GrantCommit {
    pub fn new(resource_id: ResourceId, expected_version: Option<u64>) -> Self {
        Self {
            resource_id,
            expected_version,
            upserts: Vec::new(),
            removals: Vec::new(),
            keys_added: Vec::new(),
            keys_removed: Vec::new(),
            share_process: None,
            require_running: None,
        }
    }

    /// Whether committing would change nothing.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
            && self.removals.is_empty()
            && self.keys_added.is_empty()
            && self.keys_removed.is_empty()
            && self.share_process.is_none()
    }
}

/// Outcome of a grant commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub version: u64,
    /// Older processes canceled in favour of the inserted one.
    pub canceled: Vec<ShareProcessId>,
}

/// The Store trait: async interface for persistence.
///
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the
/// runtime.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Users and groups
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a user. Fails with `Duplicate` on a reused id or email.
    async fn insert_user(&self, user: &User) -> Result<()>;

    async fn get_user(&self, id: &UserId) -> Result<Option<User>>;

    /// Insert a group together with its first member.
    async fn insert_group(&self, group: &Group, first_member: &GroupMember) -> Result<()>;

    async fn get_group(&self, id: &GroupId) -> Result<Option<Group>>;

    /// Fails with `Duplicate` if the user is already a member.
    async fn insert_member(&self, member: &GroupMember) -> Result<()>;

    /// Fails with `NotFound` if the user is not a member.
    async fn delete_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<()>;

    async fn get_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<Option<GroupMember>>;

    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<GroupMember>>;

    /// Groups the user belongs to, including the private group.
    async fn list_user_groups(&self, user_id: &UserId) -> Result<Vec<GroupId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Resources and grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a resource with its initial grants and wrapped keys.
    async fn insert_resource(
        &self,
        resource: &Resource,
        grants: &[Grant],
        keys: &[ResourceKey],
    ) -> Result<()>;

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>>;

    /// Descendants of a vault (folders, then passwords) or of a folder
    /// (its passwords). Empty for a password.
    async fn list_descendants(&self, id: &ResourceId) -> Result<Vec<Resource>>;

    /// Fails with `NotFound` for an unknown resource.
    async fn get_grants(&self, resource_id: &ResourceId) -> Result<VersionedGrants>;

    /// Apply a [`GrantCommit`] atomically. Fails with `Conflict` if the
    /// resource's version moved since `expected_version`.
    async fn commit_grants(&self, commit: GrantCommit) -> Result<CommitResult>;

    async fn list_resource_keys(&self, resource_id: &ResourceId) -> Result<Vec<ResourceKey>>;

    async fn get_resource_key(
        &self,
        resource_id: &ResourceId,
        group_id: &GroupId,
    ) -> Result<Option<ResourceKey>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Share processes
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_share_process(&self, id: &ShareProcessId) -> Result<Option<ShareProcess>>;

    /// Overwrite a process record if its stored status is still `expected`.
    /// Fails with `Superseded` otherwise.
    async fn update_share_process(&self, process: &ShareProcess, expected: ShareStatus) -> Result<()>;

    async fn list_share_processes(&self, status: ShareStatus) -> Result<Vec<ShareProcess>>;

    async fn list_share_processes_for_target(&self, target_id: &ResourceId) -> Result<Vec<ShareProcess>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Claim a pending process for execution (Pending → Running).
    ///
    /// Returns `None` if the process is gone or no longer pending.
    fn claim_share_process(
        &self,
        id: &ShareProcessId,
        total_items: u64,
        now: i64,
    ) -> impl std::future::Future<Output = Result<Option<ShareProcess>>> + Send;

    /// Persist progress of a running process.
    fn save_share_progress(
        &self,
        process: &ShareProcess,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn claim_share_process(
        &self,
        id: &ShareProcessId,
        total_items: u64,
        now: i64,
    ) -> Result<Option<ShareProcess>> {
        let Some(mut process) = self.get_share_process(id).await? else {
            return Ok(None);
        };
        if process.claim(total_items, now).is_err() {
            return Ok(None);
        }
        match self.update_share_process(&process, ShareStatus::Pending).await {
            Ok(()) => Ok(Some(process)),
            Err(crate::StoreError::Superseded(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save_share_progress(&self, process: &ShareProcess) -> Result<()> {
        self.update_share_process(process, ShareStatus::Running).await
    }
}
