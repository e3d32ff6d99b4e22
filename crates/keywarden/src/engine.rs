//! The Engine: unified API for access control and key distribution.
//!
//! The Engine brings together the key envelope, the permission graph, the
//! diff engine, storage, and share processes. Every operation hydrates what
//! it needs from the store, validates in memory, and commits once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use zeroize::Zeroizing;

use keywarden_core::{
    now_millis, Access, EscrowedGroupKey, Grant, GrantOrigin, Group, GroupId, GroupMember,
    NewShareProcess, RequestedGrant, RequestedUser, Resource, ResourceId, ResourceKey,
    ResourceKind, ShareProcess, ShareProcessId, User, UserId, UserKeys,
};
use keywarden_envelope::{
    generate_keypair, wrap_for_recipient, EncryptionKey, PasswordSealedKey, WrappedSecret,
    X25519StaticSecret,
};
use keywarden_perms::{compute_diff, DiffInput, PermissionDiff, PermissionGraph, PermsError};
use keywarden_share::{ShareRunReport, ShareWorker, TaskQueue, WorkerConfig};
use keywarden_store::{GrantCommit, Store};

use crate::audit::{AuditEntry, AuditSink};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::identity::CurrentUser;

/// A permission-change request on one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRequest {
    pub resource_id: ResourceId,
    pub groups: Vec<RequestedGrant>,
    /// Resolved to each user's private group.
    pub users: Vec<RequestedUser>,
    /// Apply the requested set to every descendant as well.
    pub cascade: bool,
}

impl ShareRequest {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            groups: Vec::new(),
            users: Vec::new(),
            cascade: false,
        }
    }

    pub fn group(mut self, group_id: GroupId, can_write: bool) -> Self {
        self.groups.push(RequestedGrant::new(group_id, can_write));
        self
    }

    pub fn partial_group(mut self, group_id: GroupId, can_write: bool) -> Self {
        self.groups.push(RequestedGrant::partial(group_id, can_write));
        self
    }

    pub fn user(mut self, user_id: UserId, can_write: bool) -> Self {
        self.users.push(RequestedUser {
            user_id,
            can_write,
            partial: false,
        });
        self
    }

    pub fn cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }
}

/// Result of [`Engine::apply_grants`].
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub diff: PermissionDiff,
    /// `{group_name: {"from": .., "to": ..}}` for every group whose access
    /// changed.
    pub audit: Value,
    /// Grants version after the commit. `None` if nothing was committed.
    pub version: Option<u64>,
    pub share_process_id: Option<ShareProcessId>,
    /// Older processes on the same target canceled by this change.
    pub canceled: Vec<ShareProcessId>,
}

impl ApplyOutcome {
    fn unchanged(diff: PermissionDiff) -> Self {
        Self {
            diff,
            audit: Value::Object(Map::new()),
            version: None,
            share_process_id: None,
            canceled: Vec::new(),
        }
    }
}

/// Result of [`Engine::revoke_grant`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeOutcome {
    pub removed: Grant,
    pub version: u64,
    pub share_process_id: Option<ShareProcessId>,
    pub canceled: Vec<ShareProcessId>,
}

/// A resource with its ancestors and grants loaded into a graph.
struct Loaded {
    resource: Resource,
    graph: PermissionGraph,
    version: u64,
}

struct Plan {
    loaded: Loaded,
    requested: Vec<RequestedGrant>,
    caller_full_write: bool,
    diff: PermissionDiff,
}

/// The main Engine struct.
///
/// Provides a unified API for:
/// - Registering users and managing groups
/// - Creating vaults, folders and passwords with wrapped content keys
/// - Diffing and applying permission changes
/// - Creating and running share processes
pub struct Engine<S: Store, Q: TaskQueue, A: AuditSink> {
    store: Arc<S>,
    queue: Arc<Q>,
    audit: Arc<A>,
    config: EngineConfig,
}

impl<S: Store, Q: TaskQueue, A: AuditSink> Engine<S, Q, A> {
    /// Create a new engine instance.
    pub fn new(store: Arc<S>, queue: Arc<Q>, audit: Arc<A>, config: EngineConfig) -> Self {
        Self {
            store,
            queue,
            audit,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn audit_sink(&self) -> &A {
        &self.audit
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A worker sharing this engine's store, queue and server keys.
    pub fn worker(&self, config: WorkerConfig) -> ShareWorker<S, Q> {
        ShareWorker::new(
            self.store.clone(),
            self.queue.clone(),
            self.config.server_keys.clone(),
            config,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users and groups
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a verified user together with their private group.
    pub async fn register_user(&self, email: &str, password: &[u8]) -> Result<User> {
        let (public_key, secret) = generate_keypair();
        let sealed_private_key =
            PasswordSealedKey::seal(secret.to_bytes().as_slice(), password, &self.config.kdf)?;

        let (group_public, group_secret) = generate_keypair();
        let group_id = GroupId::new();
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            keys: Some(UserKeys {
                public_key,
                sealed_private_key,
            }),
            private_group_id: Some(group_id),
        };
        let group = Group {
            id: group_id,
            name: email.to_string(),
            private: true,
            public_key: group_public,
        };
        let member = GroupMember {
            group_id: group.id,
            user_id: user.id,
            wrapped_group_key: wrap_for_recipient(group_secret.to_bytes().as_slice(), &public_key)?,
            is_manager: true,
        };

        self.store.insert_user(&user).await?;
        self.store.insert_group(&group, &member).await?;

        tracing::info!(user_id = %user.id, private_group_id = %group.id, "registered user");
        Ok(user)
    }

    /// Build the caller identity for a stored user.
    pub async fn current_user(&self, user_id: &UserId) -> Result<CurrentUser> {
        let user = self.user(user_id).await?;
        let public_key = user.public_key().ok_or(EngineError::UserNotVerified(user.id))?;
        let group_ids = self.store.list_user_groups(user_id).await?;
        Ok(CurrentUser {
            id: user.id,
            group_ids,
            public_key,
        })
    }

    /// Create a shared group with the actor as its first member and manager.
    pub async fn create_group(&self, actor: &CurrentUser, name: &str) -> Result<Group> {
        let (public_key, secret) = generate_keypair();
        let group = Group {
            id: GroupId::new(),
            name: name.to_string(),
            private: false,
            public_key,
        };
        let member = GroupMember {
            group_id: group.id,
            user_id: actor.id,
            wrapped_group_key: wrap_for_recipient(secret.to_bytes().as_slice(), &actor.public_key)?,
            is_manager: true,
        };
        self.store.insert_group(&group, &member).await?;

        tracing::info!(group_id = %group.id, actor_id = %actor.id, "created group");
        Ok(group)
    }

    /// Add a verified user to a group. The actor must be a manager of the
    /// group and unwraps the group key with their password to re-wrap it
    /// for the new member.
    pub async fn add_member(
        &self,
        actor: &CurrentUser,
        password: &[u8],
        group_id: &GroupId,
        user_id: &UserId,
        is_manager: bool,
    ) -> Result<GroupMember> {
        let group = self.group(group_id).await?;
        self.require_manager(actor, group_id).await?;

        let user = self.user(user_id).await?;
        let user_public = user.public_key().ok_or(EngineError::UserNotVerified(user.id))?;

        let mut graph = self.membership_graph(&group).await?;
        graph.add_member(group.id, user.id)?;

        let user_secret = self.user_secret(&actor.id, password).await?;
        let group_secret = self.member_group_secret(&user_secret, actor, group_id).await?;

        let member = GroupMember {
            group_id: group.id,
            user_id: user.id,
            wrapped_group_key: wrap_for_recipient(group_secret.to_bytes().as_slice(), &user_public)?,
            is_manager,
        };
        self.store.insert_member(&member).await?;

        tracing::info!(group_id = %group.id, user_id = %user.id, "added group member");
        Ok(member)
    }

    /// Remove a user from a group. Managers may remove anyone; a member may
    /// remove themselves. The last member cannot leave.
    pub async fn remove_member(
        &self,
        actor: &CurrentUser,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<()> {
        let group = self.group(group_id).await?;
        if actor.id != *user_id {
            self.require_manager(actor, group_id).await?;
        }

        let mut graph = self.membership_graph(&group).await?;
        graph.remove_member(group.id, *user_id)?;
        self.store.delete_member(group_id, user_id).await?;

        tracing::info!(group_id = %group.id, user_id = %user_id, "removed group member");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resources
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a vault, folder or password and return its fresh content key.
    ///
    /// A vault starts with an explicit write grant for the actor's private
    /// group. Folders and passwords start without own grants and require
    /// write access on their parent; their key is wrapped for every group
    /// that inherits read access.
    pub async fn create_resource(
        &self,
        actor: &CurrentUser,
        resource: Resource,
    ) -> Result<EncryptionKey> {
        if !resource.is_well_formed() {
            return Err(EngineError::InvalidOperation(format!(
                "malformed {} {}",
                resource.kind.as_str(),
                resource.id
            )));
        }

        let mut graph = PermissionGraph::new();
        let mut grants = Vec::new();
        match resource.kind {
            ResourceKind::Vault => {
                let user = self.user(&actor.id).await?;
                let private_group = user
                    .private_group_id
                    .ok_or(EngineError::UserNotVerified(user.id))?;
                grants.push(Grant::new(resource.id, private_group, true, GrantOrigin::Explicit));
            }
            ResourceKind::Folder | ResourceKind::Password => {
                self.hydrate_parents(&mut graph, &resource).await?;
            }
        }
        graph.insert_resource(resource.clone());

        if resource.kind != ResourceKind::Vault
            && !graph
                .effective_permission(&resource.id, &actor.group_ids)
                .can_write
        {
            return Err(PermsError::PermissionDenied(format!(
                "user {} cannot create a {} here",
                actor.id,
                resource.kind.as_str()
            ))
            .into());
        }

        graph.hydrate_grants(resource.id, grants.iter().copied());
        if !graph.has_writer(&resource.id) {
            return Err(PermsError::NoWriterViolation(resource.id).into());
        }

        let content_key = EncryptionKey::generate();
        let mut keys = Vec::new();
        for group_id in graph.readers(&resource.id) {
            let group = self.group(&group_id).await?;
            keys.push(ResourceKey {
                resource_id: resource.id,
                group_id,
                wrapped: wrap_for_recipient(content_key.as_bytes(), &group.public_key)?,
            });
        }

        self.store.insert_resource(&resource, &grants, &keys).await?;

        tracing::info!(
            resource_id = %resource.id,
            kind = resource.kind.as_str(),
            readers = keys.len(),
            "created resource"
        );
        Ok(content_key)
    }

    /// Unwrap a resource's content key through one of the actor's groups.
    pub async fn read_resource_key(
        &self,
        actor: &CurrentUser,
        password: &[u8],
        resource_id: &ResourceId,
    ) -> Result<EncryptionKey> {
        let keys = self.store.list_resource_keys(resource_id).await?;
        let user_secret = self.user_secret(&actor.id, password).await?;
        self.content_key(actor, &user_secret, resource_id, &keys).await
    }

    /// The actor's effective access on a resource.
    pub async fn effective_permission(
        &self,
        actor: &CurrentUser,
        resource_id: &ResourceId,
    ) -> Result<Access> {
        let loaded = self.load(resource_id).await?;
        Ok(loaded.graph.effective_permission(resource_id, &actor.group_ids))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Envelope helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Wrap a secret for a group's public key.
    pub async fn wrap_secret_for_group(
        &self,
        secret: &[u8],
        group_id: &GroupId,
    ) -> Result<WrappedSecret> {
        let group = self.group(group_id).await?;
        Ok(wrap_for_recipient(secret, &group.public_key)?)
    }

    /// Unwrap a secret wrapped for one of the actor's groups.
    pub async fn unwrap_secret_for_user(
        &self,
        actor: &CurrentUser,
        password: &[u8],
        group_id: &GroupId,
        wrapped: &WrappedSecret,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let user_secret = self.user_secret(&actor.id, password).await?;
        let group_secret = self.member_group_secret(&user_secret, actor, group_id).await?;
        Ok(wrapped.unwrap(&group_secret)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permission changes
    // ─────────────────────────────────────────────────────────────────────────

    /// Diff a request against the resource's current grants without
    /// changing anything.
    pub async fn compute_diff(
        &self,
        actor: &CurrentUser,
        request: &ShareRequest,
    ) -> Result<PermissionDiff> {
        Ok(self.plan(actor, request).await?.diff)
    }

    /// Apply a permission change to a resource.
    ///
    /// The resource's grants and keys are updated synchronously. For a vault
    /// or folder, a share process propagating the change to descendants is
    /// created in the same commit and enqueued. A no-op request without
    /// cascade changes nothing and records no audit entry.
    pub async fn apply_grants(
        &self,
        actor: &CurrentUser,
        password: &[u8],
        request: &ShareRequest,
    ) -> Result<ApplyOutcome> {
        let user_secret = self.user_secret(&actor.id, password).await?;

        let mut attempt = 0;
        loop {
            match self.try_apply(actor, &user_secret, request).await {
                Err(EngineError::Store(ref e)) if e.is_conflict() => {
                    if attempt >= self.config.conflict_retries {
                        return Err(EngineError::StorageConflict(request.resource_id));
                    }
                    attempt += 1;
                    tracing::warn!(resource_id = %request.resource_id, attempt, "grant conflict, retrying");
                }
                other => return other,
            }
        }
    }

    async fn try_apply(
        &self,
        actor: &CurrentUser,
        user_secret: &X25519StaticSecret,
        request: &ShareRequest,
    ) -> Result<ApplyOutcome> {
        let Plan {
            mut loaded,
            requested,
            caller_full_write,
            diff,
        } = self.plan(actor, request).await?;
        let resource_id = loaded.resource.id;

        if !diff.should_proceed() {
            tracing::debug!(resource_id = %resource_id, "permission change is a no-op");
            return Ok(ApplyOutcome::unchanged(diff));
        }

        loaded
            .graph
            .replace_grants(resource_id, diff.target.iter().copied())?;
        let readers = loaded.graph.readers(&resource_id);

        let mut commit = GrantCommit::new(resource_id, Some(loaded.version));
        commit.upserts = diff.changes.iter().map(|c| c.to).collect();
        self.reconcile_keys(actor, user_secret, &loaded.resource, &readers, &mut commit)
            .await?;

        if loaded.resource.kind.has_descendants() {
            let process = self
                .new_share_process(
                    actor,
                    user_secret,
                    &loaded.resource,
                    requested,
                    request.users.clone(),
                    request.cascade,
                    caller_full_write,
                )
                .await?;
            commit.share_process = Some(process);
        }
        let share_process_id = commit.share_process.as_ref().map(|p| p.id);

        let result = if commit.is_empty() {
            None
        } else {
            Some(self.store.commit_grants(commit).await?)
        };

        tracing::info!(
            resource_id = %resource_id,
            changes = diff.changes.len(),
            cascade = request.cascade,
            share_process_id = ?share_process_id,
            "applied permission change"
        );

        let (old_values, new_values, audit) = self.render_audit(&diff).await?;
        if !diff.no_op {
            self.record_audit(
                actor,
                "permissions_changed",
                &loaded.resource,
                old_values,
                new_values,
            )
            .await;
        }
        if let Some(id) = share_process_id {
            self.enqueue(id).await;
        }

        Ok(ApplyOutcome {
            diff,
            audit,
            version: result.as_ref().map(|r| r.version),
            share_process_id,
            canceled: result.map(|r| r.canceled).unwrap_or_default(),
        })
    }

    /// Hard-delete a group's own grant on a resource. Requires full write.
    pub async fn revoke_grant(
        &self,
        actor: &CurrentUser,
        password: &[u8],
        resource_id: &ResourceId,
        group_id: &GroupId,
    ) -> Result<RevokeOutcome> {
        let user_secret = self.user_secret(&actor.id, password).await?;

        let mut attempt = 0;
        loop {
            match self
                .try_revoke(actor, &user_secret, resource_id, group_id)
                .await
            {
                Err(EngineError::Store(ref e)) if e.is_conflict() => {
                    if attempt >= self.config.conflict_retries {
                        return Err(EngineError::StorageConflict(*resource_id));
                    }
                    attempt += 1;
                    tracing::warn!(resource_id = %resource_id, attempt, "grant conflict, retrying");
                }
                other => return other,
            }
        }
    }

    async fn try_revoke(
        &self,
        actor: &CurrentUser,
        user_secret: &X25519StaticSecret,
        resource_id: &ResourceId,
        group_id: &GroupId,
    ) -> Result<RevokeOutcome> {
        let mut loaded = self.load(resource_id).await?;
        if !loaded
            .graph
            .full_write_permission(resource_id, &actor.group_ids)
        {
            return Err(PermsError::PermissionDenied(format!(
                "user {} cannot revoke grants on {}",
                actor.id, resource_id
            ))
            .into());
        }

        let removed = loaded.graph.revoke(*resource_id, *group_id)?;
        let readers = loaded.graph.readers(resource_id);

        let mut commit = GrantCommit::new(*resource_id, Some(loaded.version));
        commit.removals.push(*group_id);
        self.reconcile_keys(actor, user_secret, &loaded.resource, &readers, &mut commit)
            .await?;

        if loaded.resource.kind.has_descendants() {
            let remaining = loaded
                .graph
                .grants(resource_id)
                .into_iter()
                .map(|g| RequestedGrant::new(g.group_id, g.can_write))
                .collect();
            let process = self
                .new_share_process(
                    actor,
                    user_secret,
                    &loaded.resource,
                    remaining,
                    Vec::new(),
                    false,
                    true,
                )
                .await?;
            commit.share_process = Some(process);
        }
        let share_process_id = commit.share_process.as_ref().map(|p| p.id);
        let result = self.store.commit_grants(commit).await?;

        tracing::info!(resource_id = %resource_id, group_id = %group_id, "revoked grant");

        let name = self.group_name(group_id).await?;
        let mut old_values = Map::new();
        old_values.insert(name.clone(), json!({ "can_write": removed.can_write }));
        let mut new_values = Map::new();
        new_values.insert(name, Value::Null);
        self.record_audit(
            actor,
            "permission_revoked",
            &loaded.resource,
            Value::Object(old_values),
            Value::Object(new_values),
        )
        .await;
        if let Some(id) = share_process_id {
            self.enqueue(id).await;
        }

        Ok(RevokeOutcome {
            removed,
            version: result.version,
            share_process_id,
            canceled: result.canceled,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Share processes
    // ─────────────────────────────────────────────────────────────────────────

    /// Create and enqueue a share process for a vault or folder without
    /// changing the target's own grants.
    pub async fn create_share_process(
        &self,
        actor: &CurrentUser,
        password: &[u8],
        request: &ShareRequest,
    ) -> Result<ShareProcessId> {
        let user_secret = self.user_secret(&actor.id, password).await?;

        let mut attempt = 0;
        loop {
            match self.try_create_share_process(actor, &user_secret, request).await {
                Err(EngineError::Store(ref e)) if e.is_conflict() => {
                    if attempt >= self.config.conflict_retries {
                        return Err(EngineError::StorageConflict(request.resource_id));
                    }
                    attempt += 1;
                    tracing::warn!(resource_id = %request.resource_id, attempt, "grant conflict, retrying");
                }
                other => return other,
            }
        }
    }

    async fn try_create_share_process(
        &self,
        actor: &CurrentUser,
        user_secret: &X25519StaticSecret,
        request: &ShareRequest,
    ) -> Result<ShareProcessId> {
        let loaded = self.load(&request.resource_id).await?;
        let caller_full_write = self.authorize_write(&loaded, actor)?;
        let requested = self.resolve_requested(request).await?;

        let process = self
            .new_share_process(
                actor,
                user_secret,
                &loaded.resource,
                requested,
                request.users.clone(),
                request.cascade,
                caller_full_write,
            )
            .await?;
        let id = process.id;

        let mut commit = GrantCommit::new(loaded.resource.id, Some(loaded.version));
        commit.share_process = Some(process);
        self.store.commit_grants(commit).await?;

        self.enqueue(id).await;
        Ok(id)
    }

    /// Run a share process to completion in the calling task.
    pub async fn run_share_process(&self, id: &ShareProcessId) -> Result<ShareRunReport> {
        Ok(self
            .worker(WorkerConfig::default())
            .run_share_process(id)
            .await?)
    }

    pub async fn share_process(&self, id: &ShareProcessId) -> Result<ShareProcess> {
        self.store
            .get_share_process(id)
            .await?
            .ok_or(EngineError::ShareProcessNotFound(*id))
    }

    /// All processes ever created for a target, oldest first.
    pub async fn share_processes_for(&self, resource_id: &ResourceId) -> Result<Vec<ShareProcess>> {
        Ok(self.store.list_share_processes_for_target(resource_id).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn user(&self, id: &UserId) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or(EngineError::UserNotFound(*id))
    }

    async fn group(&self, id: &GroupId) -> Result<Group> {
        self.store
            .get_group(id)
            .await?
            .ok_or(EngineError::GroupNotFound(*id))
    }

    async fn group_name(&self, id: &GroupId) -> Result<String> {
        Ok(self
            .store
            .get_group(id)
            .await?
            .map(|g| g.name)
            .unwrap_or_else(|| id.to_string()))
    }

    /// Open the user's sealed private key. A wrong password fails with
    /// `DecryptionFailed`.
    async fn user_secret(&self, user_id: &UserId, password: &[u8]) -> Result<X25519StaticSecret> {
        let user = self.user(user_id).await?;
        let keys = user.keys.ok_or(EngineError::UserNotVerified(*user_id))?;
        Ok(keys
            .sealed_private_key
            .open_secret_key(password, &self.config.kdf)?)
    }

    async fn member_group_secret(
        &self,
        user_secret: &X25519StaticSecret,
        actor: &CurrentUser,
        group_id: &GroupId,
    ) -> Result<X25519StaticSecret> {
        let member = self
            .store
            .get_member(group_id, &actor.id)
            .await?
            .ok_or_else(|| {
                EngineError::NotAuthorized(format!(
                    "user {} is not a member of group {}",
                    actor.id, group_id
                ))
            })?;
        Ok(member.wrapped_group_key.unwrap_secret_key(user_secret)?)
    }

    async fn require_manager(&self, actor: &CurrentUser, group_id: &GroupId) -> Result<()> {
        match self.store.get_member(group_id, &actor.id).await? {
            Some(member) if member.is_manager => Ok(()),
            _ => Err(EngineError::NotAuthorized(format!(
                "user {} does not manage group {}",
                actor.id, group_id
            ))),
        }
    }

    async fn membership_graph(&self, group: &Group) -> Result<PermissionGraph> {
        let mut graph = PermissionGraph::new();
        graph.insert_group(group.id, group.private);
        for member in self.store.list_members(&group.id).await? {
            graph.add_member(group.id, member.user_id)?;
        }
        Ok(graph)
    }

    /// Load the parents of a resource that does not exist yet, checking that
    /// they form a valid chain.
    async fn hydrate_parents(&self, graph: &mut PermissionGraph, resource: &Resource) -> Result<()> {
        let mut vault_of_folder = None;
        for parent_id in resource.ancestors() {
            let parent = self
                .store
                .get_resource(&parent_id)
                .await?
                .ok_or(EngineError::ResourceNotFound(parent_id))?;

            let expected = if Some(parent_id) == resource.folder_id {
                vault_of_folder = parent.vault_id;
                ResourceKind::Folder
            } else {
                ResourceKind::Vault
            };
            if parent.kind != expected {
                return Err(EngineError::InvalidOperation(format!(
                    "{} is a {}, expected a {}",
                    parent_id,
                    parent.kind.as_str(),
                    expected.as_str()
                )));
            }

            let grants = self.store.get_grants(&parent_id).await?;
            graph.insert_resource(parent);
            graph.hydrate_grants(parent_id, grants.grants);
        }

        if resource.folder_id.is_some() && vault_of_folder != resource.vault_id {
            return Err(EngineError::InvalidOperation(
                "folder belongs to another vault".into(),
            ));
        }
        Ok(())
    }

    async fn load(&self, resource_id: &ResourceId) -> Result<Loaded> {
        let resource = self
            .store
            .get_resource(resource_id)
            .await?
            .ok_or(EngineError::ResourceNotFound(*resource_id))?;

        let mut graph = PermissionGraph::new();
        for ancestor_id in resource.ancestors() {
            let ancestor = self
                .store
                .get_resource(&ancestor_id)
                .await?
                .ok_or(EngineError::ResourceNotFound(ancestor_id))?;
            let grants = self.store.get_grants(&ancestor_id).await?;
            graph.insert_resource(ancestor);
            graph.hydrate_grants(ancestor_id, grants.grants);
        }

        let own = self.store.get_grants(resource_id).await?;
        graph.insert_resource(resource.clone());
        graph.hydrate_grants(resource.id, own.grants);

        Ok(Loaded {
            resource,
            graph,
            version: own.version,
        })
    }

    /// Changing permissions requires write access. Returns whether that
    /// access is full write.
    fn authorize_write(&self, loaded: &Loaded, actor: &CurrentUser) -> Result<bool> {
        let id = loaded.resource.id;
        let access = loaded.graph.effective_permission(&id, &actor.group_ids);
        if !access.can_write {
            return Err(PermsError::PermissionDenied(format!(
                "user {} cannot change permissions on {}",
                actor.id, id
            ))
            .into());
        }
        Ok(loaded.graph.full_write_permission(&id, &actor.group_ids))
    }

    /// Merge requested groups and users' private groups into one set. A user
    /// entry wins over a group entry for the same private group.
    async fn resolve_requested(&self, request: &ShareRequest) -> Result<Vec<RequestedGrant>> {
        let mut out: BTreeMap<GroupId, RequestedGrant> =
            request.groups.iter().map(|g| (g.group_id, *g)).collect();

        for entry in &request.users {
            let user = self.user(&entry.user_id).await?;
            let group_id = user
                .private_group_id
                .ok_or(EngineError::UserNotVerified(user.id))?;
            out.insert(
                group_id,
                RequestedGrant {
                    group_id,
                    can_write: entry.can_write,
                    partial: entry.partial,
                },
            );
        }

        for group_id in out.keys() {
            self.group(group_id).await?;
        }
        Ok(out.into_values().collect())
    }

    async fn plan(&self, actor: &CurrentUser, request: &ShareRequest) -> Result<Plan> {
        let loaded = self.load(&request.resource_id).await?;
        let caller_full_write = self.authorize_write(&loaded, actor)?;
        let requested = self.resolve_requested(request).await?;

        let id = loaded.resource.id;
        let diff = compute_diff(&DiffInput {
            resource_id: id,
            current: loaded.graph.grants(&id),
            requested: requested.clone(),
            inherited: loaded.graph.inherited_grants(&id),
            caller_has_full_write: caller_full_write,
            cascade: request.cascade,
            protected_groups: BTreeSet::new(),
        })?;

        Ok(Plan {
            loaded,
            requested,
            caller_full_write,
            diff,
        })
    }

    /// Fill in key additions and removals so that exactly `readers` hold a
    /// copy of the resource's content key.
    async fn reconcile_keys(
        &self,
        actor: &CurrentUser,
        user_secret: &X25519StaticSecret,
        resource: &Resource,
        readers: &BTreeSet<GroupId>,
        commit: &mut GrantCommit,
    ) -> Result<()> {
        let keys = self.store.list_resource_keys(&resource.id).await?;
        let holders: BTreeSet<GroupId> = keys.iter().map(|k| k.group_id).collect();

        commit.keys_removed = holders.difference(readers).copied().collect();
        let missing: Vec<GroupId> = readers.difference(&holders).copied().collect();
        if missing.is_empty() {
            return Ok(());
        }

        let content_key = self
            .content_key(actor, user_secret, &resource.id, &keys)
            .await?;
        for group_id in missing {
            let group = self.group(&group_id).await?;
            commit.keys_added.push(ResourceKey {
                resource_id: resource.id,
                group_id,
                wrapped: wrap_for_recipient(content_key.as_bytes(), &group.public_key)?,
            });
        }
        Ok(())
    }

    async fn content_key(
        &self,
        actor: &CurrentUser,
        user_secret: &X25519StaticSecret,
        resource_id: &ResourceId,
        keys: &[ResourceKey],
    ) -> Result<EncryptionKey> {
        let key = keys
            .iter()
            .find(|k| actor.is_member_of(&k.group_id))
            .ok_or_else(|| {
                PermsError::PermissionDenied(format!(
                    "user {} holds no key for {}",
                    actor.id, resource_id
                ))
            })?;
        let group_secret = self
            .member_group_secret(user_secret, actor, &key.group_id)
            .await?;
        Ok(key.wrapped.unwrap_key(&group_secret)?)
    }

    /// Build a Pending process for a vault or folder, escrowing the actor's
    /// group keys to the server.
    #[allow(clippy::too_many_arguments)]
    async fn new_share_process(
        &self,
        actor: &CurrentUser,
        user_secret: &X25519StaticSecret,
        target: &Resource,
        requested_groups: Vec<RequestedGrant>,
        requested_users: Vec<RequestedUser>,
        cascade: bool,
        caller_full_write: bool,
    ) -> Result<ShareProcess> {
        let total_items = self.store.list_descendants(&target.id).await?.len() as u64;

        let mut escrow = Vec::new();
        for group_id in &actor.group_ids {
            let Some(member) = self.store.get_member(group_id, &actor.id).await? else {
                continue;
            };
            let group_secret = member.wrapped_group_key.unwrap_secret_key(user_secret)?;
            escrow.push(EscrowedGroupKey {
                group_id: *group_id,
                wrapped: self.config.server_keys.escrow(&group_secret)?,
            });
        }

        Ok(ShareProcess::new(
            NewShareProcess {
                target_type: target.kind,
                target_id: target.id,
                actor_id: actor.id,
                requested_groups,
                requested_users,
                cascade,
                caller_full_write,
                total_items,
                escrow,
            },
            now_millis(),
        )?)
    }

    /// Returns `(old_values, new_values, combined)` keyed by group name.
    async fn render_audit(&self, diff: &PermissionDiff) -> Result<(Value, Value, Value)> {
        let mut old_values = Map::new();
        let mut new_values = Map::new();
        let mut combined = Map::new();

        for change in &diff.audit {
            let name = self.group_name(&change.group_id).await?;
            let from = change
                .from
                .map(|s| json!({ "can_write": s.can_write }))
                .unwrap_or(Value::Null);
            let to = change
                .to
                .map(|s| json!({ "can_write": s.can_write }))
                .unwrap_or(Value::Null);
            old_values.insert(name.clone(), from.clone());
            new_values.insert(name.clone(), to.clone());
            combined.insert(name, json!({ "from": from, "to": to }));
        }

        Ok((
            Value::Object(old_values),
            Value::Object(new_values),
            Value::Object(combined),
        ))
    }

    /// Audit failures are logged, not returned: the change is already
    /// committed.
    async fn record_audit(
        &self,
        actor: &CurrentUser,
        action_type: &str,
        resource: &Resource,
        old_values: Value,
        new_values: Value,
    ) {
        let entry = AuditEntry {
            action_type: action_type.to_string(),
            entity_type: resource.kind.as_str().to_string(),
            entity_id: resource.id.to_string(),
            old_values,
            new_values,
            actor_id: actor.id,
            created_at: now_millis(),
        };
        if let Err(e) = self.audit.record(entry).await {
            tracing::error!(resource_id = %resource.id, "failed to record audit entry: {:#}", e);
        }
    }

    /// A lost queue entry is picked up by worker recovery, so enqueue
    /// failures are logged only.
    async fn enqueue(&self, id: ShareProcessId) {
        if let Err(e) = self.queue.enqueue(id).await {
            tracing::warn!(process_id = %id, "failed to enqueue share process: {}", e);
        }
    }
}
