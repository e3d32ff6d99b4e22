//! Users, groups, resources and grants.
//!
//! All cross-entity references are ids. Nothing here owns its parent
//! collection; lookups go through storage.

use serde::{Deserialize, Serialize};

use keywarden_envelope::{PasswordSealedKey, WrappedSecret, X25519PublicKey};

use crate::ids::{GroupId, ResourceId, UserId};

/// A verified user's keypair: public half in the clear, private half
/// sealed under the user's password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeys {
    pub public_key: X25519PublicKey,
    pub sealed_private_key: PasswordSealedKey,
}

/// A user account.
///
/// An unverified user has no keys yet and cannot hold group memberships
/// that require key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub keys: Option<UserKeys>,
    /// The single-member group representing this user for direct shares.
    pub private_group_id: Option<GroupId>,
}

impl User {
    pub fn is_verified(&self) -> bool {
        self.keys.is_some()
    }

    pub fn public_key(&self) -> Option<X25519PublicKey> {
        self.keys.as_ref().map(|k| k.public_key)
    }
}

/// An access-control principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Private groups have exactly one member and stand for that user.
    pub private: bool,
    pub public_key: X25519PublicKey,
}

/// A user's membership in a group, holding the group private key wrapped
/// with the user's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub wrapped_group_key: WrappedSecret,
    pub is_manager: bool,
}

/// Kind of a protected resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Vault,
    Folder,
    Password,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vault => "vault",
            ResourceKind::Folder => "folder",
            ResourceKind::Password => "password",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vault" => Some(ResourceKind::Vault),
            "folder" => Some(ResourceKind::Folder),
            "password" => Some(ResourceKind::Password),
            _ => None,
        }
    }

    /// Whether a permission change on this kind fans out to descendants.
    pub fn has_descendants(&self) -> bool {
        !matches!(self, ResourceKind::Password)
    }
}

/// A vault, folder, or password.
///
/// Folders belong to a vault. Passwords belong to a vault and optionally to
/// a folder inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub vault_id: Option<ResourceId>,
    pub folder_id: Option<ResourceId>,
}

impl Resource {
    pub fn vault(id: ResourceId) -> Self {
        Self {
            id,
            kind: ResourceKind::Vault,
            vault_id: None,
            folder_id: None,
        }
    }

    pub fn folder(id: ResourceId, vault_id: ResourceId) -> Self {
        Self {
            id,
            kind: ResourceKind::Folder,
            vault_id: Some(vault_id),
            folder_id: None,
        }
    }

    pub fn password(id: ResourceId, vault_id: ResourceId, folder_id: Option<ResourceId>) -> Self {
        Self {
            id,
            kind: ResourceKind::Password,
            vault_id: Some(vault_id),
            folder_id,
        }
    }

    /// Ancestors from nearest to farthest (folder, then vault).
    pub fn ancestors(&self) -> Vec<ResourceId> {
        let mut out = Vec::with_capacity(2);
        if let Some(folder) = self.folder_id {
            out.push(folder);
        }
        if let Some(vault) = self.vault_id {
            out.push(vault);
        }
        out
    }

    pub fn parent(&self) -> Option<ResourceId> {
        self.folder_id.or(self.vault_id)
    }

    /// Whether the hierarchy fields agree with the kind.
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            ResourceKind::Vault => self.vault_id.is_none() && self.folder_id.is_none(),
            ResourceKind::Folder => self.vault_id.is_some() && self.folder_id.is_none(),
            ResourceKind::Password => self.vault_id.is_some(),
        }
    }
}

/// Where a grant comes from.
///
/// `Inherited` grants are implicit consequences of an ancestor's permissions
/// or of an edit by a caller without full write authority. They may be
/// silently revised or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantOrigin {
    Explicit,
    Inherited,
}

impl GrantOrigin {
    pub fn from_partial(partial: bool) -> Self {
        if partial {
            GrantOrigin::Inherited
        } else {
            GrantOrigin::Explicit
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, GrantOrigin::Inherited)
    }
}

/// A permission edge from a group to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub resource_id: ResourceId,
    pub group_id: GroupId,
    pub can_write: bool,
    pub origin: GrantOrigin,
}

impl Grant {
    pub fn new(resource_id: ResourceId, group_id: GroupId, can_write: bool, origin: GrantOrigin) -> Self {
        Self {
            resource_id,
            group_id,
            can_write,
            origin,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.origin.is_partial()
    }

    /// Write access that does not come from an implicit grant.
    pub fn is_full_write(&self) -> bool {
        self.can_write && self.origin == GrantOrigin::Explicit
    }
}

/// Effective access of a set of groups on a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub can_read: bool,
    pub can_write: bool,
}

impl Access {
    pub const NONE: Self = Self {
        can_read: false,
        can_write: false,
    };

    pub const READ: Self = Self {
        can_read: true,
        can_write: false,
    };

    pub const WRITE: Self = Self {
        can_read: true,
        can_write: true,
    };
}

/// A resource content key wrapped for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_id: ResourceId,
    pub group_id: GroupId,
    pub wrapped: WrappedSecret,
}
