//! Error types for the permissions module.

use thiserror::Error;

use keywarden_core::{GroupId, ResourceId, UserId};

/// Errors that can occur during permission operations.
///
/// Every violation is raised before any state is mutated.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Removing the member would leave the group empty.
    #[error("group {0} must keep at least one member")]
    LastMemberViolation(GroupId),

    /// The change would leave the resource without any writer.
    #[error("resource {0} must keep at least one writer")]
    NoWriterViolation(ResourceId),

    #[error("user {user_id} is already a member of group {group_id}")]
    DuplicateMember { group_id: GroupId, user_id: UserId },

    #[error("user {user_id} is not a member of group {group_id}")]
    NotAMember { group_id: GroupId, user_id: UserId },

    /// Private groups represent exactly one user.
    #[error("private group {0} cannot take another member")]
    PrivateGroupFull(GroupId),

    #[error("no grant for group {group_id} on resource {resource_id}")]
    GrantNotFound {
        resource_id: ResourceId,
        group_id: GroupId,
    },

    #[error("unknown group: {0}")]
    UnknownGroup(GroupId),

    #[error("unknown resource: {0}")]
    UnknownResource(ResourceId),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
