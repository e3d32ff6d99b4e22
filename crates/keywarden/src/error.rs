//! Error types for the engine.

use keywarden_core::{CoreError, GroupId, ResourceId, ShareProcessId, UserId};
use keywarden_envelope::EnvelopeError;
use keywarden_perms::PermsError;
use keywarden_share::ShareError;
use keywarden_store::StoreError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Key envelope error. A wrong password surfaces here as
    /// `DecryptionFailed`.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Permission invariant violated.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Invalid share process transition.
    #[error("share process error: {0}")]
    Core(#[from] CoreError),

    /// Share process execution error.
    #[error("share error: {0}")]
    Share(#[from] ShareError),

    /// The grants kept moving under concurrent writers.
    #[error("storage conflict on resource {0}")]
    StorageConflict(ResourceId),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// The user has no keys yet.
    #[error("user not verified: {0}")]
    UserNotVerified(UserId),

    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("share process not found: {0}")]
    ShareProcessNotFound(ShareProcessId),

    /// Not authorized.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl EngineError {
    /// Whether the error means the caller could not prove who they are:
    /// a wrong password or a key that does not open.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            EngineError::Envelope(e) => e.is_decryption_failure(),
            _ => false,
        }
    }

    /// Whether the error is a permission invariant violation.
    pub fn is_permission_violation(&self) -> bool {
        matches!(self, EngineError::Permission(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
