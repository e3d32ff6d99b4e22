//! Error types for share process execution.

use thiserror::Error;

use keywarden_core::ShareProcessId;

/// Errors that abort a share run. Per-item failures are not errors: they
/// are counted on the process and processing continues.
#[derive(Debug, Error)]
pub enum ShareError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] keywarden_store::StoreError),

    /// Illegal process state transition.
    #[error("process state error: {0}")]
    Core(#[from] keywarden_core::CoreError),

    /// Key envelope operation failed.
    #[error("envelope error: {0}")]
    Envelope(#[from] keywarden_envelope::EnvelopeError),

    /// The process record does not exist.
    #[error("share process not found: {0}")]
    NotFound(ShareProcessId),

    /// The task queue was closed.
    #[error("task queue closed")]
    QueueClosed,
}

/// Result type for share operations.
pub type Result<T> = std::result::Result<T, ShareError>;
