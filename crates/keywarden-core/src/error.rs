//! Error types for the core data model.

use thiserror::Error;

use crate::model::ResourceKind;
use crate::share::ShareStatus;

/// Errors raised by record state transitions.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid share process transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ShareStatus, to: ShareStatus },

    #[error("share process incomplete: {processed} of {total} items processed")]
    IncompleteProcess { processed: u64, total: u64 },

    #[error("share processes only target vaults and folders, not {0:?}")]
    InvalidShareTarget(ResourceKind),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
