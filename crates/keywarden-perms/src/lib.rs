//! # Keywarden Permissions
//!
//! Grant bookkeeping and permission diffing over the vault → folder →
//! password hierarchy.
//!
//! ## Key Concepts
//!
//! - **Grant**: an edge giving a group read (and optionally write) access
//! - **Partial grant**: a grant with [`GrantOrigin::Inherited`], an implicit
//!   consequence that may be revised or removed silently
//! - **Full write**: write access coming from an explicit grant
//! - **Writer invariant**: every resource keeps at least one effective writer
//!
//! [`PermissionGraph`] answers access questions and enforces membership and
//! writer invariants. [`compute_diff`] turns a requested permission set into
//! grant changes without touching storage.
//!
//! [`GrantOrigin::Inherited`]: keywarden_core::GrantOrigin::Inherited

pub mod diff;
pub mod error;
pub mod graph;

pub use diff::{compute_diff, AuditChange, DiffInput, GrantChange, GrantSnapshot, PermissionDiff};
pub use error::{PermsError, Result};
pub use graph::{has_writer, PermissionGraph};
