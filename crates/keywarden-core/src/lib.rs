//! # Keywarden Core
//!
//! The data model shared by every keywarden crate: identifiers, users,
//! groups, resources, grants, and share process records.
//!
//! This crate performs no I/O. Records reference each other by id only.
//!
//! ## Key Types
//!
//! - [`Group`] / [`GroupMember`] - principals and their wrapped group keys
//! - [`Resource`] - a vault, folder, or password in the hierarchy
//! - [`Grant`] - a permission edge, [`GrantOrigin::Inherited`] when partial
//! - [`ShareProcess`] - durable record of an asynchronous propagation

pub mod error;
pub mod ids;
pub mod model;
pub mod share;

pub use error::{CoreError, Result};
pub use ids::{GroupId, ResourceId, ShareProcessId, UserId};
pub use model::{
    Access, Grant, GrantOrigin, Group, GroupMember, Resource, ResourceKey, ResourceKind, User,
    UserKeys,
};
pub use share::{
    EscrowedGroupKey, NewShareProcess, RequestedGrant, RequestedUser, ShareProcess, ShareStatus,
};

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
