//! # Keywarden Store
//!
//! Storage abstraction for Keywarden. Provides a trait-based interface for
//! users, groups, resources, grants, wrapped keys and share processes, with
//! SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`GrantCommit`] - An atomic grant/key change, optionally creating a
//!   share process
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keywarden_store::{GrantCommit, SqliteStore, Store};
//! use keywarden_core::ResourceId;
//!
//! async fn example(resource_id: ResourceId) {
//!     let store = SqliteStore::open("keywarden.db").unwrap();
//!
//!     let current = store.get_grants(&resource_id).await.unwrap();
//!     let commit = GrantCommit::new(resource_id, Some(current.version));
//!     // ... fill in upserts / removals / keys ...
//!     store.commit_grants(commit).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Optimistic versioning**: every resource carries a grants version;
//!   a commit against a stale version fails with `Conflict`
//! - **Superseding**: creating a share process cancels older unfinished
//!   processes on the same target in the same transaction
//! - **Status CAS**: process updates name the status they expect to replace

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CommitResult, GrantCommit, Store, StoreExt, VersionedGrants};
