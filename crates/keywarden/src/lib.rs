//! # Keywarden
//!
//! Hierarchical encrypted access control and key distribution for password
//! vaults.
//!
//! ## Overview
//!
//! Keywarden protects vaults, folders and passwords with per-resource
//! content keys. A content key is never stored in the clear: every group
//! allowed to read the resource holds its own copy wrapped with the group's
//! X25519 public key, and every member holds the group's private key wrapped
//! with their own public key. A user's private key is sealed under their
//! password.
//!
//! ## Key Concepts
//!
//! - **Grant**: a group's read or write permission on a resource.
//!   Folders and passwords inherit grants from their nearest ancestor.
//! - **Full write**: write access coming from an explicit grant. Callers
//!   without it can only create or revise partial (`Inherited`) grants.
//! - **Writer invariant**: a resource always keeps at least one writer.
//! - **Share process**: the asynchronous propagation of a permission change
//!   on a vault or folder to its descendants.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keywarden::{Engine, EngineConfig, MemoryAuditSink, ShareRequest};
//! use keywarden::core::{Resource, ResourceId};
//! use keywarden::envelope::ServerKeys;
//! use keywarden::share::MemoryQueue;
//! use keywarden::store::SqliteStore;
//!
//! async fn example() {
//!     let store = Arc::new(SqliteStore::open("keywarden.db").unwrap());
//!     let config = EngineConfig::new(Arc::new(ServerKeys::generate()));
//!     let engine = Engine::new(
//!         store,
//!         Arc::new(MemoryQueue::new()),
//!         Arc::new(MemoryAuditSink::new()),
//!         config,
//!     );
//!
//!     let alice = engine.register_user("alice@example.com", b"hunter2").await.unwrap();
//!     let bob = engine.register_user("bob@example.com", b"correct horse").await.unwrap();
//!     let alice = engine.current_user(&alice.id).await.unwrap();
//!
//!     let vault = Resource::vault(ResourceId::new());
//!     engine.create_resource(&alice, vault.clone()).await.unwrap();
//!
//!     let request = ShareRequest::new(vault.id).user(alice.id, true).user(bob.id, false);
//!     let outcome = engine.apply_grants(&alice, b"hunter2", &request).await.unwrap();
//!     if let Some(id) = outcome.share_process_id {
//!         engine.run_share_process(&id).await.unwrap();
//!     }
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `keywarden::envelope` - X25519 wrapping, Argon2id sealing, symmetric encryption
//! - `keywarden::core` - Data model and share process records
//! - `keywarden::perms` - Permission graph and diff engine
//! - `keywarden::store` - Storage abstraction and SQLite
//! - `keywarden::share` - Share process queue and worker

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;

// Re-export component crates
pub use keywarden_core as core;
pub use keywarden_envelope as envelope;
pub use keywarden_perms as perms;
pub use keywarden_share as share;
pub use keywarden_store as store;

// Re-export main types for convenience
pub use audit::{AuditEntry, AuditSink, MemoryAuditSink, NoopAuditSink};
pub use config::EngineConfig;
pub use engine::{ApplyOutcome, Engine, RevokeOutcome, ShareRequest};
pub use error::{EngineError, Result};
pub use identity::CurrentUser;

pub use keywarden_core::{
    Access, Grant, GrantOrigin, GroupId, Resource, ResourceId, ResourceKind, ShareProcess,
    ShareProcessId, ShareStatus, UserId,
};
