//! # Keywarden Share
//!
//! Asynchronous propagation of permission changes to the descendants of a
//! vault or folder.
//!
//! ## Overview
//!
//! When a grant change on a vault or folder affects its descendants, the
//! engine commits a durable [`ShareProcess`] record and enqueues its id. A
//! [`ShareWorker`] later claims the record and reconciles each descendant:
//! grants (for cascaded changes) and wrapped content keys.
//!
//! The worker never sees a user password. The acting user's group keys are
//! escrowed to the server key on the process record and wiped when the
//! process ends.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keywarden_envelope::ServerKeys;
//! use keywarden_share::{MemoryQueue, ShareWorker, WorkerConfig};
//! use keywarden_store::SqliteStore;
//!
//! async fn example() {
//!     let store = Arc::new(SqliteStore::open("keywarden.db").unwrap());
//!     let queue = Arc::new(MemoryQueue::new());
//!     let server_keys = Arc::new(ServerKeys::generate());
//!
//!     let worker = ShareWorker::new(store, queue, server_keys, WorkerConfig::default());
//!     let reports = worker.run().await.unwrap();
//!     println!("ran {} share processes", reports.len());
//! }
//! ```
//!
//! [`ShareProcess`]: keywarden_core::ShareProcess

pub mod error;
pub mod item;
pub mod queue;
pub mod worker;

pub use error::{Result, ShareError};
pub use item::{reconcile_item, EscrowKeys, ItemOutcome};
pub use queue::{MemoryQueue, TaskQueue};
pub use worker::{ShareRunReport, ShareWorker, WorkerConfig};
