//! # Keywarden Testkit
//!
//! Testing utilities for Keywarden.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: An engine over in-memory storage with helpers for users,
//!   groups and populated vaults
//! - **Generators**: Proptest strategies for grants and permission requests
//! - **Faults**: A store that fails grant commits on demand, for exercising
//!   conflict retries
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use keywarden_perms::compute_diff;
//! use keywarden_testkit::generators::DiffScenario;
//!
//! proptest! {
//!     #[test]
//!     fn diff_never_panics(scenario: DiffScenario) {
//!         let _ = compute_diff(&scenario.input());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use keywarden_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let alice = fixture.user("alice").await;
//! let tree = fixture.vault_tree(&alice, 2, 3, 1).await;
//! assert_eq!(tree.descendant_count(), 9);
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;

pub use faults::ConflictingStore;
pub use fixtures::{init_tracing, TestEngine, TestFixture, TestUser, VaultTree};
pub use generators::DiffScenario;
