//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: an engine over in-memory
//! storage, registered users with known passwords, and populated vaults.

use std::collections::BTreeMap;
use std::sync::Arc;

use keywarden::{CurrentUser, Engine, EngineConfig, MemoryAuditSink};
use keywarden_core::{GroupId, Resource, ResourceId, User};
use keywarden_envelope::{EncryptionKey, KdfParams, ServerKeys};
use keywarden_share::{MemoryQueue, WorkerConfig};
use keywarden_store::{MemoryStore, Store};

use crate::faults::ConflictingStore;

/// The engine type used throughout the tests.
pub type TestEngine<S = MemoryStore> = Engine<S, MemoryQueue, MemoryAuditSink>;

/// A registered user and the password that unlocks them.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user: User,
    pub current: CurrentUser,
    pub password: Vec<u8>,
}

impl TestUser {
    pub fn private_group(&self) -> GroupId {
        self.user
            .private_group_id
            .expect("registered users have a private group")
    }
}

/// A vault with folders and passwords, and every content key in the clear.
#[derive(Debug)]
pub struct VaultTree {
    pub vault: Resource,
    pub folders: Vec<Resource>,
    /// Passwords inside folders first, then passwords directly in the vault.
    pub passwords: Vec<Resource>,
    pub keys: BTreeMap<ResourceId, EncryptionKey>,
}

impl VaultTree {
    /// Folders and passwords below the vault.
    pub fn descendant_count(&self) -> usize {
        self.folders.len() + self.passwords.len()
    }

    pub fn descendants(&self) -> impl Iterator<Item = &Resource> {
        self.folders.iter().chain(self.passwords.iter())
    }

    pub fn key(&self, id: &ResourceId) -> &EncryptionKey {
        self.keys.get(id).expect("key of a resource in the tree")
    }
}

/// A test fixture with an engine over in-memory storage.
pub struct TestFixture<S: Store = MemoryStore> {
    pub engine: TestEngine<S>,
    pub store: Arc<S>,
    pub queue: Arc<MemoryQueue>,
    pub audit: Arc<MemoryAuditSink>,
    pub server_keys: Arc<ServerKeys>,
}

impl TestFixture {
    /// Create a fixture with cheap KDF parameters.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Worker settings that return quickly once the queue is drained.
    pub fn worker_config() -> WorkerConfig {
        WorkerConfig {
            idle_timeout: std::time::Duration::from_millis(20),
            recover_on_start: false,
        }
    }
}

impl TestFixture<ConflictingStore> {
    /// A fixture whose store can be told to fail grant commits.
    pub fn conflicting() -> Self {
        Self::with_store(ConflictingStore::new())
    }
}

impl<S: Store> TestFixture<S> {
    pub fn with_store(store: S) -> Self {
        let store = Arc::new(store);
        let queue = Arc::new(MemoryQueue::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let server_keys = Arc::new(ServerKeys::generate());
        let config = EngineConfig::new(server_keys.clone()).with_kdf(KdfParams::testing());
        let engine = Engine::new(store.clone(), queue.clone(), audit.clone(), config);
        Self {
            engine,
            store,
            queue,
            audit,
            server_keys,
        }
    }

    /// Register `name@example.com` with password `name-password`.
    pub async fn user(&self, name: &str) -> TestUser {
        let password = format!("{}-password", name).into_bytes();
        let user = self
            .engine
            .register_user(&format!("{}@example.com", name), &password)
            .await
            .expect("register user");
        let current = self
            .engine
            .current_user(&user.id)
            .await
            .expect("load current user");
        TestUser {
            user,
            current,
            password,
        }
    }

    /// Reload the user's group list after membership changes.
    pub async fn refresh(&self, user: &mut TestUser) {
        user.current = self
            .engine
            .current_user(&user.user.id)
            .await
            .expect("reload current user");
    }

    /// Create a shared group managed by `owner`.
    pub async fn group(&self, owner: &mut TestUser, name: &str) -> GroupId {
        let group = self
            .engine
            .create_group(&owner.current, name)
            .await
            .expect("create group");
        self.refresh(owner).await;
        group.id
    }

    /// Add `member` to a group managed by `manager`.
    pub async fn join(&self, manager: &TestUser, group_id: &GroupId, member: &mut TestUser) {
        self.engine
            .add_member(
                &manager.current,
                &manager.password,
                group_id,
                &member.user.id,
                false,
            )
            .await
            .expect("add member");
        self.refresh(member).await;
    }

    /// Create a vault owned by `owner` with `folders` folders holding
    /// `per_folder` passwords each, plus `loose` passwords directly in the
    /// vault.
    pub async fn vault_tree(
        &self,
        owner: &TestUser,
        folders: usize,
        per_folder: usize,
        loose: usize,
    ) -> VaultTree {
        let mut keys = BTreeMap::new();

        let vault = Resource::vault(ResourceId::new());
        keys.insert(vault.id, self.create(owner, &vault).await);

        let mut folder_list = Vec::new();
        let mut passwords = Vec::new();
        for _ in 0..folders {
            let folder = Resource::folder(ResourceId::new(), vault.id);
            keys.insert(folder.id, self.create(owner, &folder).await);
            for _ in 0..per_folder {
                let password = Resource::password(ResourceId::new(), vault.id, Some(folder.id));
                keys.insert(password.id, self.create(owner, &password).await);
                passwords.push(password);
            }
            folder_list.push(folder);
        }
        for _ in 0..loose {
            let password = Resource::password(ResourceId::new(), vault.id, None);
            keys.insert(password.id, self.create(owner, &password).await);
            passwords.push(password);
        }

        VaultTree {
            vault,
            folders: folder_list,
            passwords,
            keys,
        }
    }

    async fn create(&self, owner: &TestUser, resource: &Resource) -> EncryptionKey {
        self.engine
            .create_resource(&owner.current, resource.clone())
            .await
            .expect("create resource")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a tracing subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
