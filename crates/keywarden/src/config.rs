//! Engine configuration.

use std::sync::Arc;

use keywarden_envelope::{KdfParams, ServerKeys};

/// Configuration for the [`Engine`](crate::Engine).
///
/// The server keypair is built by the caller and shared with any worker
/// that runs share processes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Argon2id cost for sealing and opening user private keys.
    pub kdf: KdfParams,
    /// How many times a grant commit is retried after a version conflict.
    pub conflict_retries: u32,
    pub server_keys: Arc<ServerKeys>,
}

impl EngineConfig {
    pub fn new(server_keys: Arc<ServerKeys>) -> Self {
        Self {
            kdf: KdfParams::default(),
            conflict_retries: 1,
            server_keys,
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }
}
