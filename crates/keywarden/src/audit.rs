//! Audit trail of permission changes.
//!
//! The engine writes one entry per permission change that altered grants.
//! Entries name groups, never key material.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use keywarden_core::UserId;

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    /// `{group_name: {"can_write": bool} | null}` before the change.
    pub old_values: Value,
    /// `{group_name: {"can_write": bool} | null}` after the change.
    pub new_values: Value,
    pub actor_id: UserId,
    pub created_at: i64,
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

/// Keeps entries in memory. For tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

/// Discards entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _entry: AuditEntry) -> anyhow::Result<()> {
        Ok(())
    }
}
