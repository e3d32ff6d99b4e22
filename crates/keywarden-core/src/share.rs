//! Share process records.
//!
//! A share process propagates a permission change on a vault or folder to
//! every descendant. The record is durable: it is created together with the
//! grant change that caused it, and a worker drives it through its states.
//!
//! ```text
//! Pending ──claim──▶ Running ──finish──▶ Completed | Failed
//!    │                  │
//!    └──────cancel──────┴──────────────▶ Canceled
//! ```
//!
//! Terminal records are immutable.

use serde::{Deserialize, Serialize};

use keywarden_envelope::WrappedSecret;

use crate::error::{CoreError, Result};
use crate::ids::{GroupId, ResourceId, ShareProcessId, UserId};
use crate::model::ResourceKind;

/// Lifecycle state of a share process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ShareStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShareStatus::Completed | ShareStatus::Failed | ShareStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShareStatus::Pending => "pending",
            ShareStatus::Running => "running",
            ShareStatus::Completed => "completed",
            ShareStatus::Failed => "failed",
            ShareStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ShareStatus::Pending),
            "running" => Some(ShareStatus::Running),
            "completed" => Some(ShareStatus::Completed),
            "failed" => Some(ShareStatus::Failed),
            "canceled" => Some(ShareStatus::Canceled),
            _ => None,
        }
    }
}

/// A group entry in a permission-change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedGrant {
    pub group_id: GroupId,
    pub can_write: bool,
    /// The requester marks this entry as implied rather than chosen.
    pub partial: bool,
}

impl RequestedGrant {
    pub fn new(group_id: GroupId, can_write: bool) -> Self {
        Self {
            group_id,
            can_write,
            partial: false,
        }
    }

    pub fn partial(group_id: GroupId, can_write: bool) -> Self {
        Self {
            group_id,
            can_write,
            partial: true,
        }
    }
}

/// A user entry in a permission-change request. Resolved to the user's
/// private group before diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedUser {
    pub user_id: UserId,
    pub can_write: bool,
    pub partial: bool,
}

/// A group private key wrapped for the server, carried by a running process
/// so the worker can reach descendant content keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowedGroupKey {
    pub group_id: GroupId,
    pub wrapped: WrappedSecret,
}

/// A durable share process record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareProcess {
    pub id: ShareProcessId,
    pub target_type: ResourceKind,
    pub target_id: ResourceId,
    pub actor_id: UserId,
    pub requested_groups: Vec<RequestedGrant>,
    pub requested_users: Vec<RequestedUser>,
    pub cascade: bool,
    pub caller_full_write: bool,
    pub status: ShareStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub failed_items: u64,
    pub message: Option<String>,
    pub escrow: Vec<EscrowedGroupKey>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

/// Parameters for a new share process.
#[derive(Debug, Clone)]
pub struct NewShareProcess {
    pub target_type: ResourceKind,
    pub target_id: ResourceId,
    pub actor_id: UserId,
    pub requested_groups: Vec<RequestedGrant>,
    pub requested_users: Vec<RequestedUser>,
    pub cascade: bool,
    pub caller_full_write: bool,
    pub total_items: u64,
    pub escrow: Vec<EscrowedGroupKey>,
}

impl ShareProcess {
    /// Create a Pending process. Passwords have no descendants and never get one.
    pub fn new(params: NewShareProcess, now: i64) -> Result<Self> {
        if !params.target_type.has_descendants() {
            return Err(CoreError::InvalidShareTarget(params.target_type));
        }

        Ok(Self {
            id: ShareProcessId::new(),
            target_type: params.target_type,
            target_id: params.target_id,
            actor_id: params.actor_id,
            requested_groups: params.requested_groups,
            requested_users: params.requested_users,
            cascade: params.cascade,
            caller_full_write: params.caller_full_write,
            status: ShareStatus::Pending,
            total_items: params.total_items,
            processed_items: 0,
            failed_items: 0,
            message: None,
            escrow: params.escrow,
            created_at: now,
            started_at: None,
            finished_at: None,
        })
    }

    fn expect_status(&self, expected: ShareStatus) -> Result<()> {
        if self.status != expected {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: expected,
            });
        }
        Ok(())
    }

    /// Pending → Running. `total_items` is refreshed to the descendant count
    /// seen by the worker.
    pub fn claim(&mut self, total_items: u64, now: i64) -> Result<()> {
        if self.status != ShareStatus::Pending {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: ShareStatus::Running,
            });
        }
        self.status = ShareStatus::Running;
        self.total_items = total_items;
        self.processed_items = 0;
        self.failed_items = 0;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn record_success(&mut self) -> Result<()> {
        self.expect_status(ShareStatus::Running)?;
        self.processed_items += 1;
        Ok(())
    }

    /// Count a failed item and keep its message. Processing continues.
    pub fn record_failure(&mut self, message: impl Into<String>) -> Result<()> {
        self.expect_status(ShareStatus::Running)?;
        self.processed_items += 1;
        self.failed_items += 1;
        self.message = Some(message.into());
        Ok(())
    }

    /// Running → Completed (no failures) or Failed. Wipes the escrow.
    pub fn finish(&mut self, now: i64) -> Result<ShareStatus> {
        let target = if self.failed_items == 0 {
            ShareStatus::Completed
        } else {
            ShareStatus::Failed
        };
        if self.status != ShareStatus::Running {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        if self.processed_items != self.total_items {
            return Err(CoreError::IncompleteProcess {
                processed: self.processed_items,
                total: self.total_items,
            });
        }
        self.status = target;
        self.finished_at = Some(now);
        self.wipe_escrow();
        Ok(target)
    }

    /// Pending or Running → Canceled. Wipes the escrow.
    pub fn cancel(&mut self, now: i64) -> Result<()> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: ShareStatus::Canceled,
            });
        }
        self.status = ShareStatus::Canceled;
        self.finished_at = Some(now);
        self.wipe_escrow();
        Ok(())
    }

    /// Running → Pending with zeroed counters, for a process whose worker
    /// died mid-run.
    pub fn reset_interrupted(&mut self) -> Result<()> {
        if self.status != ShareStatus::Running {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: ShareStatus::Pending,
            });
        }
        self.status = ShareStatus::Pending;
        self.processed_items = 0;
        self.failed_items = 0;
        self.message = None;
        self.started_at = None;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Milliseconds between start and finish, once both are known.
    pub fn elapsed_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Find the escrowed key of `group_id`.
    pub fn escrowed_key(&self, group_id: &GroupId) -> Option<&WrappedSecret> {
        self.escrow
            .iter()
            .find(|e| &e.group_id == group_id)
            .map(|e| &e.wrapped)
    }

    fn wipe_escrow(&mut self) {
        for entry in self.escrow.iter_mut() {
            keywarden_envelope::secure_erase(&mut entry.wrapped.ciphertext);
        }
        self.escrow.clear();
    }
}
