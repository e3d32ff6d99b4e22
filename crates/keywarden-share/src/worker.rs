//! Share process worker.
//!
//! Drives share processes from Pending to a terminal state, one descendant
//! at a time. Runs out-of-band, fed by a [`TaskQueue`].

use std::sync::Arc;
use std::time::Duration;

use keywarden_core::{now_millis, Resource, ShareProcess, ShareProcessId, ShareStatus};
use keywarden_envelope::ServerKeys;
use keywarden_store::{Store, StoreError, StoreExt};

use crate::error::{Result, ShareError};
use crate::item::{is_superseded, reconcile_item, EscrowKeys};
use crate::queue::TaskQueue;

/// Configuration for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long the loop waits for a new id before returning.
    pub idle_timeout: Duration,
    /// Reset and re-enqueue interrupted processes when the loop starts.
    pub recover_on_start: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            recover_on_start: true,
        }
    }
}

/// Result of running one share process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRunReport {
    pub process_id: ShareProcessId,
    /// Status the process was left in.
    pub status: ShareStatus,
    pub processed_items: u64,
    pub failed_items: u64,
    /// False if the process was not pending and nothing was done.
    pub ran: bool,
}

impl ShareRunReport {
    fn skipped(process: &ShareProcess) -> Self {
        Self {
            process_id: process.id,
            status: process.status,
            processed_items: process.processed_items,
            failed_items: process.failed_items,
            ran: false,
        }
    }

    fn from_process(process: &ShareProcess) -> Self {
        Self {
            ran: true,
            ..Self::skipped(process)
        }
    }
}

/// Executes share processes against a store.
pub struct ShareWorker<S: Store, Q: TaskQueue> {
    store: Arc<S>,
    queue: Arc<Q>,
    server_keys: Arc<ServerKeys>,
    config: WorkerConfig,
}

impl<S: Store, Q: TaskQueue> ShareWorker<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, server_keys: Arc<ServerKeys>, config: WorkerConfig) -> Self {
        Self {
            store,
            queue,
            server_keys,
            config,
        }
    }

    /// Process queued ids until the queue stays empty for `idle_timeout`.
    pub async fn run(&self) -> Result<Vec<ShareRunReport>> {
        if self.config.recover_on_start {
            self.recover_interrupted().await?;
        }

        let mut reports = Vec::new();
        while let Some(id) = self.queue.dequeue(self.config.idle_timeout).await? {
            match self.run_share_process(&id).await {
                Ok(report) => reports.push(report),
                Err(ShareError::NotFound(id)) => {
                    tracing::warn!(process_id = %id, "queued share process has no record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }

    /// Reset processes left Running by a dead worker and enqueue them again,
    /// together with any Pending process whose queue entry may have been lost.
    pub async fn recover_interrupted(&self) -> Result<Vec<ShareProcessId>> {
        let mut recovered = Vec::new();

        for mut process in self.store.list_share_processes(ShareStatus::Running).await? {
            process.reset_interrupted()?;
            match self
                .store
                .update_share_process(&process, ShareStatus::Running)
                .await
            {
                Ok(()) => {}
                Err(StoreError::Superseded(_)) => continue,
                Err(e) => return Err(e.into()),
            }
            tracing::info!(process_id = %process.id, "reset interrupted share process");
            recovered.push(process.id);
        }

        for process in self.store.list_share_processes(ShareStatus::Pending).await? {
            if !recovered.contains(&process.id) {
                recovered.push(process.id);
            }
        }

        for id in &recovered {
            self.queue.enqueue(*id).await?;
        }
        Ok(recovered)
    }

    /// Run one process to a terminal state.
    ///
    /// A process that is not Pending is left alone. A process canceled while
    /// running stops before its next item.
    pub async fn run_share_process(&self, id: &ShareProcessId) -> Result<ShareRunReport> {
        let stored = self
            .store
            .get_share_process(id)
            .await?
            .ok_or(ShareError::NotFound(*id))?;
        if stored.status != ShareStatus::Pending {
            tracing::debug!(process_id = %id, status = stored.status.as_str(), "share process not pending, skipping");
            return Ok(ShareRunReport::skipped(&stored));
        }

        let items = self.store.list_descendants(&stored.target_id).await?;
        let Some(process) = self
            .store
            .claim_share_process(id, items.len() as u64, now_millis())
            .await?
        else {
            tracing::debug!(process_id = %id, "share process claimed elsewhere");
            return Ok(ShareRunReport::skipped(&stored));
        };

        self.run_claimed(process, &items).await
    }

    /// Work through `items` for a process this worker has claimed, then
    /// record its terminal state.
    async fn run_claimed(&self, mut process: ShareProcess, items: &[Resource]) -> Result<ShareRunReport> {
        let id = process.id;
        tracing::info!(
            process_id = %id,
            target_id = %process.target_id,
            total_items = process.total_items,
            cascade = process.cascade,
            "share process started"
        );

        let escrow = self.open_escrow(&process);

        for item in items {
            if self.is_canceled(&id).await? {
                return self.stopped(&id).await;
            }

            match reconcile_item(self.store.as_ref(), &process, &escrow, item).await {
                Ok(outcome) => {
                    tracing::debug!(
                        process_id = %id,
                        resource_id = %item.id,
                        grants = outcome.grants_changed,
                        keys_added = outcome.keys_added,
                        keys_removed = outcome.keys_removed,
                        "share item reconciled"
                    );
                    process.record_success()?;
                }
                Err(e) if is_superseded(&e) => return self.stopped(&id).await,
                Err(e) => {
                    tracing::warn!(process_id = %id, resource_id = %item.id, "share item failed: {:#}", e);
                    process.record_failure(format!("{}: {:#}", item.id, e))?;
                }
            }

            match self.store.save_share_progress(&process).await {
                Ok(()) => {}
                Err(StoreError::Superseded(_)) => return self.stopped(&id).await,
                Err(e) => return Err(e.into()),
            }
        }

        let status = process.finish(now_millis())?;
        match self
            .store
            .update_share_process(&process, ShareStatus::Running)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Superseded(_)) => return self.stopped(&id).await,
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            process_id = %id,
            status = status.as_str(),
            processed = process.processed_items,
            failed = process.failed_items,
            elapsed_ms = process.elapsed_ms(),
            "share process finished"
        );
        Ok(ShareRunReport::from_process(&process))
    }

    /// Unwrap the escrowed group keys. An entry that cannot be opened is
    /// skipped; items that need it fail on their own.
    fn open_escrow(&self, process: &ShareProcess) -> EscrowKeys {
        let mut keys = EscrowKeys::new();
        for entry in &process.escrow {
            match self.server_keys.open_escrow(&entry.wrapped) {
                Ok(secret) => {
                    keys.insert(entry.group_id, secret);
                }
                Err(e) => {
                    tracing::warn!(process_id = %process.id, group_id = %entry.group_id, "cannot open escrowed key: {}", e);
                }
            }
        }
        keys
    }

    async fn is_canceled(&self, id: &ShareProcessId) -> Result<bool> {
        let current = self
            .store
            .get_share_process(id)
            .await?
            .ok_or(ShareError::NotFound(*id))?;
        Ok(current.status != ShareStatus::Running)
    }

    async fn stopped(&self, id: &ShareProcessId) -> Result<ShareRunReport> {
        let current = self
            .store
            .get_share_process(id)
            .await?
            .ok_or(ShareError::NotFound(*id))?;
        tracing::info!(process_id = %id, status = current.status.as_str(), "share process stopped");
        Ok(ShareRunReport::from_process(&current))
    }
}
