// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that enforces run-time limits and removes old tasks.
//!
//! Each cycle lists the managed tasks of every kind and
//! - stops tasks that have been running longer than `max_runtime`,
//! - deletes the resources of finished tasks older than `retention`, then
//! - removes config objects left behind by jobs the cluster's TTL already
//!   deleted.
//!
//! The job TTL set at submission remains the backstop for jobs when no reaper
//! runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::backend::{ExecutionBackend, delete_task, list_tasks, stop_task};
use crate::config::ReaperConfig;
use crate::task::{TaskKind, TaskState, TaskStatus};

/// Counts from one reaper cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Tasks stopped for exceeding the run-time limit.
    pub stopped: u64,
    /// Finished tasks whose resources were deleted.
    pub deleted: u64,
    /// Config objects removed because their job was gone.
    pub orphans_deleted: u64,
    /// Operations that failed.
    pub errors: u64,
}

/// Minimum age of an orphaned config object; a submission creates its config
/// objects shortly before its job.
const ORPHAN_GRACE_SECS: i64 = 600;

/// What the reaper should do with one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Stop,
    Delete,
}

/// Background worker that stops overdue tasks and deletes expired ones.
pub struct Reaper {
    backend: Arc<dyn ExecutionBackend>,
    config: ReaperConfig,
    shutdown: Arc<Notify>,
}

impl Reaper {
    /// Create a reaper over `backend`.
    pub fn new(backend: Arc<dyn ExecutionBackend>, config: ReaperConfig) -> Self {
        Self {
            backend,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until the shutdown handle is notified.
    pub async fn run(&self) {
        info!(
            backend = self.backend.name(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            max_runtime_secs = self.config.max_runtime.map(|d| d.as_secs()),
            "Reaper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Reaper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.reap_once(Utc::now()).await;
                }
            }
        }

        info!("Reaper stopped");
    }

    /// Run one cycle as of `now`.
    pub async fn reap_once(&self, now: DateTime<Utc>) -> ReapSummary {
        let mut summary = ReapSummary::default();

        for kind in TaskKind::ALL {
            let statuses = match list_tasks(self.backend.as_ref(), kind).await {
                Ok(statuses) => statuses,
                Err(e) => {
                    error!(kind = %kind, error = %e, "Failed to list tasks");
                    summary.errors += 1;
                    continue;
                }
            };

            for status in &statuses {
                match self.verdict(status, now) {
                    Verdict::Keep => {}
                    Verdict::Stop => {
                        // Stopping removes the job, so the config objects go with it here.
                        let stopped = match stop_task(self.backend.as_ref(), kind, &status.task_id).await {
                            Ok(()) => delete_task(self.backend.as_ref(), kind, &status.task_id).await,
                            Err(e) => Err(e),
                        };
                        match stopped {
                            Ok(()) => {
                                info!(task_id = %status.task_id, kind = %kind, "Stopped task over run-time limit");
                                summary.stopped += 1;
                            }
                            Err(e) => {
                                warn!(task_id = %status.task_id, kind = %kind, error = %e, "Failed to stop task");
                                summary.errors += 1;
                            }
                        }
                    }
                    Verdict::Delete => {
                        match delete_task(self.backend.as_ref(), kind, &status.task_id).await {
                            Ok(()) => {
                                debug!(task_id = %status.task_id, kind = %kind, "Deleted expired task");
                                summary.deleted += 1;
                            }
                            Err(e) => {
                                warn!(task_id = %status.task_id, kind = %kind, error = %e, "Failed to delete task");
                                summary.errors += 1;
                            }
                        }
                    }
                }
            }
        }

        let created_before = now - chrono::Duration::seconds(ORPHAN_GRACE_SECS);
        match self.backend.delete_orphaned_config(created_before).await {
            Ok(sweep) => {
                summary.orphans_deleted += sweep.deleted.len() as u64;
                summary.errors += sweep.failures.len() as u64;
            }
            Err(e) => {
                error!(error = %e, "Failed to sweep orphaned config objects");
                summary.errors += 1;
            }
        }

        if summary != ReapSummary::default() {
            info!(
                stopped = summary.stopped,
                deleted = summary.deleted,
                orphans_deleted = summary.orphans_deleted,
                errors = summary.errors,
                "Reaper cycle completed"
            );
        } else {
            debug!("Reaper cycle completed, nothing to do");
        }
        summary
    }

    fn verdict(&self, status: &TaskStatus, now: DateTime<Utc>) -> Verdict {
        match status.state {
            TaskState::Completed | TaskState::Failed => {
                let Some(completed_at) = status.completed_at else {
                    return Verdict::Keep;
                };
                match chrono::Duration::from_std(self.config.retention) {
                    Ok(retention) if now - completed_at >= retention => Verdict::Delete,
                    _ => Verdict::Keep,
                }
            }
            TaskState::Running | TaskState::Pending => {
                let Some(max_runtime) = self
                    .config
                    .max_runtime
                    .and_then(|d| chrono::Duration::from_std(d).ok())
                else {
                    return Verdict::Keep;
                };
                match status.started_at.or(status.created_at) {
                    Some(since) if now - since >= max_runtime => Verdict::Stop,
                    _ => Verdict::Keep,
                }
            }
        }
    }
}
