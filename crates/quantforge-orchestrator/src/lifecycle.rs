// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stop and delete for a task's cluster resources.
//!
//! Both operations may be repeated: an object that is already gone counts as
//! removed. Cleanup only moves forward; nothing is re-created when a delete
//! partially fails.
//!
//! Jobs removed by their TTL leave their config objects behind; those are
//! found by label and removed by [`LifecycleManager::delete_orphaned_config`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterApi, Propagation};
use crate::error::{Error, Result};
use crate::naming::{KIND_LABEL, ResourceNamer, TASK_ID_LABEL};
use crate::task::TaskKind;

/// Config objects removed by one orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanSweep {
    /// Names of deleted config objects.
    pub deleted: Vec<String>,
    /// Deletions that failed, as `config map <name>: <error>`.
    pub failures: Vec<String>,
}

/// Tears down task resources.
pub struct LifecycleManager {
    cluster: Arc<dyn ClusterApi>,
    namer: ResourceNamer,
}

impl LifecycleManager {
    /// Create a manager.
    pub fn new(cluster: Arc<dyn ClusterApi>, namer: ResourceNamer) -> Self {
        Self { cluster, namer }
    }

    /// Delete the job and wait for its pods to go with it.
    pub async fn stop(&self, kind: TaskKind, task_id: &str) -> Result<()> {
        let job_name = self.namer.job_name(kind, task_id);
        match self.cluster.delete_job(&job_name, Propagation::Foreground).await {
            Ok(()) => {
                info!(task_id = %task_id, kind = %kind, job = %job_name, "Task stopped");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!(task_id = %task_id, kind = %kind, "Task already gone, nothing to stop");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the job, then every config object of the task.
    ///
    /// All deletions are attempted; failures are collected into
    /// [`Error::CleanupFailed`].
    pub async fn delete(&self, kind: TaskKind, task_id: &str) -> Result<()> {
        let mut failures = Vec::new();

        let job_name = self.namer.job_name(kind, task_id);
        match self.cluster.delete_job(&job_name, Propagation::Background).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(task_id = %task_id, job = %job_name, error = %e, "Failed to delete job");
                failures.push(format!("job {}: {}", job_name, e));
            }
        }

        for name in self.namer.config_object_names(kind, task_id) {
            match self.cluster.delete_config_map(&name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(task_id = %task_id, config_map = %name, error = %e, "Failed to delete config map");
                    failures.push(format!("config map {}: {}", name, e));
                }
            }
        }

        if failures.is_empty() {
            info!(task_id = %task_id, kind = %kind, "Task resources deleted");
            Ok(())
        } else {
            Err(Error::CleanupFailed(failures))
        }
    }

    /// Delete managed config objects whose job no longer exists.
    ///
    /// Only objects created before `created_before` are considered, so a
    /// submission that has created its config objects but not yet its job is
    /// left alone.
    pub async fn delete_orphaned_config(&self, created_before: DateTime<Utc>) -> Result<OrphanSweep> {
        let selector = self.namer.managed_selector();
        let config_maps = self.cluster.list_config_maps(&selector).await?;
        let mut sweep = OrphanSweep::default();
        if config_maps.is_empty() {
            return Ok(sweep);
        }

        let jobs: HashSet<String> = self
            .cluster
            .list_jobs(&selector)
            .await?
            .into_iter()
            .filter_map(|job| job.metadata.name)
            .collect();

        for config_map in &config_maps {
            let meta = &config_map.metadata;
            let Some(name) = meta.name.as_deref() else {
                continue;
            };
            let labels = meta.labels.as_ref();
            let Some(kind) = labels
                .and_then(|l| l.get(KIND_LABEL))
                .and_then(|k| TaskKind::parse(k))
            else {
                continue;
            };
            let Some(task_id) = labels.and_then(|l| l.get(TASK_ID_LABEL)) else {
                continue;
            };
            if jobs.contains(&self.namer.job_name(kind, task_id)) {
                continue;
            }
            match &meta.creation_timestamp {
                Some(Time(created)) if *created < created_before => {}
                _ => continue,
            }

            match self.cluster.delete_config_map(name).await {
                Ok(()) => {
                    debug!(task_id = %task_id, kind = %kind, config_map = %name, "Deleted orphaned config map");
                    sweep.deleted.push(name.to_string());
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(task_id = %task_id, config_map = %name, error = %e, "Failed to delete orphaned config map");
                    sweep.failures.push(format!("config map {}: {}", name, e));
                }
            }
        }

        if !sweep.deleted.is_empty() {
            info!(deleted = sweep.deleted.len(), "Removed config objects of expired jobs");
        }
        Ok(sweep)
    }
}
