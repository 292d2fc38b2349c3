// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status resolution from job and pod state.
//!
//! Nothing is stored: every call reads the job, derives the lifecycle state
//! from its counters and conditions, and attaches whatever the newest pod can
//! still tell (exit code, progress, usage).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobCondition};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use crate::cluster::{ClusterApi, LogOptions};
use crate::error::{Error, Result};
use crate::metrics::{MetricsCollector, apply_minimums};
use crate::naming::ResourceNamer;
use crate::provisioner::MAIN_CONTAINER;
use crate::script::parse_exchange_done;
use crate::task::{ResourceUsage, TaskKind, TaskState, TaskStatus};

/// Lines read from the end of a running download's log to find progress.
const PROGRESS_TAIL_LINES: i64 = 50;

/// Pick the most recently created pod matching `selector`.
pub(crate) async fn newest_pod(cluster: &dyn ClusterApi, selector: &str) -> Result<Option<Pod>> {
    let pods = cluster.list_pods(selector).await?;
    Ok(pods.into_iter().max_by(|a, b| {
        let key = |pod: &Pod| {
            (
                pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
                pod.metadata.name.clone(),
            )
        };
        key(a).cmp(&key(b))
    }))
}

/// Exit code of the main container, if it has terminated.
fn main_container_exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|status| status.name == MAIN_CONTAINER)?
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|terminated| terminated.exit_code)
}

fn condition<'a>(conditions: &'a [JobCondition], type_: &str) -> Option<&'a JobCondition> {
    conditions
        .iter()
        .find(|c| c.type_ == type_ && c.status == "True")
}

fn transition_time(condition: Option<&JobCondition>) -> Option<DateTime<Utc>> {
    condition
        .and_then(|c| c.last_transition_time.as_ref())
        .map(|t| t.0)
}

/// Derives [`TaskStatus`] snapshots from cluster state.
pub struct StatusResolver {
    cluster: Arc<dyn ClusterApi>,
    namer: ResourceNamer,
    metrics: Arc<MetricsCollector>,
}

impl StatusResolver {
    /// Create a resolver.
    pub fn new(cluster: Arc<dyn ClusterApi>, namer: ResourceNamer, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            cluster,
            namer,
            metrics,
        }
    }

    /// Status of one task; `NotFound` when it has no job.
    pub async fn resolve(&self, kind: TaskKind, task_id: &str) -> Result<TaskStatus> {
        let job_name = self.namer.job_name(kind, task_id);
        let job = self
            .cluster
            .get_job(&job_name)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind,
                id: task_id.to_string(),
            })?;
        self.resolve_job(kind, task_id, &job).await
    }

    /// Status of a task from an already fetched job.
    pub async fn resolve_job(&self, kind: TaskKind, task_id: &str, job: &Job) -> Result<TaskStatus> {
        let job_status = job.status.clone().unwrap_or_default();
        let conditions = job_status.conditions.clone().unwrap_or_default();
        let succeeded = job_status.succeeded.unwrap_or(0);
        let failed = job_status.failed.unwrap_or(0);
        let active = job_status.active.unwrap_or(0);

        // A missing pod is expected once the job has been garbage-collected.
        let selector = self.namer.task_selector(kind, task_id);
        let pod = match newest_pod(self.cluster.as_ref(), &selector).await {
            Ok(pod) => pod,
            Err(e) => {
                warn!(task_id = %task_id, kind = %kind, error = %e, "Pod lookup failed");
                None
            }
        };
        let pod_name = pod.as_ref().and_then(|p| p.metadata.name.clone());
        let exit_code = pod.as_ref().and_then(main_container_exit_code);

        let mut status = TaskStatus {
            task_id: task_id.to_string(),
            kind,
            job_name: job
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| self.namer.job_name(kind, task_id)),
            state: TaskState::Pending,
            progress: 0,
            created_at: job.metadata.creation_timestamp.as_ref().map(|t| t.0),
            started_at: job_status.start_time.as_ref().map(|t| t.0),
            completed_at: None,
            exit_code: None,
            error_message: None,
            usage: ResourceUsage::default(),
        };

        if succeeded > 0 {
            status.state = TaskState::Completed;
            status.progress = 100;
            status.completed_at = job_status
                .completion_time
                .as_ref()
                .map(|t| t.0)
                .or_else(|| transition_time(condition(&conditions, "Complete")))
                .or_else(|| Some(Utc::now()));
            status.exit_code = exit_code;
        } else if failed > 0 {
            let failed_condition = condition(&conditions, "Failed");
            status.state = TaskState::Failed;
            status.completed_at = transition_time(failed_condition);
            status.error_message = Some(
                failed_condition
                    .and_then(|c| c.message.clone())
                    .unwrap_or_default(),
            );
            status.exit_code = exit_code;
        } else if active > 0 {
            status.state = TaskState::Running;
            if kind == TaskKind::DataDownload
                && let Some(pod_name) = &pod_name
            {
                status.progress = self.download_progress(pod_name).await;
            }
        }

        status.usage = match &pod_name {
            Some(pod_name) => {
                self.metrics
                    .collect(self.cluster.namespace(), pod_name, MAIN_CONTAINER)
                    .await
            }
            None => {
                let mut usage = ResourceUsage::default();
                apply_minimums(&mut usage);
                usage
            }
        };

        debug!(
            task_id = %task_id,
            kind = %kind,
            state = status.state.as_str(),
            progress = status.progress,
            "Resolved task status"
        );
        Ok(status)
    }

    /// Progress of a running download from its latest exchange-completion line.
    async fn download_progress(&self, pod_name: &str) -> u8 {
        let options = LogOptions {
            tail_lines: Some(PROGRESS_TAIL_LINES),
            ..Default::default()
        };
        match self.cluster.pod_logs(pod_name, MAIN_CONTAINER, &options).await {
            Ok(log) => log
                .lines()
                .rev()
                .find_map(parse_exchange_done)
                .map(|(done, total)| ((done * 100 / total).min(99)) as u8)
                .unwrap_or(0),
            Err(e) => {
                debug!(pod = %pod_name, error = %e, "Progress unavailable");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn pod(name: &str, created: DateTime<Utc>, exit: Option<i32>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                creation_timestamp: Some(Time(created)),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                container_statuses: exit.map(|code| {
                    vec![ContainerStatus {
                        name: MAIN_CONTAINER.to_string(),
                        state: Some(ContainerState {
                            terminated: Some(ContainerStateTerminated {
                                exit_code: code,
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_main_container_exit_code() {
        assert_eq!(main_container_exit_code(&pod("p", Utc::now(), Some(3))), Some(3));
        assert_eq!(main_container_exit_code(&pod("p", Utc::now(), None)), None);
    }

    #[test]
    fn test_condition_requires_true_status() {
        let conditions = vec![
            JobCondition {
                type_: "Failed".to_string(),
                status: "False".to_string(),
                message: Some("stale".to_string()),
                ..Default::default()
            },
            JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                message: Some("BackoffLimitExceeded".to_string()),
                ..Default::default()
            },
        ];
        let found = condition(&conditions, "Failed").unwrap();
        assert_eq!(found.message.as_deref(), Some("BackoffLimitExceeded"));
        assert!(condition(&conditions, "Complete").is_none());
    }
}
