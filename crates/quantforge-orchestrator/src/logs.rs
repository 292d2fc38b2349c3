// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Log access for a task's main container.

use std::sync::Arc;

use tracing::debug;

use crate::cluster::{ClusterApi, LogOptions, LogStream};
use crate::error::{Error, Result};
use crate::naming::ResourceNamer;
use crate::provisioner::MAIN_CONTAINER;
use crate::status::newest_pod;
use crate::task::TaskKind;

/// Reads logs of the newest pod of a task.
pub struct LogRetriever {
    cluster: Arc<dyn ClusterApi>,
    namer: ResourceNamer,
}

impl LogRetriever {
    /// Create a retriever.
    pub fn new(cluster: Arc<dyn ClusterApi>, namer: ResourceNamer) -> Self {
        Self { cluster, namer }
    }

    async fn pod_name(&self, kind: TaskKind, task_id: &str) -> Result<String> {
        let job_name = self.namer.job_name(kind, task_id);
        if self.cluster.get_job(&job_name).await?.is_none() {
            return Err(Error::NotFound {
                kind,
                id: task_id.to_string(),
            });
        }

        newest_pod(self.cluster.as_ref(), &self.namer.task_selector(kind, task_id))
            .await?
            .and_then(|pod| pod.metadata.name)
            .ok_or_else(|| Error::NoPod {
                kind,
                id: task_id.to_string(),
            })
    }

    /// Stream log lines. In follow mode the stream stays open until the
    /// caller cancels `options.cancel` or drops the stream.
    pub async fn logs(&self, kind: TaskKind, task_id: &str, options: &LogOptions) -> Result<LogStream> {
        let pod = self.pod_name(kind, task_id).await?;
        debug!(task_id = %task_id, kind = %kind, pod = %pod, follow = options.follow, "Opening log stream");
        Ok(self
            .cluster
            .stream_pod_logs(&pod, MAIN_CONTAINER, options)
            .await?)
    }

    /// Read the log as one string. `options.follow` is ignored.
    pub async fn capture(&self, kind: TaskKind, task_id: &str, options: &LogOptions) -> Result<String> {
        let pod = self.pod_name(kind, task_id).await?;
        let options = LogOptions {
            follow: false,
            ..options.clone()
        };
        Ok(self
            .cluster
            .pod_logs(&pod, MAIN_CONTAINER, &options)
            .await?)
    }
}
