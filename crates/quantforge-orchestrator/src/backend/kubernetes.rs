// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes Job backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::ExecutionBackend;
use crate::cluster::{ClusterApi, LogOptions, LogStream};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleManager, OrphanSweep};
use crate::logs::LogRetriever;
use crate::metrics::MetricsCollector;
use crate::naming::{ResourceNamer, TASK_ID_LABEL};
use crate::provisioner::WorkloadProvisioner;
use crate::result::{ResultRecord, build_record};
use crate::status::StatusResolver;
use crate::task::{
    BacktestSpec, DataDownloadSpec, HyperOptSpec, JobHandle, TaskKind, TaskSpec, TaskStatus,
};

/// Runs every task as a Kubernetes Job in one namespace.
pub struct KubernetesBackend {
    cluster: Arc<dyn ClusterApi>,
    namer: ResourceNamer,
    provisioner: WorkloadProvisioner,
    status: StatusResolver,
    logs: LogRetriever,
    lifecycle: LifecycleManager,
}

impl KubernetesBackend {
    /// Assemble the backend on top of `cluster`.
    pub fn new(cluster: Arc<dyn ClusterApi>, config: &Config, metrics: Arc<MetricsCollector>) -> Self {
        let namer = ResourceNamer::new(config.product.clone());
        Self {
            provisioner: WorkloadProvisioner::new(
                cluster.clone(),
                namer.clone(),
                config.workload.clone(),
            ),
            status: StatusResolver::new(cluster.clone(), namer.clone(), metrics),
            logs: LogRetriever::new(cluster.clone(), namer.clone()),
            lifecycle: LifecycleManager::new(cluster.clone(), namer.clone()),
            cluster,
            namer,
        }
    }

    async fn submit(&self, spec: TaskSpec) -> Result<JobHandle> {
        self.provisioner.submit(&spec).await
    }

    async fn result(&self, kind: TaskKind, id: &str) -> Result<ResultRecord> {
        let status = self.status.resolve(kind, id).await?;
        if !status.state.is_terminal() {
            return Err(Error::NotFinished {
                kind,
                id: id.to_string(),
            });
        }

        let log = match self.logs.capture(kind, id, &LogOptions::default()).await {
            Ok(log) => log,
            // The pod is gone after garbage collection; the record still carries the status.
            Err(Error::NoPod { .. }) => {
                debug!(task_id = %id, kind = %kind, "No pod left, building result without logs");
                String::new()
            }
            Err(e) => return Err(e),
        };
        Ok(build_record(&status, &log))
    }

    async fn list(&self, kind: TaskKind) -> Result<Vec<TaskStatus>> {
        let jobs = self.cluster.list_jobs(&self.namer.kind_selector(kind)).await?;
        let mut statuses = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let Some(task_id) = job
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(TASK_ID_LABEL))
            else {
                continue;
            };
            statuses.push(self.status.resolve_job(kind, task_id, job).await?);
        }
        statuses.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(statuses)
    }
}

#[async_trait]
impl ExecutionBackend for KubernetesBackend {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn run_backtest(&self, spec: &BacktestSpec) -> Result<()> {
        self.submit(spec.clone().into()).await?;
        Ok(())
    }

    async fn backtest_status(&self, id: &str) -> Result<TaskStatus> {
        self.status.resolve(TaskKind::Backtest, id).await
    }

    async fn backtest_result(&self, id: &str) -> Result<ResultRecord> {
        self.result(TaskKind::Backtest, id).await
    }

    async fn backtest_logs(&self, id: &str, options: &LogOptions) -> Result<LogStream> {
        self.logs.logs(TaskKind::Backtest, id, options).await
    }

    async fn stop_backtest(&self, id: &str) -> Result<()> {
        self.lifecycle.stop(TaskKind::Backtest, id).await
    }

    async fn delete_backtest(&self, id: &str) -> Result<()> {
        self.lifecycle.delete(TaskKind::Backtest, id).await
    }

    async fn list_backtests(&self) -> Result<Vec<TaskStatus>> {
        self.list(TaskKind::Backtest).await
    }

    async fn run_hyperopt(&self, spec: &HyperOptSpec) -> Result<String> {
        let handle = self.submit(spec.clone().into()).await?;
        Ok(handle.job_name)
    }

    async fn hyperopt_status(&self, id: &str) -> Result<TaskStatus> {
        self.status.resolve(TaskKind::HyperOpt, id).await
    }

    async fn hyperopt_result(&self, id: &str) -> Result<ResultRecord> {
        self.result(TaskKind::HyperOpt, id).await
    }

    async fn hyperopt_logs(&self, id: &str, options: &LogOptions) -> Result<LogStream> {
        self.logs.logs(TaskKind::HyperOpt, id, options).await
    }

    async fn stop_hyperopt(&self, id: &str) -> Result<()> {
        self.lifecycle.stop(TaskKind::HyperOpt, id).await
    }

    async fn delete_hyperopt(&self, id: &str) -> Result<()> {
        self.lifecycle.delete(TaskKind::HyperOpt, id).await
    }

    async fn list_hyperopts(&self) -> Result<Vec<TaskStatus>> {
        self.list(TaskKind::HyperOpt).await
    }

    async fn start_download(&self, spec: &DataDownloadSpec) -> Result<String> {
        let handle = self.submit(spec.clone().into()).await?;
        info!(
            task_id = %handle.task_id,
            exchanges = spec.exchanges.len(),
            "Market data download started"
        );
        Ok(handle.task_id)
    }

    async fn download_status(&self, id: &str) -> Result<TaskStatus> {
        self.status.resolve(TaskKind::DataDownload, id).await
    }

    async fn download_logs(&self, id: &str, options: &LogOptions) -> Result<LogStream> {
        self.logs.logs(TaskKind::DataDownload, id, options).await
    }

    async fn cancel_download(&self, id: &str) -> Result<()> {
        self.lifecycle.stop(TaskKind::DataDownload, id).await
    }

    async fn cleanup_download(&self, id: &str) -> Result<()> {
        self.lifecycle.delete(TaskKind::DataDownload, id).await
    }

    async fn list_downloads(&self) -> Result<Vec<TaskStatus>> {
        self.list(TaskKind::DataDownload).await
    }

    async fn delete_orphaned_config(&self, created_before: DateTime<Utc>) -> Result<OrphanSweep> {
        self.lifecycle.delete_orphaned_config(created_before).await
    }
}
