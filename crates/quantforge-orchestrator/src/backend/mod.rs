// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution backend trait definitions.
//!
//! Callers dispatch backtests, hyperopt runs and downloads through
//! [`ExecutionBackend`]. The implementation is chosen once, at startup, by
//! [`connect`].

mod kubernetes;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub use kubernetes::KubernetesBackend;

use crate::cluster::{KubeCluster, LogOptions, LogStream};
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::lifecycle::OrphanSweep;
use crate::metrics::MetricsCollector;
use crate::result::ResultRecord;
use crate::task::{BacktestSpec, DataDownloadSpec, HyperOptSpec, TaskKind, TaskStatus};

/// Operations offered to the dispatcher, per task kind.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Submit a backtest.
    async fn run_backtest(&self, spec: &BacktestSpec) -> Result<()>;

    /// Current status of a backtest.
    async fn backtest_status(&self, id: &str) -> Result<TaskStatus>;

    /// Result of a finished backtest.
    async fn backtest_result(&self, id: &str) -> Result<ResultRecord>;

    /// Log lines of a backtest.
    async fn backtest_logs(&self, id: &str, options: &LogOptions) -> Result<LogStream>;

    /// Stop a running backtest.
    async fn stop_backtest(&self, id: &str) -> Result<()>;

    /// Remove every resource of a backtest.
    async fn delete_backtest(&self, id: &str) -> Result<()>;

    /// Status of every managed backtest.
    async fn list_backtests(&self) -> Result<Vec<TaskStatus>>;

    /// Submit a hyperopt run; returns the job handle.
    async fn run_hyperopt(&self, spec: &HyperOptSpec) -> Result<String>;

    /// Current status of a hyperopt run.
    async fn hyperopt_status(&self, id: &str) -> Result<TaskStatus>;

    /// Result of a finished hyperopt run.
    async fn hyperopt_result(&self, id: &str) -> Result<ResultRecord>;

    /// Log lines of a hyperopt run.
    async fn hyperopt_logs(&self, id: &str, options: &LogOptions) -> Result<LogStream>;

    /// Stop a running hyperopt run.
    async fn stop_hyperopt(&self, id: &str) -> Result<()>;

    /// Remove every resource of a hyperopt run.
    async fn delete_hyperopt(&self, id: &str) -> Result<()>;

    /// Status of every managed hyperopt run.
    async fn list_hyperopts(&self) -> Result<Vec<TaskStatus>>;

    /// Submit a market-data download; returns the task ID.
    async fn start_download(&self, spec: &DataDownloadSpec) -> Result<String>;

    /// Current status of a download.
    async fn download_status(&self, id: &str) -> Result<TaskStatus>;

    /// Log lines of a download.
    async fn download_logs(&self, id: &str, options: &LogOptions) -> Result<LogStream>;

    /// Stop a running download.
    async fn cancel_download(&self, id: &str) -> Result<()>;

    /// Remove every resource of a download.
    async fn cleanup_download(&self, id: &str) -> Result<()>;

    /// Status of every managed download.
    async fn list_downloads(&self) -> Result<Vec<TaskStatus>>;

    /// Remove config objects created before `created_before` whose job is gone.
    async fn delete_orphaned_config(&self, created_before: DateTime<Utc>) -> Result<OrphanSweep>;
}

/// Status of every managed task of `kind`.
pub async fn list_tasks(backend: &dyn ExecutionBackend, kind: TaskKind) -> Result<Vec<TaskStatus>> {
    match kind {
        TaskKind::Backtest => backend.list_backtests().await,
        TaskKind::HyperOpt => backend.list_hyperopts().await,
        TaskKind::DataDownload => backend.list_downloads().await,
    }
}

/// Stop a task of any kind.
pub async fn stop_task(backend: &dyn ExecutionBackend, kind: TaskKind, id: &str) -> Result<()> {
    match kind {
        TaskKind::Backtest => backend.stop_backtest(id).await,
        TaskKind::HyperOpt => backend.stop_hyperopt(id).await,
        TaskKind::DataDownload => backend.cancel_download(id).await,
    }
}

/// Delete a task of any kind.
pub async fn delete_task(backend: &dyn ExecutionBackend, kind: TaskKind, id: &str) -> Result<()> {
    match kind {
        TaskKind::Backtest => backend.delete_backtest(id).await,
        TaskKind::HyperOpt => backend.delete_hyperopt(id).await,
        TaskKind::DataDownload => backend.cleanup_download(id).await,
    }
}

/// Create the backend named by `config.backend`.
pub async fn connect(config: &Config) -> Result<Arc<dyn ExecutionBackend>> {
    match config.backend {
        BackendKind::Kubernetes => {
            let cluster = KubeCluster::try_default(config.namespace.clone()).await?;
            let metrics = match MetricsCollector::from_config(&config.metrics, cluster.client().clone()) {
                Ok(collector) => collector,
                Err(e) => {
                    warn!(error = %e, "Metrics sources unavailable, reporting floor values only");
                    MetricsCollector::disabled()
                }
            };
            info!(namespace = %config.namespace, "Connected to Kubernetes");
            Ok(Arc::new(KubernetesBackend::new(
                Arc::new(cluster),
                config,
                Arc::new(metrics),
            )))
        }
    }
}
