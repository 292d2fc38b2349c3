// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task specifications and status snapshots.
//!
//! A task is one backtest, hyperopt run or market-data download. Specs are
//! immutable once submitted; statuses are recomputed from cluster state on
//! every query and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of workload a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Strategy backtest.
    Backtest,
    /// Hyperparameter optimization.
    #[serde(rename = "hyperopt")]
    HyperOpt,
    /// Historical market-data download.
    DataDownload,
}

impl TaskKind {
    /// All task kinds.
    pub const ALL: [TaskKind; 3] = [TaskKind::Backtest, TaskKind::HyperOpt, TaskKind::DataDownload];

    /// Wire value used in labels and object names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backtest => "backtest",
            Self::HyperOpt => "hyperopt",
            Self::DataDownload => "data-download",
        }
    }

    /// Parse a wire value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "backtest" => Some(Self::Backtest),
            "hyperopt" => Some(Self::HyperOpt),
            "data-download" => Some(Self::DataDownload),
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource sizing hints as Kubernetes quantity strings (`500m`, `2Gi`).
///
/// Unset values fall back to the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHints {
    /// CPU request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    /// CPU limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    /// Memory request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    /// Memory limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

/// Backtest submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSpec {
    /// Opaque task ID.
    pub id: String,
    /// Strategy class name; also the file name of the staged source.
    pub strategy_name: String,
    /// Strategy source code.
    pub strategy_code: String,
    /// Workload configuration document.
    pub config: Value,
    /// Optional `YYYYMMDD-YYYYMMDD` time range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timerange: Option<String>,
    /// Optional URL of a tar.gz market-data archive to stage before the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    /// Resource sizing.
    #[serde(default)]
    pub resources: ResourceHints,
}

/// Hyperparameter optimization submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperOptSpec {
    /// Opaque task ID.
    pub id: String,
    /// Strategy class name.
    pub strategy_name: String,
    /// Strategy source code.
    pub strategy_code: String,
    /// Workload configuration document.
    pub config: Value,
    /// Number of optimization epochs.
    pub epochs: u32,
    /// Loss function class name.
    pub loss_function: String,
    /// Parameter spaces to optimize (`buy`, `sell`, `roi`, ...).
    #[serde(default)]
    pub spaces: Vec<String>,
    /// Optional time range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timerange: Option<String>,
    /// Optional URL of a tar.gz market-data archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    /// Resource sizing.
    #[serde(default)]
    pub resources: ResourceHints,
}

/// Market type to download candles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Spot markets.
    #[default]
    Spot,
    /// Margin markets.
    Margin,
    /// Perpetual futures.
    Futures,
}

impl TradingMode {
    /// Value passed to the download command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Margin => "margin",
            Self::Futures => "futures",
        }
    }
}

/// Download parameters for one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDownload {
    /// Exchange identifier.
    pub name: String,
    /// Pair-matching pattern (`BTC/USDT`, `.*/USDT`).
    pub pair_pattern: String,
    /// Candle timeframes (`5m`, `1h`).
    pub timeframes: Vec<String>,
    /// Lookback in days.
    pub days: u32,
    /// Market type.
    #[serde(default)]
    pub trading_mode: TradingMode,
}

/// Market-data download submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataDownloadSpec {
    /// Opaque task ID.
    pub id: String,
    /// Per-exchange parameters, downloaded in order.
    pub exchanges: Vec<ExchangeDownload>,
    /// Optional archive of previously downloaded data to extend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_data_url: Option<String>,
    /// Optional presigned URL the resulting archive is uploaded to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    /// Resource sizing.
    #[serde(default)]
    pub resources: ResourceHints,
}

/// Any task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskSpec {
    /// Backtest.
    Backtest(BacktestSpec),
    /// Hyperopt.
    #[serde(rename = "hyperopt")]
    HyperOpt(HyperOptSpec),
    /// Data download.
    DataDownload(DataDownloadSpec),
}

impl TaskSpec {
    /// Task kind.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Backtest(_) => TaskKind::Backtest,
            Self::HyperOpt(_) => TaskKind::HyperOpt,
            Self::DataDownload(_) => TaskKind::DataDownload,
        }
    }

    /// Task ID.
    pub fn id(&self) -> &str {
        match self {
            Self::Backtest(spec) => &spec.id,
            Self::HyperOpt(spec) => &spec.id,
            Self::DataDownload(spec) => &spec.id,
        }
    }

    /// Strategy class name, for kinds that run a strategy.
    pub fn strategy_name(&self) -> Option<&str> {
        match self {
            Self::Backtest(spec) => Some(&spec.strategy_name),
            Self::HyperOpt(spec) => Some(&spec.strategy_name),
            Self::DataDownload(_) => None,
        }
    }

    /// Resource sizing.
    pub fn resources(&self) -> &ResourceHints {
        match self {
            Self::Backtest(spec) => &spec.resources,
            Self::HyperOpt(spec) => &spec.resources,
            Self::DataDownload(spec) => &spec.resources,
        }
    }
}

impl From<BacktestSpec> for TaskSpec {
    fn from(spec: BacktestSpec) -> Self {
        Self::Backtest(spec)
    }
}

impl From<HyperOptSpec> for TaskSpec {
    fn from(spec: HyperOptSpec) -> Self {
        Self::HyperOpt(spec)
    }
}

impl From<DataDownloadSpec> for TaskSpec {
    fn from(spec: DataDownloadSpec) -> Self {
        Self::DataDownload(spec)
    }
}

/// Handle for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Task kind.
    pub kind: TaskKind,
    /// Task ID.
    pub task_id: String,
    /// Cluster job name.
    pub job_name: String,
}

/// Lifecycle state derived from cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Job exists, no pod has become active.
    Pending,
    /// At least one pod is active.
    Running,
    /// The job succeeded.
    Completed,
    /// The job failed.
    Failed,
}

impl TaskState {
    /// True for completed and failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Resource usage of a task's main container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage in percent of one core.
    pub cpu_percent: f64,
    /// Memory working set in bytes.
    pub memory_bytes: u64,
    /// Bytes received over the network.
    pub network_rx_bytes: u64,
    /// Bytes sent over the network.
    pub network_tx_bytes: u64,
    /// Bytes read from disk.
    pub disk_read_bytes: u64,
    /// Bytes written to disk.
    pub disk_write_bytes: u64,
}

/// Status snapshot of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task ID.
    pub task_id: String,
    /// Task kind.
    pub kind: TaskKind,
    /// Cluster job name.
    pub job_name: String,
    /// Lifecycle state.
    pub state: TaskState,
    /// Progress in percent.
    pub progress: u8,
    /// When the job was created.
    pub created_at: Option<DateTime<Utc>>,
    /// When the job started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Exit code of the main container, if a pod was inspectable.
    pub exit_code: Option<i32>,
    /// Failure reason for failed jobs.
    pub error_message: Option<String>,
    /// Resource usage.
    pub usage: ResourceUsage,
}

impl TaskStatus {
    /// Seconds between start and completion.
    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        let millis = completed.signed_duration_since(started).num_milliseconds();
        Some(millis.max(0) as f64 / 1000.0)
    }
}
