// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quantforge Orchestrator
//!
//! Runs backtests, hyperparameter optimizations and market-data downloads as
//! one-shot Kubernetes Jobs and tracks them to completion.
//!
//! Responsibilities:
//! - Staging inputs as config maps and submitting the job, with rollback of
//!   partially created objects
//! - Deriving task status from job and pod state
//! - Collecting resource usage through Prometheus with a metrics-API fallback
//! - Reading logs and extracting the result block the workload prints
//! - Stopping and deleting task resources, tolerating objects already gone
//!
//! Callers use the [`ExecutionBackend`] trait; [`backend::connect`] picks the
//! implementation from [`Config`].

#![deny(missing_docs)]

pub mod backend;
pub mod cluster;
pub mod compensation;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logs;
pub mod metrics;
pub mod naming;
pub mod provisioner;
pub mod reaper;
pub mod result;
pub mod script;
pub mod status;
pub mod task;

pub use backend::{ExecutionBackend, KubernetesBackend, connect};
pub use cluster::{ClusterApi, ClusterError, LogOptions, LogStream};
pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use metrics::{MetricsCollector, apply_minimums};
pub use naming::ResourceNamer;
pub use reaper::Reaper;
pub use result::{ResultPayload, ResultRecord};
pub use task::{
    BacktestSpec, DataDownloadSpec, ExchangeDownload, HyperOptSpec, JobHandle, ResourceHints,
    ResourceUsage, TaskKind, TaskSpec, TaskState, TaskStatus, TradingMode,
};
