// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster API trait definitions.
//!
//! Defines the narrow set of cluster operations the orchestrator needs. Every
//! component talks to the cluster through [`ClusterApi`] so that the same
//! provisioning, status and cleanup logic runs against a real API server or
//! against the in-memory [`MockCluster`](super::MockCluster).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from cluster operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The addressed object does not exist.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The object already exists.
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// The API server rejected the request.
    #[error("API error {code}: {message}")]
    Api {
        /// HTTP status code returned by the API server.
        code: u16,
        /// Server-provided message.
        message: String,
    },

    /// The API server could not be reached.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A request or response body could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClusterError {
    /// True when the error means the object is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// How dependents of a deleted job are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Pods are removed before the job deletion completes.
    Foreground,
    /// The job is removed immediately; pods are garbage-collected afterwards.
    Background,
}

/// Options for reading container logs.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Only return the last N lines.
    pub tail_lines: Option<i64>,
    /// Only return lines written at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Keep the stream open and deliver new lines as they are written.
    pub follow: bool,
    /// Prefix each line with its RFC 3339 timestamp.
    pub timestamps: bool,
    /// Ends a follow stream when cancelled.
    pub cancel: Option<CancellationToken>,
}

/// Stream of log lines.
pub type LogStream = BoxStream<'static, Result<String>>;

/// Namespace-scoped cluster operations.
///
/// Implementations are bound to a single namespace. Deletes and gets return
/// [`ClusterError::NotFound`] for missing objects so callers can decide
/// whether absence is an error.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Namespace all operations are scoped to.
    fn namespace(&self) -> &str;

    /// Create a config map.
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// Delete a config map by name.
    async fn delete_config_map(&self, name: &str) -> Result<()>;

    /// List config maps matching an equality label selector.
    async fn list_config_maps(&self, label_selector: &str) -> Result<Vec<ConfigMap>>;

    /// Create a job.
    async fn create_job(&self, job: &Job) -> Result<()>;

    /// Fetch a job by name, `None` when it does not exist.
    async fn get_job(&self, name: &str) -> Result<Option<Job>>;

    /// List jobs matching an equality label selector (`k=v,k2=v2`).
    async fn list_jobs(&self, label_selector: &str) -> Result<Vec<Job>>;

    /// Delete a job and its pods.
    async fn delete_job(&self, name: &str, propagation: Propagation) -> Result<()>;

    /// List pods matching an equality label selector.
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>>;

    /// Read the complete log of one container.
    async fn pod_logs(&self, pod: &str, container: &str, options: &LogOptions) -> Result<String>;

    /// Stream the log of one container line by line.
    async fn stream_pod_logs(
        &self,
        pod: &str,
        container: &str,
        options: &LogOptions,
    ) -> Result<LogStream>;
}
