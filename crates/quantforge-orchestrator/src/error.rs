// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for quantforge-orchestrator.

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::task::TaskKind;

/// Orchestrator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// No job exists for the task.
    #[error("{kind} task not found: {id}")]
    NotFound {
        /// Task kind.
        kind: TaskKind,
        /// Task ID.
        id: String,
    },

    /// The task ID cannot be mapped to cluster object names.
    #[error("Invalid task ID: {0}")]
    InvalidTaskId(String),

    /// The strategy name cannot be used as a class name and file key.
    #[error("Invalid strategy name: {0}")]
    InvalidStrategyName(String),

    /// Another submission for the same task is still in progress.
    #[error("{kind} task {id} is already being provisioned")]
    AlreadyProvisioning {
        /// Task kind.
        kind: TaskKind,
        /// Task ID.
        id: String,
    },

    /// A provisioning step failed; created objects were rolled back.
    #[error("Provisioning failed at {step}: {source}")]
    Provisioning {
        /// The step that failed.
        step: &'static str,
        /// The underlying failure.
        #[source]
        source: ClusterError,
    },

    /// A cluster call failed for reasons unrelated to the task.
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Some resources could not be deleted.
    #[error("Cleanup failed: {}", .0.join("; "))]
    CleanupFailed(Vec<String>),

    /// The task has not reached a terminal state.
    #[error("{kind} task {id} has not finished")]
    NotFinished {
        /// Task kind.
        kind: TaskKind,
        /// Task ID.
        id: String,
    },

    /// The job exists but has no pod to read from yet.
    #[error("{kind} task {id} has no pod yet")]
    NoPod {
        /// Task kind.
        kind: TaskKind,
        /// Task ID.
        id: String,
    },

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the task does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Result type using the orchestrator Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound {
            kind: TaskKind::HyperOpt,
            id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "hyperopt task not found: abc");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cleanup_failed_joins_messages() {
        let err = Error::CleanupFailed(vec!["job x: boom".to_string(), "cm y: boom".to_string()]);
        assert_eq!(err.to_string(), "Cleanup failed: job x: boom; cm y: boom");
    }

    #[test]
    fn test_provisioning_keeps_source() {
        let err = Error::Provisioning {
            step: "create job",
            source: ClusterError::Transport("refused".to_string()),
        };
        assert!(err.to_string().contains("create job"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
