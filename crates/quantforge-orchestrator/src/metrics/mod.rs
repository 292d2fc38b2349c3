// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource usage metrics for task containers.

mod collector;
pub mod prometheus;
pub mod snapshot;

use thiserror::Error;

pub use collector::{MIN_CPU_PERCENT, MIN_MEMORY_BYTES, MetricsCollector, apply_minimums};
pub use prometheus::{DirectPrometheus, PromQuery, PrometheusRoute, ProxiedPrometheus};
pub use snapshot::{MetricsServerSnapshot, UsageSnapshot, UsageSnapshotSource};

/// Failure to obtain a metric from one source.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MetricsError {
    /// The source could not be reached.
    #[error("Request failed: {0}")]
    Request(String),

    /// The source rejected the query.
    #[error("Query failed: {0}")]
    Query(String),

    /// The response could not be interpreted.
    #[error("Malformed response: {0}")]
    Malformed(String),
}
