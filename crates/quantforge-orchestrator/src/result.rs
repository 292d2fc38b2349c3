// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Result extraction from workload logs.
//!
//! Workloads print their machine-readable result between two sentinel lines:
//!
//! ```text
//! ===RESULT_START===
//! {"strategy": {...}}
//! ===RESULT_END===
//! ```
//!
//! A log without the sentinels is not an error; it yields a record whose
//! payload describes what was missing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::script::{RESULT_END_MARKER, RESULT_START_MARKER};
use crate::task::{TaskKind, TaskState, TaskStatus};

/// Why no result could be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultErrorKind {
    /// No complete start/end pair in the log.
    NoMarkers,
    /// The markers enclose only whitespace.
    EmptyPayload,
    /// The enclosed text is not valid JSON.
    InvalidJson,
}

/// The structured outcome of result parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultPayload {
    /// The workload's result document.
    Parsed {
        /// Workload-defined JSON.
        value: Value,
    },
    /// No usable result was found.
    Error {
        /// Failure category.
        kind: ResultErrorKind,
        /// Human-readable explanation.
        message: String,
    },
}

impl ResultPayload {
    /// The parsed value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Parsed { value } => Some(value),
            Self::Error { .. } => None,
        }
    }

    fn error(kind: ResultErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

/// Result of a finished backtest or hyperopt task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Task ID.
    pub task_id: String,
    /// Task kind.
    pub kind: TaskKind,
    /// Final lifecycle state.
    pub state: TaskState,
    /// Seconds from start to completion, when both are known.
    pub duration_secs: Option<f64>,
    /// Parsed result or the reason there is none.
    pub result: ResultPayload,
    /// Log text with the result block removed.
    pub logs: String,
}

fn is_marker(line: &str, marker: &str) -> bool {
    line.trim() == marker
}

/// Line ranges `(start, end)` of every complete marker pair, by marker line index.
fn marker_pairs(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut open = None;
    for (i, line) in lines.iter().enumerate() {
        if is_marker(line, RESULT_START_MARKER) {
            // A second start before an end restarts the block.
            open = Some(i);
        } else if is_marker(line, RESULT_END_MARKER)
            && let Some(start) = open.take()
        {
            pairs.push((start, i));
        }
    }
    pairs
}

/// Extract the result from the last complete marker pair in `log`.
pub fn parse_result(log: &str) -> ResultPayload {
    let lines: Vec<&str> = log.lines().collect();
    let Some(&(start, end)) = marker_pairs(&lines).last() else {
        return ResultPayload::error(
            ResultErrorKind::NoMarkers,
            format!(
                "no {} / {} markers found in log output",
                RESULT_START_MARKER, RESULT_END_MARKER
            ),
        );
    };

    let body = lines[start + 1..end].join("\n");
    if body.trim().is_empty() {
        return ResultPayload::error(ResultErrorKind::EmptyPayload, "result markers enclose no data");
    }

    match serde_json::from_str(body.trim()) {
        Ok(value) => ResultPayload::Parsed { value },
        Err(e) => ResultPayload::error(
            ResultErrorKind::InvalidJson,
            format!("result is not valid JSON: {}", e),
        ),
    }
}

/// Remove every complete result block, markers included, from `log`.
///
/// An unterminated start marker is dropped but the lines after it are kept.
pub fn strip_markers(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let pairs = marker_pairs(&lines);

    let mut kept = Vec::with_capacity(lines.len());
    let mut pairs_iter = pairs.iter().peekable();
    for (i, line) in lines.iter().enumerate() {
        while pairs_iter.peek().is_some_and(|(_, end)| *end < i) {
            pairs_iter.next();
        }
        if pairs_iter
            .peek()
            .is_some_and(|(start, end)| (*start..=*end).contains(&i))
        {
            continue;
        }
        if is_marker(line, RESULT_START_MARKER) || is_marker(line, RESULT_END_MARKER) {
            continue;
        }
        kept.push(*line);
    }

    let mut out = kept.join("\n");
    if log.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Combine a terminal status with its captured log into a [`ResultRecord`].
pub fn build_record(status: &TaskStatus, log: &str) -> ResultRecord {
    ResultRecord {
        task_id: status.task_id.clone(),
        kind: status.kind,
        state: status.state,
        duration_secs: status.duration_secs(),
        result: parse_result(log),
        logs: strip_markers(log),
    }
}
