// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic names and labels for a task's cluster objects.
//!
//! Every name is a pure function of (task kind, task ID), so any component can
//! rediscover a task's resources without bookkeeping.

use std::collections::BTreeMap;

use crate::task::TaskKind;

/// Label marking objects owned by the orchestrator.
pub const MANAGED_LABEL: &str = "quantforge.io/managed";
/// Label carrying the task kind.
pub const KIND_LABEL: &str = "quantforge.io/task-kind";
/// Label carrying the task ID.
pub const TASK_ID_LABEL: &str = "quantforge.io/task-id";

/// Maximum length of a job name; pods inherit it as a label value.
const MAX_JOB_NAME_LEN: usize = 63;

/// Naming scheme for one product.
#[derive(Debug, Clone)]
pub struct ResourceNamer {
    product: String,
}

impl ResourceNamer {
    /// Create a namer for the given product prefix.
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
        }
    }

    /// Job name: `<product>-<kind>-<id>`.
    pub fn job_name(&self, kind: TaskKind, task_id: &str) -> String {
        format!("{}-{}-{}", self.product, kind.as_str(), task_id)
    }

    /// Config object holding the configuration payload: `<kind>-<id>-config`.
    pub fn config_map_name(&self, kind: TaskKind, task_id: &str) -> String {
        format!("{}-{}-config", kind.as_str(), task_id)
    }

    /// Config object holding the strategy source: `<kind>-<id>-strategy`.
    pub fn strategy_map_name(&self, kind: TaskKind, task_id: &str) -> String {
        format!("{}-{}-strategy", kind.as_str(), task_id)
    }

    /// Every config object name a task of this kind may own.
    pub fn config_object_names(&self, kind: TaskKind, task_id: &str) -> Vec<String> {
        vec![
            self.config_map_name(kind, task_id),
            self.strategy_map_name(kind, task_id),
        ]
    }

    /// Labels attached to the job, its pods and its config objects.
    pub fn labels(&self, kind: TaskKind, task_id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (KIND_LABEL.to_string(), kind.as_str().to_string()),
            (TASK_ID_LABEL.to_string(), task_id.to_string()),
        ])
    }

    /// Selector matching one task's objects.
    pub fn task_selector(&self, kind: TaskKind, task_id: &str) -> String {
        format!(
            "{}=true,{}={},{}={}",
            MANAGED_LABEL,
            KIND_LABEL,
            kind.as_str(),
            TASK_ID_LABEL,
            task_id
        )
    }

    /// Selector matching every task of one kind.
    pub fn kind_selector(&self, kind: TaskKind) -> String {
        format!("{}=true,{}={}", MANAGED_LABEL, KIND_LABEL, kind.as_str())
    }

    /// Selector matching every managed object.
    pub fn managed_selector(&self) -> String {
        format!("{}=true", MANAGED_LABEL)
    }

    /// Check that a task ID yields valid, collision-free object names.
    ///
    /// IDs are restricted to lowercase alphanumerics and `-` (no leading or
    /// trailing `-`) so that names are used verbatim, keeping the mapping
    /// injective.
    pub fn validate_task_id(&self, kind: TaskKind, task_id: &str) -> Result<(), String> {
        if task_id.is_empty() {
            return Err("task ID is empty".to_string());
        }
        if !task_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(format!(
                "task ID {:?} may only contain lowercase letters, digits and '-'",
                task_id
            ));
        }
        if task_id.starts_with('-') || task_id.ends_with('-') {
            return Err(format!("task ID {:?} must not start or end with '-'", task_id));
        }
        let job_name = self.job_name(kind, task_id);
        if job_name.len() > MAX_JOB_NAME_LEN {
            return Err(format!(
                "job name {:?} exceeds {} characters",
                job_name, MAX_JOB_NAME_LEN
            ));
        }
        Ok(())
    }
}
