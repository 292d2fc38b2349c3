// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compensation stack for multi-step provisioning.
//!
//! Each created resource registers an undo action. If a later step fails the
//! actions run in reverse order of registration (last created is removed
//! first). Undo failures are collected, never raised, so they cannot shadow
//! the error that triggered the rollback.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info, warn};

use crate::cluster::ClusterError;

type UndoFuture = Pin<Box<dyn Future<Output = Result<(), ClusterError>> + Send>>;
type UndoAction = Box<dyn FnOnce() -> UndoFuture + Send>;

/// Ordered list of undo actions.
#[derive(Default)]
pub struct CompensationStack {
    actions: Vec<(String, UndoAction)>,
}

impl CompensationStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the undo action for a step that just succeeded.
    pub fn push<F, Fut>(&mut self, description: impl Into<String>, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ClusterError>> + Send + 'static,
    {
        self.actions
            .push((description.into(), Box::new(move || Box::pin(undo()))));
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Discard all actions; the sequence completed.
    pub fn commit(self) {
        debug!(steps = self.actions.len(), "Provisioning committed");
    }

    /// Run every action in reverse order.
    ///
    /// A target that is already gone counts as compensated. Returns the
    /// failures as `"<description>: <error>"` strings.
    pub async fn compensate(self) -> Vec<String> {
        let mut failures = Vec::new();
        let total = self.actions.len();

        for (description, undo) in self.actions.into_iter().rev() {
            match undo().await {
                Ok(()) => debug!(step = %description, "Compensated"),
                Err(e) if e.is_not_found() => {
                    debug!(step = %description, "Already absent, nothing to compensate")
                }
                Err(e) => {
                    warn!(step = %description, error = %e, "Compensation failed");
                    failures.push(format!("{}: {}", description, e));
                }
            }
        }

        info!(steps = total, failed = failures.len(), "Compensation finished");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_compensate_runs_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CompensationStack::new();
        for step in ["first", "second", "third"] {
            let order = order.clone();
            stack.push(step, move || async move {
                order.lock().unwrap().push(step);
                Ok(())
            });
        }
        assert_eq!(stack.len(), 3);

        let failures = stack.compensate().await;

        assert!(failures.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_compensate_collects_failures_and_continues() {
        let ran = Arc::new(Mutex::new(0));
        let mut stack = CompensationStack::new();
        {
            let ran = ran.clone();
            stack.push("delete a", move || async move {
                *ran.lock().unwrap() += 1;
                Ok(())
            });
        }
        stack.push("delete b", || async {
            Err(ClusterError::Transport("refused".to_string()))
        });
        stack.push("delete c", || async {
            Err(ClusterError::NotFound("c".to_string()))
        });

        let failures = stack.compensate().await;

        assert_eq!(failures, vec!["delete b: Transport error: refused".to_string()]);
        assert_eq!(*ran.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_skips_actions() {
        let ran = Arc::new(Mutex::new(false));
        let mut stack = CompensationStack::new();
        {
            let ran = ran.clone();
            stack.push("delete a", move || async move {
                *ran.lock().unwrap() = true;
                Ok(())
            });
        }
        stack.commit();
        assert!(!*ran.lock().unwrap());
    }
}
