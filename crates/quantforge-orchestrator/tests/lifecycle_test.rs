// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for stop and delete.

mod common;

use quantforge_orchestrator::cluster::{MockDeletion, Propagation};
use quantforge_orchestrator::provisioner::MAIN_CONTAINER;
use quantforge_orchestrator::{Error, ExecutionBackend};

use common::{backend, backtest_spec, download_spec, hyperopt_spec, mock_cluster};

#[tokio::test]
async fn test_stop_twice_succeeds() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_backtest(&backtest_spec("bt-1")).await.unwrap();
    cluster
        .add_job_pod("quantforge-backtest-bt-1", "bt-1-pod", MAIN_CONTAINER, None)
        .await;

    backend.stop_backtest("bt-1").await.unwrap();
    backend.stop_backtest("bt-1").await.unwrap();

    assert!(cluster.job_names().await.is_empty());
    assert!(cluster.pod_names().await.is_empty());
    assert_eq!(
        cluster.deletions().await,
        vec![
            MockDeletion::Job("quantforge-backtest-bt-1".to_string(), Propagation::Foreground),
            MockDeletion::Job("quantforge-backtest-bt-1".to_string(), Propagation::Foreground),
        ]
    );
    // Stopping keeps the config objects for a later delete.
    assert_eq!(cluster.config_map_names().await.len(), 2);
}

#[tokio::test]
async fn test_cancel_download_twice_succeeds() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.start_download(&download_spec("dl-1")).await.unwrap();

    backend.cancel_download("dl-1").await.unwrap();
    backend.cancel_download("dl-1").await.unwrap();

    let err = backend.download_status("dl-1").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_stop_unknown_task_succeeds() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.stop_hyperopt("never-submitted").await.unwrap();
}

#[tokio::test]
async fn test_delete_removes_job_before_config_objects() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_hyperopt(&hyperopt_spec("ho-1")).await.unwrap();

    backend.delete_hyperopt("ho-1").await.unwrap();

    assert!(cluster.job_names().await.is_empty());
    assert!(cluster.config_map_names().await.is_empty());
    assert_eq!(
        cluster.deletions().await,
        vec![
            MockDeletion::Job("quantforge-hyperopt-ho-1".to_string(), Propagation::Background),
            MockDeletion::ConfigMap("hyperopt-ho-1-config".to_string()),
            MockDeletion::ConfigMap("hyperopt-ho-1-strategy".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_backtest(&backtest_spec("bt-2")).await.unwrap();

    backend.delete_backtest("bt-2").await.unwrap();
    backend.delete_backtest("bt-2").await.unwrap();
    backend.cleanup_download("never-submitted").await.unwrap();
}

#[tokio::test]
async fn test_delete_after_stop_removes_remaining_config_objects() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.start_download(&download_spec("dl-2")).await.unwrap();

    backend.cancel_download("dl-2").await.unwrap();
    backend.cleanup_download("dl-2").await.unwrap();

    assert!(cluster.config_map_names().await.is_empty());
}

#[tokio::test]
async fn test_delete_partial_failure_is_aggregated() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_backtest(&backtest_spec("bt-3")).await.unwrap();
    cluster.fail_config_map_delete("backtest-bt-3-config").await;

    let err = backend.delete_backtest("bt-3").await.unwrap_err();

    match err {
        Error::CleanupFailed(failures) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("backtest-bt-3-config"));
        }
        other => panic!("expected cleanup failure, got {:?}", other),
    }
    // The job is gone and stays gone; the other config object was removed.
    assert!(cluster.job_names().await.is_empty());
    assert_eq!(
        cluster.config_map_names().await,
        vec!["backtest-bt-3-config".to_string()]
    );
}

#[tokio::test]
async fn test_delete_continues_after_job_failure() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_backtest(&backtest_spec("bt-4")).await.unwrap();
    cluster.fail_job_delete().await;

    let err = backend.delete_backtest("bt-4").await.unwrap_err();

    assert!(matches!(err, Error::CleanupFailed(ref f) if f.len() == 1));
    assert!(cluster.config_map_names().await.is_empty());
}

#[tokio::test]
async fn test_stop_surfaces_transient_errors() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_backtest(&backtest_spec("bt-5")).await.unwrap();
    cluster.set_unreachable(true).await;

    let err = backend.stop_backtest("bt-5").await.unwrap_err();
    assert!(matches!(err, Error::Cluster(_)));
}
