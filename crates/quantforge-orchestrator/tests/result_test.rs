// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for results and log access through the backend.

mod common;

use chrono::{Duration, Utc};
use futures::StreamExt;
use serde_json::json;

use quantforge_orchestrator::cluster::LogOptions;
use quantforge_orchestrator::provisioner::MAIN_CONTAINER;
use quantforge_orchestrator::result::ResultErrorKind;
use quantforge_orchestrator::task::TaskState;
use quantforge_orchestrator::{Error, ExecutionBackend, ResultPayload};

use common::{backend, backtest_spec, failed_status, hyperopt_spec, mock_cluster, succeeded_status};

const BACKTEST_LOG: &str = "\
2025-01-01 00:00:00 - freqtrade - INFO - Using strategy SampleStrategy
2025-01-01 00:00:05 - freqtrade - INFO - Backtesting with data from 2024-01-01
===RESULT_START===
{\"strategy\": {\"SampleStrategy\": {\"total_trades\": 42, \"profit_total\": 0.137}}}
===RESULT_END===
";

#[tokio::test]
async fn test_backtest_result_parses_markers() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_backtest(&backtest_spec("bt-1")).await.unwrap();

    let started = Utc::now() - Duration::seconds(120);
    let completed = started + Duration::seconds(100);
    cluster
        .set_job_status("quantforge-backtest-bt-1", succeeded_status(started, completed))
        .await;
    cluster
        .add_job_pod("quantforge-backtest-bt-1", "bt-1-pod", MAIN_CONTAINER, Some(0))
        .await;
    cluster.set_pod_logs("bt-1-pod", BACKTEST_LOG).await;

    let record = backend.backtest_result("bt-1").await.unwrap();

    assert_eq!(record.task_id, "bt-1");
    assert_eq!(record.state, TaskState::Completed);
    assert_eq!(record.duration_secs, Some(100.0));
    assert_eq!(
        record.result.value().unwrap()["strategy"]["SampleStrategy"]["total_trades"],
        json!(42)
    );
    assert!(!record.logs.contains("===RESULT_START==="));
    assert!(!record.logs.contains("total_trades"));
    assert!(record.logs.contains("Using strategy SampleStrategy"));
}

#[tokio::test]
async fn test_crashed_hyperopt_yields_no_markers_record() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_hyperopt(&hyperopt_spec("ho-1")).await.unwrap();

    let now = Utc::now();
    cluster
        .set_job_status("quantforge-hyperopt-ho-1", failed_status(now, now, Some("OOMKilled")))
        .await;
    cluster
        .add_job_pod("quantforge-hyperopt-ho-1", "ho-1-pod", MAIN_CONTAINER, Some(137))
        .await;
    cluster
        .set_pod_logs("ho-1-pod", "Loading data\nKilled\n")
        .await;

    let record = backend.hyperopt_result("ho-1").await.unwrap();

    assert_eq!(record.state, TaskState::Failed);
    assert!(matches!(
        record.result,
        ResultPayload::Error {
            kind: ResultErrorKind::NoMarkers,
            ..
        }
    ));
    assert_eq!(record.logs, "Loading data\nKilled\n");
}

#[tokio::test]
async fn test_result_without_pod_still_builds_record() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_backtest(&backtest_spec("bt-2")).await.unwrap();

    let now = Utc::now();
    cluster
        .set_job_status("quantforge-backtest-bt-2", succeeded_status(now, now))
        .await;

    let record = backend.backtest_result("bt-2").await.unwrap();
    assert!(matches!(
        record.result,
        ResultPayload::Error {
            kind: ResultErrorKind::NoMarkers,
            ..
        }
    ));
    assert_eq!(record.logs, "");
}

#[tokio::test]
async fn test_result_of_running_task_is_not_finished() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_backtest(&backtest_spec("bt-3")).await.unwrap();

    let err = backend.backtest_result("bt-3").await.unwrap_err();
    assert!(matches!(err, Error::NotFinished { .. }));

    let err = backend.backtest_result("bt-missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_logs_stream_and_tail() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);
    backend.run_backtest(&backtest_spec("bt-4")).await.unwrap();
    cluster
        .add_job_pod("quantforge-backtest-bt-4", "bt-4-pod", MAIN_CONTAINER, None)
        .await;
    cluster.set_pod_logs("bt-4-pod", "one\ntwo\nthree\n").await;

    let lines: Vec<String> = backend
        .backtest_logs("bt-4", &LogOptions::default())
        .await
        .unwrap()
        .map(|line| line.unwrap())
        .collect()
        .await;
    assert_eq!(lines, vec!["one", "two", "three"]);

    let options = LogOptions {
        tail_lines: Some(1),
        ..Default::default()
    };
    let lines: Vec<String> = backend
        .backtest_logs("bt-4", &options)
        .await
        .unwrap()
        .map(|line| line.unwrap())
        .collect()
        .await;
    assert_eq!(lines, vec!["three"]);
}

#[tokio::test]
async fn test_logs_errors() {
    let cluster = mock_cluster();
    let backend = backend(&cluster);

    let err = match backend.hyperopt_logs("ho-missing", &LogOptions::default()).await {
        Err(e) => e,
        Ok(_) => panic!("expected an error"),
    };
    assert!(err.is_not_found());

    backend.run_hyperopt(&hyperopt_spec("ho-2")).await.unwrap();
    let err = match backend.hyperopt_logs("ho-2", &LogOptions::default()).await {
        Err(e) => e,
        Ok(_) => panic!("expected an error"),
    };
    assert!(matches!(err, Error::NoPod { .. }));
}
