// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test fixtures.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde_json::json;

use quantforge_orchestrator::cluster::MockCluster;
use quantforge_orchestrator::config::Config;
use quantforge_orchestrator::metrics::MetricsCollector;
use quantforge_orchestrator::naming::ResourceNamer;
use quantforge_orchestrator::task::{
    BacktestSpec, DataDownloadSpec, ExchangeDownload, HyperOptSpec, ResourceHints, TradingMode,
};
use quantforge_orchestrator::KubernetesBackend;

pub const NAMESPACE: &str = "quantforge-test";

pub fn namer() -> ResourceNamer {
    ResourceNamer::new("quantforge")
}

pub fn mock_cluster() -> MockCluster {
    MockCluster::with_namespace(NAMESPACE)
}

pub fn backend(cluster: &MockCluster) -> KubernetesBackend {
    let config = Config {
        namespace: NAMESPACE.to_string(),
        ..Config::default()
    };
    KubernetesBackend::new(
        Arc::new(cluster.clone()),
        &config,
        Arc::new(MetricsCollector::disabled()),
    )
}

pub fn backtest_spec(id: &str) -> BacktestSpec {
    BacktestSpec {
        id: id.to_string(),
        strategy_name: "SampleStrategy".to_string(),
        strategy_code: "class SampleStrategy:\n    pass\n".to_string(),
        config: json!({"stake_currency": "USDT", "exchange": {"name": "binance"}}),
        timerange: Some("20240101-20240201".to_string()),
        data_url: None,
        resources: ResourceHints::default(),
    }
}

pub fn hyperopt_spec(id: &str) -> HyperOptSpec {
    HyperOptSpec {
        id: id.to_string(),
        strategy_name: "SampleStrategy".to_string(),
        strategy_code: "class SampleStrategy:\n    pass\n".to_string(),
        config: json!({"stake_currency": "USDT"}),
        epochs: 50,
        loss_function: "SharpeHyperOptLoss".to_string(),
        spaces: vec!["buy".to_string(), "sell".to_string()],
        timerange: None,
        data_url: Some("https://data.example.com/archive.tar.gz".to_string()),
        resources: ResourceHints::default(),
    }
}

pub fn download_spec(id: &str) -> DataDownloadSpec {
    DataDownloadSpec {
        id: id.to_string(),
        exchanges: vec![
            ExchangeDownload {
                name: "binance".to_string(),
                pair_pattern: "BTC/USDT".to_string(),
                timeframes: vec!["1h".to_string(), "4h".to_string()],
                days: 30,
                trading_mode: TradingMode::Spot,
            },
            ExchangeDownload {
                name: "kraken".to_string(),
                pair_pattern: "ETH/USD".to_string(),
                timeframes: vec!["1d".to_string()],
                days: 365,
                trading_mode: TradingMode::Spot,
            },
        ],
        existing_data_url: None,
        upload_url: Some("https://storage.example.com/upload?sig=abc".to_string()),
        resources: ResourceHints::default(),
    }
}

pub fn running_status(started: DateTime<Utc>) -> JobStatus {
    JobStatus {
        active: Some(1),
        start_time: Some(Time(started)),
        ..Default::default()
    }
}

pub fn succeeded_status(started: DateTime<Utc>, completed: DateTime<Utc>) -> JobStatus {
    JobStatus {
        succeeded: Some(1),
        start_time: Some(Time(started)),
        completion_time: Some(Time(completed)),
        conditions: Some(vec![JobCondition {
            type_: "Complete".to_string(),
            status: "True".to_string(),
            last_transition_time: Some(Time(completed)),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub fn failed_status(
    started: DateTime<Utc>,
    failed_at: DateTime<Utc>,
    message: Option<&str>,
) -> JobStatus {
    JobStatus {
        failed: Some(1),
        start_time: Some(Time(started)),
        conditions: Some(vec![JobCondition {
            type_: "Failed".to_string(),
            status: "True".to_string(),
            reason: Some("BackoffLimitExceeded".to_string()),
            message: message.map(str::to_string),
            last_transition_time: Some(Time(failed_at)),
            ..Default::default()
        }]),
        ..Default::default()
    }
}
