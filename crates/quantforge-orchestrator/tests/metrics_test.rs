// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for tiered metrics collection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quantforge_orchestrator::metrics::{
    DirectPrometheus, MIN_CPU_PERCENT, MIN_MEMORY_BYTES, MetricsCollector, MetricsError,
    PromQuery, PrometheusRoute, UsageSnapshot, UsageSnapshotSource,
};

/// Prometheus stand-in answering by metric name.
struct FakePrometheus {
    route: PrometheusRoute,
    up: AtomicBool,
    cpu: Option<f64>,
    memory: Option<f64>,
    network: Option<f64>,
    calls: AtomicUsize,
}

impl FakePrometheus {
    fn new(route: PrometheusRoute, up: bool) -> Self {
        Self {
            route,
            up: AtomicBool::new(up),
            cpu: Some(20.0),
            memory: Some(100.0 * 1024.0 * 1024.0),
            network: Some(4096.0),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

#[async_trait]
impl PromQuery for FakePrometheus {
    fn route(&self) -> PrometheusRoute {
        self.route
    }

    async fn instant(&self, query: &str) -> Result<Option<f64>, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.up.load(Ordering::SeqCst) {
            return Err(MetricsError::Request("connection refused".to_string()));
        }
        if query.contains("container_cpu_usage_seconds_total") {
            Ok(self.cpu)
        } else if query.contains("container_memory_working_set_bytes") {
            Ok(self.memory)
        } else if query.contains("container_network") {
            Ok(self.network)
        } else {
            Ok(None)
        }
    }
}

struct FakeSnapshot {
    usage: Option<UsageSnapshot>,
    calls: AtomicUsize,
}

#[async_trait]
impl UsageSnapshotSource for FakeSnapshot {
    async fn snapshot(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
    ) -> Result<Option<UsageSnapshot>, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.usage)
    }
}

#[tokio::test]
async fn test_direct_tier_values_pass_through() {
    let direct = Arc::new(FakePrometheus::new(PrometheusRoute::Direct, true));
    let collector = MetricsCollector::new(Some(direct.clone()), None, None);

    let usage = collector.collect("ns", "pod", "workload").await;

    assert_eq!(usage.cpu_percent, 20.0);
    assert_eq!(usage.memory_bytes, 100 * 1024 * 1024);
    assert_eq!(usage.network_rx_bytes, 4096);
    assert_eq!(usage.network_tx_bytes, 4096);
    assert_eq!(usage.disk_read_bytes, 0);
    assert_eq!(collector.preferred_route(), Some(PrometheusRoute::Direct));
}

#[tokio::test]
async fn test_low_values_are_floored() {
    let mut direct = FakePrometheus::new(PrometheusRoute::Direct, true);
    direct.cpu = Some(2.0);
    direct.memory = Some(10.0 * 1024.0 * 1024.0);
    let collector = MetricsCollector::new(Some(Arc::new(direct)), None, None);

    let usage = collector.collect("ns", "pod", "workload").await;

    assert_eq!(usage.cpu_percent, MIN_CPU_PERCENT);
    assert_eq!(usage.memory_bytes, MIN_MEMORY_BYTES);
    // Network has no floor.
    assert_eq!(usage.network_rx_bytes, 4096);
}

#[tokio::test]
async fn test_proxied_tier_becomes_sticky() {
    let direct = Arc::new(FakePrometheus::new(PrometheusRoute::Direct, false));
    let proxied = Arc::new(FakePrometheus::new(PrometheusRoute::Proxied, true));
    let collector = MetricsCollector::new(Some(direct.clone()), Some(proxied.clone()), None);

    let usage = collector.collect("ns", "pod-a", "workload").await;
    assert_eq!(usage.cpu_percent, 20.0);
    assert_eq!(collector.preferred_route(), Some(PrometheusRoute::Proxied));
    assert_eq!(direct.calls(), 1);

    collector.collect("ns", "pod-b", "workload").await;
    // The failing direct route is not asked again.
    assert_eq!(direct.calls(), 1);
    assert_eq!(proxied.calls(), 12);
}

#[tokio::test]
async fn test_sticky_route_switches_back_when_it_fails() {
    let direct = Arc::new(FakePrometheus::new(PrometheusRoute::Direct, false));
    let proxied = Arc::new(FakePrometheus::new(PrometheusRoute::Proxied, true));
    let collector = MetricsCollector::new(Some(direct.clone()), Some(proxied.clone()), None);

    collector.collect("ns", "pod", "workload").await;
    assert_eq!(collector.preferred_route(), Some(PrometheusRoute::Proxied));

    proxied.set_up(false);
    direct.set_up(true);
    let usage = collector.collect("ns", "pod", "workload").await;

    assert_eq!(usage.cpu_percent, 20.0);
    assert_eq!(collector.preferred_route(), Some(PrometheusRoute::Direct));
}

#[tokio::test]
async fn test_collectors_do_not_share_routes() {
    let first = MetricsCollector::new(
        Some(Arc::new(FakePrometheus::new(PrometheusRoute::Direct, false))),
        Some(Arc::new(FakePrometheus::new(PrometheusRoute::Proxied, true))),
        None,
    );
    let second = MetricsCollector::new(
        Some(Arc::new(FakePrometheus::new(PrometheusRoute::Direct, true))),
        Some(Arc::new(FakePrometheus::new(PrometheusRoute::Proxied, true))),
        None,
    );

    first.collect("ns", "pod", "workload").await;
    second.collect("ns", "pod", "workload").await;

    assert_eq!(first.preferred_route(), Some(PrometheusRoute::Proxied));
    assert_eq!(second.preferred_route(), Some(PrometheusRoute::Direct));
}

#[tokio::test]
async fn test_snapshot_supplements_missing_metrics() {
    let mut direct = FakePrometheus::new(PrometheusRoute::Direct, true);
    direct.cpu = None;
    direct.memory = Some(300.0 * 1024.0 * 1024.0);
    let snapshot = Arc::new(FakeSnapshot {
        usage: Some(UsageSnapshot {
            cpu_percent: Some(37.5),
            memory_bytes: Some(1),
        }),
        calls: AtomicUsize::new(0),
    });
    let collector = MetricsCollector::new(Some(Arc::new(direct)), None, Some(snapshot.clone()));

    let usage = collector.collect("ns", "pod", "workload").await;

    assert_eq!(usage.cpu_percent, 37.5);
    // Prometheus memory was present and is kept.
    assert_eq!(usage.memory_bytes, 300 * 1024 * 1024);
    assert_eq!(usage.network_rx_bytes, 4096);
    assert_eq!(snapshot.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_snapshot_only_for_short_lived_pod() {
    let snapshot = Arc::new(FakeSnapshot {
        usage: Some(UsageSnapshot {
            cpu_percent: Some(80.0),
            memory_bytes: Some(256 * 1024 * 1024),
        }),
        calls: AtomicUsize::new(0),
    });
    let collector = MetricsCollector::new(
        Some(Arc::new(FakePrometheus::new(PrometheusRoute::Direct, false))),
        Some(Arc::new(FakePrometheus::new(PrometheusRoute::Proxied, false))),
        Some(snapshot),
    );

    let usage = collector.collect("ns", "pod", "workload").await;

    assert_eq!(usage.cpu_percent, 80.0);
    assert_eq!(usage.memory_bytes, 256 * 1024 * 1024);
    assert_eq!(usage.network_rx_bytes, 0);
    assert_eq!(collector.preferred_route(), None);
}

#[tokio::test]
async fn test_snapshot_not_consulted_when_prometheus_complete() {
    let snapshot = Arc::new(FakeSnapshot {
        usage: None,
        calls: AtomicUsize::new(0),
    });
    let collector = MetricsCollector::new(
        Some(Arc::new(FakePrometheus::new(PrometheusRoute::Direct, true))),
        None,
        Some(snapshot.clone()),
    );

    collector.collect("ns", "pod", "workload").await;
    assert_eq!(snapshot.calls.load(Ordering::SeqCst), 0);
}

fn vector(value: &str) -> serde_json::Value {
    json!({
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [{"metric": {}, "value": [1700000000.0, value]}]
        }
    })
}

#[tokio::test]
async fn test_direct_prometheus_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .and(query_param(
            "query",
            "sum(container_memory_working_set_bytes{namespace=\"ns\",pod=\"pod\",container=\"workload\"})",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(vector("1048576")))
        .mount(&server)
        .await;

    let prometheus = DirectPrometheus::new(server.uri(), Duration::from_secs(2)).unwrap();
    let value = prometheus
        .instant(
            "sum(container_memory_working_set_bytes{namespace=\"ns\",pod=\"pod\",container=\"workload\"})",
        )
        .await
        .unwrap();

    assert_eq!(value, Some(1048576.0));
}

#[tokio::test]
async fn test_direct_prometheus_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let prometheus = DirectPrometheus::new(server.uri(), Duration::from_secs(2)).unwrap();
    let err = prometheus.instant("up").await.unwrap_err();
    assert!(matches!(err, MetricsError::Request(_)));
}

#[tokio::test]
async fn test_collector_with_http_prometheus() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vector("64")))
        .mount(&server)
        .await;

    let direct = DirectPrometheus::new(format!("{}/", server.uri()), Duration::from_secs(2)).unwrap();
    let collector = MetricsCollector::new(Some(Arc::new(direct)), None, None);

    let usage = collector.collect("ns", "pod", "workload").await;

    assert_eq!(usage.cpu_percent, 64.0);
    // 64 bytes is under the memory floor.
    assert_eq!(usage.memory_bytes, MIN_MEMORY_BYTES);
    assert_eq!(usage.disk_write_bytes, 64);
}
