// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Point-in-time usage from the cluster's metrics API (`metrics.k8s.io`).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::MetricsError;

/// CPU and memory of one container at a single moment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageSnapshot {
    /// CPU in percent of one core.
    pub cpu_percent: Option<f64>,
    /// Memory in bytes.
    pub memory_bytes: Option<u64>,
}

/// A source of instantaneous container usage.
#[async_trait]
pub trait UsageSnapshotSource: Send + Sync {
    /// Usage of `container` in `pod`, `None` when the pod is not reported.
    async fn snapshot(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<Option<UsageSnapshot>, MetricsError>;
}

/// Reads `PodMetrics` objects through the API server.
pub struct MetricsServerSnapshot {
    client: kube::Client,
    timeout: Duration,
}

impl MetricsServerSnapshot {
    /// Create a snapshot source.
    pub fn new(client: kube::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl UsageSnapshotSource for MetricsServerSnapshot {
    async fn snapshot(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<Option<UsageSnapshot>, MetricsError> {
        let path = format!(
            "/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods/{}",
            namespace, pod
        );
        let request = http::Request::get(path)
            .body(Vec::new())
            .map_err(|e| MetricsError::Request(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.request::<Value>(request))
            .await
            .map_err(|_| MetricsError::Request("metrics API timed out".to_string()))?;

        match response {
            Ok(body) => Ok(parse_pod_metrics(&body, container)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(MetricsError::Request(e.to_string())),
        }
    }
}

/// Pick the usage of `container` out of a `PodMetrics` body.
///
/// Falls back to the sum over all containers when the named one is absent.
pub fn parse_pod_metrics(body: &Value, container: &str) -> Option<UsageSnapshot> {
    let containers = body.get("containers")?.as_array()?;
    if containers.is_empty() {
        return None;
    }

    let usage_of = |entry: &Value| -> UsageSnapshot {
        let usage = entry.get("usage");
        UsageSnapshot {
            cpu_percent: usage
                .and_then(|u| u.get("cpu"))
                .and_then(Value::as_str)
                .and_then(parse_cpu_cores)
                .map(|cores| cores * 100.0),
            memory_bytes: usage
                .and_then(|u| u.get("memory"))
                .and_then(Value::as_str)
                .and_then(parse_memory_bytes),
        }
    };

    if let Some(entry) = containers
        .iter()
        .find(|c| c.get("name").and_then(Value::as_str) == Some(container))
    {
        return Some(usage_of(entry));
    }

    let mut total = UsageSnapshot::default();
    for entry in containers {
        let usage = usage_of(entry);
        if let Some(cpu) = usage.cpu_percent {
            total.cpu_percent = Some(total.cpu_percent.unwrap_or(0.0) + cpu);
        }
        if let Some(memory) = usage.memory_bytes {
            total.memory_bytes = Some(total.memory_bytes.unwrap_or(0) + memory);
        }
    }
    Some(total)
}

/// Parse a CPU quantity (`"250m"`, `"1"`, `"12345n"`) into cores.
pub fn parse_cpu_cores(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let (number, divisor) = match quantity.char_indices().last()? {
        (i, 'n') => (&quantity[..i], 1e9),
        (i, 'u') => (&quantity[..i], 1e6),
        (i, 'm') => (&quantity[..i], 1e3),
        _ => (quantity, 1.0),
    };
    let value: f64 = number.parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value / divisor)
}

/// Parse a memory quantity (`"128Mi"`, `"1G"`, `"4096"`) into bytes.
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    const SUFFIXES: [(&str, f64); 10] = [
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("m", 1e-3),
    ];

    let quantity = quantity.trim();
    let (number, scale) = SUFFIXES
        .iter()
        .find_map(|(suffix, scale)| quantity.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((quantity, 1.0));
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * scale).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_cpu_cores() {
        assert_eq!(parse_cpu_cores("250m"), Some(0.25));
        assert_eq!(parse_cpu_cores("2"), Some(2.0));
        assert!((parse_cpu_cores("50000000n").unwrap() - 0.05).abs() < 1e-12);
        assert!((parse_cpu_cores("1500u").unwrap() - 0.0015).abs() < 1e-12);
        assert_eq!(parse_cpu_cores("abc"), None);
        assert_eq!(parse_cpu_cores(""), None);
    }

    #[test]
    fn test_parse_memory_bytes() {
        assert_eq!(parse_memory_bytes("128Mi"), Some(128 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("2Ki"), Some(2048));
        assert_eq!(parse_memory_bytes("1G"), Some(1_000_000_000));
        assert_eq!(parse_memory_bytes("4096"), Some(4096));
        assert_eq!(parse_memory_bytes("lots"), None);
    }

    #[test]
    fn test_parse_pod_metrics_named_container() {
        let body = json!({
            "kind": "PodMetrics",
            "containers": [
                {"name": "stage-workspace", "usage": {"cpu": "1m", "memory": "1Mi"}},
                {"name": "workload", "usage": {"cpu": "500m", "memory": "256Mi"}}
            ]
        });
        let snapshot = parse_pod_metrics(&body, "workload").unwrap();
        assert_eq!(snapshot.cpu_percent, Some(50.0));
        assert_eq!(snapshot.memory_bytes, Some(256 * 1024 * 1024));
    }

    #[test]
    fn test_parse_pod_metrics_sums_when_container_missing() {
        let body = json!({
            "containers": [
                {"name": "a", "usage": {"cpu": "100m", "memory": "1Mi"}},
                {"name": "b", "usage": {"cpu": "200m", "memory": "1Mi"}}
            ]
        });
        let snapshot = parse_pod_metrics(&body, "workload").unwrap();
        assert!((snapshot.cpu_percent.unwrap() - 30.0).abs() < 1e-9);
        assert_eq!(snapshot.memory_bytes, Some(2 * 1024 * 1024));
    }

    #[test]
    fn test_parse_pod_metrics_without_containers() {
        assert_eq!(parse_pod_metrics(&json!({"containers": []}), "workload"), None);
        assert_eq!(parse_pod_metrics(&json!({}), "workload"), None);
    }
}
