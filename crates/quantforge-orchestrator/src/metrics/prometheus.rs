// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prometheus instant queries, reached directly or through the API server.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::MetricsError;

/// Network path used to reach Prometheus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrometheusRoute {
    /// Plain HTTP to the configured URL.
    Direct,
    /// The API server's service proxy.
    Proxied,
}

impl fmt::Display for PrometheusRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Proxied => f.write_str("proxied"),
        }
    }
}

/// A source of PromQL instant-query results.
#[async_trait]
pub trait PromQuery: Send + Sync {
    /// Which route this source uses.
    fn route(&self) -> PrometheusRoute;

    /// Evaluate `query` and return the first sample, `None` for an empty result.
    ///
    /// An error means the backend could not be asked at all.
    async fn instant(&self, query: &str) -> Result<Option<f64>, MetricsError>;
}

/// Extract the first sample from a `/api/v1/query` response body.
pub fn parse_instant_response(body: &Value) -> Result<Option<f64>, MetricsError> {
    if body.get("status").and_then(Value::as_str) != Some("success") {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("query did not succeed");
        return Err(MetricsError::Query(message.to_string()));
    }

    let result = body
        .pointer("/data/result")
        .and_then(Value::as_array)
        .ok_or_else(|| MetricsError::Malformed("missing data.result".to_string()))?;

    let Some(first) = result.first() else {
        return Ok(None);
    };

    let raw = first
        .pointer("/value/1")
        .and_then(Value::as_str)
        .ok_or_else(|| MetricsError::Malformed("missing sample value".to_string()))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| MetricsError::Malformed(format!("non-numeric sample {:?}", raw)))?;

    Ok(value.is_finite().then_some(value))
}

/// Escape a value for use inside a double-quoted PromQL label matcher.
pub fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// The PromQL queries describing one container.
#[derive(Debug, Clone)]
pub struct UsageQueries {
    /// CPU in percent of one core, rate over 1 minute.
    pub cpu: String,
    /// Working-set memory in bytes.
    pub memory: String,
    /// Pod network bytes received.
    pub network_rx: String,
    /// Pod network bytes sent.
    pub network_tx: String,
    /// Container bytes read from disk.
    pub disk_read: String,
    /// Container bytes written to disk.
    pub disk_write: String,
}

impl UsageQueries {
    /// Build the queries for one container.
    pub fn new(namespace: &str, pod: &str, container: &str) -> Self {
        let pod_selector = format!(
            "namespace=\"{}\",pod=\"{}\"",
            escape_label(namespace),
            escape_label(pod)
        );
        let container_selector =
            format!("{},container=\"{}\"", pod_selector, escape_label(container));

        Self {
            cpu: format!(
                "sum(rate(container_cpu_usage_seconds_total{{{}}}[1m])) * 100",
                container_selector
            ),
            memory: format!(
                "sum(container_memory_working_set_bytes{{{}}})",
                container_selector
            ),
            network_rx: format!(
                "sum(container_network_receive_bytes_total{{{}}})",
                pod_selector
            ),
            network_tx: format!(
                "sum(container_network_transmit_bytes_total{{{}}})",
                pod_selector
            ),
            disk_read: format!(
                "sum(container_fs_reads_bytes_total{{{}}})",
                container_selector
            ),
            disk_write: format!(
                "sum(container_fs_writes_bytes_total{{{}}})",
                container_selector
            ),
        }
    }
}

/// Prometheus reached over plain HTTP.
pub struct DirectPrometheus {
    client: reqwest::Client,
    base_url: String,
}

impl DirectPrometheus {
    /// Create a source for `base_url` (e.g. `http://prometheus:9090`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetricsError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PromQuery for DirectPrometheus {
    fn route(&self) -> PrometheusRoute {
        PrometheusRoute::Direct
    }

    async fn instant(&self, query: &str) -> Result<Option<f64>, MetricsError> {
        let body: Value = self
            .client
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", query)])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| MetricsError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| MetricsError::Malformed(e.to_string()))?;
        parse_instant_response(&body)
    }
}

/// Prometheus reached through `/api/v1/namespaces/<ns>/services/<svc>:<port>/proxy`.
pub struct ProxiedPrometheus {
    client: kube::Client,
    service_path: String,
    timeout: Duration,
}

impl ProxiedPrometheus {
    /// Create a source for the given in-cluster service.
    pub fn new(
        client: kube::Client,
        namespace: &str,
        service: &str,
        port: u16,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            service_path: format!(
                "/api/v1/namespaces/{}/services/{}:{}/proxy",
                namespace, service, port
            ),
            timeout,
        }
    }

    fn query_path(&self, query: &str) -> String {
        format!(
            "{}/api/v1/query?query={}",
            self.service_path,
            urlencoding::encode(query)
        )
    }
}

#[async_trait]
impl PromQuery for ProxiedPrometheus {
    fn route(&self) -> PrometheusRoute {
        PrometheusRoute::Proxied
    }

    async fn instant(&self, query: &str) -> Result<Option<f64>, MetricsError> {
        let request = http::Request::get(self.query_path(query))
            .body(Vec::new())
            .map_err(|e| MetricsError::Request(e.to_string()))?;

        let body: Value = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| MetricsError::Request("proxied query timed out".to_string()))?
            .map_err(|e| MetricsError::Request(e.to_string()))?;
        parse_instant_response(&body)
    }
}
