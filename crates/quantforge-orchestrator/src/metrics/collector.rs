// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tiered resource-usage collection.
//!
//! Prometheus is tried first, over the route that answered last time and then
//! the other one. The metrics API fills any CPU or memory value Prometheus
//! left at zero. Reported values are raised to fixed floors.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::prometheus::{DirectPrometheus, PromQuery, PrometheusRoute, ProxiedPrometheus, UsageQueries};
use super::snapshot::{MetricsServerSnapshot, UsageSnapshotSource};
use super::MetricsError;
use crate::config::MetricsConfig;
use crate::task::ResourceUsage;

/// Lowest CPU value reported, in percent of one core.
pub const MIN_CPU_PERCENT: f64 = 5.0;

/// Lowest memory value reported, in bytes.
pub const MIN_MEMORY_BYTES: u64 = 50 * 1024 * 1024;

/// Raise CPU and memory to their floors. Returns true if either was raised.
pub fn apply_minimums(usage: &mut ResourceUsage) -> bool {
    let mut raised = false;
    if usage.cpu_percent < MIN_CPU_PERCENT {
        usage.cpu_percent = MIN_CPU_PERCENT;
        raised = true;
    }
    if usage.memory_bytes < MIN_MEMORY_BYTES {
        usage.memory_bytes = MIN_MEMORY_BYTES;
        raised = true;
    }
    raised
}

/// Collects usage for task containers.
pub struct MetricsCollector {
    direct: Option<Arc<dyn PromQuery>>,
    proxied: Option<Arc<dyn PromQuery>>,
    snapshot: Option<Arc<dyn UsageSnapshotSource>>,
    preferred: RwLock<Option<PrometheusRoute>>,
}

impl MetricsCollector {
    /// Assemble a collector from explicit sources; any of them may be absent.
    pub fn new(
        direct: Option<Arc<dyn PromQuery>>,
        proxied: Option<Arc<dyn PromQuery>>,
        snapshot: Option<Arc<dyn UsageSnapshotSource>>,
    ) -> Self {
        Self {
            direct,
            proxied,
            snapshot,
            preferred: RwLock::new(None),
        }
    }

    /// A collector with no sources; every report is the floor values.
    pub fn disabled() -> Self {
        Self::new(None, None, None)
    }

    /// Build the sources described by `config` on top of `client`.
    pub fn from_config(config: &MetricsConfig, client: kube::Client) -> Result<Self, MetricsError> {
        let direct = match &config.prometheus_url {
            Some(url) => Some(
                Arc::new(DirectPrometheus::new(url.clone(), config.query_timeout)?)
                    as Arc<dyn PromQuery>,
            ),
            None => None,
        };
        let proxied: Arc<dyn PromQuery> = Arc::new(ProxiedPrometheus::new(
            client.clone(),
            &config.prometheus_service_namespace,
            &config.prometheus_service_name,
            config.prometheus_service_port,
            config.query_timeout,
        ));
        let snapshot = config.metrics_server_enabled.then(|| {
            Arc::new(MetricsServerSnapshot::new(client, config.query_timeout))
                as Arc<dyn UsageSnapshotSource>
        });

        Ok(Self::new(direct, Some(proxied), snapshot))
    }

    /// The Prometheus route that answered most recently.
    pub fn preferred_route(&self) -> Option<PrometheusRoute> {
        self.preferred.read().ok().and_then(|route| *route)
    }

    /// Usage of `container` in `pod`. Never fails; unavailable values become floors.
    pub async fn collect(&self, namespace: &str, pod: &str, container: &str) -> ResourceUsage {
        let mut usage = self
            .query_prometheus(namespace, pod, container)
            .await
            .unwrap_or_default();

        if (usage.cpu_percent <= 0.0 || usage.memory_bytes == 0)
            && let Some(snapshot) = &self.snapshot
        {
            match snapshot.snapshot(namespace, pod, container).await {
                Ok(Some(point)) => {
                    if usage.cpu_percent <= 0.0
                        && let Some(cpu) = point.cpu_percent
                    {
                        usage.cpu_percent = cpu;
                    }
                    if usage.memory_bytes == 0
                        && let Some(memory) = point.memory_bytes
                    {
                        usage.memory_bytes = memory;
                    }
                }
                Ok(None) => debug!(pod = %pod, "Pod not reported by metrics API"),
                Err(e) => debug!(pod = %pod, error = %e, "Metrics API unavailable"),
            }
        }

        let floored = apply_minimums(&mut usage);
        debug!(
            pod = %pod,
            cpu_percent = usage.cpu_percent,
            memory_bytes = usage.memory_bytes,
            floored,
            "Collected usage"
        );
        usage
    }

    async fn query_prometheus(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Option<ResourceUsage> {
        let queries = UsageQueries::new(namespace, pod, container);

        for source in self.route_order() {
            let route = source.route();
            match fetch_usage(source.as_ref(), &queries).await {
                Ok(usage) => {
                    self.remember(route);
                    return Some(usage);
                }
                Err(e) => debug!(route = %route, error = %e, "Prometheus route unavailable"),
            }
        }
        None
    }

    fn route_order(&self) -> Vec<Arc<dyn PromQuery>> {
        let (first, second) = match self.preferred_route() {
            Some(PrometheusRoute::Proxied) => (&self.proxied, &self.direct),
            _ => (&self.direct, &self.proxied),
        };
        first.iter().chain(second.iter()).cloned().collect()
    }

    fn remember(&self, route: PrometheusRoute) {
        if self.preferred_route() == Some(route) {
            return;
        }
        if let Ok(mut preferred) = self.preferred.write() {
            *preferred = Some(route);
            info!(route = %route, "Prometheus route selected");
        }
    }
}

/// Run every query against one source.
///
/// The CPU query decides whether the source is reachable; the remaining
/// queries degrade to zero on failure.
async fn fetch_usage(
    source: &dyn PromQuery,
    queries: &UsageQueries,
) -> Result<ResourceUsage, MetricsError> {
    let cpu = source.instant(&queries.cpu).await?;
    let (memory, rx, tx, read, write) = tokio::join!(
        source.instant(&queries.memory),
        source.instant(&queries.network_rx),
        source.instant(&queries.network_tx),
        source.instant(&queries.disk_read),
        source.instant(&queries.disk_write),
    );

    Ok(ResourceUsage {
        cpu_percent: cpu.filter(|v| *v > 0.0).unwrap_or(0.0),
        memory_bytes: as_bytes(memory),
        network_rx_bytes: as_bytes(rx),
        network_tx_bytes: as_bytes(tx),
        disk_read_bytes: as_bytes(read),
        disk_write_bytes: as_bytes(write),
    })
}

fn as_bytes(sample: Result<Option<f64>, MetricsError>) -> u64 {
    match sample {
        Ok(Some(v)) if v > 0.0 => v.round() as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_minimums_raises_low_values() {
        let mut usage = ResourceUsage {
            cpu_percent: 2.0,
            memory_bytes: 10 * 1024 * 1024,
            ..Default::default()
        };
        assert!(apply_minimums(&mut usage));
        assert_eq!(usage.cpu_percent, MIN_CPU_PERCENT);
        assert_eq!(usage.memory_bytes, MIN_MEMORY_BYTES);
    }

    #[test]
    fn test_apply_minimums_keeps_high_values() {
        let mut usage = ResourceUsage {
            cpu_percent: 20.0,
            memory_bytes: 100 * 1024 * 1024,
            network_rx_bytes: 7,
            ..Default::default()
        };
        let before = usage;
        assert!(!apply_minimums(&mut usage));
        assert_eq!(usage, before);
    }

    #[test]
    fn test_apply_minimums_partial() {
        let mut usage = ResourceUsage {
            cpu_percent: 42.0,
            memory_bytes: 0,
            ..Default::default()
        };
        assert!(apply_minimums(&mut usage));
        assert_eq!(usage.cpu_percent, 42.0);
        assert_eq!(usage.memory_bytes, MIN_MEMORY_BYTES);
    }

    #[tokio::test]
    async fn test_disabled_collector_reports_floors() {
        let usage = MetricsCollector::disabled()
            .collect("ns", "pod", "workload")
            .await;
        assert_eq!(usage.cpu_percent, MIN_CPU_PERCENT);
        assert_eq!(usage.memory_bytes, MIN_MEMORY_BYTES);
        assert_eq!(usage.network_rx_bytes, 0);
    }
}
