// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for quantforge-orchestrator.

use std::time::Duration;

/// Execution backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Jobs on a Kubernetes cluster.
    Kubernetes,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            _ => Err(ConfigError::UnsupportedBackend(value.to_string())),
        }
    }
}

/// Settings for the workload pods.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Image running backtests, hyperopt and downloads.
    pub image: String,
    /// Image running the staging init container.
    pub init_image: String,
    /// Seconds a finished job is kept before the cluster deletes it.
    pub ttl_seconds_after_finished: i32,
    /// Default CPU request.
    pub cpu_request: String,
    /// Default CPU limit.
    pub cpu_limit: String,
    /// Default memory request.
    pub memory_request: String,
    /// Default memory limit.
    pub memory_limit: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            image: "freqtradeorg/freqtrade:stable".to_string(),
            init_image: "busybox:1.36".to_string(),
            ttl_seconds_after_finished: 3600,
            cpu_request: "500m".to_string(),
            cpu_limit: "2".to_string(),
            memory_request: "512Mi".to_string(),
            memory_limit: "2Gi".to_string(),
        }
    }
}

/// Where the metrics tiers find their backends.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Directly reachable Prometheus base URL; the direct tier is skipped when unset.
    pub prometheus_url: Option<String>,
    /// Namespace of the Prometheus service for the API-server proxy tier.
    pub prometheus_service_namespace: String,
    /// Name of the Prometheus service.
    pub prometheus_service_name: String,
    /// Port of the Prometheus service.
    pub prometheus_service_port: u16,
    /// Timeout for a single metrics query.
    pub query_timeout: Duration,
    /// Whether the metrics.k8s.io snapshot tier is used.
    pub metrics_server_enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus_url: None,
            prometheus_service_namespace: "monitoring".to_string(),
            prometheus_service_name: "prometheus-server".to_string(),
            prometheus_service_port: 80,
            query_timeout: Duration::from_secs(5),
            metrics_server_enabled: true,
        }
    }
}

/// Settings for the background reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often to scan managed jobs.
    pub poll_interval: Duration,
    /// How long finished tasks are kept before their resources are deleted.
    pub retention: Duration,
    /// Running tasks older than this are stopped.
    pub max_runtime: Option<Duration>,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 3600),
            max_runtime: None,
        }
    }
}

/// Orchestrator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Execution backend.
    pub backend: BackendKind,
    /// Namespace jobs and config objects are created in.
    pub namespace: String,
    /// Product prefix of job names.
    pub product: String,
    /// Workload pod settings.
    pub workload: WorkloadConfig,
    /// Metrics tier settings.
    pub metrics: MetricsConfig,
    /// Reaper settings.
    pub reaper: ReaperConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Kubernetes,
            namespace: "quantforge".to_string(),
            product: "quantforge".to_string(),
            workload: WorkloadConfig::default(),
            metrics: MetricsConfig::default(),
            reaper: ReaperConfig::default(),
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(var, value)),
        Err(_) => Ok(default),
    }
}

fn env_bool(var: &str, default: bool) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let backend = BackendKind::parse(&env_or("QUANTFORGE_BACKEND", "kubernetes"))?;

        let workload = WorkloadConfig {
            image: env_or("QUANTFORGE_WORKLOAD_IMAGE", &defaults.workload.image),
            init_image: env_or("QUANTFORGE_INIT_IMAGE", &defaults.workload.init_image),
            ttl_seconds_after_finished: env_parse(
                "QUANTFORGE_JOB_TTL_SECS",
                defaults.workload.ttl_seconds_after_finished,
            )?,
            cpu_request: env_or(
                "QUANTFORGE_DEFAULT_CPU_REQUEST",
                &defaults.workload.cpu_request,
            ),
            cpu_limit: env_or("QUANTFORGE_DEFAULT_CPU_LIMIT", &defaults.workload.cpu_limit),
            memory_request: env_or(
                "QUANTFORGE_DEFAULT_MEMORY_REQUEST",
                &defaults.workload.memory_request,
            ),
            memory_limit: env_or(
                "QUANTFORGE_DEFAULT_MEMORY_LIMIT",
                &defaults.workload.memory_limit,
            ),
        };

        let metrics = MetricsConfig {
            prometheus_url: std::env::var("PROMETHEUS_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            prometheus_service_namespace: env_or(
                "PROMETHEUS_SERVICE_NAMESPACE",
                &defaults.metrics.prometheus_service_namespace,
            ),
            prometheus_service_name: env_or(
                "PROMETHEUS_SERVICE_NAME",
                &defaults.metrics.prometheus_service_name,
            ),
            prometheus_service_port: env_parse(
                "PROMETHEUS_SERVICE_PORT",
                defaults.metrics.prometheus_service_port,
            )?,
            query_timeout: Duration::from_secs(env_parse("PROMETHEUS_TIMEOUT_SECS", 5u64)?),
            metrics_server_enabled: env_bool("METRICS_SERVER_ENABLED", true),
        };

        let max_runtime = match std::env::var("REAPER_MAX_RUNTIME_SECS") {
            Ok(value) => Some(Duration::from_secs(value.trim().parse().map_err(|_| {
                ConfigError::InvalidValue("REAPER_MAX_RUNTIME_SECS", value.clone())
            })?)),
            Err(_) => None,
        };

        let reaper = ReaperConfig {
            poll_interval: Duration::from_secs(env_parse("REAPER_POLL_INTERVAL_SECS", 60u64)?),
            retention: Duration::from_secs(env_parse("REAPER_RETENTION_SECS", 24 * 3600u64)?),
            max_runtime,
        };

        Ok(Self {
            backend,
            namespace: env_or("QUANTFORGE_NAMESPACE", &defaults.namespace),
            product: env_or("QUANTFORGE_PRODUCT", &defaults.product),
            workload,
            metrics,
            reaper,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The backend name is not supported.
    #[error("Unsupported execution backend: {0}")]
    UnsupportedBackend(String),
    /// A variable could not be parsed.
    #[error("Invalid value for {0}: {1:?}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!(
            BackendKind::parse("Kubernetes").unwrap(),
            BackendKind::Kubernetes
        );
        assert_eq!(BackendKind::parse("k8s").unwrap(), BackendKind::Kubernetes);
        assert!(matches!(
            BackendKind::parse("docker"),
            Err(ConfigError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.namespace, "quantforge");
        assert_eq!(config.workload.ttl_seconds_after_finished, 3600);
        assert!(config.metrics.prometheus_url.is_none());
        assert!(config.metrics.metrics_server_enabled);
        assert!(config.reaper.max_runtime.is_none());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue("QUANTFORGE_JOB_TTL_SECS", "soon".to_string());
        let msg = err.to_string();
        assert!(msg.contains("QUANTFORGE_JOB_TTL_SECS"));
        assert!(msg.contains("soon"));
    }
}
