// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock cluster for testing.
//!
//! An in-memory [`ClusterApi`] that stores config maps, jobs and pods without
//! talking to an API server. Tests drive job progress explicitly with
//! [`MockCluster::set_job_status`] and [`MockCluster::add_job_pod`], and can
//! inject failures into individual operations.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{
    ConfigMap, ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::traits::{ClusterApi, ClusterError, LogOptions, LogStream, Propagation, Result};

/// Recorded delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockDeletion {
    /// A job was deleted with the given propagation.
    Job(String, Propagation),
    /// A config map was deleted.
    ConfigMap(String),
}

#[derive(Debug, Default)]
struct MockState {
    config_maps: BTreeMap<String, ConfigMap>,
    jobs: BTreeMap<String, Job>,
    pods: BTreeMap<String, Pod>,
    logs: HashMap<String, String>,
    fail_create_config_maps: HashSet<String>,
    fail_delete_config_maps: HashSet<String>,
    fail_create_job: bool,
    fail_delete_job: bool,
    unreachable: bool,
    deletions: Vec<MockDeletion>,
}

/// In-memory cluster for tests.
#[derive(Clone)]
pub struct MockCluster {
    namespace: String,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an equality selector (`a=b,c=d`) into pairs.
fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn labels_match(meta: &ObjectMeta, selector: &[(String, String)]) -> bool {
    let labels = meta.labels.as_ref();
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|l| l.get(key))
            .map(|v| v == value)
            .unwrap_or(false)
    })
}

fn tail(text: &str, tail_lines: Option<i64>) -> Vec<String> {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    match tail_lines {
        Some(n) if n >= 0 && (n as usize) < lines.len() => lines[lines.len() - n as usize..].to_vec(),
        _ => lines,
    }
}

impl MockCluster {
    /// Create an empty mock cluster in the `default` namespace.
    pub fn new() -> Self {
        Self::with_namespace("default")
    }

    /// Create an empty mock cluster in the given namespace.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Replace the status of a stored job.
    pub async fn set_job_status(&self, job_name: &str, status: JobStatus) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(job_name) {
            job.status = Some(status);
        }
    }

    /// Add a pod owned by a stored job, carrying the job's pod template labels.
    ///
    /// When `exit_code` is set the container named `container` is reported as
    /// terminated with that code.
    pub async fn add_job_pod(
        &self,
        job_name: &str,
        pod_name: &str,
        container: &str,
        exit_code: Option<i32>,
    ) {
        let mut state = self.state.lock().await;
        let mut labels = state
            .jobs
            .get(job_name)
            .and_then(|job| job.spec.as_ref())
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|meta| meta.labels.clone())
            .unwrap_or_default();
        labels.insert("job-name".to_string(), job_name.to_string());

        let container_status = exit_code.map(|code| ContainerStatus {
            name: container.to_string(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: code,
                    finished_at: Some(Time(Utc::now())),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(pod_name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                creation_timestamp: Some(Time(Utc::now())),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some(
                    match exit_code {
                        Some(0) => "Succeeded",
                        Some(_) => "Failed",
                        None => "Running",
                    }
                    .to_string(),
                ),
                container_statuses: container_status.map(|s| vec![s]),
                ..Default::default()
            }),
        };
        state.pods.insert(pod_name.to_string(), pod);
    }

    /// Set the log text returned for a pod.
    pub async fn set_pod_logs(&self, pod_name: &str, logs: &str) {
        let mut state = self.state.lock().await;
        state.logs.insert(pod_name.to_string(), logs.to_string());
    }

    /// Remove a pod as the garbage collector would.
    pub async fn remove_pod(&self, pod_name: &str) {
        self.state.lock().await.pods.remove(pod_name);
    }

    /// Remove a finished job and its pods as the TTL controller would.
    ///
    /// Unlike a delete call this is not recorded and leaves config maps alone.
    pub async fn expire_job(&self, job_name: &str) {
        let mut state = self.state.lock().await;
        state.jobs.remove(job_name);
        let owned = [("job-name".to_string(), job_name.to_string())];
        state
            .pods
            .retain(|_, pod| !labels_match(&pod.metadata, &owned));
    }

    /// Make creation of the named config map fail.
    pub async fn fail_config_map_create(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.fail_create_config_maps.insert(name.to_string());
    }

    /// Make deletion of the named config map fail.
    pub async fn fail_config_map_delete(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.fail_delete_config_maps.insert(name.to_string());
    }

    /// Make every job creation fail.
    pub async fn fail_job_create(&self) {
        self.state.lock().await.fail_create_job = true;
    }

    /// Make every job deletion fail.
    pub async fn fail_job_delete(&self) {
        self.state.lock().await.fail_delete_job = true;
    }

    /// Simulate an unreachable API server for every operation.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Stored config map by name.
    pub async fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.state.lock().await.config_maps.get(name).cloned()
    }

    /// Stored job by name.
    pub async fn job(&self, name: &str) -> Option<Job> {
        self.state.lock().await.jobs.get(name).cloned()
    }

    /// Names of all stored config maps.
    pub async fn config_map_names(&self) -> Vec<String> {
        self.state.lock().await.config_maps.keys().cloned().collect()
    }

    /// Names of all stored jobs.
    pub async fn job_names(&self) -> Vec<String> {
        self.state.lock().await.jobs.keys().cloned().collect()
    }

    /// Names of all stored pods.
    pub async fn pod_names(&self) -> Vec<String> {
        self.state.lock().await.pods.keys().cloned().collect()
    }

    /// Every delete call made so far, in order.
    pub async fn deletions(&self) -> Vec<MockDeletion> {
        self.state.lock().await.deletions.clone()
    }

    fn check_reachable(state: &MockState) -> Result<()> {
        if state.unreachable {
            return Err(ClusterError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    async fn read_logs(&self, pod: &str, options: &LogOptions) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Self::check_reachable(&state)?;
        if !state.pods.contains_key(pod) {
            return Err(ClusterError::NotFound(pod.to_string()));
        }
        let text = state.logs.get(pod).cloned().unwrap_or_default();
        Ok(tail(&text, options.tail_lines))
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::check_reachable(&state)?;
        let name = config_map.metadata.name.clone().unwrap_or_default();
        if state.fail_create_config_maps.contains(&name) {
            return Err(ClusterError::Api {
                code: 500,
                message: format!("injected failure creating {}", name),
            });
        }
        if state.config_maps.contains_key(&name) {
            return Err(ClusterError::AlreadyExists(name));
        }
        let mut stored = config_map.clone();
        stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        state.config_maps.insert(name, stored);
        Ok(())
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::check_reachable(&state)?;
        if state.fail_delete_config_maps.contains(name) {
            return Err(ClusterError::Api {
                code: 500,
                message: format!("injected failure deleting {}", name),
            });
        }
        state
            .deletions
            .push(MockDeletion::ConfigMap(name.to_string()));
        state
            .config_maps
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))
    }

    async fn list_config_maps(&self, label_selector: &str) -> Result<Vec<ConfigMap>> {
        let state = self.state.lock().await;
        Self::check_reachable(&state)?;
        let selector = parse_selector(label_selector);
        Ok(state
            .config_maps
            .values()
            .filter(|config_map| labels_match(&config_map.metadata, &selector))
            .cloned()
            .collect())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::check_reachable(&state)?;
        let name = job.metadata.name.clone().unwrap_or_default();
        if state.fail_create_job {
            return Err(ClusterError::Api {
                code: 422,
                message: format!("injected failure creating job {}", name),
            });
        }
        if state.jobs.contains_key(&name) {
            return Err(ClusterError::AlreadyExists(name));
        }
        let mut stored = job.clone();
        stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        stored.metadata.namespace = Some(self.namespace.clone());
        stored.status = Some(JobStatus::default());
        state.jobs.insert(name, stored);
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<Option<Job>> {
        let state = self.state.lock().await;
        Self::check_reachable(&state)?;
        Ok(state.jobs.get(name).cloned())
    }

    async fn list_jobs(&self, label_selector: &str) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        Self::check_reachable(&state)?;
        let selector = parse_selector(label_selector);
        Ok(state
            .jobs
            .values()
            .filter(|job| labels_match(&job.metadata, &selector))
            .cloned()
            .collect())
    }

    async fn delete_job(&self, name: &str, propagation: Propagation) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::check_reachable(&state)?;
        if state.fail_delete_job {
            return Err(ClusterError::Api {
                code: 500,
                message: format!("injected failure deleting job {}", name),
            });
        }
        state
            .deletions
            .push(MockDeletion::Job(name.to_string(), propagation));
        if state.jobs.remove(name).is_none() {
            return Err(ClusterError::NotFound(name.to_string()));
        }
        let owned = [("job-name".to_string(), name.to_string())];
        state
            .pods
            .retain(|_, pod| !labels_match(&pod.metadata, &owned));
        Ok(())
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>> {
        let state = self.state.lock().await;
        Self::check_reachable(&state)?;
        let selector = parse_selector(label_selector);
        Ok(state
            .pods
            .values()
            .filter(|pod| labels_match(&pod.metadata, &selector))
            .cloned()
            .collect())
    }

    async fn pod_logs(&self, pod: &str, _container: &str, options: &LogOptions) -> Result<String> {
        let lines = self.read_logs(pod, options).await?;
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        Ok(text)
    }

    async fn stream_pod_logs(
        &self,
        pod: &str,
        _container: &str,
        options: &LogOptions,
    ) -> Result<LogStream> {
        let lines = self.read_logs(pod, options).await?;
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }
}
