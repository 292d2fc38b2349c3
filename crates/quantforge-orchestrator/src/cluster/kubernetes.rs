// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes implementation of [`ClusterApi`] backed by a `kube` client.

use async_trait::async_trait;
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use tokio::sync::mpsc;
use tracing::debug;

use super::traits::{ClusterApi, ClusterError, LogOptions, LogStream, Propagation, Result};

/// Buffered lines between the log pump task and the consumer.
const LOG_CHANNEL_CAPACITY: usize = 256;

/// Cluster access through the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
    config_maps: Api<ConfigMap>,
    jobs: Api<Job>,
    pods: Api<Pod>,
}

impl KubeCluster {
    /// Create a cluster handle scoped to `namespace`.
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            config_maps: Api::namespaced(client.clone(), &namespace),
            jobs: Api::namespaced(client.clone(), &namespace),
            pods: Api::namespaced(client.clone(), &namespace),
            client,
            namespace,
        }
    }

    /// Connect using in-cluster config or the local kubeconfig.
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        Ok(Self::new(client, namespace))
    }

    /// Underlying client, shared with the metrics tiers that issue raw requests.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Translate a kube error into a [`ClusterError`], keeping 404/409 distinct.
pub(crate) fn map_kube_error(err: kube::Error, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            ClusterError::NotFound(name.to_string())
        }
        kube::Error::Api(response) if response.code == 409 => {
            ClusterError::AlreadyExists(name.to_string())
        }
        kube::Error::Api(response) => ClusterError::Api {
            code: response.code,
            message: response.message,
        },
        kube::Error::SerdeError(e) => ClusterError::Serialization(e.to_string()),
        other => ClusterError::Transport(other.to_string()),
    }
}

fn log_params(container: &str, options: &LogOptions) -> LogParams {
    let since_seconds = options.since.map(|since| {
        let elapsed = chrono::Utc::now().signed_duration_since(since).num_seconds();
        elapsed.max(1)
    });

    LogParams {
        container: Some(container.to_string()),
        follow: options.follow,
        tail_lines: options.tail_lines,
        since_seconds,
        timestamps: options.timestamps,
        ..Default::default()
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.config_maps
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| map_kube_error(e, &name))?;
        debug!(namespace = %self.namespace, config_map = %name, "Created config map");
        Ok(())
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        self.config_maps
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, name))?;
        Ok(())
    }

    async fn list_config_maps(&self, label_selector: &str) -> Result<Vec<ConfigMap>> {
        let list = self
            .config_maps
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| map_kube_error(e, label_selector))?;
        Ok(list.items)
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let name = job.metadata.name.clone().unwrap_or_default();
        self.jobs
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| map_kube_error(e, &name))?;
        debug!(namespace = %self.namespace, job = %name, "Created job");
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<Option<Job>> {
        self.jobs
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, name))
    }

    async fn list_jobs(&self, label_selector: &str) -> Result<Vec<Job>> {
        let list = self
            .jobs
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| map_kube_error(e, label_selector))?;
        Ok(list.items)
    }

    async fn delete_job(&self, name: &str, propagation: Propagation) -> Result<()> {
        let params = match propagation {
            Propagation::Foreground => DeleteParams::foreground(),
            Propagation::Background => DeleteParams::background(),
        };
        self.jobs
            .delete(name, &params)
            .await
            .map_err(|e| map_kube_error(e, name))?;
        Ok(())
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>> {
        let list = self
            .pods
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| map_kube_error(e, label_selector))?;
        Ok(list.items)
    }

    async fn pod_logs(&self, pod: &str, container: &str, options: &LogOptions) -> Result<String> {
        let params = LogParams {
            follow: false,
            ..log_params(container, options)
        };
        self.pods
            .logs(pod, &params)
            .await
            .map_err(|e| map_kube_error(e, pod))
    }

    async fn stream_pod_logs(
        &self,
        pod: &str,
        container: &str,
        options: &LogOptions,
    ) -> Result<LogStream> {
        let pods = self.pods.clone();
        let pod = pod.to_string();
        let params = log_params(container, options);
        let cancel = options.cancel.clone().unwrap_or_default();
        let (tx, rx) = mpsc::channel::<Result<String>>(LOG_CHANNEL_CAPACITY);

        // The pump owns the API handle so the returned stream is 'static.
        tokio::spawn(async move {
            let reader = match pods.log_stream(&pod, &params).await {
                Ok(reader) => reader,
                Err(e) => {
                    let _ = tx.send(Err(map_kube_error(e, &pod))).await;
                    return;
                }
            };
            let mut lines = Box::pin(reader.lines());

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(pod = %pod, "Log stream cancelled by caller");
                        break;
                    }
                    _ = tx.closed() => break,
                    next = lines.next() => match next {
                        Some(Ok(line)) => {
                            if tx.send(Ok(line)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = tx.send(Err(ClusterError::Transport(e.to_string()))).await;
                            break;
                        }
                        None => break,
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}
