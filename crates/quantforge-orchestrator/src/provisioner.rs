// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload provisioning.
//!
//! Submitting a task creates, in order:
//! 1. `<kind>-<id>-config` holding the configuration (or download script)
//! 2. `<kind>-<id>-strategy` holding the strategy source (backtest/hyperopt)
//! 3. the job, whose init container stages both into a writable `emptyDir`
//!
//! Config objects are created before the job because the job's volumes
//! reference them by name. A failure at any step removes what was already
//! created, newest first.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::cluster::{ClusterApi, ClusterError};
use crate::compensation::CompensationStack;
use crate::config::WorkloadConfig;
use crate::error::{Error, Result};
use crate::naming::ResourceNamer;
use crate::script::{
    self, CONFIG_FILE, CONFIG_MOUNT_DIR, DATA_URL_ENV, DOWNLOAD_SCRIPT_FILE, EXCHANGES_FILE,
    STRATEGY_MOUNT_DIR, UPLOAD_URL_ENV, WORKSPACE_DIR,
};
use crate::task::{JobHandle, ResourceHints, TaskKind, TaskSpec};

/// Name of the workload container.
pub const MAIN_CONTAINER: &str = "workload";
/// Name of the staging init container.
pub const INIT_CONTAINER: &str = "stage-workspace";

const CONFIG_VOLUME: &str = "config";
const STRATEGY_VOLUME: &str = "strategy";
const WORKSPACE_VOLUME: &str = "workspace";

/// Removes a job name from the in-flight set when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    job_name: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, job_name: &str) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(job_name.to_string()) {
            return None;
        }
        Some(Self {
            in_flight,
            job_name: job_name.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.job_name);
    }
}

/// Creates the config objects and job for a task.
///
/// Stateless apart from the in-flight set that keeps two concurrent
/// submissions of the same task from interleaving their create/rollback
/// sequences.
pub struct WorkloadProvisioner {
    cluster: Arc<dyn ClusterApi>,
    namer: ResourceNamer,
    workload: WorkloadConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl WorkloadProvisioner {
    /// Create a provisioner.
    pub fn new(cluster: Arc<dyn ClusterApi>, namer: ResourceNamer, workload: WorkloadConfig) -> Self {
        Self {
            cluster,
            namer,
            workload,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Create every cluster object for `spec` and submit the job.
    pub async fn submit(&self, spec: &TaskSpec) -> Result<JobHandle> {
        let kind = spec.kind();
        let task_id = spec.id();
        self.namer
            .validate_task_id(kind, task_id)
            .map_err(Error::InvalidTaskId)?;
        if let Some(strategy_name) = spec.strategy_name() {
            script::validate_strategy_name(strategy_name).map_err(Error::InvalidStrategyName)?;
        }

        let job_name = self.namer.job_name(kind, task_id);
        let _guard = InFlightGuard::acquire(&self.in_flight, &job_name).ok_or_else(|| {
            Error::AlreadyProvisioning {
                kind,
                id: task_id.to_string(),
            }
        })?;

        // Build everything up front so serialization errors never leave objects behind.
        let config_maps = self.build_config_maps(spec)?;
        let job = self.build_job(spec)?;

        let mut undo = CompensationStack::new();

        for config_map in &config_maps {
            let name = config_map.metadata.name.clone().unwrap_or_default();
            if let Err(e) = self.cluster.create_config_map(config_map).await {
                return Err(self.roll_back(undo, kind, task_id, "create config object", e).await);
            }
            let cluster = self.cluster.clone();
            undo.push(format!("delete config map {}", name), move || async move {
                cluster.delete_config_map(&name).await
            });
        }

        if let Err(e) = self.cluster.create_job(&job).await {
            return Err(self.roll_back(undo, kind, task_id, "create job", e).await);
        }
        undo.commit();

        info!(
            kind = %kind,
            task_id = %task_id,
            job_name = %job_name,
            config_objects = config_maps.len(),
            "Workload submitted"
        );

        Ok(JobHandle {
            kind,
            task_id: task_id.to_string(),
            job_name,
        })
    }

    async fn roll_back(
        &self,
        undo: CompensationStack,
        kind: TaskKind,
        task_id: &str,
        step: &'static str,
        source: ClusterError,
    ) -> Error {
        error!(
            kind = %kind,
            task_id = %task_id,
            step = step,
            error = %source,
            created = undo.len(),
            "Provisioning failed, rolling back"
        );
        let failures = undo.compensate().await;
        if !failures.is_empty() {
            warn!(
                kind = %kind,
                task_id = %task_id,
                failures = ?failures,
                "Rollback left resources behind"
            );
        }
        Error::Provisioning { step, source }
    }

    fn metadata(&self, name: String, kind: TaskKind, task_id: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            labels: Some(self.namer.labels(kind, task_id)),
            ..Default::default()
        }
    }

    /// Config objects for a task, in creation order.
    pub fn build_config_maps(&self, spec: &TaskSpec) -> Result<Vec<ConfigMap>> {
        let kind = spec.kind();
        let task_id = spec.id();

        let maps = match spec {
            TaskSpec::Backtest(bt) => vec![
                self.config_map(
                    kind,
                    task_id,
                    self.namer.config_map_name(kind, task_id),
                    [(CONFIG_FILE.to_string(), serde_json::to_string_pretty(&bt.config)?)],
                ),
                self.config_map(
                    kind,
                    task_id,
                    self.namer.strategy_map_name(kind, task_id),
                    [(
                        script::strategy_file_name(&bt.strategy_name),
                        bt.strategy_code.clone(),
                    )],
                ),
            ],
            TaskSpec::HyperOpt(ho) => vec![
                self.config_map(
                    kind,
                    task_id,
                    self.namer.config_map_name(kind, task_id),
                    [(CONFIG_FILE.to_string(), serde_json::to_string_pretty(&ho.config)?)],
                ),
                self.config_map(
                    kind,
                    task_id,
                    self.namer.strategy_map_name(kind, task_id),
                    [(
                        script::strategy_file_name(&ho.strategy_name),
                        ho.strategy_code.clone(),
                    )],
                ),
            ],
            TaskSpec::DataDownload(dl) => vec![self.config_map(
                kind,
                task_id,
                self.namer.config_map_name(kind, task_id),
                [
                    (
                        DOWNLOAD_SCRIPT_FILE.to_string(),
                        script::download_script(dl),
                    ),
                    (
                        EXCHANGES_FILE.to_string(),
                        serde_json::to_string_pretty(&dl.exchanges)?,
                    ),
                ],
            )],
        };
        Ok(maps)
    }

    fn config_map<const N: usize>(
        &self,
        kind: TaskKind,
        task_id: &str,
        name: String,
        data: [(String, String); N],
    ) -> ConfigMap {
        ConfigMap {
            metadata: self.metadata(name, kind, task_id),
            data: Some(BTreeMap::from(data)),
            ..Default::default()
        }
    }

    fn resources(&self, hints: &ResourceHints) -> Value {
        let pick = |hint: &Option<String>, default: &str| {
            hint.clone().unwrap_or_else(|| default.to_string())
        };
        json!({
            "requests": {
                "cpu": pick(&hints.cpu_request, &self.workload.cpu_request),
                "memory": pick(&hints.memory_request, &self.workload.memory_request),
            },
            "limits": {
                "cpu": pick(&hints.cpu_limit, &self.workload.cpu_limit),
                "memory": pick(&hints.memory_limit, &self.workload.memory_limit),
            },
        })
    }

    /// Job definition for a task.
    pub fn build_job(&self, spec: &TaskSpec) -> Result<Job> {
        let kind = spec.kind();
        let task_id = spec.id();
        let labels = self.namer.labels(kind, task_id);
        let workspace_mount = json!({ "name": WORKSPACE_VOLUME, "mountPath": WORKSPACE_DIR });

        let (main_script, data_url, upload_url) = match spec {
            TaskSpec::Backtest(bt) => (script::backtest_script(bt), bt.data_url.clone(), None),
            TaskSpec::HyperOpt(ho) => (script::hyperopt_script(ho), ho.data_url.clone(), None),
            TaskSpec::DataDownload(dl) => (
                format!("sh {}/{}", WORKSPACE_DIR, DOWNLOAD_SCRIPT_FILE),
                dl.existing_data_url.clone(),
                dl.upload_url.clone(),
            ),
        };

        let mut volumes = vec![
            json!({
                "name": CONFIG_VOLUME,
                "configMap": { "name": self.namer.config_map_name(kind, task_id) },
            }),
            json!({ "name": WORKSPACE_VOLUME, "emptyDir": {} }),
        ];
        let mut init_mounts = vec![
            json!({ "name": CONFIG_VOLUME, "mountPath": CONFIG_MOUNT_DIR, "readOnly": true }),
            workspace_mount.clone(),
        ];
        if kind != TaskKind::DataDownload {
            volumes.push(json!({
                "name": STRATEGY_VOLUME,
                "configMap": { "name": self.namer.strategy_map_name(kind, task_id) },
            }));
            init_mounts.push(
                json!({ "name": STRATEGY_VOLUME, "mountPath": STRATEGY_MOUNT_DIR, "readOnly": true }),
            );
        }

        let mut init_env = Vec::new();
        if let Some(url) = data_url {
            init_env.push(json!({ "name": DATA_URL_ENV, "value": url }));
        }
        let mut main_env = vec![json!({ "name": "PYTHONUNBUFFERED", "value": "1" })];
        if let Some(url) = upload_url {
            main_env.push(json!({ "name": UPLOAD_URL_ENV, "value": url }));
        }

        let job = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": self.namer.job_name(kind, task_id),
                "labels": labels,
            },
            "spec": {
                "backoffLimit": 0,
                "ttlSecondsAfterFinished": self.workload.ttl_seconds_after_finished,
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "restartPolicy": "Never",
                        "initContainers": [{
                            "name": INIT_CONTAINER,
                            "image": self.workload.init_image,
                            "command": ["sh", "-c", script::staging_script(kind)],
                            "env": init_env,
                            "volumeMounts": init_mounts,
                        }],
                        "containers": [{
                            "name": MAIN_CONTAINER,
                            "image": self.workload.image,
                            "command": ["sh", "-c", main_script],
                            "workingDir": WORKSPACE_DIR,
                            "env": main_env,
                            "resources": self.resources(spec.resources()),
                            "volumeMounts": [workspace_mount],
                        }],
                        "volumes": volumes,
                    },
                },
            },
        });

        Ok(serde_json::from_value(job)?)
    }
}
