//! Kubernetes backend.
//!
//! Implements the orchestration contract against a cluster API server:
//! a service is a Deployment plus a cluster Service, a job is a batch Job,
//! project isolation is a NetworkPolicy. Deletion polls for absence with a
//! bounded timeout because the API server deletes asynchronously and there
//! is no native "delete and block until gone" call.

pub mod translate;

use crate::configuration::Settings;
use crate::models::{Job, JobStatus, Service};
use crate::runtime::error::RuntimeError;
use crate::runtime::query::{exactly_one, ResourceQuery};
use crate::runtime::{
    labels, registry, with_deadline, ContainerRuntime, DeploymentConfig, FeatureKind, PortMapping,
    NO_LOGS,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment as KubeDeployment, ReplicaSet};
use k8s_openapi::api::batch::v1::Job as KubeJob;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service as KubeService};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::{Client, Resource};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::time::Duration;
use translate::PodLimits;

pub struct KubernetesRuntime {
    client: Client,
    /// Kubernetes namespace the platform deploys into.
    cluster_namespace: String,
    /// Platform namespace label value scoping resource ownership.
    namespace: String,
    managed_cluster: bool,
    cpu_limit: f64,
    memory_limit_mb: i64,
    deletion_wait: Duration,
    op_timeout: Duration,
}

impl KubernetesRuntime {
    pub fn new(client: Client, settings: &Settings) -> Self {
        Self {
            client,
            cluster_namespace: settings.kubernetes.namespace.clone(),
            namespace: settings.namespace.clone(),
            managed_cluster: settings.kubernetes.managed_cluster,
            cpu_limit: settings.limits.cpu_cores,
            memory_limit_mb: settings.limits.memory_mb,
            deletion_wait: Duration::from_secs(settings.kubernetes.deletion_wait_secs),
            op_timeout: Duration::from_secs(settings.operation_timeout_secs),
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster environment.
    pub async fn connect(settings: &Settings) -> Result<Self, RuntimeError> {
        let client = Client::try_default()
            .await
            .map_err(|err| RuntimeError::Unavailable(err.to_string()))?;
        Ok(Self::new(client, settings))
    }

    fn deployments(&self) -> Api<KubeDeployment> {
        Api::namespaced(self.client.clone(), &self.cluster_namespace)
    }

    fn replica_sets(&self) -> Api<ReplicaSet> {
        Api::namespaced(self.client.clone(), &self.cluster_namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.cluster_namespace)
    }

    fn services(&self) -> Api<KubeService> {
        Api::namespaced(self.client.clone(), &self.cluster_namespace)
    }

    fn jobs(&self) -> Api<KubeJob> {
        Api::namespaced(self.client.clone(), &self.cluster_namespace)
    }

    fn claims_api(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.cluster_namespace)
    }

    fn policies(&self) -> Api<NetworkPolicy> {
        Api::namespaced(self.client.clone(), &self.cluster_namespace)
    }

    fn resource_labels(&self, config: &DeploymentConfig) -> BTreeMap<String, String> {
        let mut resource_labels: BTreeMap<String, String> = config
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        resource_labels.insert(labels::NAMESPACE.to_string(), self.namespace.clone());
        resource_labels.insert(
            labels::FEATURE_TYPE.to_string(),
            config.feature.as_label().to_string(),
        );
        resource_labels
            .entry(labels::FEATURE_NAME.to_string())
            .or_insert_with(|| config.name.clone());
        resource_labels
    }

    fn owns(&self, meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> bool {
        meta.labels
            .as_ref()
            .and_then(|l| l.get(labels::NAMESPACE))
            .map(String::as_str)
            == Some(self.namespace.as_str())
    }

    fn pod_limits(&self, config: &DeploymentConfig) -> PodLimits {
        PodLimits {
            cpu_cores: config.cpu_limit.unwrap_or(self.cpu_limit),
            memory_mb: config.memory_mb.unwrap_or(self.memory_limit_mb),
        }
    }

    /// Two-step resolution shared by services and jobs: the id as the
    /// native object name first, then a label query on the feature name.
    async fn find<K>(
        &self,
        api: &Api<K>,
        id: &str,
        project: Option<&str>,
        what: &str,
    ) -> Result<K, RuntimeError>
    where
        K: Resource + Clone + serde::de::DeserializeOwned + Debug,
    {
        match api.get(id).await {
            Ok(resource) => {
                if self.owns(resource.meta()) {
                    return Ok(resource);
                }
                tracing::debug!(id, "resource exists but belongs to another namespace");
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {}
            Err(err) => return Err(err.into()),
        }

        let query = ResourceQuery::namespaced(&self.namespace)
            .feature_name(id)
            .project(project);
        let list = api
            .list(&ListParams::default().labels(&query.label_selector()))
            .await?;
        exactly_one(list.items, what)
    }

    async fn wait_name_gone<K>(&self, api: &Api<K>, name: &str)
    where
        K: Resource + Clone + serde::de::DeserializeOwned + Debug,
    {
        let deadline = tokio::time::Instant::now() + self.deletion_wait;
        loop {
            match api.get(name).await {
                Err(kube::Error::Api(resp)) if resp.code == 404 => return,
                Err(err) => {
                    tracing::warn!(name, "deletion poll: {}", err);
                    return;
                }
                Ok(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(name, "still terminating after {}s", self.deletion_wait.as_secs());
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn wait_selector_gone<K>(&self, api: &Api<K>, selector: &str)
    where
        K: Resource + Clone + serde::de::DeserializeOwned + Debug,
    {
        let deadline = tokio::time::Instant::now() + self.deletion_wait;
        loop {
            match api.list(&ListParams::default().labels(selector)).await {
                Ok(list) if list.items.is_empty() => return,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(selector, "deletion poll: {}", err);
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(selector, "still terminating after {}s", self.deletion_wait.as_secs());
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Claims are created on demand; HTTP 409 means a previous deploy
    /// already provisioned them, which is success.
    async fn ensure_claims(
        &self,
        config: &DeploymentConfig,
        resource_labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let api = self.claims_api();
        for claim in translate::claims(config) {
            let object = translate::persistent_volume_claim(&claim, resource_labels);
            match api.create(&PostParams::default(), &object).await {
                Ok(_) => tracing::info!(claim = %claim, "claim created"),
                Err(kube::Error::Api(resp)) if resp.code == 409 => {
                    tracing::debug!(claim = %claim, "claim already exists");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn service_from_deployment(&self, deployment: KubeDeployment) -> Service {
        let meta = deployment.metadata;
        let native_name = meta.name.unwrap_or_default();
        let resource_labels: HashMap<String, String> =
            meta.labels.unwrap_or_default().into_iter().collect();
        let name = resource_labels
            .get(labels::FEATURE_NAME)
            .cloned()
            .unwrap_or_else(|| native_name.clone());

        let spec = deployment.spec.unwrap_or_default();
        let container = spec
            .template
            .spec
            .as_ref()
            .and_then(|pod| pod.containers.first())
            .cloned()
            .unwrap_or_default();

        let exposed_ports: BTreeSet<u16> = container
            .ports
            .iter()
            .flatten()
            .map(|p| p.container_port as u16)
            .collect();
        let connection_port = registry::connection_port(&name, &exposed_ports);

        // health is derived, never read from a field: ready replicas must
        // exist and match the desired count; no status means unhealthy
        let status = deployment.status.unwrap_or_default();
        let healthy = match status.ready_replicas {
            Some(ready) => ready == spec.replicas.unwrap_or(1),
            None => false,
        };
        let status_text = if healthy { "Available" } else { "Progressing" };

        let started_at: Option<DateTime<Utc>> = meta.creation_timestamp.map(|t| t.0);
        let modified_at = status
            .conditions
            .iter()
            .flatten()
            .filter_map(|c| c.last_update_time.clone())
            .map(|t| t.0)
            .max()
            .or(started_at);

        Service {
            id: native_name.clone(),
            container_name: native_name,
            name,
            image: container.image.clone().unwrap_or_default(),
            status: status_text.to_string(),
            healthy,
            connection_port: Some(connection_port),
            exposed_ports,
            configuration: translate::env_map(&container),
            labels: resource_labels,
            started_at,
            modified_at,
        }
    }

    fn job_from_kube(&self, job: KubeJob) -> Job {
        let meta = job.metadata;
        let native_name = meta.name.unwrap_or_default();
        let resource_labels: HashMap<String, String> =
            meta.labels.unwrap_or_default().into_iter().collect();
        let name = resource_labels
            .get(labels::FEATURE_NAME)
            .cloned()
            .unwrap_or_else(|| native_name.clone());

        let spec = job.spec.unwrap_or_default();
        let container = spec
            .template
            .spec
            .as_ref()
            .and_then(|pod| pod.containers.first())
            .cloned()
            .unwrap_or_default();

        let status = job.status.unwrap_or_default();
        let (job_status, exit_code) = if status.succeeded.unwrap_or(0) > 0 {
            (JobStatus::Succeeded, Some(0))
        } else if status.failed.unwrap_or(0) > 0 {
            (JobStatus::Failed, Some(1))
        } else {
            (JobStatus::Running, None)
        };
        let finished_at = status
            .completion_time
            .clone()
            .map(|t| t.0)
            .or_else(|| {
                status
                    .conditions
                    .iter()
                    .flatten()
                    .filter(|c| c.type_ == "Failed")
                    .filter_map(|c| c.last_transition_time.clone())
                    .map(|t| t.0)
                    .next()
            });

        Job {
            id: native_name.clone(),
            container_name: native_name,
            name,
            image: container.image.clone().unwrap_or_default(),
            status: job_status,
            exit_code,
            configuration: translate::env_map(&container),
            labels: resource_labels,
            started_at: status.start_time.map(|t| t.0),
            finished_at,
        }
    }

    fn core_config(&self, core: &registry::CoreService) -> DeploymentConfig {
        let name = DeploymentConfig::generate_name(core.name, &self.namespace);
        let mut config = DeploymentConfig::new(core.image, name, FeatureKind::CoreService)
            .with_feature_name(core.name);
        config.ports.push(PortMapping {
            host: None,
            container: core.connection_port,
        });
        config.volume_path = Some(core.volume_path.to_string());
        config
    }

    async fn deploy_service_impl(&self, config: DeploymentConfig) -> Result<Service, RuntimeError> {
        let api = self.deployments();
        match api.get(&config.name).await {
            Ok(_) => return Err(RuntimeError::conflict(&config.name)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {}
            Err(err) => return Err(err.into()),
        }

        let resource_labels = self.resource_labels(&config);
        self.ensure_claims(&config, &resource_labels).await?;

        let limits = self.pod_limits(&config);
        let pp = PostParams::default();
        api.create(&pp, &translate::deployment(&config, &resource_labels, limits))
            .await?;

        if !config.ports.is_empty() {
            let node_port = config.has_explicit_host_ports() && !self.managed_cluster;
            let object = translate::service(&config, &resource_labels, node_port);
            match self.services().create(&pp, &object).await {
                Ok(_) => {}
                Err(kube::Error::Api(resp)) if resp.code == 409 => {
                    tracing::debug!(name = %config.name, "service object already exists");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let created = api.get(&config.name).await?;
        Ok(self.service_from_deployment(created))
    }

    async fn delete_service_impl(
        &self,
        id: &str,
        remove_volumes: bool,
        project: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let api = self.deployments();
        let deployment = self.find(&api, id, project, "service").await?;
        let name = deployment
            .metadata
            .name
            .clone()
            .ok_or_else(|| RuntimeError::not_found(id))?;
        let feature = deployment
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::FEATURE_NAME))
            .cloned()
            .unwrap_or_else(|| name.clone());
        let selector = ResourceQuery::namespaced(&self.namespace)
            .feature_name(&feature)
            .label_selector();
        let dp = DeleteParams::default();

        match self.services().delete(&name, &dp).await {
            Ok(_) => {}
            Err(kube::Error::Api(resp)) if resp.code == 404 => {}
            Err(err) => tracing::warn!(name = %name, "service object removal: {}", err),
        }

        api.delete(&name, &dp).await?;
        self.wait_name_gone(&api, &name).await;

        // deployment deletion has been seen to leave children behind, so
        // replica sets and pods go explicitly, by label, each step waiting
        // for the previous one to finish terminating
        let replica_sets = self.replica_sets();
        let lp = ListParams::default().labels(&selector);
        if let Err(err) = replica_sets.delete_collection(&dp, &lp).await {
            tracing::warn!(selector = %selector, "replica set removal: {}", err);
        }
        self.wait_selector_gone(&replica_sets, &selector).await;

        let pods = self.pods();
        if let Err(err) = pods.delete_collection(&dp, &lp).await {
            tracing::warn!(selector = %selector, "pod removal: {}", err);
        }
        self.wait_selector_gone(&pods, &selector).await;

        if remove_volumes {
            let claims = self.claims_api();
            if let Err(err) = claims.delete_collection(&dp, &lp).await {
                tracing::warn!(selector = %selector, "claim removal: {}", err);
            }
            match claims.delete(&format!("{}-data", name), &dp).await {
                Ok(_) => {}
                Err(kube::Error::Api(resp)) if resp.code == 404 => {}
                Err(err) => tracing::warn!(name = %name, "data claim removal: {}", err),
            }
        }
        Ok(())
    }

    async fn pod_logs(&self, selector: &str) -> Result<String, RuntimeError> {
        let pods = self.pods();
        let list = pods
            .list(&ListParams::default().labels(selector))
            .await?;
        let Some(pod_name) = list.items.first().and_then(|p| p.metadata.name.clone()) else {
            return Ok(NO_LOGS.to_string());
        };

        match pods.logs(&pod_name, &LogParams::default()).await {
            Ok(logs) if logs.is_empty() => Ok(NO_LOGS.to_string()),
            Ok(logs) => Ok(logs),
            // a pod that has not produced logs yet is not an error
            Err(kube::Error::Api(resp)) if resp.code == 404 || resp.code == 400 => {
                Ok(NO_LOGS.to_string())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for KubernetesRuntime {
    #[tracing::instrument(skip(self, config), fields(name = %config.name, image = %config.image))]
    async fn deploy_service(&self, config: DeploymentConfig) -> Result<Service, RuntimeError> {
        with_deadline(self.op_timeout, "deploy service", self.deploy_service_impl(config)).await
    }

    #[tracing::instrument(skip(self, config), fields(name = %config.name, image = %config.image))]
    async fn deploy_job(&self, config: DeploymentConfig) -> Result<Job, RuntimeError> {
        with_deadline(self.op_timeout, "deploy job", async {
            let api = self.jobs();
            match api.get(&config.name).await {
                Ok(_) => return Err(RuntimeError::conflict(&config.name)),
                Err(kube::Error::Api(resp)) if resp.code == 404 => {}
                Err(err) => return Err(err.into()),
            }

            let resource_labels = self.resource_labels(&config);
            self.ensure_claims(&config, &resource_labels).await?;

            let limits = self.pod_limits(&config);
            let object = translate::job(&config, &resource_labels, limits);
            let created = api.create(&PostParams::default(), &object).await?;
            Ok(self.job_from_kube(created))
        })
        .await
    }

    async fn get_service(&self, id: &str, project: Option<&str>) -> Result<Service, RuntimeError> {
        with_deadline(self.op_timeout, "get service", async {
            let deployment = self.find(&self.deployments(), id, project, "service").await?;
            Ok(self.service_from_deployment(deployment))
        })
        .await
    }

    async fn get_services(&self, project: Option<&str>) -> Result<Vec<Service>, RuntimeError> {
        with_deadline(self.op_timeout, "list services", async {
            let query = ResourceQuery::namespaced(&self.namespace).project(project);
            let list = self
                .deployments()
                .list(&ListParams::default().labels(&query.label_selector()))
                .await?;
            Ok(list
                .items
                .into_iter()
                .map(|d| self.service_from_deployment(d))
                .collect())
        })
        .await
    }

    async fn get_service_logs(&self, id: &str) -> Result<String, RuntimeError> {
        with_deadline(self.op_timeout, "service logs", async {
            let deployment = self.find(&self.deployments(), id, None, "service").await?;
            let feature = deployment
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(labels::FEATURE_NAME))
                .cloned()
                .or(deployment.metadata.name)
                .ok_or_else(|| RuntimeError::not_found(id))?;
            let selector = ResourceQuery::namespaced(&self.namespace)
                .feature_name(&feature)
                .label_selector();
            self.pod_logs(&selector).await
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_service(
        &self,
        id: &str,
        remove_volumes: bool,
        project: Option<&str>,
    ) -> Result<(), RuntimeError> {
        with_deadline(
            self.op_timeout,
            "delete service",
            self.delete_service_impl(id, remove_volumes, project),
        )
        .await
    }

    async fn get_job(&self, id: &str, project: Option<&str>) -> Result<Job, RuntimeError> {
        with_deadline(self.op_timeout, "get job", async {
            let job = self.find(&self.jobs(), id, project, "job").await?;
            Ok(self.job_from_kube(job))
        })
        .await
    }

    async fn get_jobs(&self, project: &str) -> Result<Vec<Job>, RuntimeError> {
        with_deadline(self.op_timeout, "list jobs", async {
            let query = ResourceQuery::namespaced(&self.namespace).project(Some(project));
            let list = self
                .jobs()
                .list(&ListParams::default().labels(&query.label_selector()))
                .await?;
            Ok(list.items.into_iter().map(|j| self.job_from_kube(j)).collect())
        })
        .await
    }

    async fn get_job_logs(&self, id: &str) -> Result<String, RuntimeError> {
        with_deadline(self.op_timeout, "job logs", async {
            let job = self.find(&self.jobs(), id, None, "job").await?;
            let name = job
                .metadata
                .name
                .ok_or_else(|| RuntimeError::not_found(id))?;
            self.pod_logs(&format!("job-name={}", name)).await
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_job(&self, id: &str, project: Option<&str>) -> Result<(), RuntimeError> {
        with_deadline(self.op_timeout, "delete job", async {
            let api = self.jobs();
            let job = self.find(&api, id, project, "job").await?;
            let name = job
                .metadata
                .name
                .ok_or_else(|| RuntimeError::not_found(id))?;

            api.delete(&name, &DeleteParams::default()).await?;
            self.wait_name_gone(&api, &name).await;

            let pods = self.pods();
            let lp = ListParams::default().labels(&format!("job-name={}", name));
            if let Err(err) = pods.delete_collection(&DeleteParams::default(), &lp).await {
                tracing::warn!(name = %name, "job pod removal: {}", err);
            }
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn create_project_resources(&self, project: &str) -> Result<(), RuntimeError> {
        with_deadline(self.op_timeout, "create project resources", async {
            let name = format!("{}-{}", self.namespace, project);
            let resource_labels = BTreeMap::from([
                (labels::NAMESPACE.to_string(), self.namespace.clone()),
                (labels::PROJECT.to_string(), project.to_string()),
            ]);
            let policy = translate::network_policy(&name, &resource_labels, &resource_labels);
            match self.policies().create(&PostParams::default(), &policy).await {
                Ok(_) => tracing::info!(project, "network policy created"),
                Err(kube::Error::Api(resp)) if resp.code == 409 => {
                    tracing::debug!(project, "network policy already exists");
                }
                Err(err) => return Err(err.into()),
            }
            Ok(())
        })
        .await
    }

    /// Returns `true` when every step succeeded; per-step failures are
    /// logged and the remaining cleanup continues.
    #[tracing::instrument(skip(self))]
    async fn delete_project_resources(&self, project: &str) -> Result<bool, RuntimeError> {
        with_deadline(self.op_timeout, "delete project resources", async {
            let query = ResourceQuery::namespaced(&self.namespace).project(Some(project));
            let selector = query.label_selector();
            let lp = ListParams::default().labels(&selector);
            let dp = DeleteParams::default();
            let mut clean = true;

            if let Err(err) = self.deployments().delete_collection(&dp, &lp).await {
                tracing::error!(project, "deployment cleanup: {}", err);
                clean = false;
            }
            if let Err(err) = self.jobs().delete_collection(&dp, &lp).await {
                tracing::error!(project, "job cleanup: {}", err);
                clean = false;
            }

            // services historically lack delete-collection support
            match self.services().list(&lp).await {
                Ok(list) => {
                    for svc in list.items {
                        let Some(name) = svc.metadata.name else { continue };
                        if let Err(err) = self.services().delete(&name, &dp).await {
                            tracing::error!(service = %name, "service cleanup: {}", err);
                            clean = false;
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(project, "service listing: {}", err);
                    clean = false;
                }
            }

            if let Err(err) = self.pods().delete_collection(&dp, &lp).await {
                tracing::error!(project, "pod cleanup: {}", err);
                clean = false;
            }
            if let Err(err) = self.claims_api().delete_collection(&dp, &lp).await {
                tracing::error!(project, "claim cleanup: {}", err);
                clean = false;
            }

            let policy = format!("{}-{}", self.namespace, project);
            match self.policies().delete(&policy, &dp).await {
                Ok(_) => {}
                Err(kube::Error::Api(resp)) if resp.code == 404 => {}
                Err(err) => {
                    tracing::error!(project, "network policy cleanup: {}", err);
                    clean = false;
                }
            }

            Ok(clean)
        })
        .await
    }

    async fn shutdown_disk_exceeding_containers(
        &self,
        _dry_run: bool,
    ) -> Result<Vec<String>, RuntimeError> {
        // the equivalent control here is a declarative per-pod
        // ephemeral-storage limit set at creation time, not a sweep
        Err(RuntimeError::Unsupported(
            "disk eviction sweep is Docker-only".to_string(),
        ))
    }

    #[tracing::instrument(skip(self))]
    async fn install_lab(&self) -> Result<(), RuntimeError> {
        for core in registry::all() {
            match self.deploy_service_impl(self.core_config(core)).await {
                Ok(_) => tracing::info!(service = core.name, "core service installed"),
                Err(RuntimeError::Conflict(_)) => {
                    tracing::info!(service = core.name, "core service already installed");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn uninstall_lab(&self) -> Result<(), RuntimeError> {
        for core in registry::all() {
            let name = DeploymentConfig::generate_name(core.name, &self.namespace);
            match self.delete_service_impl(&name, true, None).await {
                Ok(()) => tracing::info!(service = core.name, "core service removed"),
                Err(RuntimeError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn update_lab(&self, backend_only: bool) -> Result<(), RuntimeError> {
        let targets: Vec<_> = if backend_only {
            registry::all()
                .into_iter()
                .filter(|core| core.name == registry::BACKEND)
                .collect()
        } else {
            registry::all()
        };

        for core in targets {
            let name = DeploymentConfig::generate_name(core.name, &self.namespace);
            match self.delete_service_impl(&name, false, None).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
            self.deploy_service_impl(self.core_config(core)).await?;
            tracing::info!(service = core.name, "core service updated");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    fn runtime_health(ready: Option<i32>, want: Option<i32>) -> bool {
        // mirrors the derivation in service_from_deployment
        match ready {
            Some(ready) => ready == want.unwrap_or(1),
            None => false,
        }
    }

    #[test]
    fn health_requires_ready_replicas_to_match() {
        assert!(runtime_health(Some(1), Some(1)));
        assert!(!runtime_health(Some(0), Some(1)));
        assert!(!runtime_health(None, Some(1)));
        // absent spec count defaults to one replica
        assert!(runtime_health(Some(1), None));
    }

    #[test]
    fn absent_status_reads_as_unhealthy() {
        let status = DeploymentStatus::default();
        assert!(!runtime_health(status.ready_replicas, Some(1)));
    }
}
