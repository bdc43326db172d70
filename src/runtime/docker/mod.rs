//! Docker Engine backend.
//!
//! Implements the orchestration contract against a single Docker daemon:
//! services and jobs are containers, project isolation is a dedicated
//! bridge network per project (see [`network`] for the subnet allocator),
//! and discovery runs over the platform's label set.

pub mod network;

use crate::configuration::Settings;
use crate::models::{Job, JobStatus, Service};
use crate::runtime::error::RuntimeError;
use crate::runtime::query::{exactly_one, ResourceQuery};
use crate::runtime::{
    labels, registry, with_deadline, ContainerRuntime, DeploymentConfig, FeatureKind, MountSpec,
    PortMapping, NO_LOGS,
};
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerSummary, EndpointSettings, HealthStatusEnum, HostConfig,
    PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::network::{ConnectNetworkOptions, DisconnectNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use network::NetworkAllocator;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

pub struct DockerRuntime {
    docker: Docker,
    namespace: String,
    cpu_limit: f64,
    memory_limit_mb: i64,
    max_disk_gb: i64,
    debug_ports: bool,
    stop_grace: Duration,
    op_timeout: Duration,
    allocator: NetworkAllocator,
}

impl DockerRuntime {
    pub fn new(docker: Docker, settings: &Settings) -> Self {
        Self {
            allocator: NetworkAllocator::new(docker.clone()),
            docker,
            namespace: settings.namespace.clone(),
            cpu_limit: settings.limits.cpu_cores,
            memory_limit_mb: settings.limits.memory_mb,
            max_disk_gb: settings.limits.max_container_disk_gb,
            debug_ports: settings.docker.debug_ports,
            stop_grace: Duration::from_secs(settings.docker.stop_grace_period_secs),
            op_timeout: Duration::from_secs(settings.operation_timeout_secs),
        }
    }

    /// Connect with the daemon defaults (unix socket or `DOCKER_HOST`).
    pub fn connect(settings: &Settings) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| RuntimeError::Unavailable(err.to_string()))?;
        Ok(Self::new(docker, settings))
    }

    /// Name of the isolated network carrying a project's traffic.
    pub fn project_network(&self, project: &str) -> String {
        format!("{}-{}", self.namespace, project)
    }

    /// Network the platform's own core services live on.
    fn core_network(&self) -> String {
        format!("{}-core", self.namespace)
    }

    fn backend_container(&self) -> String {
        DeploymentConfig::generate_name(registry::BACKEND, &self.namespace)
    }

    fn resource_labels(&self, config: &DeploymentConfig) -> HashMap<String, String> {
        let mut resource_labels = config.labels.clone();
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

    fn owns(&self, inspect: &ContainerInspectResponse) -> bool {
        inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .and_then(|l| l.get(labels::NAMESPACE))
            .map(String::as_str)
            == Some(self.namespace.as_str())
    }

    async fn list_by(
        &self,
        query: &ResourceQuery,
        with_size: bool,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), query.label_pairs());
        let options = ListContainersOptions {
            all: true,
            size: with_size,
            filters,
            ..Default::default()
        };
        Ok(self.docker.list_containers(Some(options)).await?)
    }

    /// Two-step resolution: the id as a native container id or name first,
    /// then a label query on the feature name.
    async fn find_container(
        &self,
        id: &str,
        project: Option<&str>,
    ) -> Result<ContainerInspectResponse, RuntimeError> {
        match self.docker.inspect_container(id, None).await {
            Ok(inspect) => {
                if self.owns(&inspect) {
                    return Ok(inspect);
                }
                tracing::debug!(id, "container exists but belongs to another namespace");
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(err) => return Err(err.into()),
        }

        let query = ResourceQuery::namespaced(&self.namespace)
            .feature_name(id)
            .project(project);
        let matches = self.list_by(&query, false).await?;
        let summary = exactly_one(matches, id)?;
        let native_id = summary.id.ok_or_else(|| RuntimeError::not_found(id))?;
        Ok(self.docker.inspect_container(&native_id, None).await?)
    }

    async fn ensure_image(&self, image: &str) {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::debug!(image, "{}", status);
                    }
                }
                // a locally present image still starts when the registry
                // is unreachable; create_container reports the real miss
                Err(err) => {
                    tracing::warn!(image, "image pull: {}", err);
                    return;
                }
            }
        }
    }

    async fn host_config(&self, config: &DeploymentConfig, restart: bool) -> HostConfig {
        let host_cores = self
            .docker
            .info()
            .await
            .ok()
            .and_then(|info| info.ncpu)
            .unwrap_or(0);
        let mut cpu = config.cpu_limit.unwrap_or(self.cpu_limit);
        if host_cores > 0 {
            cpu = cpu.min(host_cores as f64);
        }
        let memory_mb = config.memory_mb.unwrap_or(self.memory_limit_mb);

        let (_, bindings) = port_bindings(&config.ports, self.debug_ports);
        let binds = bind_list(config);
        let policy = if restart {
            RestartPolicyNameEnum::ALWAYS
        } else {
            RestartPolicyNameEnum::NO
        };

        HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            port_bindings: (!bindings.is_empty()).then_some(bindings),
            restart_policy: Some(RestartPolicy {
                name: Some(policy),
                maximum_retry_count: None,
            }),
            nano_cpus: Some((cpu * 1_000_000_000.0) as i64),
            memory: Some(memory_mb * 1024 * 1024),
            privileged: Some(config.attribute_bool("privileged")),
            ..Default::default()
        }
    }

    async fn create_and_start(
        &self,
        config: &DeploymentConfig,
        restart: bool,
    ) -> Result<String, RuntimeError> {
        match self.docker.inspect_container(&config.name, None).await {
            Ok(_) => return Err(RuntimeError::conflict(&config.name)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(err) => return Err(err.into()),
        }

        self.ensure_image(&config.image).await;

        let env: Vec<String> = config.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let (exposed, _) = port_bindings(&config.ports, self.debug_ports);
        let host_config = self.host_config(config, restart).await;

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };
        let body = ContainerConfig {
            image: Some(config.image.clone()),
            env: Some(env),
            labels: Some(self.resource_labels(config)),
            cmd: config.cmd.clone(),
            exposed_ports: (!exposed.is_empty()).then_some(exposed),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self.docker.create_container(Some(options), body).await?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        // project networks carry the traffic, not Docker's default bridge
        let disconnect = DisconnectNetworkOptions {
            container: created.id.clone(),
            force: false,
        };
        if let Err(err) = self.docker.disconnect_network("bridge", disconnect).await {
            tracing::debug!(container = %config.name, "bridge disconnect: {}", err);
        }

        let backend = self.backend_container();
        for net in &config.networks {
            self.attach_network(net, &created.id, config.project()).await?;
            if config.name != backend {
                // best effort: the backend joins so it can reach the new
                // service; its absence must not fail the deploy
                let join = ConnectNetworkOptions {
                    container: backend.clone(),
                    endpoint_config: EndpointSettings::default(),
                };
                if let Err(err) = self.docker.connect_network(net, join).await {
                    tracing::debug!(network = net, "backend attach: {}", err);
                }
            }
        }

        Ok(created.id)
    }

    async fn attach_network(
        &self,
        name: &str,
        container: &str,
        project: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let mut net_labels = HashMap::from([(labels::NAMESPACE.to_string(), self.namespace.clone())]);
        if let Some(project) = project {
            net_labels.insert(labels::PROJECT.to_string(), project.to_string());
        }
        self.allocator.ensure(name, net_labels).await?;

        let connect = ConnectNetworkOptions {
            container: container.to_string(),
            endpoint_config: EndpointSettings::default(),
        };
        self.docker.connect_network(name, connect).await?;
        Ok(())
    }

    fn service_from_inspect(&self, inspect: ContainerInspectResponse) -> Service {
        let container_config = inspect.config.unwrap_or_default();
        let resource_labels = container_config.labels.unwrap_or_default();
        let container_name = inspect
            .name
            .as_deref()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let name = resource_labels
            .get(labels::FEATURE_NAME)
            .cloned()
            .unwrap_or_else(|| container_name.clone());

        let state = inspect.state.unwrap_or_default();
        let status = state
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let healthy = match state.health.and_then(|h| h.status) {
            Some(HealthStatusEnum::HEALTHY) => true,
            Some(_) => false,
            None => state.running.unwrap_or(false),
        };

        let exposed_ports: BTreeSet<u16> = container_config
            .exposed_ports
            .unwrap_or_default()
            .keys()
            .filter_map(|key| key.split('/').next()?.parse().ok())
            .collect();
        let connection_port = registry::connection_port(&name, &exposed_ports);

        let created = parse_docker_time(inspect.created.as_deref());
        let started_at = parse_docker_time(state.started_at.as_deref()).or(created);
        let finished_at = parse_docker_time(state.finished_at.as_deref());

        Service {
            id: inspect.id.unwrap_or_default(),
            container_name,
            name,
            image: container_config.image.unwrap_or_default(),
            status,
            healthy,
            connection_port: Some(connection_port),
            exposed_ports,
            configuration: parse_env(container_config.env.as_ref()),
            labels: resource_labels,
            started_at,
            modified_at: finished_at.or(started_at),
        }
    }

    fn job_from_inspect(&self, inspect: ContainerInspectResponse) -> Job {
        let container_config = inspect.config.unwrap_or_default();
        let resource_labels = container_config.labels.unwrap_or_default();
        let container_name = inspect
            .name
            .as_deref()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let name = resource_labels
            .get(labels::FEATURE_NAME)
            .cloned()
            .unwrap_or_else(|| container_name.clone());

        let state = inspect.state.unwrap_or_default();
        let finished_at = parse_docker_time(state.finished_at.as_deref());
        let status = if state.running.unwrap_or(false) {
            JobStatus::Running
        } else if state.exit_code.unwrap_or(-1) == 0 {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };

        Job {
            id: inspect.id.unwrap_or_default(),
            container_name,
            name,
            image: container_config.image.unwrap_or_default(),
            status,
            exit_code: state.exit_code,
            configuration: parse_env(container_config.env.as_ref()),
            labels: resource_labels,
            started_at: parse_docker_time(state.started_at.as_deref()),
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
        config.networks.push(self.core_network());
        config
    }

    async fn deploy_service_impl(&self, config: DeploymentConfig) -> Result<Service, RuntimeError> {
        let id = self.create_and_start(&config, true).await?;
        let inspect = self.docker.inspect_container(&id, None).await?;
        Ok(self.service_from_inspect(inspect))
    }

    async fn collect_logs(&self, id: &str) -> Result<String, RuntimeError> {
        let inspect = self.find_container(id, None).await?;
        let native_id = inspect.id.ok_or_else(|| RuntimeError::not_found(id))?;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(&native_id, Some(options));
        let mut combined = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    combined.push_str(&String::from_utf8_lossy(&output.into_bytes()));
                }
                Err(err) => {
                    tracing::warn!(id, "log stream ended: {}", err);
                    break;
                }
            }
        }
        if combined.is_empty() {
            Ok(NO_LOGS.to_string())
        } else {
            Ok(combined)
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[tracing::instrument(skip(self, config), fields(name = %config.name, image = %config.image))]
    async fn deploy_service(&self, config: DeploymentConfig) -> Result<Service, RuntimeError> {
        with_deadline(self.op_timeout, "deploy service", self.deploy_service_impl(config)).await
    }

    #[tracing::instrument(skip(self, config), fields(name = %config.name, image = %config.image))]
    async fn deploy_job(&self, config: DeploymentConfig) -> Result<Job, RuntimeError> {
        with_deadline(self.op_timeout, "deploy job", async {
            let id = self.create_and_start(&config, false).await?;
            let inspect = self.docker.inspect_container(&id, None).await?;
            Ok(self.job_from_inspect(inspect))
        })
        .await
    }

    async fn get_service(&self, id: &str, project: Option<&str>) -> Result<Service, RuntimeError> {
        with_deadline(self.op_timeout, "get service", async {
            let inspect = self.find_container(id, project).await?;
            Ok(self.service_from_inspect(inspect))
        })
        .await
    }

    async fn get_services(&self, project: Option<&str>) -> Result<Vec<Service>, RuntimeError> {
        with_deadline(self.op_timeout, "list services", async {
            let query = ResourceQuery::namespaced(&self.namespace).project(project);
            let mut services = Vec::new();
            for summary in self.list_by(&query, false).await? {
                let summary_labels = summary.labels.unwrap_or_default();
                if summary_labels.get(labels::FEATURE_TYPE).map(String::as_str)
                    == Some(FeatureKind::ProjectJob.as_label())
                {
                    continue;
                }
                let Some(native_id) = summary.id else { continue };
                let inspect = self.docker.inspect_container(&native_id, None).await?;
                services.push(self.service_from_inspect(inspect));
            }
            Ok(services)
        })
        .await
    }

    async fn get_service_logs(&self, id: &str) -> Result<String, RuntimeError> {
        with_deadline(self.op_timeout, "service logs", self.collect_logs(id)).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_service(
        &self,
        id: &str,
        remove_volumes: bool,
        project: Option<&str>,
    ) -> Result<(), RuntimeError> {
        with_deadline(self.op_timeout, "delete service", async {
            let inspect = self.find_container(id, project).await?;
            let native_id = inspect.id.ok_or_else(|| RuntimeError::not_found(id))?;

            if !remove_volumes {
                // stateful volumes survive; give the process time to flush
                let stop = StopContainerOptions {
                    t: self.stop_grace.as_secs() as i64,
                };
                if let Err(err) = self.docker.stop_container(&native_id, Some(stop)).await {
                    tracing::warn!(id, "graceful stop: {}", err);
                }
            }

            let remove = RemoveContainerOptions {
                force: remove_volumes,
                v: remove_volumes,
                ..Default::default()
            };
            self.docker.remove_container(&native_id, Some(remove)).await?;
            Ok(())
        })
        .await
    }

    async fn get_job(&self, id: &str, project: Option<&str>) -> Result<Job, RuntimeError> {
        with_deadline(self.op_timeout, "get job", async {
            let inspect = self.find_container(id, project).await?;
            Ok(self.job_from_inspect(inspect))
        })
        .await
    }

    async fn get_jobs(&self, project: &str) -> Result<Vec<Job>, RuntimeError> {
        with_deadline(self.op_timeout, "list jobs", async {
            let query = ResourceQuery::namespaced(&self.namespace).project(Some(project));
            let mut jobs = Vec::new();
            for summary in self.list_by(&query, false).await? {
                let summary_labels = summary.labels.unwrap_or_default();
                if summary_labels.get(labels::FEATURE_TYPE).map(String::as_str)
                    != Some(FeatureKind::ProjectJob.as_label())
                {
                    continue;
                }
                let Some(native_id) = summary.id else { continue };
                let inspect = self.docker.inspect_container(&native_id, None).await?;
                jobs.push(self.job_from_inspect(inspect));
            }
            Ok(jobs)
        })
        .await
    }

    async fn get_job_logs(&self, id: &str) -> Result<String, RuntimeError> {
        with_deadline(self.op_timeout, "job logs", self.collect_logs(id)).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_job(&self, id: &str, project: Option<&str>) -> Result<(), RuntimeError> {
        with_deadline(self.op_timeout, "delete job", async {
            let inspect = self.find_container(id, project).await?;
            let native_id = inspect.id.ok_or_else(|| RuntimeError::not_found(id))?;
            let remove = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            self.docker.remove_container(&native_id, Some(remove)).await?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn create_project_resources(&self, project: &str) -> Result<(), RuntimeError> {
        with_deadline(self.op_timeout, "create project resources", async {
            let net = self.project_network(project);
            let net_labels = HashMap::from([
                (labels::NAMESPACE.to_string(), self.namespace.clone()),
                (labels::PROJECT.to_string(), project.to_string()),
            ]);
            self.allocator.ensure(&net, net_labels).await?;

            let join = ConnectNetworkOptions {
                container: self.backend_container(),
                endpoint_config: EndpointSettings::default(),
            };
            if let Err(err) = self.docker.connect_network(&net, join).await {
                tracing::debug!(network = %net, "backend attach: {}", err);
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
            let mut clean = true;

            for summary in self.list_by(&query, false).await? {
                let Some(native_id) = summary.id else { continue };
                let remove = RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                };
                if let Err(err) = self.docker.remove_container(&native_id, Some(remove)).await {
                    tracing::error!(container = %native_id, "project cleanup: {}", err);
                    clean = false;
                }
            }

            let mut filters = HashMap::new();
            filters.insert("label".to_string(), query.label_pairs());
            let networks = self
                .docker
                .list_networks(Some(ListNetworksOptions { filters }))
                .await?;
            for net in networks {
                let Some(name) = net.name else { continue };
                if let Err(err) = self.docker.remove_network(&name).await {
                    tracing::error!(network = %name, "project cleanup: {}", err);
                    clean = false;
                }
            }

            Ok(clean)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn shutdown_disk_exceeding_containers(
        &self,
        dry_run: bool,
    ) -> Result<Vec<String>, RuntimeError> {
        with_deadline(self.op_timeout, "disk sweep", async {
            if self.max_disk_gb < 0 {
                // sentinel: the sweep is disabled
                return Ok(Vec::new());
            }

            let query = ResourceQuery::namespaced(&self.namespace);
            let summaries = self.list_by(&query, true).await?;
            let candidates = eviction_candidates(&summaries, self.max_disk_gb);

            if !dry_run {
                for name in &candidates {
                    // workspaces come back on next access via the workspace
                    // manager; networks and labels are not re-provisioned here
                    let remove = RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    };
                    if let Err(err) = self.docker.remove_container(name, Some(remove)).await {
                        tracing::error!(container = %name, "eviction: {}", err);
                    }
                }
            }
            Ok(candidates)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn install_lab(&self) -> Result<(), RuntimeError> {
        let net_labels = HashMap::from([(labels::NAMESPACE.to_string(), self.namespace.clone())]);
        self.allocator.ensure(&self.core_network(), net_labels).await?;

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
            match self.delete_service(&name, true, None).await {
                Ok(()) => tracing::info!(service = core.name, "core service removed"),
                Err(RuntimeError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        if let Err(err) = self.docker.remove_network(&self.core_network()).await {
            tracing::debug!("core network removal: {}", err);
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
            // pre-pull so the swap window stays short
            self.ensure_image(core.image).await;
            let name = DeploymentConfig::generate_name(core.name, &self.namespace);
            match self.delete_service(&name, false, None).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
            self.deploy_service_impl(self.core_config(core)).await?;
            tracing::info!(service = core.name, "core service updated");
        }
        Ok(())
    }
}

/// Exposed-port set and explicit host bindings for the container create
/// call. Ports without a host side are only published in debug mode, on a
/// random host port.
fn port_bindings(
    ports: &[PortMapping],
    debug_ports: bool,
) -> (
    HashMap<String, HashMap<(), ()>>,
    HashMap<String, Option<Vec<PortBinding>>>,
) {
    let mut exposed = HashMap::new();
    let mut bindings = HashMap::new();
    for port in ports {
        let key = format!("{}/tcp", port.container);
        exposed.insert(key.clone(), HashMap::new());
        match port.host {
            Some(host) => {
                bindings.insert(
                    key,
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host.to_string()),
                    }]),
                );
            }
            None if debug_ports => {
                bindings.insert(
                    key,
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: None,
                    }]),
                );
            }
            None => {}
        }
    }
    (exposed, bindings)
}

/// Docker bind list: the simple-volume convenience first, then explicit
/// mounts. NFS and secret mounts have no Docker translation here and are
/// skipped with a warning; a PVC mount degrades to a named volume.
fn bind_list(config: &DeploymentConfig) -> Vec<String> {
    let mut binds = Vec::new();
    if let Some(path) = &config.volume_path {
        binds.push(format!("{}-data:{}", config.name, path));
    }
    for mount in &config.mounts {
        match mount {
            MountSpec::Bind { .. } | MountSpec::Volume { .. } => binds.push(mount.encode()),
            MountSpec::Pvc { claim, target } => binds.push(format!("{}:{}", claim, target)),
            other => {
                tracing::warn!(mount = %other.encode(), "mount kind unsupported on Docker, skipped");
            }
        }
    }
    binds
}

/// Candidate selection for the eviction sweep. Shared by dry and real
/// runs, so a dry run reports exactly the set a real run would remove.
fn eviction_candidates(summaries: &[ContainerSummary], ceiling_gb: i64) -> Vec<String> {
    let mut candidates = Vec::new();
    for summary in summaries {
        let summary_labels = summary.labels.clone().unwrap_or_default();
        if summary_labels.get(labels::FEATURE_TYPE).map(String::as_str)
            == Some(FeatureKind::CoreService.as_label())
        {
            continue;
        }
        if !exceeds_ceiling(summary.size_rw, ceiling_gb) {
            continue;
        }
        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .or_else(|| summary.id.clone());
        if let Some(name) = name {
            candidates.push(name);
        }
    }
    candidates
}

fn exceeds_ceiling(size_rw: Option<i64>, ceiling_gb: i64) -> bool {
    if ceiling_gb < 0 {
        return false;
    }
    size_rw.unwrap_or(0) > ceiling_gb * 1024 * 1024 * 1024
}

fn parse_env(env: Option<&Vec<String>>) -> HashMap<String, String> {
    env.into_iter()
        .flatten()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Docker reports zero timestamps as year 0001; those are "not set".
fn parse_docker_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = value?;
    if raw.is_empty() || raw.starts_with("0001-") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(s: &str) -> PortMapping {
        s.parse().unwrap()
    }

    #[test]
    fn explicit_pairs_become_host_bindings() {
        let (exposed, bindings) = port_bindings(&[port("80:8080"), port("9000")], false);
        assert_eq!(exposed.len(), 2);
        assert_eq!(bindings.len(), 1);
        let binding = bindings["8080/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("80"));
    }

    #[test]
    fn debug_mode_publishes_remaining_ports_randomly() {
        let (_, bindings) = port_bindings(&[port("9000")], true);
        let binding = bindings["9000/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port, None);
    }

    #[test]
    fn volume_path_becomes_a_named_data_volume() {
        let mut config = DeploymentConfig::new("img", "mlspace-minio", FeatureKind::CoreService);
        config.volume_path = Some("/data".to_string());
        assert_eq!(bind_list(&config), vec!["mlspace-minio-data:/data"]);
    }

    #[test]
    fn bind_mounts_pass_through_and_nfs_is_skipped() {
        let mut config = DeploymentConfig::new("img", "svc", FeatureKind::ProjectService);
        config.mounts = vec![
            MountSpec::decode_bind("/host:/container:ro").unwrap(),
            MountSpec::decode_nfs("10.0.0.1@/exports:/mnt").unwrap(),
        ];
        assert_eq!(bind_list(&config), vec!["/host:/container:ro"]);
    }

    #[test]
    fn eviction_skips_core_services_and_small_containers() {
        let gb = 1024 * 1024 * 1024;
        let summary = |name: &str, feature: &str, size_rw: i64| ContainerSummary {
            names: Some(vec![format!("/{}", name)]),
            labels: Some(HashMap::from([(
                labels::FEATURE_TYPE.to_string(),
                feature.to_string(),
            )])),
            size_rw: Some(size_rw),
            ..Default::default()
        };
        let summaries = vec![
            summary("mlspace-minio", "core-service", 90 * gb),
            summary("ws-jane", "workspace", 12 * gb),
            summary("ws-omar", "workspace", 2 * gb),
        ];

        let candidates = eviction_candidates(&summaries, 10);
        assert_eq!(candidates, vec!["ws-jane"]);
    }

    #[test]
    fn disk_ceiling_comparison() {
        let two_gb = 2 * 1024 * 1024 * 1024;
        assert!(exceeds_ceiling(Some(two_gb + 1), 2));
        assert!(!exceeds_ceiling(Some(two_gb), 2));
        assert!(!exceeds_ceiling(None, 2));
        // negative ceiling disables the sweep
        assert!(!exceeds_ceiling(Some(i64::MAX), -1));
    }

    #[test]
    fn env_pairs_parse_into_a_map() {
        let env = vec!["A=1".to_string(), "B=two=parts".to_string(), "bad".to_string()];
        let parsed = parse_env(Some(&env));
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["B"], "two=parts");
    }

    #[test]
    fn zero_timestamps_are_not_set() {
        assert!(parse_docker_time(Some("0001-01-01T00:00:00Z")).is_none());
        assert!(parse_docker_time(Some("")).is_none());
        assert!(parse_docker_time(Some("2024-03-01T10:00:00.000000000Z")).is_some());
    }
}
