//! Container runtime abstraction.
//!
//! One orchestration contract over two operationally different platforms:
//! a standalone Docker daemon and a Kubernetes cluster. Each backend owns
//! its own native-client wiring; callers only see the `ContainerRuntime`
//! trait and the shared vocabulary (service, job, workspace, project).

pub mod config;
pub mod docker;
pub mod error;
pub mod kubernetes;
pub mod query;
pub mod registry;

pub use config::{DeploymentConfig, MountSpec, PortMapping};
pub use docker::DockerRuntime;
pub use error::RuntimeError;
pub use kubernetes::KubernetesRuntime;

use crate::models::{Job, Service};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Label keys scoping every resource this platform creates.
pub mod labels {
    /// Which installation owns the resource.
    pub const NAMESPACE: &str = "mlspace.namespace";
    /// Role of the resource, see [`FeatureKind`](super::FeatureKind).
    pub const FEATURE_TYPE: &str = "mlspace.feature.type";
    /// Human-facing name the resource was deployed under.
    pub const FEATURE_NAME: &str = "mlspace.feature.name";
    /// Owning project, when project-scoped.
    pub const PROJECT: &str = "mlspace.project";
}

/// Sentinel returned when a resource has no logs. Missing logs are not an
/// error condition.
pub const NO_LOGS: &str = "[no logs available]";

/// Deadline wrapper applied to every backend call. Orchestration calls can
/// hang on an unresponsive daemon or API server; a timeout surfaces as the
/// backend being unavailable.
pub(crate) async fn with_deadline<T, F>(
    timeout: std::time::Duration,
    what: &str,
    fut: F,
) -> Result<T, RuntimeError>
where
    F: std::future::Future<Output = Result<T, RuntimeError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Unavailable(format!(
            "{} did not complete within {}s",
            what,
            timeout.as_secs()
        ))),
    }
}

/// Classifies a deployed resource's role within the platform.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureKind {
    CoreService,
    ProjectService,
    ProjectJob,
    Workspace,
}

impl FeatureKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            FeatureKind::CoreService => "core-service",
            FeatureKind::ProjectService => "project-service",
            FeatureKind::ProjectJob => "project-job",
            FeatureKind::Workspace => "workspace",
        }
    }
}

/// The orchestration contract both backends implement.
///
/// Resolution order for `get_*` is always: direct native-id lookup first,
/// then a label query on the feature name, optionally narrowed to a
/// project. Zero or multiple matches surface as
/// [`RuntimeError::NotFound`]; ambiguity is never silently resolved.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a long-running service. Fails with
    /// [`RuntimeError::Conflict`] when the name already exists in scope.
    async fn deploy_service(&self, config: DeploymentConfig) -> Result<Service, RuntimeError>;

    /// Same creation path as a service, but non-restarting and
    /// run-to-completion.
    async fn deploy_job(&self, config: DeploymentConfig) -> Result<Job, RuntimeError>;

    async fn get_service(&self, id: &str, project: Option<&str>)
        -> Result<Service, RuntimeError>;

    /// List services by label. `None` means platform-wide.
    async fn get_services(&self, project: Option<&str>) -> Result<Vec<Service>, RuntimeError>;

    /// Combined stdout+stderr. Returns [`NO_LOGS`] when the backend has
    /// nothing, never an error for that case.
    async fn get_service_logs(&self, id: &str) -> Result<String, RuntimeError>;

    /// `remove_volumes=false` stops gracefully within a bounded grace
    /// period before removal; `true` force-removes immediately.
    async fn delete_service(
        &self,
        id: &str,
        remove_volumes: bool,
        project: Option<&str>,
    ) -> Result<(), RuntimeError>;

    async fn get_job(&self, id: &str, project: Option<&str>) -> Result<Job, RuntimeError>;

    async fn get_jobs(&self, project: &str) -> Result<Vec<Job>, RuntimeError>;

    async fn get_job_logs(&self, id: &str) -> Result<String, RuntimeError>;

    async fn delete_job(&self, id: &str, project: Option<&str>) -> Result<(), RuntimeError>;

    /// Provision everything a project needs (isolated network or
    /// equivalent). Safe to call when the resources already exist.
    async fn create_project_resources(&self, project: &str) -> Result<(), RuntimeError>;

    /// Tear down everything labelled with the project. Partial cleanup is
    /// preferred over aborting early; per-step failures are logged.
    async fn delete_project_resources(&self, project: &str) -> Result<bool, RuntimeError>;

    /// Docker-only eviction sweep for containers exceeding the configured
    /// disk ceiling. Returns the candidate names; `dry_run` collects
    /// without removing. Kubernetes rejects this with
    /// [`RuntimeError::Unsupported`].
    async fn shutdown_disk_exceeding_containers(
        &self,
        dry_run: bool,
    ) -> Result<Vec<String>, RuntimeError>;

    /// Idempotent bring-up of the platform's own core services.
    /// "Already exists" is success.
    async fn install_lab(&self) -> Result<(), RuntimeError>;

    async fn uninstall_lab(&self) -> Result<(), RuntimeError>;

    /// Upgrade core services in place; `backend_only` limits the rollout
    /// to the platform backend itself.
    async fn update_lab(&self, backend_only: bool) -> Result<(), RuntimeError>;
}
