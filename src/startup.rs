//! Wiring: settings to a running control plane.

use crate::configuration::{BackendKind, Settings};
use crate::db::PostgresScheduleStore;
use crate::projects::ProjectRegistry;
use crate::runtime::{ContainerRuntime, DockerRuntime, KubernetesRuntime, RuntimeError};
use crate::scheduler::store::{InMemoryScheduleStore, ScheduleStore};
use crate::scheduler::JobScheduler;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

pub struct Application {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub scheduler: Arc<JobScheduler>,
}

pub async fn build_runtime(settings: &Settings) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
    match settings.backend {
        BackendKind::Docker => Ok(Arc::new(DockerRuntime::connect(settings)?)),
        BackendKind::Kubernetes => Ok(Arc::new(KubernetesRuntime::connect(settings).await?)),
    }
}

pub fn build_store(pool: Option<PgPool>) -> Arc<dyn ScheduleStore> {
    match pool {
        Some(pool) => Arc::new(PostgresScheduleStore::new(pool)),
        None => Arc::new(InMemoryScheduleStore::new()),
    }
}

pub async fn build(
    settings: &Settings,
    pool: Option<PgPool>,
    projects: Arc<dyn ProjectRegistry>,
) -> Result<Application, RuntimeError> {
    let runtime = build_runtime(settings).await?;
    let store = build_store(pool);
    let scheduler = Arc::new(JobScheduler::new(
        runtime.clone(),
        store,
        projects,
        Duration::from_secs(settings.scheduler.interval_secs),
    ));
    Ok(Application { runtime, scheduler })
}
