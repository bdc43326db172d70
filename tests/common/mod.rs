use async_trait::async_trait;
use chrono::Utc;
use mlspace::models::{Job, JobStatus, Service};
use mlspace::runtime::{labels, ContainerRuntime, DeploymentConfig, RuntimeError, NO_LOGS};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;

/// In-memory stand-in for a container backend. Deployments land in maps,
/// jobs finish immediately with exit code 0, and the resolution rules
/// (direct name, then feature-name label, strict one match) mirror the
/// real backends.
#[derive(Default)]
pub struct FakeRuntime {
    pub state: Mutex<FakeState>,
}

#[derive(Default)]
pub struct FakeState {
    pub services: HashMap<String, Service>,
    pub jobs: HashMap<String, Job>,
}

/// Deploys of this image fail with a backend error; used to prove the
/// scheduler isolates per-schedule failures.
pub const BROKEN_IMAGE: &str = "broken:latest";

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn jobs_for_feature(&self, feature_name: &str) -> Vec<Job> {
        self.state
            .lock()
            .await
            .jobs
            .values()
            .filter(|job| {
                job.labels.get(labels::FEATURE_NAME).map(String::as_str) == Some(feature_name)
            })
            .cloned()
            .collect()
    }

    fn labels_of(config: &DeploymentConfig) -> HashMap<String, String> {
        let mut resource_labels = config.labels.clone();
        resource_labels.insert(labels::NAMESPACE.to_string(), "mlspace".to_string());
        resource_labels.insert(
            labels::FEATURE_TYPE.to_string(),
            config.feature.as_label().to_string(),
        );
        resource_labels
            .entry(labels::FEATURE_NAME.to_string())
            .or_insert_with(|| config.name.clone());
        resource_labels
    }
}

fn resolve<'a, T>(
    by_name: Option<&'a T>,
    matches: Vec<&'a T>,
    id: &str,
) -> Result<&'a T, RuntimeError> {
    if let Some(found) = by_name {
        return Ok(found);
    }
    match matches.len() {
        1 => Ok(matches[0]),
        0 => Err(RuntimeError::not_found(id)),
        _ => Err(RuntimeError::not_found(id)),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn deploy_service(&self, config: DeploymentConfig) -> Result<Service, RuntimeError> {
        let mut state = self.state.lock().await;
        if state.services.contains_key(&config.name) {
            return Err(RuntimeError::conflict(&config.name));
        }
        let resource_labels = Self::labels_of(&config);
        let service = Service {
            id: format!("fake-{}", config.name),
            container_name: config.name.clone(),
            name: resource_labels[labels::FEATURE_NAME].clone(),
            image: config.image.clone(),
            status: "running".to_string(),
            healthy: true,
            connection_port: config.ports.first().map(|p| p.container),
            exposed_ports: config.ports.iter().map(|p| p.container).collect::<BTreeSet<_>>(),
            configuration: config.env.clone(),
            labels: resource_labels,
            started_at: Some(Utc::now()),
            modified_at: Some(Utc::now()),
        };
        state.services.insert(config.name.clone(), service.clone());
        Ok(service)
    }

    async fn deploy_job(&self, config: DeploymentConfig) -> Result<Job, RuntimeError> {
        if config.image == BROKEN_IMAGE {
            return Err(RuntimeError::Unavailable("image cannot be pulled".to_string()));
        }
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&config.name) {
            return Err(RuntimeError::conflict(&config.name));
        }
        let resource_labels = Self::labels_of(&config);
        let job = Job {
            id: format!("fake-{}", config.name),
            container_name: config.name.clone(),
            name: resource_labels[labels::FEATURE_NAME].clone(),
            image: config.image.clone(),
            status: JobStatus::Succeeded,
            exit_code: Some(0),
            configuration: config.env.clone(),
            labels: resource_labels,
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
        };
        state.jobs.insert(config.name.clone(), job.clone());
        Ok(job)
    }

    async fn get_service(&self, id: &str, project: Option<&str>) -> Result<Service, RuntimeError> {
        let state = self.state.lock().await;
        let matches: Vec<_> = state
            .services
            .values()
            .filter(|svc| svc.labels.get(labels::FEATURE_NAME).map(String::as_str) == Some(id))
            .filter(|svc| match project {
                Some(project) => {
                    svc.labels.get(labels::PROJECT).map(String::as_str) == Some(project)
                }
                None => true,
            })
            .collect();
        resolve(state.services.get(id), matches, id).map(|svc| svc.clone())
    }

    async fn get_services(&self, project: Option<&str>) -> Result<Vec<Service>, RuntimeError> {
        let state = self.state.lock().await;
        Ok(state
            .services
            .values()
            .filter(|svc| match project {
                Some(project) => {
                    svc.labels.get(labels::PROJECT).map(String::as_str) == Some(project)
                }
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_service_logs(&self, _id: &str) -> Result<String, RuntimeError> {
        Ok(NO_LOGS.to_string())
    }

    async fn delete_service(
        &self,
        id: &str,
        _remove_volumes: bool,
        _project: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state
            .services
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::not_found(id))
    }

    async fn get_job(&self, id: &str, project: Option<&str>) -> Result<Job, RuntimeError> {
        let state = self.state.lock().await;
        let matches: Vec<_> = state
            .jobs
            .values()
            .filter(|job| job.labels.get(labels::FEATURE_NAME).map(String::as_str) == Some(id))
            .filter(|job| match project {
                Some(project) => {
                    job.labels.get(labels::PROJECT).map(String::as_str) == Some(project)
                }
                None => true,
            })
            .collect();
        resolve(state.jobs.get(id), matches, id).map(|job| job.clone())
    }

    async fn get_jobs(&self, project: &str) -> Result<Vec<Job>, RuntimeError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| {
                job.labels.get(labels::PROJECT).map(String::as_str) == Some(project)
            })
            .cloned()
            .collect())
    }

    async fn get_job_logs(&self, _id: &str) -> Result<String, RuntimeError> {
        Ok(NO_LOGS.to_string())
    }

    async fn delete_job(&self, id: &str, _project: Option<&str>) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state
            .jobs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::not_found(id))
    }

    async fn create_project_resources(&self, _project: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn delete_project_resources(&self, project: &str) -> Result<bool, RuntimeError> {
        let mut state = self.state.lock().await;
        state
            .services
            .retain(|_, svc| svc.labels.get(labels::PROJECT).map(String::as_str) != Some(project));
        state
            .jobs
            .retain(|_, job| job.labels.get(labels::PROJECT).map(String::as_str) != Some(project));
        Ok(true)
    }

    async fn shutdown_disk_exceeding_containers(
        &self,
        _dry_run: bool,
    ) -> Result<Vec<String>, RuntimeError> {
        Ok(Vec::new())
    }

    async fn install_lab(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn uninstall_lab(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn update_lab(&self, _backend_only: bool) -> Result<(), RuntimeError> {
        Ok(())
    }
}
