mod common;

use common::FakeRuntime;
use mlspace::models::JobStatus;
use mlspace::runtime::{ContainerRuntime, DeploymentConfig, FeatureKind, RuntimeError};

fn trainer_config() -> DeploymentConfig {
    let mut config =
        DeploymentConfig::new("trainer:v2", "mlspace-trainer", FeatureKind::ProjectService)
            .with_feature_name("trainer")
            .with_project("genomics");
    config.env.insert("MODEL".to_string(), "resnet".to_string());
    config.ports = vec!["8888".parse().unwrap()];
    config
}

#[tokio::test]
async fn deploy_then_get_preserves_image_name_and_configuration() {
    let runtime = FakeRuntime::new();
    let config = trainer_config();
    runtime.deploy_service(config.clone()).await.unwrap();

    // by feature name (label path) and by native name (direct path)
    for id in ["trainer", "mlspace-trainer"] {
        let fetched = runtime.get_service(id, None).await.unwrap();
        assert_eq!(fetched.image, config.image);
        assert_eq!(fetched.name, "trainer");
        assert_eq!(fetched.configuration, config.env);
    }
}

#[tokio::test]
async fn duplicate_names_conflict() {
    let runtime = FakeRuntime::new();
    runtime.deploy_service(trainer_config()).await.unwrap();
    assert!(matches!(
        runtime.deploy_service(trainer_config()).await,
        Err(RuntimeError::Conflict(_))
    ));
}

#[tokio::test]
async fn delete_succeeds_exactly_once() {
    let runtime = FakeRuntime::new();
    runtime.deploy_service(trainer_config()).await.unwrap();

    runtime
        .delete_service("mlspace-trainer", false, None)
        .await
        .unwrap();
    assert!(matches!(
        runtime.delete_service("mlspace-trainer", false, None).await,
        Err(RuntimeError::NotFound(_))
    ));
}

#[tokio::test]
async fn a_plain_job_runs_to_completion() {
    let runtime = FakeRuntime::new();
    let config = DeploymentConfig::new(
        "simple-demo-job:latest",
        "mlspace-demo-run",
        FeatureKind::ProjectJob,
    )
    .with_project("genomics");
    runtime.deploy_job(config).await.unwrap();

    let job = runtime.get_job("mlspace-demo-run", None).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.exit_code, Some(0));
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn project_scoped_lookup_rejects_other_projects() {
    let runtime = FakeRuntime::new();
    runtime.deploy_service(trainer_config()).await.unwrap();

    assert!(runtime.get_service("trainer", Some("genomics")).await.is_ok());
    assert!(matches!(
        runtime.get_service("trainer", Some("vision")).await,
        Err(RuntimeError::NotFound(_))
    ));
}
