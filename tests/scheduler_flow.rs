mod common;

use chrono::{Duration as Span, Utc};
use common::{FakeRuntime, BROKEN_IMAGE};
use mlspace::models::ScheduledJob;
use mlspace::projects::StaticProjectRegistry;
use mlspace::runtime::RuntimeError;
use mlspace::scheduler::store::{InMemoryScheduleStore, ScheduleStore};
use mlspace::scheduler::JobScheduler;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    runtime: Arc<FakeRuntime>,
    store: Arc<InMemoryScheduleStore>,
    scheduler: JobScheduler,
}

async fn harness() -> Harness {
    let runtime = Arc::new(FakeRuntime::new());
    let store = Arc::new(InMemoryScheduleStore::new());
    let projects = Arc::new(StaticProjectRegistry::new());
    projects.register("genomics").await;
    projects.register("vision").await;
    let scheduler = JobScheduler::new(
        runtime.clone(),
        store.clone(),
        projects,
        Duration::from_secs(60),
    );
    Harness {
        runtime,
        store,
        scheduler,
    }
}

async fn insert_anchored(
    store: &InMemoryScheduleStore,
    name: &str,
    image: &str,
    schedule: &str,
    anchor_secs_ago: i64,
) -> ScheduledJob {
    let mut template = ScheduledJob::new(
        "genomics".to_string(),
        image.to_string(),
        name.to_string(),
        HashMap::from([("EPOCHS".to_string(), "5".to_string())]),
        schedule.to_string(),
    );
    template.last_execution = Some(Utc::now() - Span::seconds(anchor_secs_ago));
    store.insert(template).await.unwrap()
}

#[tokio::test]
async fn minutely_schedule_fires_once_and_advances_the_anchor() {
    let h = harness().await;
    let template =
        insert_anchored(&h.store, "nightly-train", "trainer:v1", "*/1 * * * *", 61).await;

    let now = Utc::now();
    assert_eq!(h.scheduler.run_pending(now).await, 1);

    let runs = h.runtime.jobs_for_feature("nightly-train").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].configuration.get("EPOCHS").map(String::as_str), Some("5"));
    // each firing is a fresh run, suffixed past the template name
    assert!(runs[0].container_name.starts_with("nightly-train-"));
    assert_ne!(runs[0].container_name, "nightly-train");

    let stored = h.store.find_by_id(template.id).await.unwrap().unwrap();
    assert_eq!(stored.last_execution, Some(now));

    // the advanced anchor means nothing further is due right now
    assert_eq!(h.scheduler.run_pending(now).await, 0);
}

#[tokio::test]
async fn schedule_without_an_anchor_never_fires() {
    let h = harness().await;
    let template = ScheduledJob::new(
        "genomics".to_string(),
        "trainer:v1".to_string(),
        "orphan".to_string(),
        HashMap::new(),
        "*/1 * * * *".to_string(),
    );
    assert!(template.last_execution.is_none());
    h.store.insert(template).await.unwrap();

    let far_future = Utc::now() + Span::days(7);
    assert_eq!(h.scheduler.run_pending(far_future).await, 0);
    assert_eq!(h.runtime.job_count().await, 0);
}

#[tokio::test]
async fn unparseable_cron_is_skipped_but_never_removed() {
    let h = harness().await;
    insert_anchored(&h.store, "broken-cron", "trainer:v1", "every so often", 120).await;
    insert_anchored(&h.store, "good-cron", "trainer:v1", "*/1 * * * *", 120).await;

    assert_eq!(h.scheduler.run_pending(Utc::now()).await, 1);
    // the malformed schedule is still there for an operator to fix
    assert_eq!(h.store.find_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn one_failing_deploy_does_not_abort_the_sweep() {
    let h = harness().await;
    let broken = insert_anchored(&h.store, "aa-broken", BROKEN_IMAGE, "*/1 * * * *", 90).await;
    let good = insert_anchored(&h.store, "zz-good", "trainer:v1", "*/1 * * * *", 90).await;

    let now = Utc::now();
    assert_eq!(h.scheduler.run_pending(now).await, 1);

    // the failed schedule keeps its anchor and retries next tick; the
    // healthy one advanced
    let broken_stored = h.store.find_by_id(broken.id).await.unwrap().unwrap();
    assert!(broken_stored.last_execution.unwrap() < now);
    let good_stored = h.store.find_by_id(good.id).await.unwrap().unwrap();
    assert_eq!(good_stored.last_execution, Some(now));
}

#[tokio::test]
async fn adding_a_schedule_anchors_at_creation_and_fires_next_minute() {
    let h = harness().await;
    let added = h
        .scheduler
        .add_scheduled_job(
            "genomics",
            "simple-demo-job:latest",
            "demo",
            HashMap::new(),
            "*/1 * * * *",
        )
        .await
        .unwrap();
    assert!(added.id > 0);
    assert!(added.last_execution.is_some());

    // pin the anchor so the minute arithmetic below is deterministic
    let t0 = Utc::now();
    h.store.update_last_execution(added.id, t0).await.unwrap();

    // anchored at "now": no backlog run at creation time
    assert_eq!(h.scheduler.run_pending(t0).await, 0);

    // ...but the next due minute fires, and the minute after that again
    assert_eq!(h.scheduler.run_pending(t0 + Span::seconds(61)).await, 1);
    assert_eq!(h.scheduler.run_pending(t0 + Span::seconds(122)).await, 1);

    let runs = h.runtime.jobs_for_feature("demo").await;
    assert_eq!(runs.len(), 2);
    assert_ne!(runs[0].container_name, runs[1].container_name);
}

#[tokio::test]
async fn malformed_cron_and_unknown_project_are_rejected_on_add() {
    let h = harness().await;
    let bad_cron = h
        .scheduler
        .add_scheduled_job("genomics", "img", "x", HashMap::new(), "* * *")
        .await;
    assert!(matches!(bad_cron, Err(RuntimeError::Validation(_))));

    let bad_project = h
        .scheduler
        .add_scheduled_job("no-such-project", "img", "x", HashMap::new(), "*/1 * * * *")
        .await;
    assert!(matches!(bad_project, Err(RuntimeError::NotFound(_))));
}

#[tokio::test]
async fn deletion_is_scoped_to_the_owning_project() {
    let h = harness().await;
    let added = h
        .scheduler
        .add_scheduled_job("genomics", "trainer:v1", "weekly", HashMap::new(), "0 3 * * 1")
        .await
        .unwrap();

    // another project cannot see, let alone delete, the schedule
    assert!(matches!(
        h.scheduler.delete_scheduled_job("vision", added.id).await,
        Err(RuntimeError::NotFound(_))
    ));
    assert!(h.scheduler.get_scheduled_jobs("vision").await.unwrap().is_empty());

    h.scheduler
        .delete_scheduled_job("genomics", added.id)
        .await
        .unwrap();
    assert!(matches!(
        h.scheduler.delete_scheduled_job("genomics", added.id).await,
        Err(RuntimeError::NotFound(_))
    ));
}

#[tokio::test]
async fn listing_filters_by_project() {
    let h = harness().await;
    h.scheduler
        .add_scheduled_job("genomics", "a:1", "a", HashMap::new(), "*/5 * * * *")
        .await
        .unwrap();
    h.scheduler
        .add_scheduled_job("vision", "b:1", "b", HashMap::new(), "*/5 * * * *")
        .await
        .unwrap();

    let genomics = h.scheduler.get_scheduled_jobs("genomics").await.unwrap();
    assert_eq!(genomics.len(), 1);
    assert_eq!(genomics[0].name, "a");
}
