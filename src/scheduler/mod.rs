//! Cron-driven job scheduler.
//!
//! Keeps persisted job templates running without an external cron daemon:
//! once per interval every anchored schedule is evaluated against its last
//! execution, and due templates are deployed through the active container
//! runtime. One failing schedule never aborts the sweep, and ticks never
//! overlap.

pub mod store;

use crate::models::{Job, ScheduledJob};
use crate::projects::ProjectRegistry;
use crate::runtime::{ContainerRuntime, DeploymentConfig, FeatureKind, RuntimeError};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use store::ScheduleStore;
use tokio::sync::Mutex;

/// Parse a 5-field Unix cron expression (minute granularity). The
/// evaluator wants a seconds field, so one is pinned in front.
fn parse_cron(expr: &str) -> Result<Schedule, RuntimeError> {
    if expr.split_whitespace().count() != 5 {
        return Err(RuntimeError::Validation(format!(
            "cron expression must have 5 fields: {:?}",
            expr
        )));
    }
    Schedule::from_str(&format!("0 {}", expr))
        .map_err(|err| RuntimeError::Validation(format!("invalid cron expression {:?}: {}", expr, err)))
}

pub struct JobScheduler {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn ScheduleStore>,
    projects: Arc<dyn ProjectRegistry>,
    interval: Duration,
    // ticks can compound when one outlasts the interval; the guard makes
    // an overlapping tick a no-op instead
    tick_guard: Mutex<()>,
}

impl JobScheduler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn ScheduleStore>,
        projects: Arc<dyn ProjectRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            runtime,
            store,
            projects,
            interval,
            tick_guard: Mutex::new(()),
        }
    }

    /// Validate and persist a new template. The anchor starts at "now" so
    /// the first firing is the next due time after creation, never an
    /// immediate backlog run.
    #[tracing::instrument(skip(self, config))]
    pub async fn add_scheduled_job(
        &self,
        project: &str,
        image: &str,
        name: &str,
        config: HashMap<String, String>,
        schedule: &str,
    ) -> Result<ScheduledJob, RuntimeError> {
        parse_cron(schedule)?;
        let project = self.projects.resolve_project_name(project).await?;

        let mut template = ScheduledJob::new(
            project,
            image.to_string(),
            name.to_string(),
            config,
            schedule.to_string(),
        );
        template.last_execution = Some(Utc::now());

        let stored = self.store.insert(template).await?;
        tracing::info!(id = stored.id, name, schedule, "schedule added");
        Ok(stored)
    }

    pub async fn get_scheduled_jobs(&self, project: &str) -> Result<Vec<ScheduledJob>, RuntimeError> {
        let project = self.projects.resolve_project_name(project).await?;
        let all = self.store.find_all().await?;
        Ok(all.into_iter().filter(|job| job.project == project).collect())
    }

    /// Deletion is scoped to the owning project; an id belonging to a
    /// different project reads as absent.
    #[tracing::instrument(skip(self))]
    pub async fn delete_scheduled_job(&self, project: &str, id: i64) -> Result<(), RuntimeError> {
        let project = self.projects.resolve_project_name(project).await?;
        let template = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| RuntimeError::not_found(format!("schedule {}", id)))?;
        if template.project != project {
            tracing::warn!(id, project = %project, "schedule belongs to another project");
            return Err(RuntimeError::not_found(format!("schedule {}", id)));
        }
        if !self.store.delete_by_id(id).await? {
            return Err(RuntimeError::not_found(format!("schedule {}", id)));
        }
        Ok(())
    }

    /// Pass-through for run inspection on the active runtime.
    pub async fn get_job(&self, id: &str, project: Option<&str>) -> Result<Job, RuntimeError> {
        self.runtime.get_job(id, project).await
    }

    /// One evaluation sweep. Returns how many runs fired; exposed so the
    /// tick logic is testable with a pinned clock.
    pub async fn run_pending(&self, now: DateTime<Utc>) -> usize {
        let _tick = match self.tick_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("previous tick still running, skipping");
                return 0;
            }
        };

        let schedules = match self.store.find_all().await {
            Ok(all) => all,
            Err(err) => {
                tracing::error!("loading schedules: {}", err);
                return 0;
            }
        };

        let mut fired = 0;
        for schedule in schedules {
            // without an anchor there is no backlog to compute against;
            // such a schedule never fires automatically
            let Some(anchor) = schedule.last_execution else {
                continue;
            };
            let evaluator = match parse_cron(&schedule.schedule) {
                Ok(evaluator) => evaluator,
                Err(err) => {
                    // skipped, never removed automatically
                    tracing::error!(id = schedule.id, name = %schedule.name, "{}", err);
                    continue;
                }
            };
            let Some(next) = evaluator.after(&anchor).next() else {
                continue;
            };
            if now < next {
                continue;
            }

            // a failure here is isolated: the remaining schedules still
            // run in this tick
            match self.fire(&schedule).await {
                Ok(job) => {
                    fired += 1;
                    tracing::info!(id = schedule.id, run = %job.container_name, "scheduled job fired");
                    if let Err(err) = self.store.update_last_execution(schedule.id, now).await {
                        tracing::error!(id = schedule.id, "anchor update: {}", err);
                    }
                }
                Err(err) => {
                    tracing::error!(id = schedule.id, name = %schedule.name, "scheduled deploy: {}", err);
                }
            }
        }
        fired
    }

    async fn fire(&self, schedule: &ScheduledJob) -> Result<Job, RuntimeError> {
        // every firing is a fresh run with its own name, clear of the
        // previous run's terminal job
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let run_name = format!("{}-{}", schedule.name, &suffix[..8]);

        let mut config =
            DeploymentConfig::new(schedule.image.clone(), run_name, FeatureKind::ProjectJob)
                .with_project(schedule.project.clone())
                .with_feature_name(schedule.name.clone());
        config.env = schedule.config.clone();

        self.runtime.deploy_job(config).await
    }

    /// Periodic loop; runs until the task is dropped or aborted.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            ticker.tick().await;
            let fired = self.run_pending(Utc::now()).await;
            if fired > 0 {
                tracing::debug!(fired, "tick complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_unix_expressions_parse() {
        assert!(parse_cron("*/1 * * * *").is_ok());
        assert!(parse_cron("30 4 * * 1-5").is_ok());
    }

    #[test]
    fn wrong_field_counts_are_rejected() {
        assert!(parse_cron("* * * * * *").is_err());
        assert!(parse_cron("* * *").is_err());
        assert!(parse_cron("").is_err());
    }

    #[test]
    fn garbage_fields_are_rejected() {
        assert!(parse_cron("every minute or so").is_err());
        assert!(parse_cron("61 * * * *").is_err());
    }

    #[test]
    fn next_execution_follows_the_anchor() {
        let evaluator = parse_cron("*/1 * * * *").unwrap();
        let anchor = Utc::now();
        let next = evaluator.after(&anchor).next().unwrap();
        let gap = next - anchor;
        assert!(gap.num_seconds() <= 60);
        assert!(gap.num_seconds() > 0);
    }
}
