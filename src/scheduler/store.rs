//! Persisted schedule access.
//!
//! The scheduler only sees this trait; a Postgres implementation lives in
//! `crate::db` and the in-memory one below backs tests and installations
//! running without a database.

use crate::models::ScheduledJob;
use crate::runtime::RuntimeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("schedule {0} not found")]
    NotFound(i64),

    #[error("schedule store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for RuntimeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => RuntimeError::NotFound(format!("schedule {}", id)),
            StoreError::Unavailable(msg) => RuntimeError::Unavailable(msg),
        }
    }
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Persist a new schedule and return it with its store-assigned id.
    async fn insert(&self, job: ScheduledJob) -> Result<ScheduledJob, StoreError>;

    async fn find_all(&self) -> Result<Vec<ScheduledJob>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<ScheduledJob>, StoreError>;

    /// Advance the anchor after a run fired.
    async fn update_last_execution(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// `false` when nothing with that id existed.
    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError>;
}

#[derive(Default)]
pub struct InMemoryScheduleStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    schedules: HashMap<i64, ScheduledJob>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn insert(&self, mut job: ScheduledJob) -> Result<ScheduledJob, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        job.id = inner.next_id;
        inner.schedules.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_all(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        let inner = self.inner.lock().await;
        let mut all: Vec<_> = inner.schedules.values().cloned().collect();
        all.sort_by_key(|job| job.id);
        Ok(all)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ScheduledJob>, StoreError> {
        Ok(self.inner.lock().await.schedules.get(&id).cloned())
    }

    async fn update_last_execution(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.schedules.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.last_execution = Some(at);
        Ok(())
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.schedules.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str) -> ScheduledJob {
        ScheduledJob::new(
            "genomics".to_string(),
            "trainer:v1".to_string(),
            name.to_string(),
            HashMap::new(),
            "*/5 * * * *".to_string(),
        )
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let store = InMemoryScheduleStore::new();
        let first = store.insert(template("a")).await.unwrap();
        let second = store.insert(template("b")).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(store.find_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn anchor_updates_persist() {
        let store = InMemoryScheduleStore::new();
        let job = store.insert(template("a")).await.unwrap();
        let now = Utc::now();
        store.update_last_execution(job.id, now).await.unwrap();
        let loaded = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_execution, Some(now));
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_existed() {
        let store = InMemoryScheduleStore::new();
        let job = store.insert(template("a")).await.unwrap();
        assert!(store.delete_by_id(job.id).await.unwrap());
        assert!(!store.delete_by_id(job.id).await.unwrap());
    }
}
