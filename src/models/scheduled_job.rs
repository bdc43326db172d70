use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Persisted cron template, distinct from any single job run it produces.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScheduledJob {
    pub id: i64, // store-assigned
    pub project: String,
    pub image: String,
    pub name: String,
    pub config: HashMap<String, String>,
    /// Unix cron expression, 5 fields, minute granularity.
    pub schedule: String,
    pub added_at: DateTime<Utc>,
    /// Anchor for cron evaluation. A schedule without an anchor is never
    /// fired automatically.
    pub last_execution: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new(
        project: String,
        image: String,
        name: String,
        config: HashMap<String, String>,
        schedule: String,
    ) -> Self {
        Self {
            id: 0,
            project,
            image,
            name,
            config,
            schedule,
            added_at: Utc::now(),
            last_execution: None,
        }
    }
}
