//! Postgres-backed schedule store.
//!
//! Expects the `scheduled_job` table:
//!
//! ```sql
//! CREATE TABLE scheduled_job (
//!     id             BIGSERIAL PRIMARY KEY,
//!     project        TEXT        NOT NULL,
//!     image          TEXT        NOT NULL,
//!     name           TEXT        NOT NULL,
//!     config         JSONB       NOT NULL DEFAULT '{}',
//!     schedule       TEXT        NOT NULL,
//!     added_at       TIMESTAMPTZ NOT NULL,
//!     last_execution TIMESTAMPTZ
//! );
//! ```

use crate::models::ScheduledJob;
use crate::scheduler::store::{ScheduleStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;

pub struct PostgresScheduleStore {
    pool: PgPool,
}

impl PostgresScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    project: String,
    image: String,
    name: String,
    config: serde_json::Value,
    schedule: String,
    added_at: DateTime<Utc>,
    last_execution: Option<DateTime<Utc>>,
}

impl From<ScheduleRow> for ScheduledJob {
    fn from(row: ScheduleRow) -> Self {
        ScheduledJob {
            id: row.id,
            project: row.project,
            image: row.image,
            name: row.name,
            config: serde_json::from_value(row.config).unwrap_or_default(),
            schedule: row.schedule,
            added_at: row.added_at,
            last_execution: row.last_execution,
        }
    }
}

fn store_error(err: sqlx::Error) -> StoreError {
    tracing::error!("Failed to execute query: {:?}", err);
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl ScheduleStore for PostgresScheduleStore {
    async fn insert(&self, mut job: ScheduledJob) -> Result<ScheduledJob, StoreError> {
        let query_span = tracing::info_span!("Saving new schedule into the database");
        let config = serde_json::to_value(&job.config).unwrap_or_default();
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO scheduled_job (project, image, name, config, schedule, added_at, last_execution)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&job.project)
        .bind(&job.image)
        .bind(&job.name)
        .bind(config)
        .bind(&job.schedule)
        .bind(job.added_at)
        .bind(job.last_execution)
        .fetch_one(&self.pool)
        .instrument(query_span)
        .await
        .map_err(store_error)?;

        job.id = id;
        Ok(job)
    }

    async fn find_all(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT id, project, image, name, config, schedule, added_at, last_execution
            FROM scheduled_job
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(ScheduledJob::from).collect())
        .map_err(store_error)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ScheduledJob>, StoreError> {
        sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT id, project, image, name, config, schedule, added_at, last_execution
            FROM scheduled_job
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(ScheduledJob::from))
        .map_err(store_error)
    }

    async fn update_last_execution(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_job
            SET last_execution = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM scheduled_job WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }
}
