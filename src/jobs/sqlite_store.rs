//! SQLite-backed job store.

use super::model::{Job, JobArtifacts, JobPage};
use super::store::{check_transition, clamp_limit, page, JobStore, StoreError};
use crate::pipeline::progress::{ProgressEvent, Stage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

const TERMINAL: &str = "('complete', 'failed')";

pub struct SqliteJobStore {
    db: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if missing) the database at `db_url` and ensure the schema.
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        // An in-memory database lives and dies with its single connection.
        let pool_options = if db_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(db: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                owner TEXT,
                stage TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                message TEXT NOT NULL DEFAULT '',
                request TEXT NOT NULL,
                artifacts TEXT,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs(owner, id);")
            .execute(&db)
            .await?;

        Ok(Self { db })
    }

    async fn current_stage(&self, id: &str) -> Result<Stage, StoreError> {
        let row = sqlx::query("SELECT stage FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        parse_stage(row.get("stage"))
    }

    /// Apply a guarded update. Zero rows affected means the row changed
    /// underneath us (or went terminal); report that precisely.
    async fn expect_updated(&self, id: &str, to: Stage, rows: u64) -> Result<(), StoreError> {
        if rows > 0 {
            return Ok(());
        }
        let from = self.current_stage(id).await?;
        check_transition(id, from, to)?;
        Err(StoreError::Backend(format!("job {} changed concurrently", id)))
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, owner, stage, progress, message, request, artifacts, error, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.owner)
        .bind(job.stage.as_str())
        .bind(job.progress)
        .bind(&job.message)
        .bind(serde_json::to_string(&job.request)?)
        .bind(job.artifacts.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&job.error)
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(job.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_progress(&self, id: &str, event: &ProgressEvent) -> Result<(), StoreError> {
        let from = self.current_stage(id).await?;
        check_transition(id, from, event.stage)?;

        let rows = sqlx::query(&format!(
            "UPDATE jobs SET stage = ?, progress = MAX(progress, ?), message = ?, updated_at = ? \
             WHERE id = ? AND stage = ? AND stage NOT IN {}",
            TERMINAL
        ))
        .bind(event.stage.as_str())
        .bind(event.progress)
        .bind(&event.message)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.db)
        .await?
        .rows_affected();
        self.expect_updated(id, event.stage, rows).await
    }

    async fn complete_job(&self, id: &str, artifacts: &JobArtifacts) -> Result<(), StoreError> {
        let rows = sqlx::query(&format!(
            "UPDATE jobs SET stage = 'complete', progress = 1.0, message = 'complete', artifacts = ?, updated_at = ? \
             WHERE id = ? AND stage NOT IN {}",
            TERMINAL
        ))
        .bind(serde_json::to_string(artifacts)?)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.db)
        .await?
        .rows_affected();
        self.expect_updated(id, Stage::Complete, rows).await
    }

    async fn fail_job(&self, id: &str, reason: &str) -> Result<(), StoreError> {
        let rows = sqlx::query(&format!(
            "UPDATE jobs SET stage = 'failed', message = 'failed', error = ?, updated_at = ? \
             WHERE id = ? AND stage NOT IN {}",
            TERMINAL
        ))
        .bind(reason)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.db)
        .await?
        .rows_affected();
        self.expect_updated(id, Stage::Failed, rows).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(
        &self,
        owner: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<JobPage, StoreError> {
        let limit = clamp_limit(limit);
        let rows = sqlx::query(
            "SELECT * FROM jobs \
             WHERE (? IS NULL OR owner = ?) AND (? IS NULL OR id < ?) \
             ORDER BY id DESC LIMIT ?",
        )
        .bind(owner)
        .bind(owner)
        .bind(cursor)
        .bind(cursor)
        .bind((limit + 1) as i64)
        .fetch_all(&self.db)
        .await?;

        let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(page(jobs, limit))
    }

    async fn fail_incomplete(&self, reason: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE jobs SET stage = 'failed', message = 'failed', error = ?, updated_at = ? \
             WHERE stage NOT IN {}",
            TERMINAL
        ))
        .bind(reason)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

fn parse_stage(raw: String) -> Result<Stage, StoreError> {
    raw.parse().map_err(StoreError::Backend)
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    let request: String = row.get("request");
    let artifacts: Option<String> = row.get("artifacts");
    Ok(Job {
        id: row.get("id"),
        owner: row.get("owner"),
        stage: parse_stage(row.get("stage"))?,
        progress: row.get("progress"),
        message: row.get("message"),
        request: serde_json::from_str(&request)?,
        artifacts: artifacts.as_deref().map(serde_json::from_str).transpose()?,
        error: row.get("error"),
        created_at: timestamp(row.get("created_at")),
        updated_at: timestamp(row.get("updated_at")),
    })
}
