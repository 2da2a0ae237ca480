//! Job Repository
//!
//! PostgreSQL-backed Job Record Store.

use async_trait::async_trait;
use gitcast_core::domain::identity::InputIdentity;
use gitcast_core::domain::job::{Job, JobStatus, PipelineContext};
use gitcast_core::domain::stage::Stage;
use sqlx::PgPool;
use uuid::Uuid;

use super::{JobRepository, RepositoryError, Result};

const JOB_COLUMNS: &str = r#"
    id, input_identity, options, status, current_stage, progress, progress_message,
    context, result, error, deadline, created_at, started_at, completed_at
"#;

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, job: &Job) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, input_identity, options, status, current_stage, progress,
                              progress_message, context, result, error, deadline, created_at,
                              started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(job.input_identity.as_str())
        .bind(serde_json::to_value(&job.options)?)
        .bind(job.status.as_str())
        .bind(job.current_stage.map(|s| s.as_str()))
        .bind(i16::from(job.progress))
        .bind(&job.progress_message)
        .bind(serde_json::to_value(&job.context)?)
        .bind(job.result.as_ref().map(serde_json::to_value).transpose()?)
        .bind(job.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(job.deadline)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(RepositoryError::Duplicate(job.id));
        }

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn save(&self, job: &Job) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, current_stage = $3, progress = $4, progress_message = $5,
                context = $6, result = $7, error = $8, started_at = $9, completed_at = $10
            WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'cancelled')
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.current_stage.map(|s| s.as_str()))
        .bind(i16::from(job.progress))
        .bind(&job.progress_message)
        .bind(serde_json::to_value(&job.context)?)
        .bind(job.result.as_ref().map(serde_json::to_value).transpose()?)
        .bind(job.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM jobs WHERE id = $1)")
                .bind(job.id)
                .fetch_one(&self.pool)
                .await?;
            return Err(if exists {
                RepositoryError::TerminalRecord(job.id)
            } else {
                RepositoryError::NotFound(job.id)
            });
        }

        Ok(())
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    input_identity: String,
    options: serde_json::Value,
    status: String,
    current_stage: Option<String>,
    progress: i16,
    progress_message: Option<String>,
    context: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    deadline: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = RepositoryError;

    fn try_from(row: JobRow) -> Result<Self> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(RepositoryError::Corrupt)?;
        let current_stage = row
            .current_stage
            .as_deref()
            .map(str::parse::<Stage>)
            .transpose()
            .map_err(RepositoryError::Corrupt)?;
        let progress = u8::try_from(row.progress.clamp(0, 100)).unwrap_or(0);
        let context: PipelineContext = serde_json::from_value(row.context)?;

        Ok(Job {
            id: row.id,
            input_identity: InputIdentity::from_canonical(row.input_identity),
            options: serde_json::from_value(row.options)?,
            status,
            current_stage,
            progress,
            progress_message: row.progress_message,
            context,
            result: row.result.map(serde_json::from_value).transpose()?,
            error: row.error.map(serde_json::from_value).transpose()?,
            deadline: row.deadline,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
