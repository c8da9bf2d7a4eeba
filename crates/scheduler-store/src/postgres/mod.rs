mod row;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{Branch, Job, JobId, JobType, UserId, Workflow, WorkflowId};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::instrument;

use crate::error::StoreResult;
use crate::repository::Repository;
use row::JobRow;

/// Postgres-backed [`Repository`] and [`Store`](crate::Store).
///
/// Every write that must not interleave with a sibling append (appending a
/// job, creating a branch) runs inside a transaction that locks the owning
/// `branches` row first, so concurrent replicas serialize on that row
/// instead of relying on an in-process mutex.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Opens a connection pool and runs the crate's embedded migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PostgresStore {
    #[instrument(skip(self))]
    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn incomplete_users(&self) -> StoreResult<Vec<UserId>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, MIN(created_at) AS first_created_at
            FROM jobs
            WHERE status IN ('PENDING', 'RUNNING')
            GROUP BY user_id
            ORDER BY first_created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| UserId(r.get("user_id"))).collect())
    }

    async fn runnable(&self, allowed_users: &[UserId]) -> StoreResult<Vec<Job>> {
        if allowed_users.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = allowed_users.iter().map(|u| u.0.as_str()).collect();
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT j.*
            FROM jobs j
            WHERE j.status = 'PENDING'
              AND j.user_id = ANY($1)
              AND (
                  j.order_index = 0
                  OR EXISTS (
                      SELECT 1 FROM jobs p
                      WHERE p.branch_id = j.branch_id
                        AND p.order_index = j.order_index - 1
                        AND p.status = 'SUCCEEDED'
                  )
              )
            ORDER BY j.created_at ASC
            "#,
        )
        .bind(&ids[..])
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn cascade_cancel(&self) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'CANCELLED', finished_at = now()
            FROM jobs AS predecessor
            WHERE jobs.status = 'PENDING'
              AND predecessor.branch_id = jobs.branch_id
              AND predecessor.order_index = jobs.order_index - 1
              AND predecessor.status IN ('FAILED', 'CANCELLED')
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_or_create_branch(&self, workflow_id: WorkflowId, name: &str) -> StoreResult<Branch> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id FROM branches WHERE workflow_id = $1 AND name = $2")
            .bind(workflow_id.0)
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = existing {
            tx.commit().await?;
            return Ok(Branch {
                id: row.get::<uuid::Uuid, _>("id").into(),
                workflow_id,
                name: name.to_string(),
            });
        }

        let id = uuid::Uuid::new_v4();
        sqlx::query("INSERT INTO branches (id, workflow_id, name) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(workflow_id.0)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Branch {
            id: id.into(),
            workflow_id,
            name: name.to_string(),
        })
    }

    async fn append_job(
        &self,
        workflow_id: WorkflowId,
        branch: &Branch,
        user_id: UserId,
        job_type: JobType,
        input_path: String,
        output_path: String,
    ) -> StoreResult<Job> {
        let mut tx = self.pool.begin().await?;

        // Lock the branch row so concurrent appenders serialize here rather
        // than racing on the next order_index.
        sqlx::query("SELECT id FROM branches WHERE id = $1 FOR UPDATE")
            .bind(branch.id.0)
            .fetch_one(&mut *tx)
            .await?;

        let next_index: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM jobs WHERE branch_id = $1",
        )
        .bind(branch.id.0)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (
                id, workflow_id, branch_id, user_id, job_type, input_path,
                output_path, status, progress, order_index, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', 0, $8, now())
            RETURNING *
            "#,
        )
        .bind(JobId::new().0)
        .bind(workflow_id.0)
        .bind(branch.id.0)
        .bind(&user_id.0)
        .bind(job_type.as_str())
        .bind(&input_path)
        .bind(&output_path)
        .bind(next_index)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Job::try_from(row)
    }

    async fn create_workflow(&self, user_id: UserId, name: String) -> StoreResult<Workflow> {
        let row = sqlx::query(
            "INSERT INTO workflows (id, user_id, name, created_at) VALUES ($1, $2, $3, now()) RETURNING id, created_at",
        )
        .bind(WorkflowId::new().0)
        .bind(&user_id.0)
        .bind(&name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Workflow {
            id: row.get::<uuid::Uuid, _>("id").into(),
            user_id,
            name,
            created_at: row.get("created_at"),
        })
    }

    async fn get_workflow(&self, id: WorkflowId) -> StoreResult<Option<Workflow>> {
        let row = sqlx::query("SELECT id, user_id, name, created_at FROM workflows WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Workflow {
            id: row.get::<uuid::Uuid, _>("id").into(),
            user_id: UserId(row.get("user_id")),
            name: row.get("name"),
            created_at: row.get("created_at"),
        }))
    }

    async fn list_workflows(&self, user_id: &UserId) -> StoreResult<Vec<Workflow>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, created_at FROM workflows WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| Workflow {
                id: row.get::<uuid::Uuid, _>("id").into(),
                user_id: UserId(row.get("user_id")),
                name: row.get("name"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn list_jobs_for_workflow(&self, workflow_id: WorkflowId) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT j.*
            FROM jobs j
            JOIN branches b ON b.id = j.branch_id
            WHERE j.workflow_id = $1
            ORDER BY b.name ASC, j.order_index ASC
            "#,
        )
        .bind(workflow_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn predecessor(&self, job: &Job) -> StoreResult<Option<Job>> {
        if job.order_index == 0 {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE branch_id = $1 AND order_index = $2",
        )
        .bind(job.branch_id.0)
        .bind(job.order_index - 1)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    async fn mark_running(&self, id: JobId, started_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET status = 'RUNNING', started_at = $2 WHERE id = $1")
            .bind(id.0)
            .bind(started_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_succeeded(&self, id: JobId, finished_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'SUCCEEDED', progress = 1.0, finished_at = $2 WHERE id = $1 AND status = 'RUNNING'",
        )
        .bind(id.0)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, finished_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET status = 'FAILED', finished_at = $2 WHERE id = $1 AND status = 'RUNNING'")
            .bind(id.0)
            .bind(finished_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_cancelled(&self, id: JobId, finished_at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'CANCELLED', finished_at = $2
            WHERE id = $1
              AND status NOT IN ('SUCCEEDED', 'FAILED', 'CANCELLED')
            "#,
        )
        .bind(id.0)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        id: JobId,
        progress: f64,
        processed_tiles: Option<i32>,
        total_tiles: Option<i32>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = $2, processed_tiles = $3, total_tiles = $4
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id.0)
        .bind(progress)
        .bind(processed_tiles)
        .bind(total_tiles)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn truncate_all(&self) -> StoreResult<()> {
        sqlx::query("TRUNCATE TABLE jobs, branches, workflows")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
