//! # Queue
//!
//! The job queue core, backed by a SQLite table.
//!
//! This is a generalization of a Postgres `FOR UPDATE SKIP LOCKED`
//! job queue to SQLite, which has no such clause. Since SQLite only
//! ever has one writer regardless of how many connections are open,
//! the pool behind this queue is capped at a single connection
//! (`max_connections(1)`): that makes the single-writer constraint
//! explicit instead of leaving every other caller to discover it via
//! `SQLITE_BUSY`. Claiming uses the optimistic `UPDATE ... WHERE`
//! pattern that stands in for `SKIP LOCKED` on stores that lack it,
//! wrapped in a single transaction per operation so the
//! read-candidate/check-lock/write sequence is atomic.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row, Sqlite, Transaction};

use crate::domain::main_domain as extract_main_domain;
use crate::error::{QueueError, QueueResult};
use crate::normalize::normalize;
use crate::render::RenderMode;
use crate::ssrf::validate_submission;

/// The five states of the queue state machine. `Succeeded` and
/// `Failed` are terminal: once entered, a job is never mutated again.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum JobStatus {
    Queued,
    WaitingDomainLock,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "waiting_domain_lock" => Ok(JobStatus::WaitingDomainLock),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            invalid => Err(QueueError::ParseJobStatusError(invalid.to_owned())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::WaitingDomainLock => "waiting_domain_lock",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The configuration snapshot taken at submission time:
/// immutable for the lifetime of the job.
#[derive(Debug, Clone, Copy)]
pub struct JobConfig {
    pub render_mode: RenderMode,
    pub navigation_timeout_s: i32,
    pub job_timeout_s: i32,
    pub max_domain_wait_s: i32,
    pub max_retries: i32,
}

/// A job, as read back from the store.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub normalized_url: String,
    pub main_domain: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub config: JobConfig,
    pub submission_date: String,
    pub metadata: Option<Value>,
    pub claimed_by: Option<String>,
}

/// The outcome of a finished render, as reported to [`Queue::complete`].
pub enum JobOutcome {
    Success,
    Failure { code: String, message: String },
}

/// Internal row shape matching the `jobs` table 1:1; kept separate
/// from [`Job`] so sqlx can derive `FromRow` without us hand-rolling
/// decode logic for the enum/JSON columns.
#[derive(FromRow)]
struct JobRow {
    job_id: String,
    normalized_url: String,
    main_domain: String,
    status: String,
    attempts: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error_code: Option<String>,
    error_message: Option<String>,
    render_mode: String,
    navigation_timeout_s: i64,
    job_timeout_s: i64,
    max_domain_wait_s: i64,
    max_retries: i64,
    submission_date: String,
    metadata: Option<String>,
    claimed_by: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            job_id: row.job_id,
            normalized_url: row.normalized_url,
            main_domain: row.main_domain,
            status: JobStatus::from_str(&row.status)?,
            attempts: row.attempts as i32,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error_code: row.error_code,
            error_message: row.error_message,
            config: JobConfig {
                render_mode: RenderMode::from_str(&row.render_mode)
                    .map_err(QueueError::InvalidUrl)?,
                navigation_timeout_s: row.navigation_timeout_s as i32,
                job_timeout_s: row.job_timeout_s as i32,
                max_domain_wait_s: row.max_domain_wait_s as i32,
                max_retries: row.max_retries as i32,
            },
            submission_date: row.submission_date,
            metadata: row
                .metadata
                .map(|m| serde_json::from_str(&m))
                .transpose()
                .map_err(|e| QueueError::InvalidUrl(format!("corrupt metadata JSON: {e}")))?,
            claimed_by: row.claimed_by,
        })
    }
}

/// The job queue core. Owns the one writer connection SQLite allows
/// and the five public operations of the queue.
pub struct Queue {
    pool: SqlitePool,
}

impl Queue {
    /// Connect to (and migrate) the SQLite database at `database_url`
    /// (a `sqlite://path/to/file.db` URL, or `sqlite::memory:` for
    /// tests).
    pub async fn new(database_url: &str) -> QueueResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|error| QueueError::MigrationError { error })?;

        Ok(Self { pool })
    }

    /// Wrap an already-open pool (used by tests to share an in-memory
    /// database across connections via `mode=memory&cache=shared`).
    pub fn new_from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Submit a URL for conversion.
    ///
    /// `config` must already have caller-supplied overrides merged
    /// with service defaults — the queue core stores whatever it is
    /// given, it does not know about env-var defaults.
    pub async fn submit(
        &self,
        url: &str,
        config: JobConfig,
        metadata: Option<Value>,
    ) -> QueueResult<(Job, bool)> {
        let normalized_url = normalize(url)?;
        validate_submission(url).await?;
        let main_domain = extract_main_domain(url)?;
        let submission_date = Utc::now().date_naive().to_string();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        if let Some(existing) = select_by_dedup_key(&mut tx, &normalized_url, &submission_date).await? {
            tx.commit()
                .await
                .map_err(|error| QueueError::ConnectionError { error })?;
            return Ok((existing, true));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let metadata_json = metadata.as_ref().map(|m| m.to_string());

        let insert_result = sqlx::query(
            r#"
INSERT INTO jobs
    (job_id, normalized_url, main_domain, status, attempts, created_at,
     render_mode, navigation_timeout_s, job_timeout_s, max_domain_wait_s,
     max_retries, submission_date, metadata)
VALUES
    (?, ?, ?, 'queued', 0, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job_id)
        .bind(&normalized_url)
        .bind(&main_domain)
        .bind(now)
        .bind(config.render_mode.to_string())
        .bind(config.navigation_timeout_s)
        .bind(config.job_timeout_s)
        .bind(config.max_domain_wait_s)
        .bind(config.max_retries)
        .bind(&submission_date)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await;

        match insert_result {
            Ok(_) => {
                let job = select_by_id(&mut tx, &job_id)
                    .await?
                    .expect("just-inserted job must be selectable");
                tx.commit()
                    .await
                    .map_err(|error| QueueError::ConnectionError { error })?;
                Ok((job, false))
            }
            Err(error) if is_unique_violation(&error) => {
                // Race: another submitter won the insert. Re-select the row
                // they committed instead of erroring out.
                let existing = select_by_dedup_key(&mut tx, &normalized_url, &submission_date)
                    .await?
                    .ok_or_else(|| QueueError::NotFound(normalized_url.clone()))?;
                tx.commit()
                    .await
                    .map_err(|error| QueueError::ConnectionError { error })?;
                Ok((existing, true))
            }
            Err(error) => Err(QueueError::QueryError {
                command: "INSERT".to_owned(),
                error,
            }),
        }
    }

    /// Point lookup.
    pub async fn get(&self, job_id: &str) -> QueueResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        row.map(Job::try_from).transpose()
    }

    /// Atomically claim the next eligible job.
    ///
    /// `worker_id` is recorded on the job so a later restart can tell
    /// which `RUNNING` jobs belong to this process.
    pub async fn claim_next(&self, worker_id: &str) -> QueueResult<Option<Job>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        let candidate_row: Option<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE status = 'queued' ORDER BY created_at ASC, job_id ASC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        let candidate_row = match candidate_row {
            Some(row) => Some(row),
            None => sqlx::query_as(
                "SELECT * FROM jobs WHERE status = 'waiting_domain_lock' ORDER BY created_at ASC, job_id ASC LIMIT 1",
            )
            .fetch_optional(&mut *tx)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?,
        };

        let Some(candidate_row) = candidate_row else {
            tx.commit()
                .await
                .map_err(|error| QueueError::ConnectionError { error })?;
            return Ok(None);
        };

        let candidate = Job::try_from(candidate_row)?;

        let lock_holder: Option<String> =
            sqlx::query_scalar("SELECT job_id FROM domain_locks WHERE main_domain = ?")
                .bind(&candidate.main_domain)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|error| QueueError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                })?;

        if let Some(holder_job_id) = lock_holder {
            if holder_job_id == candidate.job_id {
                // Shouldn't happen (RUNNING jobs aren't claim candidates) but
                // guards against a stuck lock pointing at a non-running job.
                tx.commit()
                    .await
                    .map_err(|error| QueueError::ConnectionError { error })?;
                return Ok(None);
            }

            let wait_seconds = (Utc::now() - candidate.created_at).num_seconds();

            if wait_seconds > candidate.config.max_domain_wait_s as i64 {
                sqlx::query(
                    "UPDATE jobs SET status = 'failed', error_code = 'DOMAIN_WAIT_TIMEOUT', \
                     error_message = ?, finished_at = ? WHERE job_id = ?",
                )
                .bind(format!(
                    "exceeded max domain wait of {}s",
                    candidate.config.max_domain_wait_s
                ))
                .bind(Utc::now())
                .bind(&candidate.job_id)
                .execute(&mut *tx)
                .await
                .map_err(|error| QueueError::QueryError {
                    command: "UPDATE".to_owned(),
                    error,
                })?;

                tx.commit()
                    .await
                    .map_err(|error| QueueError::ConnectionError { error })?;
                tracing::warn!(job_id = %candidate.job_id, "domain wait timeout exceeded");
                return Ok(None);
            }

            if candidate.status != JobStatus::WaitingDomainLock {
                sqlx::query("UPDATE jobs SET status = 'waiting_domain_lock' WHERE job_id = ?")
                    .bind(&candidate.job_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|error| QueueError::QueryError {
                        command: "UPDATE".to_owned(),
                        error,
                    })?;
            }

            tx.commit()
                .await
                .map_err(|error| QueueError::ConnectionError { error })?;
            return Ok(None);
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO domain_locks (main_domain, job_id, locked_at, max_wait_seconds) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&candidate.main_domain)
        .bind(&candidate.job_id)
        .bind(now)
        .bind(candidate.config.max_domain_wait_s)
        .execute(&mut *tx)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        sqlx::query(
            "UPDATE jobs SET status = 'running', started_at = ?, attempts = attempts + 1, \
             claimed_by = ? WHERE job_id = ?",
        )
        .bind(now)
        .bind(worker_id)
        .bind(&candidate.job_id)
        .execute(&mut *tx)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        let claimed = select_by_id(&mut tx, &candidate.job_id)
            .await?
            .expect("just-claimed job must be selectable");

        tx.commit()
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        tracing::info!(job_id = %claimed.job_id, attempts = claimed.attempts, "claimed job");
        Ok(Some(claimed))
    }

    /// Transition a `RUNNING` job to its terminal state. A no-op (logged, not an error) if the job isn't
    /// `RUNNING` — this is what makes at-least-once retries from the
    /// worker idempotent.
    pub async fn complete(&self, job_id: &str, outcome: JobOutcome) -> QueueResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        let Some(job) = select_by_id(&mut tx, job_id).await? else {
            tracing::warn!(job_id, "complete called on unknown job, ignoring");
            return Ok(());
        };

        if job.status != JobStatus::Running {
            tracing::warn!(job_id, status = %job.status, "complete called on non-running job, ignoring");
            return Ok(());
        }

        let (status, error_code, error_message) = match outcome {
            JobOutcome::Success => ("succeeded", None, None),
            JobOutcome::Failure { code, message } => ("failed", Some(code), Some(message)),
        };

        sqlx::query(
            "UPDATE jobs SET status = ?, error_code = ?, error_message = ?, finished_at = ? \
             WHERE job_id = ?",
        )
        .bind(status)
        .bind(&error_code)
        .bind(&error_message)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        sqlx::query("DELETE FROM domain_locks WHERE main_domain = ?")
            .bind(&job.main_domain)
            .execute(&mut *tx)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        tx.commit()
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        tracing::info!(job_id, status, "job completed");
        Ok(())
    }

    /// Requeue a `RUNNING` job back to `QUEUED`.
    /// `attempts` is deliberately untouched — the next `claim_next`
    /// increments it.
    pub async fn requeue(&self, job_id: &str) -> QueueResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        let Some(job) = select_by_id(&mut tx, job_id).await? else {
            tracing::warn!(job_id, "requeue called on unknown job, ignoring");
            return Ok(());
        };

        if job.status != JobStatus::Running {
            tracing::warn!(job_id, status = %job.status, "requeue called on non-running job, ignoring");
            return Ok(());
        }

        sqlx::query("DELETE FROM domain_locks WHERE main_domain = ?")
            .bind(&job.main_domain)
            .execute(&mut *tx)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        sqlx::query("UPDATE jobs SET status = 'queued', started_at = NULL WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        tx.commit()
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        tracing::info!(job_id, "job requeued");
        Ok(())
    }

    /// Startup crash reconciliation: any job left `RUNNING`
    /// and claimed by `worker_id` survived a prior crash of this
    /// worker identity. Requeue it if it still has budget, otherwise
    /// fail it terminally with `WORKER_CRASHED`.
    pub async fn reconcile_crashed(&self, worker_id: &str) -> QueueResult<Vec<String>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE status = 'running' AND claimed_by = ?",
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        let mut reconciled = Vec::new();
        for row in rows {
            let job = Job::try_from(row)?;
            if job.attempts <= job.config.max_retries {
                self.requeue(&job.job_id).await?;
            } else {
                self.complete(
                    &job.job_id,
                    JobOutcome::Failure {
                        code: "WORKER_CRASHED".to_owned(),
                        message: "job was RUNNING when the worker restarted".to_owned(),
                    },
                )
                .await?;
            }
            reconciled.push(job.job_id);
        }

        if !reconciled.is_empty() {
            tracing::warn!(count = reconciled.len(), "reconciled crashed jobs on startup");
        }

        Ok(reconciled)
    }

    /// Write or refresh this worker's heartbeat row.
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        status: &str,
        current_job_id: Option<&str>,
    ) -> QueueResult<()> {
        sqlx::query(
            r#"
INSERT INTO worker_heartbeats (worker_id, last_heartbeat, status, current_job_id)
VALUES (?, ?, ?, ?)
ON CONFLICT (worker_id) DO UPDATE SET
    last_heartbeat = excluded.last_heartbeat,
    status = excluded.status,
    current_job_id = excluded.current_job_id
            "#,
        )
        .bind(worker_id)
        .bind(Utc::now())
        .bind(status)
        .bind(current_job_id)
        .execute(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    /// Read back a worker's heartbeat (used by the health endpoint).
    pub async fn get_heartbeat(&self, worker_id: &str) -> QueueResult<Option<WorkerHeartbeat>> {
        let row = sqlx::query(
            "SELECT worker_id, last_heartbeat, status, current_job_id FROM worker_heartbeats WHERE worker_id = ?",
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        Ok(match row {
            Some(row) => Some(WorkerHeartbeat {
                worker_id: row.try_get("worker_id").map_err(|error| QueueError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                })?,
                last_heartbeat: row.try_get("last_heartbeat").map_err(|error| QueueError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                })?,
                status: row.try_get("status").map_err(|error| QueueError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                })?,
                current_job_id: row.try_get("current_job_id").map_err(|error| QueueError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                })?,
            }),
            None => None,
        })
    }
}

/// A worker's liveness row.
#[derive(Debug, Clone)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub last_heartbeat: DateTime<Utc>,
    pub status: String,
    pub current_job_id: Option<String>,
}

async fn select_by_id(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: &str,
) -> QueueResult<Option<Job>> {
    let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE job_id = ?")
        .bind(job_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

    row.map(Job::try_from).transpose()
}

async fn select_by_dedup_key(
    tx: &mut Transaction<'_, Sqlite>,
    normalized_url: &str,
    submission_date: &str,
) -> QueueResult<Option<Job>> {
    let row: Option<JobRow> = sqlx::query_as(
        "SELECT * FROM jobs WHERE normalized_url = ? AND submission_date = ?",
    )
    .bind(normalized_url)
    .bind(submission_date)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|error| QueueError::QueryError {
        command: "SELECT".to_owned(),
        error,
    })?;

    row.map(Job::try_from).transpose()
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db_error| db_error.is_unique_violation())
}
