//! SQLite-backed persistence implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;
use crate::instance::{EndState, ExecutionRecord, TaskAttempt, TaskEnding, WorkflowInstance};
use crate::migrations;
use crate::workflow::Payload;

use super::{ExecutionRecordStore, InstanceStore, record_key};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/flowx.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let url = format!("sqlite:{}?mode=rwc", path.as_ref().to_string_lossy());
        Self::from_url(&url).await
    }

    /// Connect to a SQLite URL and run migrations.
    ///
    /// Parent directories of a file database are created first. In-memory
    /// URLs get a single connection so every query sees the same database.
    pub async fn from_url(url: &str) -> Result<Self, CoreError> {
        let in_memory = url.contains(":memory:");

        if !in_memory {
            create_parent_dirs(url)?;
        }

        let mut options = SqlitePoolOptions::new().max_connections(5);
        if in_memory {
            // The database lives only as long as its single connection.
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options
            .connect(url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn create_parent_dirs(url: &str) -> Result<(), CoreError> {
    let location = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let file = location.split('?').next().unwrap_or_default();

    if let Some(parent) = Path::new(file).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
            operation: "create_dir".to_string(),
            details: format!("Failed to create directory {:?}: {}", parent, e),
        })?;
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    created_at: DateTime<Utc>,
    input: String,
    is_completed: bool,
    completed_at: Option<DateTime<Utc>>,
    last_task_status: bool,
}

impl TryFrom<InstanceRow> for WorkflowInstance {
    type Error = CoreError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            created_at: row.created_at,
            input: serde_json::from_str(&row.input)?,
            is_completed: row.is_completed,
            completed_at: row.completed_at,
            last_task_status: row.last_task_status,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    workflow_id: String,
    task_name: String,
    version: i32,
    created_at: DateTime<Utc>,
    input: String,
    end_state: Option<String>,
    reason: Option<String>,
    ended_at: Option<DateTime<Utc>>,
    output: Option<String>,
    duration_secs: Option<i64>,
}

impl TryFrom<RecordRow> for ExecutionRecord {
    type Error = CoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let ending = match (row.end_state, row.ended_at) {
            (Some(state), Some(ended_at)) => {
                let end_state: EndState =
                    state.parse().map_err(|details| CoreError::DatabaseError {
                        operation: "decode_record".to_string(),
                        details,
                    })?;
                let output = row
                    .output
                    .as_deref()
                    .map(serde_json::from_str::<Payload>)
                    .transpose()?;
                Some(TaskEnding {
                    end_state,
                    reason: row.reason.unwrap_or_default(),
                    ended_at,
                    output,
                    duration_secs: row.duration_secs.unwrap_or(-1),
                })
            }
            _ => None,
        };

        Ok(Self {
            workflow_id: row.workflow_id,
            task_name: row.task_name,
            version: row.version,
            created_at: row.created_at,
            input: serde_json::from_str(&row.input)?,
            ending,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    workflow_id: String,
    task_name: String,
    attempt: i64,
    error: String,
    created_at: DateTime<Utc>,
}

impl From<AttemptRow> for TaskAttempt {
    fn from(row: AttemptRow) -> Self {
        Self {
            workflow_id: row.workflow_id,
            task_name: row.task_name,
            attempt: u32::try_from(row.attempt).unwrap_or(u32::MAX),
            error: row.error,
            created_at: row.created_at,
        }
    }
}

/// Map a unique-constraint violation to `Conflict`, anything else to a database error.
fn insert_error(err: sqlx::Error, entity: &str, key: String) -> CoreError {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        return CoreError::conflict(entity, key);
    }
    err.into()
}

const RECORD_COLUMNS: &str = "workflow_id, task_name, version, created_at, input, \
     end_state, reason, ended_at, output, duration_secs";

#[async_trait]
impl InstanceStore for SqlitePersistence {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), CoreError> {
        let input = serde_json::to_string(&instance.input)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_instances
                (id, created_at, input, is_completed, completed_at, last_task_status)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.id)
        .bind(instance.created_at)
        .bind(input)
        .bind(instance.is_completed)
        .bind(instance.completed_at)
        .bind(instance.last_task_status)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "instance", instance.id.clone()))?;

        Ok(())
    }

    async fn get_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<WorkflowInstance>, CoreError> {
        let row = sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT id, created_at, input, is_completed, completed_at, last_task_status
            FROM workflow_instances
            WHERE id = ?
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowInstance::try_from).transpose()
    }

    async fn list_incomplete(&self) -> Result<Vec<WorkflowInstance>, CoreError> {
        let rows = sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT id, created_at, input, is_completed, completed_at, last_task_status
            FROM workflow_instances
            WHERE is_completed = 0
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowInstance::try_from).collect()
    }

    async fn mark_complete(&self, instance_id: &str) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET is_completed = 1, completed_at = ?, last_task_status = 1
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ExecutionRecordStore for SqlitePersistence {
    async fn record_task_start(
        &self,
        workflow_id: &str,
        task_name: &str,
        input: &Payload,
    ) -> Result<(), CoreError> {
        let input = serde_json::to_string(input)?;

        sqlx::query(
            r#"
            INSERT INTO execution_records
                (workflow_id, task_name, version, start_seq, created_at, input)
            VALUES (?, ?, 1,
                    (SELECT COALESCE(MAX(start_seq), 0) + 1 FROM execution_records),
                    ?, ?)
            "#,
        )
        .bind(workflow_id)
        .bind(task_name)
        .bind(Utc::now())
        .bind(input)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "execution record", record_key(workflow_id, task_name)))?;

        Ok(())
    }

    async fn restart_task(
        &self,
        workflow_id: &str,
        task_name: &str,
        input: &Payload,
        expected_version: i32,
    ) -> Result<(), CoreError> {
        let input = serde_json::to_string(input)?;

        let result = sqlx::query(
            r#"
            UPDATE execution_records
            SET version = version + 1,
                start_seq = (SELECT COALESCE(MAX(start_seq), 0) + 1 FROM execution_records),
                created_at = ?,
                input = ?,
                end_state = NULL,
                reason = NULL,
                ended_at = NULL,
                output = NULL,
                duration_secs = NULL
            WHERE workflow_id = ? AND task_name = ? AND version = ?
            "#,
        )
        .bind(Utc::now())
        .bind(input)
        .bind(workflow_id)
        .bind(task_name)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::conflict(
                "execution record",
                record_key(workflow_id, task_name),
            ));
        }

        Ok(())
    }

    async fn record_task_end(
        &self,
        workflow_id: &str,
        task_name: &str,
        end_state: EndState,
        reason: &str,
        duration_secs: i64,
        output: Option<&Payload>,
    ) -> Result<(), CoreError> {
        let output = output.map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE execution_records
            SET end_state = ?, reason = ?, ended_at = ?, output = ?, duration_secs = ?
            WHERE workflow_id = ? AND task_name = ? AND end_state IS NULL
            "#,
        )
        .bind(end_state.as_str())
        .bind(reason)
        .bind(Utc::now())
        .bind(output)
        .bind(duration_secs)
        .bind(workflow_id)
        .bind(task_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::DatabaseError {
                operation: "record_task_end".to_string(),
                details: format!(
                    "no open record for '{}'",
                    record_key(workflow_id, task_name)
                ),
            });
        }

        Ok(())
    }

    async fn most_recent_record(
        &self,
        workflow_id: &str,
    ) -> Result<Option<ExecutionRecord>, CoreError> {
        let sql = format!(
            "SELECT {} FROM execution_records WHERE workflow_id = ? \
             ORDER BY start_seq DESC LIMIT 1",
            RECORD_COLUMNS
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ExecutionRecord::try_from).transpose()
    }

    async fn list_records(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, CoreError> {
        let sql = format!(
            "SELECT {} FROM execution_records WHERE workflow_id = ? ORDER BY start_seq ASC",
            RECORD_COLUMNS
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ExecutionRecord::try_from).collect()
    }

    async fn record_task_attempt(
        &self,
        workflow_id: &str,
        task_name: &str,
        attempt: u32,
        error: &str,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO task_attempts (workflow_id, task_name, attempt, error, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(workflow_id)
        .bind(task_name)
        .bind(i64::from(attempt))
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_task_attempts(
        &self,
        workflow_id: &str,
        task_name: &str,
    ) -> Result<Vec<TaskAttempt>, CoreError> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT workflow_id, task_name, attempt, error, created_at
            FROM task_attempts
            WHERE workflow_id = ? AND task_name = ?
            ORDER BY id ASC
            "#,
        )
        .bind(workflow_id)
        .bind(task_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TaskAttempt::from).collect())
    }
}
