//! Database Connection Pool Module
//!
//! PostgreSQL implementation of the queue and counter stores using
//! deadpool-postgres. Every trait method is one statement, so atomicity comes
//! from PostgreSQL itself: conditional `UPDATE ... RETURNING`, `FOR UPDATE
//! SKIP LOCKED` for claiming, and the `unique_active_queue_entry` partial
//! index for the one-active-entry rule.

use crate::error::{ApiError, ApiResult};
use ::async_trait::async_trait;
use chrono::Utc;
use clinic_core::{
    DoctorId, PatientId, Priority, QueueCounter, QueueEntry, QueueEntryId, QueueStatus,
    StorageError, StorageResult, Timestamp,
};
use clinic_storage::{CounterStore, QueueStore};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::{error::SqlState, NoTls, Row};

/// Schema applied by [`PgQueueStore::run_migrations`].
pub const MIGRATION_SQL: &str = include_str!("../migrations/0001_queue.sql");

/// Name of the partial unique index guarding active entries.
pub const UNIQUE_ACTIVE_CONSTRAINT: &str = "unique_active_queue_entry";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait timeout for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "clinic".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("CLINIC_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("CLINIC_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("CLINIC_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("CLINIC_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("CLINIC_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("CLINIC_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("CLINIC_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened until the first query.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        pool_cfg.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))
    }
}

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

fn pool_error(err: deadpool_postgres::PoolError) -> StorageError {
    StorageError::Unavailable {
        reason: err.to_string(),
    }
}

fn query_error(err: tokio_postgres::Error) -> StorageError {
    match err.as_db_error() {
        Some(db) => StorageError::Query {
            reason: format!("{}: {}", db.code().code(), db.message()),
        },
        None if err.is_closed() => StorageError::Unavailable {
            reason: err.to_string(),
        },
        None => StorageError::Query {
            reason: err.to_string(),
        },
    }
}

/// Whether the error is the active-entry uniqueness violation.
fn is_active_entry_violation(err: &tokio_postgres::Error) -> bool {
    err.as_db_error().is_some_and(|db| {
        *db.code() == SqlState::UNIQUE_VIOLATION
            && db.constraint() == Some(UNIQUE_ACTIVE_CONSTRAINT)
    })
}

fn corrupt(column: &str, err: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt {
        reason: format!("column {}: {}", column, err),
    }
}

// ============================================================================
// ROW DECODING
// ============================================================================

const ENTRY_COLUMNS: &str = "id, token_number, patient_id, doctor_id, priority, appointment_id, \
     status, called_at, completed_at, created_at, updated_at";

const SERVING_ORDER: &str =
    "CASE priority WHEN 'EMERGENCY' THEN 0 ELSE 1 END, token_number, created_at, id";

fn entry_from_row(row: &Row) -> StorageResult<QueueEntry> {
    let priority: String = row.try_get("priority").map_err(|e| corrupt("priority", e))?;
    let status: String = row.try_get("status").map_err(|e| corrupt("status", e))?;

    Ok(QueueEntry {
        id: row.try_get("id").map_err(|e| corrupt("id", e))?,
        token_number: row
            .try_get("token_number")
            .map_err(|e| corrupt("token_number", e))?,
        patient_id: row
            .try_get("patient_id")
            .map_err(|e| corrupt("patient_id", e))?,
        doctor_id: row.try_get("doctor_id").map_err(|e| corrupt("doctor_id", e))?,
        priority: Priority::from_db_str(&priority).map_err(|e| corrupt("priority", e))?,
        appointment_id: row
            .try_get("appointment_id")
            .map_err(|e| corrupt("appointment_id", e))?,
        status: QueueStatus::from_db_str(&status).map_err(|e| corrupt("status", e))?,
        called_at: row.try_get("called_at").map_err(|e| corrupt("called_at", e))?,
        completed_at: row
            .try_get("completed_at")
            .map_err(|e| corrupt("completed_at", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| corrupt("created_at", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| corrupt("updated_at", e))?,
    })
}

fn counter_from_row(row: &Row) -> StorageResult<QueueCounter> {
    Ok(QueueCounter {
        doctor_id: row.try_get("doctor_id").map_err(|e| corrupt("doctor_id", e))?,
        current_token_number: row
            .try_get("current_token_number")
            .map_err(|e| corrupt("current_token_number", e))?,
        last_reset_at: row
            .try_get("last_reset_at")
            .map_err(|e| corrupt("last_reset_at", e))?,
    })
}

fn entries_from_rows(rows: &[Row]) -> StorageResult<Vec<QueueEntry>> {
    rows.iter().map(entry_from_row).collect()
}

// ============================================================================
// POSTGRES STORE
// ============================================================================

/// Queue and counter store backed by a deadpool connection pool.
#[derive(Clone)]
pub struct PgQueueStore {
    pool: Pool,
}

impl PgQueueStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a store from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> StorageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Apply the bundled schema. Safe to run on every start.
    pub async fn run_migrations(&self) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(MIGRATION_SQL)
            .await
            .map_err(query_error)?;
        tracing::info!("Queue schema migrations applied");
        Ok(())
    }
}

#[async_trait]
impl CounterStore for PgQueueStore {
    async fn counter_increment(&self, doctor_id: DoctorId) -> StorageResult<i64> {
        // A new counter's reset boundary uses the same clock as `completed_at`.
        let now = Utc::now();
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO queue_counters (doctor_id, current_token_number, last_reset_at) \
                 VALUES ($1, 1, $2) \
                 ON CONFLICT (doctor_id) DO UPDATE \
                 SET current_token_number = queue_counters.current_token_number + 1 \
                 RETURNING current_token_number",
                &[&doctor_id, &now],
            )
            .await
            .map_err(query_error)?;
        row.try_get(0).map_err(|e| corrupt("current_token_number", e))
    }

    async fn counter_reset(
        &self,
        doctor_id: DoctorId,
        now: Timestamp,
    ) -> StorageResult<QueueCounter> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO queue_counters (doctor_id, current_token_number, last_reset_at) \
                 VALUES ($1, 0, $2) \
                 ON CONFLICT (doctor_id) DO UPDATE \
                 SET current_token_number = 0, last_reset_at = EXCLUDED.last_reset_at \
                 RETURNING doctor_id, current_token_number, last_reset_at",
                &[&doctor_id, &now],
            )
            .await
            .map_err(query_error)?;
        counter_from_row(&row)
    }

    async fn counter_get(&self, doctor_id: DoctorId) -> StorageResult<Option<QueueCounter>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT doctor_id, current_token_number, last_reset_at \
                 FROM queue_counters WHERE doctor_id = $1",
                &[&doctor_id],
            )
            .await
            .map_err(query_error)?;
        row.as_ref().map(counter_from_row).transpose()
    }

    async fn counter_list_reset_due(&self, before: Timestamp) -> StorageResult<Vec<QueueCounter>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                "SELECT doctor_id, current_token_number, last_reset_at \
                 FROM queue_counters WHERE last_reset_at < $1 ORDER BY doctor_id",
                &[&before],
            )
            .await
            .map_err(query_error)?;
        rows.iter().map(counter_from_row).collect()
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn entry_insert(&self, entry: &QueueEntry) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO queue_entries (id, token_number, patient_id, doctor_id, priority, \
             appointment_id, status, called_at, completed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            &[
                &entry.id,
                &entry.token_number,
                &entry.patient_id,
                &entry.doctor_id,
                &entry.priority.as_db_str(),
                &entry.appointment_id,
                &entry.status.as_db_str(),
                &entry.called_at,
                &entry.completed_at,
                &entry.created_at,
                &entry.updated_at,
            ],
        )
        .await
        .map_err(|err| {
            if is_active_entry_violation(&err) {
                StorageError::DuplicateActiveEntry {
                    doctor_id: entry.doctor_id,
                    patient_id: entry.patient_id,
                }
            } else {
                query_error(err)
            }
        })?;
        Ok(())
    }

    async fn entry_claim_next(
        &self,
        doctor_id: DoctorId,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "UPDATE queue_entries \
             SET status = 'IN_PROGRESS', called_at = $2, updated_at = $2 \
             WHERE id = ( \
                 SELECT id FROM queue_entries \
                 WHERE doctor_id = $1 AND status = 'WAITING' \
                 ORDER BY {order} \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) AND status = 'WAITING' \
             RETURNING {columns}",
            order = SERVING_ORDER,
            columns = ENTRY_COLUMNS
        );
        let row = conn
            .query_opt(sql.as_str(), &[&doctor_id, &now])
            .await
            .map_err(query_error)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_transition(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        expected: QueueStatus,
        next: QueueStatus,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "UPDATE queue_entries \
             SET status = $4, updated_at = $5, \
                 called_at = CASE WHEN $4 = 'IN_PROGRESS' THEN $5 ELSE called_at END, \
                 completed_at = CASE WHEN $4 IN ('COMPLETED', 'SKIPPED') THEN $5 ELSE completed_at END \
             WHERE id = $1 AND doctor_id = $2 AND status = $3 \
             RETURNING {columns}",
            columns = ENTRY_COLUMNS
        );
        let row = conn
            .query_opt(
                sql.as_str(),
                &[
                    &id,
                    &doctor_id,
                    &expected.as_db_str(),
                    &next.as_db_str(),
                    &now,
                ],
            )
            .await
            .map_err(query_error)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_overwrite_status(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        status: QueueStatus,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "UPDATE queue_entries \
             SET status = $3, updated_at = $4, \
                 called_at = CASE $3 WHEN 'WAITING' THEN NULL WHEN 'IN_PROGRESS' THEN $4 ELSE called_at END, \
                 completed_at = CASE $3 WHEN 'WAITING' THEN NULL WHEN 'IN_PROGRESS' THEN NULL ELSE $4 END \
             WHERE id = $1 AND doctor_id = $2 \
             RETURNING {columns}",
            columns = ENTRY_COLUMNS
        );
        let result = conn
            .query_opt(sql.as_str(), &[&id, &doctor_id, &status.as_db_str(), &now])
            .await;

        match result {
            Ok(row) => row.as_ref().map(entry_from_row).transpose(),
            Err(err) if is_active_entry_violation(&err) => {
                let patient_id: PatientId = conn
                    .query_one("SELECT patient_id FROM queue_entries WHERE id = $1", &[&id])
                    .await
                    .map_err(query_error)?
                    .try_get(0)
                    .map_err(|e| corrupt("patient_id", e))?;
                Err(StorageError::DuplicateActiveEntry {
                    doctor_id,
                    patient_id,
                })
            }
            Err(err) => Err(query_error(err)),
        }
    }

    async fn entry_get(&self, id: QueueEntryId) -> StorageResult<Option<QueueEntry>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM queue_entries WHERE id = $1", ENTRY_COLUMNS);
        let row = conn
            .query_opt(sql.as_str(), &[&id])
            .await
            .map_err(query_error)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_find_active(
        &self,
        doctor_id: DoctorId,
        patient_id: PatientId,
    ) -> StorageResult<Option<QueueEntry>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM queue_entries \
             WHERE doctor_id = $1 AND patient_id = $2 AND status IN ('WAITING', 'IN_PROGRESS')",
            ENTRY_COLUMNS
        );
        let row = conn
            .query_opt(sql.as_str(), &[&doctor_id, &patient_id])
            .await
            .map_err(query_error)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn entry_list_active(
        &self,
        doctor_id: DoctorId,
        skipped_since: Option<Timestamp>,
    ) -> StorageResult<Vec<QueueEntry>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {columns} FROM queue_entries \
             WHERE doctor_id = $1 AND status <> 'COMPLETED' \
               AND (status <> 'SKIPPED' OR $2::timestamptz IS NULL \
                    OR completed_at IS NULL OR completed_at >= $2) \
             ORDER BY {order}",
            columns = ENTRY_COLUMNS,
            order = SERVING_ORDER
        );
        let rows = conn
            .query(sql.as_str(), &[&doctor_id, &skipped_since])
            .await
            .map_err(query_error)?;
        entries_from_rows(&rows)
    }

    async fn entry_list_history(
        &self,
        doctor_id: DoctorId,
        limit: Option<usize>,
    ) -> StorageResult<Vec<QueueEntry>> {
        let conn = self.get_conn().await?;
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT {} FROM queue_entries \
             WHERE doctor_id = $1 AND status IN ('COMPLETED', 'SKIPPED') \
             ORDER BY completed_at DESC NULLS LAST, id DESC \
             LIMIT $2",
            ENTRY_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&doctor_id, &limit])
            .await
            .map_err(query_error)?;
        entries_from_rows(&rows)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(query_error)?;
        Ok(())
    }
}
