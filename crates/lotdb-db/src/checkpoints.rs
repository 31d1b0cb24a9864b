//! Postgres-backed checkpoint store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lotdb_core::{Checkpoint, CollectionJob, Priority, ScopeKey};
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{CheckpointRecord, CheckpointStore, ResetRecord, ResetRequest};
use crate::DbError;

const CHECKPOINT_COLUMNS: &str = "scope_key, job_id, make, model, year_from, year_to, priority, \
     copart_last_page, iaai_last_page, copart_completed, iaai_completed, \
     total_records_collected, last_collected_at, attention_reason, updated_at";

const RESET_COLUMNS: &str = "public_id, scope_key, previous_copart_last_page, \
     previous_iaai_last_page, previous_copart_completed, previous_iaai_completed, \
     previous_total_records, previous_last_collected_at, requested_by, reason, reset_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckpointRow {
    pub scope_key: String,
    pub job_id: String,
    pub make: String,
    pub model: Option<String>,
    pub year_from: i16,
    pub year_to: i16,
    pub priority: i16,
    pub copart_last_page: i32,
    pub iaai_last_page: i32,
    pub copart_completed: bool,
    pub iaai_completed: bool,
    pub total_records_collected: i64,
    pub last_collected_at: Option<DateTime<Utc>>,
    pub attention_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResetRow {
    pub public_id: Uuid,
    pub scope_key: String,
    pub previous_copart_last_page: i32,
    pub previous_iaai_last_page: i32,
    pub previous_copart_completed: bool,
    pub previous_iaai_completed: bool,
    pub previous_total_records: i64,
    pub previous_last_collected_at: Option<DateTime<Utc>>,
    pub requested_by: String,
    pub reason: String,
    pub reset_at: DateTime<Utc>,
}

fn corrupt(scope: &str, reason: impl Into<String>) -> DbError {
    DbError::Corrupt {
        scope: scope.to_owned(),
        reason: reason.into(),
    }
}

fn page_from_db(scope: &str, column: &str, value: i32) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| corrupt(scope, format!("{column} is negative ({value})")))
}

fn page_to_db(scope: &ScopeKey, value: u32) -> Result<i32, DbError> {
    i32::try_from(value).map_err(|_| corrupt(scope.as_str(), format!("page {value} overflows")))
}

fn total_to_db(scope: &ScopeKey, value: u64) -> Result<i64, DbError> {
    i64::try_from(value).map_err(|_| corrupt(scope.as_str(), format!("total {value} overflows")))
}

impl CheckpointRow {
    fn checkpoint(&self) -> Result<Checkpoint, DbError> {
        Ok(Checkpoint {
            copart_last_page: page_from_db(&self.scope_key, "copart_last_page", self.copart_last_page)?,
            iaai_last_page: page_from_db(&self.scope_key, "iaai_last_page", self.iaai_last_page)?,
            copart_completed: self.copart_completed,
            iaai_completed: self.iaai_completed,
            total_records_collected: u64::try_from(self.total_records_collected).map_err(
                |_| corrupt(&self.scope_key, "total_records_collected is negative"),
            )?,
            last_collected_at: self.last_collected_at,
        })
    }

    fn into_record(self) -> Result<CheckpointRecord, DbError> {
        let checkpoint = self.checkpoint()?;
        let year = |v: i16, column: &str| {
            u16::try_from(v).map_err(|_| corrupt(&self.scope_key, format!("{column} is negative")))
        };
        let priority = u8::try_from(self.priority)
            .map_err(|_| corrupt(&self.scope_key, format!("priority {} out of range", self.priority)))?;

        let job = CollectionJob::new(
            &self.make,
            self.model.as_deref(),
            year(self.year_from, "year_from")?,
            year(self.year_to, "year_to")?,
            Priority(priority),
        )
        .map_err(|e| corrupt(&self.scope_key, e.to_string()))?;

        Ok(CheckpointRecord {
            scope: ScopeKey::from_raw(self.scope_key),
            job,
            checkpoint,
            attention: self.attention_reason,
            updated_at: self.updated_at,
        })
    }
}

impl ResetRow {
    fn into_record(self) -> Result<ResetRecord, DbError> {
        let previous = Checkpoint {
            copart_last_page: page_from_db(
                &self.scope_key,
                "previous_copart_last_page",
                self.previous_copart_last_page,
            )?,
            iaai_last_page: page_from_db(
                &self.scope_key,
                "previous_iaai_last_page",
                self.previous_iaai_last_page,
            )?,
            copart_completed: self.previous_copart_completed,
            iaai_completed: self.previous_iaai_completed,
            total_records_collected: u64::try_from(self.previous_total_records)
                .map_err(|_| corrupt(&self.scope_key, "previous_total_records is negative"))?,
            last_collected_at: self.previous_last_collected_at,
        };
        Ok(ResetRecord {
            id: self.public_id,
            scope: ScopeKey::from_raw(self.scope_key),
            previous,
            requested_by: self.requested_by,
            reason: self.reason,
            reset_at: self.reset_at,
        })
    }
}

/// [`CheckpointStore`] over the `collection_checkpoints` table.
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_row(&self, scope: &ScopeKey) -> Result<Option<CheckpointRow>, DbError> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM collection_checkpoints WHERE scope_key = $1"
        ))
        .bind(scope.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, scope: &ScopeKey) -> Result<Checkpoint, DbError> {
        match self.fetch_row(scope).await? {
            Some(row) => row.checkpoint(),
            None => Ok(Checkpoint::default()),
        }
    }

    async fn load_record(&self, scope: &ScopeKey) -> Result<Option<CheckpointRecord>, DbError> {
        self.fetch_row(scope)
            .await?
            .map(CheckpointRow::into_record)
            .transpose()
    }

    /// Single-statement upsert. The `WHERE` on the conflict branch refuses
    /// any write that would lower a cursor, clear a completion flag, or
    /// shrink the record total; zero affected rows means the write was
    /// refused.
    async fn save(&self, job: &CollectionJob, checkpoint: &Checkpoint) -> Result<(), DbError> {
        let scope = job.scope_key();
        let result = sqlx::query(
            "INSERT INTO collection_checkpoints \
                 (scope_key, job_id, make, model, year_from, year_to, priority, \
                  copart_last_page, iaai_last_page, copart_completed, iaai_completed, \
                  total_records_collected, last_collected_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (scope_key) DO UPDATE SET \
                 job_id = EXCLUDED.job_id, \
                 make = EXCLUDED.make, \
                 model = EXCLUDED.model, \
                 year_from = EXCLUDED.year_from, \
                 year_to = EXCLUDED.year_to, \
                 priority = EXCLUDED.priority, \
                 copart_last_page = EXCLUDED.copart_last_page, \
                 iaai_last_page = EXCLUDED.iaai_last_page, \
                 copart_completed = EXCLUDED.copart_completed, \
                 iaai_completed = EXCLUDED.iaai_completed, \
                 total_records_collected = EXCLUDED.total_records_collected, \
                 last_collected_at = EXCLUDED.last_collected_at, \
                 updated_at = NOW() \
             WHERE collection_checkpoints.copart_last_page <= EXCLUDED.copart_last_page \
               AND collection_checkpoints.iaai_last_page <= EXCLUDED.iaai_last_page \
               AND collection_checkpoints.total_records_collected <= EXCLUDED.total_records_collected \
               AND (NOT collection_checkpoints.copart_completed OR EXCLUDED.copart_completed) \
               AND (NOT collection_checkpoints.iaai_completed OR EXCLUDED.iaai_completed)",
        )
        .bind(scope.as_str())
        .bind(job.id.as_str())
        .bind(&job.make)
        .bind(&job.model)
        .bind(i16::try_from(job.year_from).unwrap_or(i16::MAX))
        .bind(i16::try_from(job.year_to).unwrap_or(i16::MAX))
        .bind(i16::from(job.priority.0))
        .bind(page_to_db(&scope, checkpoint.copart_last_page)?)
        .bind(page_to_db(&scope, checkpoint.iaai_last_page)?)
        .bind(checkpoint.copart_completed)
        .bind(checkpoint.iaai_completed)
        .bind(total_to_db(&scope, checkpoint.total_records_collected)?)
        .bind(checkpoint.last_collected_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::CursorRegression {
                scope: scope.to_string(),
            });
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointRecord>, DbError> {
        let rows = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM collection_checkpoints ORDER BY scope_key"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_record() {
                Ok(record) => records.push(record),
                // One bad row must not hide every other scope from the status view.
                Err(e) => tracing::error!(error = %e, "skipping undecodable checkpoint row"),
            }
        }
        Ok(records)
    }

    /// Audit insert and zeroing run in one transaction under a row lock, so
    /// the audit row always describes exactly the checkpoint that was
    /// discarded.
    async fn reset(
        &self,
        scope: &ScopeKey,
        request: &ResetRequest,
    ) -> Result<ResetRecord, DbError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM collection_checkpoints \
             WHERE scope_key = $1 FOR UPDATE"
        ))
        .bind(scope.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        let reset = sqlx::query_as::<_, ResetRow>(&format!(
            "INSERT INTO checkpoint_resets \
                 (public_id, scope_key, previous_copart_last_page, previous_iaai_last_page, \
                  previous_copart_completed, previous_iaai_completed, previous_total_records, \
                  previous_last_collected_at, requested_by, reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {RESET_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(scope.as_str())
        .bind(current.copart_last_page)
        .bind(current.iaai_last_page)
        .bind(current.copart_completed)
        .bind(current.iaai_completed)
        .bind(current.total_records_collected)
        .bind(current.last_collected_at)
        .bind(&request.requested_by)
        .bind(&request.reason)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE collection_checkpoints SET \
                 copart_last_page = 0, iaai_last_page = 0, \
                 copart_completed = FALSE, iaai_completed = FALSE, \
                 total_records_collected = 0, last_collected_at = NULL, \
                 attention_reason = NULL, updated_at = NOW() \
             WHERE scope_key = $1",
        )
        .bind(scope.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            scope = %scope,
            requested_by = %request.requested_by,
            reason = %request.reason,
            "checkpoint reset"
        );
        reset.into_record()
    }

    async fn list_resets(&self, limit: i64) -> Result<Vec<ResetRecord>, DbError> {
        let rows = sqlx::query_as::<_, ResetRow>(&format!(
            "SELECT {RESET_COLUMNS} FROM checkpoint_resets \
             ORDER BY reset_at DESC, id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ResetRow::into_record).collect()
    }

    async fn mark_attention(&self, job: &CollectionJob, reason: &str) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO collection_checkpoints \
                 (scope_key, job_id, make, model, year_from, year_to, priority, attention_reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (scope_key) DO UPDATE SET \
                 attention_reason = EXCLUDED.attention_reason, \
                 updated_at = NOW()",
        )
        .bind(job.scope_key().as_str())
        .bind(job.id.as_str())
        .bind(&job.make)
        .bind(&job.model)
        .bind(i16::try_from(job.year_from).unwrap_or(i16::MAX))
        .bind(i16::try_from(job.year_to).unwrap_or(i16::MAX))
        .bind(i16::from(job.priority.0))
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_attention(&self, scope: &ScopeKey) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE collection_checkpoints \
             SET attention_reason = NULL, updated_at = NOW() \
             WHERE scope_key = $1 AND attention_reason IS NOT NULL",
        )
        .bind(scope.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
