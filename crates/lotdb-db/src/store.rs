//! The checkpoint store seam shared by the Postgres and in-memory backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lotdb_core::{Checkpoint, CollectionJob, ScopeKey};
use uuid::Uuid;

use crate::DbError;

/// A stored checkpoint together with the descriptor of the job that last
/// wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub scope: ScopeKey,
    pub job: CollectionJob,
    pub checkpoint: Checkpoint,
    /// Set when the scope could not be advanced safely and needs an operator.
    pub attention: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Who asked for a checkpoint reset, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetRequest {
    pub requested_by: String,
    pub reason: String,
}

/// Audit row written by [`CheckpointStore::reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetRecord {
    pub id: Uuid,
    pub scope: ScopeKey,
    pub previous: Checkpoint,
    pub requested_by: String,
    pub reason: String,
    pub reset_at: DateTime<Utc>,
}

/// Durable keyed checkpoint storage, last-writer-wins per scope key.
///
/// Every `save` replaces the whole record atomically, so concurrent readers
/// never observe a cursor that disagrees with the record total. Writes that
/// would move a cursor backwards are refused with
/// [`DbError::CursorRegression`]; the only way back is [`CheckpointStore::reset`].
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored checkpoint, or a zero-valued one if none exists.
    async fn load(&self, scope: &ScopeKey) -> Result<Checkpoint, DbError>;

    /// The whole stored record for `scope`, including the descriptor of the
    /// job that last wrote it.
    async fn load_record(&self, scope: &ScopeKey) -> Result<Option<CheckpointRecord>, DbError> {
        Ok(self.list().await?.into_iter().find(|r| &r.scope == scope))
    }

    /// Replaces the checkpoint for `job.scope_key()` and records `job` as its
    /// descriptor.
    async fn save(&self, job: &CollectionJob, checkpoint: &Checkpoint) -> Result<(), DbError>;

    /// Every stored record, ordered by scope key.
    async fn list(&self) -> Result<Vec<CheckpointRecord>, DbError>;

    /// Zeroes the checkpoint for `scope` and writes an audit row. Returns the
    /// audit row, which carries the discarded checkpoint.
    async fn reset(&self, scope: &ScopeKey, request: &ResetRequest)
        -> Result<ResetRecord, DbError>;

    /// Most recent resets first.
    async fn list_resets(&self, limit: i64) -> Result<Vec<ResetRecord>, DbError>;

    /// Flags the scope for operator attention, creating the record if needed.
    async fn mark_attention(&self, job: &CollectionJob, reason: &str) -> Result<(), DbError>;

    async fn clear_attention(&self, scope: &ScopeKey) -> Result<(), DbError>;
}
