//! In-process checkpoint store used by the collector, server and CLI tests.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use lotdb_core::{Checkpoint, CollectionJob, ScopeKey};
use uuid::Uuid;

use crate::store::{CheckpointRecord, CheckpointStore, ResetRecord, ResetRequest};
use crate::DbError;

/// [`CheckpointStore`] backed by a `HashMap`. Each save swaps the whole
/// record under the write lock, so readers see either the old record or the
/// new one.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<ScopeKey, CheckpointRecord>>,
    resets: Mutex<Vec<ResetRecord>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a checkpoint without the forward-only guard.
    pub fn insert(&self, job: &CollectionJob, checkpoint: Checkpoint) {
        let scope = job.scope_key();
        let record = CheckpointRecord {
            scope: scope.clone(),
            job: job.clone(),
            checkpoint,
            attention: None,
            updated_at: Utc::now(),
        };
        self.records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(scope, record);
    }

    /// The full stored record, including the attention flag.
    #[must_use]
    pub fn record(&self, scope: &ScopeKey) -> Option<CheckpointRecord> {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(scope)
            .cloned()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, scope: &ScopeKey) -> Result<Checkpoint, DbError> {
        Ok(self
            .record(scope)
            .map(|r| r.checkpoint)
            .unwrap_or_default())
    }

    async fn load_record(&self, scope: &ScopeKey) -> Result<Option<CheckpointRecord>, DbError> {
        Ok(self.record(scope))
    }

    async fn save(&self, job: &CollectionJob, checkpoint: &Checkpoint) -> Result<(), DbError> {
        let scope = job.scope_key();
        let mut records = self
            .records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let attention = match records.get(&scope) {
            Some(existing) if !checkpoint.is_forward_of(&existing.checkpoint) => {
                return Err(DbError::CursorRegression {
                    scope: scope.to_string(),
                });
            }
            Some(existing) => existing.attention.clone(),
            None => None,
        };

        records.insert(
            scope.clone(),
            CheckpointRecord {
                scope,
                job: job.clone(),
                checkpoint: checkpoint.clone(),
                attention,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointRecord>, DbError> {
        let records = self
            .records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut out: Vec<CheckpointRecord> = records.values().cloned().collect();
        out.sort_by(|a, b| a.scope.cmp(&b.scope));
        Ok(out)
    }

    async fn reset(
        &self,
        scope: &ScopeKey,
        request: &ResetRequest,
    ) -> Result<ResetRecord, DbError> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let existing = records.get_mut(scope).ok_or(DbError::NotFound)?;

        let now = Utc::now();
        let previous = std::mem::take(&mut existing.checkpoint);
        existing.attention = None;
        existing.updated_at = now;

        let audit = ResetRecord {
            id: Uuid::new_v4(),
            scope: scope.clone(),
            previous,
            requested_by: request.requested_by.clone(),
            reason: request.reason.clone(),
            reset_at: now,
        };
        self.resets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(audit.clone());
        Ok(audit)
    }

    async fn list_resets(&self, limit: i64) -> Result<Vec<ResetRecord>, DbError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let resets = self
            .resets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(resets.iter().rev().take(limit).cloned().collect())
    }

    async fn mark_attention(&self, job: &CollectionJob, reason: &str) -> Result<(), DbError> {
        let scope = job.scope_key();
        let mut records = self
            .records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = records
            .entry(scope.clone())
            .or_insert_with(|| CheckpointRecord {
                scope,
                job: job.clone(),
                checkpoint: Checkpoint::default(),
                attention: None,
                updated_at: Utc::now(),
            });
        record.attention = Some(reason.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_attention(&self, scope: &ScopeKey) -> Result<(), DbError> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(record) = records.get_mut(scope) {
            record.attention = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lotdb_core::{Priority, Provider};

    use super::*;

    fn toyota() -> CollectionJob {
        CollectionJob::new("Toyota", None, 2000, 2020, Priority::LUXURY).unwrap()
    }

    fn after_pages(copart: u32, iaai: u32) -> Checkpoint {
        let mut cp = Checkpoint::default();
        let now = Utc::now();
        for page in 1..=copart {
            cp.record_page(Provider::Copart, page + 1, 10, true, now)
                .unwrap();
        }
        for page in 1..=iaai {
            cp.record_page(Provider::Iaai, page + 1, 10, true, now)
                .unwrap();
        }
        cp
    }

    #[tokio::test]
    async fn load_of_unknown_scope_is_zero_valued() {
        let store = MemoryCheckpointStore::new();
        let cp = store.load(&ScopeKey::new("Nissan", None)).await.unwrap();
        assert_eq!(cp, Checkpoint::default());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_whole_record() {
        let store = MemoryCheckpointStore::new();
        let job = toyota();
        let cp = after_pages(3, 1);
        store.save(&job, &cp).await.unwrap();

        assert_eq!(store.load(&job.scope_key()).await.unwrap(), cp);
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].job, job);
    }

    #[tokio::test]
    async fn save_refuses_cursor_regression() {
        let store = MemoryCheckpointStore::new();
        let job = toyota();
        store.save(&job, &after_pages(3, 2)).await.unwrap();

        let err = store.save(&job, &after_pages(2, 2)).await.unwrap_err();
        assert!(matches!(err, DbError::CursorRegression { ref scope } if scope == "toyota:*"));
        assert_eq!(store.load(&job.scope_key()).await.unwrap().copart_last_page, 3);
    }

    #[tokio::test]
    async fn reset_zeroes_and_audits() {
        let store = MemoryCheckpointStore::new();
        let job = toyota();
        store.save(&job, &after_pages(4, 1)).await.unwrap();

        let request = ResetRequest {
            requested_by: "ops@example.com".to_string(),
            reason: "provider re-indexed".to_string(),
        };
        let audit = store.reset(&job.scope_key(), &request).await.unwrap();
        assert_eq!(audit.previous.copart_last_page, 4);
        assert_eq!(audit.previous.total_records_collected, 50);

        assert_eq!(store.load(&job.scope_key()).await.unwrap(), Checkpoint::default());
        // A fresh run may now write page 1 again.
        store.save(&job, &after_pages(1, 0)).await.unwrap();

        let resets = store.list_resets(10).await.unwrap();
        assert_eq!(resets.len(), 1);
        assert_eq!(resets[0].requested_by, "ops@example.com");
    }

    #[tokio::test]
    async fn load_record_carries_last_writer() {
        let store = MemoryCheckpointStore::new();
        let job = toyota();
        assert!(store.load_record(&job.scope_key()).await.unwrap().is_none());

        store.save(&job, &after_pages(2, 0)).await.unwrap();
        let record = store.load_record(&job.scope_key()).await.unwrap().unwrap();
        assert_eq!(record.job.id, job.id);
        assert_eq!(record.checkpoint.copart_last_page, 2);
    }

    #[tokio::test]
    async fn reset_of_unknown_scope_is_not_found() {
        let store = MemoryCheckpointStore::new();
        let request = ResetRequest {
            requested_by: "ops".to_string(),
            reason: "x".to_string(),
        };
        let err = store
            .reset(&ScopeKey::new("Saab", None), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test]
    async fn attention_flag_survives_saves_until_cleared() {
        let store = MemoryCheckpointStore::new();
        let job = toyota();
        store.mark_attention(&job, "cursor regression").await.unwrap();
        store.save(&job, &after_pages(1, 0)).await.unwrap();

        let record = store.record(&job.scope_key()).unwrap();
        assert_eq!(record.attention.as_deref(), Some("cursor regression"));

        store.clear_attention(&job.scope_key()).await.unwrap();
        assert!(store.record(&job.scope_key()).unwrap().attention.is_none());
    }
}
