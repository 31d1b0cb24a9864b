//! Live integration tests for lotdb-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/lotdb-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory. Run with `cargo test -- --ignored` and a
//! `DATABASE_URL` pointing at a server the harness may create databases on.

use chrono::Utc;
use lotdb_core::{Checkpoint, CollectionJob, Priority, Provider, ScopeKey};
use lotdb_db::{CheckpointStore, DbError, PgCheckpointStore, ResetRequest};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn job(make: &str, priority: Priority) -> CollectionJob {
    CollectionJob::new(make, None, 2005, 2022, priority)
        .unwrap_or_else(|e| panic!("job for {make} should be valid: {e}"))
}

fn checkpoint(copart_pages: &[u64], iaai_pages: &[u64], done: bool) -> Checkpoint {
    let mut cp = Checkpoint::default();
    let now = Utc::now();
    for (i, records) in copart_pages.iter().enumerate() {
        let last = i + 1 == copart_pages.len();
        let next = u32::try_from(i + 2).unwrap();
        cp.record_page(Provider::Copart, next, *records, !(last && done), now)
            .expect("copart page in order");
    }
    for (i, records) in iaai_pages.iter().enumerate() {
        let last = i + 1 == iaai_pages.len();
        let next = u32::try_from(i + 2).unwrap();
        cp.record_page(Provider::Iaai, next, *records, !(last && done), now)
            .expect("iaai page in order");
    }
    cp
}

// ---------------------------------------------------------------------------
// Save / load
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres (DATABASE_URL)"]
async fn load_of_missing_scope_is_zero_valued(pool: sqlx::PgPool) {
    let store = PgCheckpointStore::new(pool);
    let cp = store
        .load(&ScopeKey::new("Lotus", None))
        .await
        .expect("load failed");
    assert_eq!(cp, Checkpoint::default());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres (DATABASE_URL)"]
async fn save_round_trips_checkpoint_and_descriptor(pool: sqlx::PgPool) {
    let store = PgCheckpointStore::new(pool);
    let toyota = job("Toyota", Priority::LUXURY);
    let cp = checkpoint(&[50, 50, 10], &[40, 5], true);

    store.save(&toyota, &cp).await.expect("save failed");

    let loaded = store.load(&toyota.scope_key()).await.expect("load failed");
    assert_eq!(loaded.total_records_collected, 155);
    assert_eq!(loaded.copart_last_page, 3);
    assert_eq!(loaded.iaai_last_page, 2);
    assert!(loaded.is_complete());

    let records = store.list().await.expect("list failed");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job, toyota);
    assert!(records[0].attention.is_none());

    let record = store
        .load_record(&toyota.scope_key())
        .await
        .expect("load_record failed")
        .expect("record exists");
    assert_eq!(record.job, toyota);
    assert_eq!(record.checkpoint, loaded);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres (DATABASE_URL)"]
async fn save_refuses_to_move_cursor_backwards(pool: sqlx::PgPool) {
    let store = PgCheckpointStore::new(pool);
    let bmw = job("BMW", Priority::URGENT);
    store
        .save(&bmw, &checkpoint(&[10, 10, 10], &[10], false))
        .await
        .expect("first save failed");

    let err = store
        .save(&bmw, &checkpoint(&[10], &[10], false))
        .await
        .expect_err("regression must be refused");
    assert!(matches!(err, DbError::CursorRegression { .. }));

    let loaded = store.load(&bmw.scope_key()).await.expect("load failed");
    assert_eq!(loaded.copart_last_page, 3);
}

// ---------------------------------------------------------------------------
// Reset and attention
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres (DATABASE_URL)"]
async fn reset_writes_audit_row_and_zeroes_checkpoint(pool: sqlx::PgPool) {
    let store = PgCheckpointStore::new(pool);
    let honda = job("Honda", Priority::MAINSTREAM);
    store
        .save(&honda, &checkpoint(&[20, 20], &[15], false))
        .await
        .expect("save failed");

    let request = ResetRequest {
        requested_by: "ops@example.com".to_string(),
        reason: "provider re-indexed".to_string(),
    };
    let audit = store
        .reset(&honda.scope_key(), &request)
        .await
        .expect("reset failed");
    assert_eq!(audit.previous.copart_last_page, 2);
    assert_eq!(audit.previous.total_records_collected, 55);
    assert_eq!(audit.reason, "provider re-indexed");

    let loaded = store.load(&honda.scope_key()).await.expect("load failed");
    assert_eq!(loaded, Checkpoint::default());

    let resets = store.list_resets(5).await.expect("list_resets failed");
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].id, audit.id);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres (DATABASE_URL)"]
async fn reset_of_unknown_scope_is_not_found(pool: sqlx::PgPool) {
    let store = PgCheckpointStore::new(pool);
    let request = ResetRequest {
        requested_by: "ops".to_string(),
        reason: "typo".to_string(),
    };
    let err = store
        .reset(&ScopeKey::new("Saab", None), &request)
        .await
        .expect_err("reset of unknown scope");
    assert!(matches!(err, DbError::NotFound));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres (DATABASE_URL)"]
async fn attention_flag_is_set_listed_and_cleared(pool: sqlx::PgPool) {
    let store = PgCheckpointStore::new(pool);
    let audi = job("Audi", Priority::LUXURY);

    store
        .mark_attention(&audi, "cursor regression")
        .await
        .expect("mark failed");
    let records = store.list().await.expect("list failed");
    assert_eq!(records[0].attention.as_deref(), Some("cursor regression"));

    store
        .clear_attention(&audi.scope_key())
        .await
        .expect("clear failed");
    let records = store.list().await.expect("list failed");
    assert!(records[0].attention.is_none());
}
