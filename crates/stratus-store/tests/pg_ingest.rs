//! Transactional ingest against a live Postgres.
//!
//! Gated behind the `pg-tests` feature: run with
//! `DATABASE_URL=postgres://... cargo test -p stratus-store --features pg-tests`.

#![cfg(feature = "pg-tests")]

use chrono::DateTime;
use sqlx::{PgPool, Row};

use stratus_core::event::{EventType, FlatEvent, StorageClass};
use stratus_store::{Client, Ingester};

fn created(version: &str, sequencer: &str) -> FlatEvent {
    FlatEvent::new(EventType::Created)
        .with_bucket("bucket")
        .with_key("key")
        .with_version_id(version)
        .with_sequencer(Some(sequencer.to_string()))
        .with_event_time(DateTime::from_timestamp_millis(1_000))
        .with_storage_class(Some(StorageClass::Standard))
}

#[sqlx::test(migrations = "./migrations")]
async fn overwrite_keeps_one_current_row(pool: PgPool) {
    let ingester = Ingester::new(Client::from_pool(pool.clone()));

    ingester
        .ingest(vec![created("v1", "A"), created("v2", "B")])
        .await
        .unwrap();

    let rows = sqlx::query("select version_id, is_current_state from object order by version_id")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(!rows[0].get::<bool, _>("is_current_state"));
    assert!(rows[1].get::<bool, _>("is_current_state"));

    let history = sqlx::query("select version_id from historical_object")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].get::<String, _>("version_id"), "v1");
}

#[sqlx::test(migrations = "./migrations")]
async fn duplicate_delivery_increments_counter(pool: PgPool) {
    let ingester = Ingester::new(Client::from_pool(pool.clone()));

    ingester.ingest(vec![created("v1", "A")]).await.unwrap();
    let summary = ingester.ingest(vec![created("v1", "A")]).await.unwrap();
    assert_eq!(summary.duplicates, 1);

    let row = sqlx::query("select number_duplicate_events from store_event")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<i32, _>("number_duplicate_events"), 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn accessibility_is_generated_by_the_schema(pool: PgPool) {
    let ingester = Ingester::new(Client::from_pool(pool.clone()));

    ingester
        .ingest(vec![
            created("v1", "A").with_storage_class(Some(StorageClass::Glacier)),
        ])
        .await
        .unwrap();

    let row = sqlx::query("select is_accessible, is_current_state from s3_metadata")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(row.get::<bool, _>("is_current_state"));
    assert!(!row.get::<bool, _>("is_accessible"));
}
