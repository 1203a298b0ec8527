//! Storage engine behavior, including the table-lock serialization
//! guarantee both backends must provide.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use granary_db::{Filter, MemoryEngine, SqliteEngine, StorageEngine};

async fn sqlite_engine(dir: &TempDir) -> Arc<dyn StorageEngine> {
    Arc::new(
        SqliteEngine::connect(dir.path().join("engine.db"))
            .await
            .unwrap(),
    )
}

fn memory_engine() -> Arc<dyn StorageEngine> {
    Arc::new(MemoryEngine::new())
}

async fn assert_concurrent_create_is_serialized(engine: Arc<dyn StorageEngine>) {
    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_table_if_not_exists("contended", &["status"])
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("create must not fail");
    }

    // The table exists exactly once and is usable.
    let id = Uuid::new_v4();
    engine
        .insert("contended", &id, &json!({"id": id, "status": "ok"}))
        .await
        .unwrap();
    let rows = engine.query("contended", &Filter::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_concurrent_table_creation_sqlite() {
    let dir = TempDir::new().unwrap();
    assert_concurrent_create_is_serialized(sqlite_engine(&dir).await).await;
}

#[tokio::test]
async fn test_concurrent_table_creation_memory() {
    assert_concurrent_create_is_serialized(memory_engine()).await;
}

async fn assert_filter_semantics(engine: Arc<dyn StorageEngine>) {
    engine
        .create_table_if_not_exists("rows", &["status", "content_hash", "is_deleted"])
        .await
        .unwrap();

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    engine
        .insert(
            "rows",
            &a,
            &json!({"id": a, "status": "created", "is_deleted": false, "content_hash": "blake3:aa"}),
        )
        .await
        .unwrap();
    engine
        .insert(
            "rows",
            &b,
            &json!({"id": b, "status": "completed", "is_deleted": false, "content_hash": null}),
        )
        .await
        .unwrap();
    engine
        .insert(
            "rows",
            &c,
            &json!({"id": c, "status": "created", "is_deleted": true}),
        )
        .await
        .unwrap();

    // Plain equality.
    let created = engine
        .query("rows", &Filter::new().eq("status", "created"))
        .await
        .unwrap();
    assert_eq!(created.len(), 2);

    // Booleans are typed, not strings.
    let live = engine
        .query("rows", &Filter::new().eq("is_deleted", false))
        .await
        .unwrap();
    assert_eq!(live.len(), 2);

    // Ne must match rows where the field is null or missing.
    let not_completed = engine
        .query("rows", &Filter::new().ne("status", "completed"))
        .await
        .unwrap();
    assert_eq!(not_completed.len(), 2);

    // Null equality matches both explicit null and missing field.
    let no_hash = engine
        .query(
            "rows",
            &Filter::new().eq("content_hash", serde_json::Value::Null),
        )
        .await
        .unwrap();
    assert_eq!(no_hash.len(), 2);

    let hashed = engine
        .query(
            "rows",
            &Filter::new().ne("content_hash", serde_json::Value::Null),
        )
        .await
        .unwrap();
    assert_eq!(hashed.len(), 1);

    // Empty result sets are not errors.
    let none = engine
        .query("rows", &Filter::new().eq("status", "aborted"))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_filter_semantics_sqlite() {
    let dir = TempDir::new().unwrap();
    assert_filter_semantics(sqlite_engine(&dir).await).await;
}

#[tokio::test]
async fn test_filter_semantics_memory() {
    assert_filter_semantics(memory_engine()).await;
}

#[tokio::test]
async fn test_update_and_delete_report_presence() {
    let dir = TempDir::new().unwrap();
    for engine in [sqlite_engine(&dir).await, memory_engine()] {
        engine.create_table_if_not_exists("t", &[]).await.unwrap();

        let id = Uuid::new_v4();
        let missing = Uuid::new_v4();
        engine.insert("t", &id, &json!({"id": id, "v": 1})).await.unwrap();

        assert!(engine.update("t", &id, &json!({"id": id, "v": 2})).await.unwrap());
        assert!(!engine
            .update("t", &missing, &json!({"id": missing}))
            .await
            .unwrap());

        let row = engine.get("t", &id).await.unwrap().unwrap();
        assert_eq!(row["v"], 2);

        assert!(engine.delete("t", &id).await.unwrap());
        assert!(!engine.delete("t", &id).await.unwrap());
    }
}

#[tokio::test]
async fn test_sqlite_persists_across_reconnect() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("persist.db");
    let id = Uuid::new_v4();

    {
        let engine = SqliteEngine::connect(&path).await.unwrap();
        engine.create_table_if_not_exists("t", &[]).await.unwrap();
        engine.insert("t", &id, &json!({"id": id, "kept": true})).await.unwrap();
    }

    let engine = SqliteEngine::connect(&path).await.unwrap();
    engine.create_table_if_not_exists("t", &[]).await.unwrap();
    let row = engine.get("t", &id).await.unwrap().unwrap();
    assert_eq!(row["kept"], true);
}
