use docket_state::{Change, Changeset, Projection};
use docket_store::{Filter, MemoryStore, SessionHandle, StoreClient, StoreError};
use futures::StreamExt;
use serde_json::json;

async fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    for (id, city) in [(1, "Oslo"), (2, "Bergen"), (3, "Oslo")] {
        store
            .insert(
                "users",
                json!({"_id": id, "name": format!("u{id}"), "address": {"city": city}, "tags": []}),
                None,
            )
            .await
            .unwrap();
    }
    store
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_read_filters_and_projects() {
    let store = seeded().await;

    let oslo = store
        .read("users", &Filter::new().eq("address.city", "Oslo"), None)
        .await
        .unwrap();
    assert_eq!(oslo.len(), 2);

    let projected = store
        .read("users", &Filter::by_id(2), Some(&Projection::include(["name"])))
        .await
        .unwrap();
    assert_eq!(projected, vec![json!({"_id": 2, "name": "u2"})]);

    assert!(store
        .read("missing", &Filter::new(), None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_read_one_and_stream() {
    let store = seeded().await;
    let one = store.read_one("users", &json!(3), None).await.unwrap();
    assert_eq!(one.unwrap()["address"]["city"], "Oslo");
    assert!(store.read_one("users", &json!("3"), None).await.unwrap().is_none());

    let filter = Filter::new();
    let streamed: Vec<_> = store.read_stream("users", &filter, None).collect().await;
    assert_eq!(streamed.len(), 3);
    assert!(streamed.iter().all(Result::is_ok));
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_insert_rejects_duplicates_and_missing_ids() {
    let store = seeded().await;
    let err = store
        .insert("users", json!({"_id": 1}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));

    let err = store
        .insert("users", json!({"name": "anon"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecord(_)));
    assert_eq!(store.count("users").await, 3);
}

#[tokio::test]
async fn test_write_applies_changeset_and_bumps_version() {
    let store = seeded().await;
    let changes = Changeset::new()
        .with_change(Change::set("name", "renamed"))
        .with_change(Change::push("tags", vec![json!("vip")]));

    let first = store.write("users", &json!(1), &changes, None).await.unwrap();
    let second = store
        .write("users", &json!(1), &Changeset::new().with_change(Change::unset("address")), None)
        .await
        .unwrap();
    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);

    let record = store.read_one("users", &json!(1), None).await.unwrap().unwrap();
    assert_eq!(record, json!({"_id": 1, "name": "renamed", "tags": ["vip"]}));
}

#[tokio::test]
async fn test_write_errors() {
    let store = seeded().await;
    let changes = Changeset::new().with_change(Change::set("name", "x"));
    assert!(matches!(
        store.write("users", &json!(9), &changes, None).await,
        Err(StoreError::NotFound { .. })
    ));

    let bad = Changeset::new().with_change(Change::push("name", vec![json!(1)]));
    assert!(matches!(
        store.write("users", &json!(1), &bad, None).await,
        Err(StoreError::Change(_))
    ));

    let rewrite_id = Changeset::new().with_change(Change::set("_id", 7));
    assert!(matches!(
        store.write("users", &json!(1), &rewrite_id, None).await,
        Err(StoreError::InvalidRecord(_))
    ));
    let record = store.read_one("users", &json!(1), None).await.unwrap().unwrap();
    assert_eq!(record["name"], "u1");
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let store = seeded().await;
    store.delete("users", &json!(2), None).await.unwrap();
    store.delete("users", &json!(2), None).await.unwrap();
    assert_eq!(store.count("users").await, 2);
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn test_session_writes_are_invisible_until_commit() {
    let store = seeded().await;
    let session = store.start_transaction().await.unwrap();

    store
        .write(
            "users",
            &json!(1),
            &Changeset::new().with_change(Change::set("name", "staged")),
            Some(&session),
        )
        .await
        .unwrap();
    store
        .insert("users", json!({"_id": 4, "name": "u4"}), Some(&session))
        .await
        .unwrap();
    store.delete("users", &json!(2), Some(&session)).await.unwrap();

    let live = store.read_one("users", &json!(1), None).await.unwrap().unwrap();
    assert_eq!(live["name"], "u1");
    assert_eq!(store.count("users").await, 3);

    store.commit_transaction(&session).await.unwrap();
    let live = store.read_one("users", &json!(1), None).await.unwrap().unwrap();
    assert_eq!(live["name"], "staged");
    assert_eq!(store.count("users").await, 3);
    assert!(store.read_one("users", &json!(2), None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_abort_discards_session_writes() {
    let store = seeded().await;
    let session = store.start_transaction().await.unwrap();
    store.delete("users", &json!(1), Some(&session)).await.unwrap();
    store.abort_transaction(&session).await.unwrap();

    assert_eq!(store.count("users").await, 3);
    assert!(matches!(
        store.commit_transaction(&session).await,
        Err(StoreError::UnknownSession(_))
    ));
}

#[tokio::test]
async fn test_session_write_errors_surface_immediately() {
    let store = seeded().await;
    let session = store.start_transaction().await.unwrap();
    let err = store
        .insert("users", json!({"_id": 1}), Some(&session))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));

    let unknown = SessionHandle::new();
    assert!(matches!(
        store.delete("users", &json!(1), Some(&unknown)).await,
        Err(StoreError::UnknownSession(_))
    ));
}

#[tokio::test]
async fn test_commit_conflict_applies_nothing() {
    let store = seeded().await;
    let session = store.start_transaction().await.unwrap();
    store
        .write(
            "users",
            &json!(3),
            &Changeset::new().with_change(Change::set("name", "mine")),
            Some(&session),
        )
        .await
        .unwrap();
    store
        .insert("users", json!({"_id": 5}), Some(&session))
        .await
        .unwrap();

    // Outside the session the record disappears before commit.
    store.delete("users", &json!(3), None).await.unwrap();

    assert!(matches!(
        store.commit_transaction(&session).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(store.read_one("users", &json!(5), None).await.unwrap().is_none());
}
