use cujboard_core::db::open_db_in_memory;
use cujboard_core::model::schema::{CollectionSchema, IndexSpec, CUJS, TEAMS};
use cujboard_core::{Document, RecordStore, SqliteRecordStore, StoreError};
use serde_json::{json, Value};
use std::collections::HashSet;

static BOOKMARKS: CollectionSchema = CollectionSchema {
    name: "bookmarks",
    primary_key: "slug",
    indexes: &[IndexSpec::unique("url"), IndexSpec::lookup("tags")],
    key_prefix: None,
};

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

#[test]
fn create_generates_prefixed_key_and_get_roundtrips() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::new(&conn);

    let key = store
        .create(&TEAMS, doc(json!({"name": "Payments", "description": "money"})))
        .unwrap();
    assert!(key.starts_with("team-"));

    let loaded = store.get(&TEAMS, &key).unwrap();
    assert_eq!(loaded["id"], key.as_str());
    assert_eq!(loaded["name"], "Payments");
}

#[test]
fn primary_keys_stay_unique() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::new(&conn);

    let mut keys = HashSet::new();
    for index in 0..25 {
        let key = store
            .create(&CUJS, doc(json!({"name": format!("journey {index}")})))
            .unwrap();
        assert!(keys.insert(key));
    }

    let err = store
        .create(&TEAMS, doc(json!({"id": "team-1", "name": "A"})))
        .and_then(|_| store.create(&TEAMS, doc(json!({"id": "team-1", "name": "B"}))))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::DuplicateKey { collection: "teams", ref key } if key == "team-1"
    ));
    assert_eq!(store.get(&TEAMS, "team-1").unwrap()["name"], "A");
}

#[test]
fn unique_secondary_index_rejects_collisions_on_create_and_update() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::new(&conn);

    store
        .create(&TEAMS, doc(json!({"id": "team-1", "name": "Payments"})))
        .unwrap();
    let err = store
        .create(&TEAMS, doc(json!({"id": "team-2", "name": "Payments"})))
        .unwrap_err();
    match err {
        StoreError::ConstraintViolation {
            collection,
            field,
            value,
            existing_key,
        } => {
            assert_eq!(collection, "teams");
            assert_eq!(field, "name");
            assert_eq!(value, "Payments");
            assert_eq!(existing_key, "team-1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        store.get(&TEAMS, "team-2"),
        Err(StoreError::NotFound { .. })
    ));

    store
        .create(&TEAMS, doc(json!({"id": "team-2", "name": "Search"})))
        .unwrap();
    let err = store
        .update(&TEAMS, doc(json!({"id": "team-2", "name": "Payments"})))
        .unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation { .. }));

    // A record may keep its own unique value across updates.
    store
        .update(
            &TEAMS,
            doc(json!({"id": "team-1", "name": "Payments", "description": "updated"})),
        )
        .unwrap();
}

#[test]
fn missing_key_without_generation_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::new(&conn);

    let err = store
        .create(&BOOKMARKS, doc(json!({"url": "https://example.org"})))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::MissingKey {
            collection: "bookmarks",
            field: "slug"
        }
    ));

    let key = store
        .create(
            &BOOKMARKS,
            doc(json!({"slug": "rust", "url": "https://rust-lang.org"})),
        )
        .unwrap();
    assert_eq!(key, "rust");
}

#[test]
fn update_and_delete_require_existing_records() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::new(&conn);

    let err = store
        .update(&TEAMS, doc(json!({"id": "team-404", "name": "Ghost"})))
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    let err = store.delete(&TEAMS, "team-404").unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    store
        .create(&TEAMS, doc(json!({"id": "team-1", "name": "Payments"})))
        .unwrap();
    store.delete(&TEAMS, "team-1").unwrap();
    assert!(matches!(
        store.get(&TEAMS, "team-1"),
        Err(StoreError::NotFound { .. })
    ));

    // The freed unique value is reusable.
    store
        .create(&TEAMS, doc(json!({"id": "team-2", "name": "Payments"})))
        .unwrap();
}

#[test]
fn query_uses_indexes_and_expands_arrays() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::new(&conn);

    store
        .create(
            &BOOKMARKS,
            doc(json!({"slug": "a", "url": "https://a.example", "tags": ["rust", "db"]})),
        )
        .unwrap();
    store
        .create(
            &BOOKMARKS,
            doc(json!({"slug": "b", "url": "https://b.example", "tags": ["rust"]})),
        )
        .unwrap();

    let rust: Vec<_> = store
        .query(&BOOKMARKS, "tags", &json!("rust"))
        .unwrap()
        .into_iter()
        .map(|record| record["slug"].clone())
        .collect();
    assert_eq!(rust, vec![json!("a"), json!("b")]);
    assert_eq!(store.count(&BOOKMARKS, "tags", &json!("db")).unwrap(), 1);
    assert!(store
        .query(&BOOKMARKS, "tags", &json!("go"))
        .unwrap()
        .is_empty());

    let err = store
        .query(&BOOKMARKS, "title", &json!("x"))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownIndex { .. }));

    // Index entries follow updates.
    store
        .update(
            &BOOKMARKS,
            doc(json!({"slug": "a", "url": "https://a.example", "tags": ["db"]})),
        )
        .unwrap();
    assert_eq!(store.count(&BOOKMARKS, "tags", &json!("rust")).unwrap(), 1);
}

#[test]
fn versions_increase_and_stale_updates_conflict() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::new(&conn);

    store
        .create(&TEAMS, doc(json!({"id": "team-1", "name": "Payments"})))
        .unwrap();
    let first = store.get_versioned(&TEAMS, "team-1").unwrap();
    assert_eq!(first.version, 1);

    let mut edited = first.record.clone();
    edited.insert("description".into(), json!("first writer"));
    let saved = store.update_if_version(&TEAMS, edited, first.version).unwrap();
    assert_eq!(saved.version, 2);

    let mut stale = first.record;
    stale.insert("description".into(), json!("second writer"));
    let err = store.update_if_version(&TEAMS, stale, 1).unwrap_err();
    assert!(matches!(
        err,
        StoreError::VersionConflict {
            expected: 1,
            actual: 2,
            ..
        }
    ));
    assert_eq!(
        store.get(&TEAMS, "team-1").unwrap()["description"],
        "first writer"
    );
}

#[test]
fn all_lists_in_insertion_order_and_clear_empties_one_collection() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::new(&conn);

    for name in ["c", "a", "b"] {
        store
            .create(&TEAMS, doc(json!({"id": format!("team-{name}"), "name": name})))
            .unwrap();
    }
    store
        .create(&CUJS, doc(json!({"id": "cuj-1", "name": "checkout"})))
        .unwrap();

    let names: Vec<_> = store
        .all(&TEAMS)
        .unwrap()
        .into_iter()
        .map(|record| record["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("c"), json!("a"), json!("b")]);

    assert_eq!(store.clear(&TEAMS).unwrap(), 3);
    assert!(store.all(&TEAMS).unwrap().is_empty());
    assert_eq!(store.all(&CUJS).unwrap().len(), 1);
}
