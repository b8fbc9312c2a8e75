use cujboard_core::{
    Cuj, CujFields, ImportMode, LifecycleService, Service, ServiceFields, Snapshot, SnapshotError,
    SnapshotService, Status, StoreHandle, Team, TeamFields, SNAPSHOT_FORMAT_VERSION,
};
use serde_json::json;

fn seed(handle: &StoreHandle) -> Cuj {
    let lifecycle = LifecycleService::new(handle);
    let team: Team = lifecycle
        .create_entity(
            TeamFields {
                name: "Payments".into(),
                ..TeamFields::default()
            },
            "carol",
        )
        .unwrap();
    let service: Service = lifecycle
        .create_entity(
            ServiceFields {
                name: "checkout-api".into(),
                team_id: team.id,
                ..ServiceFields::default()
            },
            "carol",
        )
        .unwrap();
    let cuj: Cuj = lifecycle
        .create_entity(
            CujFields {
                name: "Checkout".into(),
                service_id: service.id,
                steps: vec!["open cart".into(), "pay".into()],
                ..CujFields::default()
            },
            "carol",
        )
        .unwrap();
    lifecycle
        .transition_status::<Cuj>(&cuj.id, Status::ReadyForReview, "alice", None)
        .unwrap();
    lifecycle
        .transition_status::<Cuj>(&cuj.id, Status::Denied, "bob", Some("needs SLOs"))
        .unwrap()
}

#[test]
fn destructive_import_of_export_reproduces_every_collection() {
    let source = StoreHandle::open_in_memory().unwrap();
    let cuj = seed(&source);
    let exported = SnapshotService::new(&source).export().unwrap();
    assert_eq!(exported.format_version, SNAPSHOT_FORMAT_VERSION);
    assert_eq!(exported.collections["cujs"].len(), 1);
    assert!(!exported.collections["audit_log"].is_empty());

    let target = StoreHandle::open_in_memory().unwrap();
    let report = SnapshotService::new(&target)
        .import_destructive(&exported)
        .unwrap();
    assert_eq!(report.created, exported.record_count());
    assert!(report.skipped.is_empty());

    let reexported = SnapshotService::new(&target).export().unwrap();
    assert_eq!(reexported.collections, exported.collections);

    let restored: Cuj = LifecycleService::new(&target).get(&cuj.id).unwrap();
    assert_eq!(restored, cuj);
    assert_eq!(restored.review.history.len(), 3);
    assert_eq!(
        restored.review.authors,
        vec!["carol".to_string(), "alice".to_string(), "bob".to_string()]
    );
}

#[test]
fn destructive_import_replaces_present_collections_only() {
    let handle = StoreHandle::open_in_memory().unwrap();
    seed(&handle);
    let snapshot = Snapshot::from_json_value(json!({
        "formatVersion": 1,
        "exportedAt": 1,
        "collections": {
            "teams": [{
                "id": "team-restored",
                "name": "Restored",
                "createdAt": 1,
                "modifiedAt": 1,
                "modifiedBy": "importer"
            }]
        }
    }))
    .unwrap();

    SnapshotService::new(&handle)
        .import_destructive(&snapshot)
        .unwrap();

    let lifecycle = LifecycleService::new(&handle);
    let teams = lifecycle.list::<Team>().unwrap();
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].id, "team-restored");
    assert_eq!(lifecycle.list::<Cuj>().unwrap().len(), 1);
}

#[test]
fn destructive_import_is_all_or_nothing() {
    let handle = StoreHandle::open_in_memory().unwrap();
    seed(&handle);
    let before = SnapshotService::new(&handle).export().unwrap();

    let invalid_shape = Snapshot::from_json_value(json!({
        "formatVersion": 1,
        "collections": {
            "teams": [],
            "cujs": [{ "id": "cuj-x", "name": "No service", "status": "draft" }]
        }
    }))
    .unwrap();
    let err = SnapshotService::new(&handle)
        .import_destructive(&invalid_shape)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidRecord { index: 0, .. }));

    let duplicate_names = Snapshot::from_json_value(json!({
        "formatVersion": 1,
        "collections": {
            "teams": [
                { "id": "team-a", "name": "Same", "createdAt": 1, "modifiedAt": 1, "modifiedBy": "x" },
                { "id": "team-b", "name": "Same", "createdAt": 1, "modifiedAt": 1, "modifiedBy": "x" }
            ]
        }
    }))
    .unwrap();
    let err = SnapshotService::new(&handle)
        .import_destructive(&duplicate_names)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Store(_)));

    let unknown = Snapshot::from_json_value(json!({ "users": [] })).unwrap();
    let err = SnapshotService::new(&handle)
        .import_destructive(&unknown)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::UnknownCollection(ref name) if name == "users"));

    let after = SnapshotService::new(&handle).export().unwrap();
    assert_eq!(after.collections, before.collections);
}

#[test]
fn merge_creates_updates_and_skips_per_record() {
    let source = StoreHandle::open_in_memory().unwrap();
    let cuj = seed(&source);
    let mut snapshot = SnapshotService::new(&source).export().unwrap();

    let target = StoreHandle::open_in_memory().unwrap();
    let first = SnapshotService::new(&target)
        .import(&snapshot, ImportMode::Merge)
        .unwrap();
    assert_eq!(first.created, snapshot.record_count());
    assert_eq!(first.updated, 0);

    let cujs = snapshot.collections.get_mut("cujs").unwrap();
    cujs[0].insert("description".into(), json!("merged copy"));
    cujs.push(
        json!({ "id": "cuj-broken", "name": "", "serviceId": "svc-1", "status": "draft" })
            .as_object()
            .cloned()
            .unwrap(),
    );
    snapshot
        .collections
        .insert("users".into(), vec![json!({"id": "u1"}).as_object().cloned().unwrap()]);

    let second = SnapshotService::new(&target)
        .import_merge(&snapshot)
        .unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, snapshot.record_count() - 2);
    assert_eq!(second.skipped.len(), 2);
    assert!(second
        .skipped
        .iter()
        .any(|skipped| skipped.collection == "users" && skipped.key.is_none()));
    assert!(second
        .skipped
        .iter()
        .any(|skipped| skipped.key.as_deref() == Some("cuj-broken")));

    let merged: Cuj = LifecycleService::new(&target).get(&cuj.id).unwrap();
    assert_eq!(merged.fields.description, "merged copy");
}

#[test]
fn legacy_snapshot_imports_without_field_reinterpretation() {
    let handle = StoreHandle::open_in_memory().unwrap();
    let legacy = json!({
        "teams": [{
            "id": "team-legacy",
            "name": "Legacy",
            "createdAt": 5,
            "modifiedAt": 5,
            "modifiedBy": "carol",
            "oldField": "kept"
        }]
    });

    let snapshot = Snapshot::from_json_value(legacy).unwrap();
    assert_eq!(snapshot.format_version, 0);
    SnapshotService::new(&handle)
        .import_destructive(&snapshot)
        .unwrap();

    let exported = SnapshotService::new(&handle).export().unwrap();
    assert_eq!(exported.collections["teams"][0]["oldField"], "kept");
}

#[test]
fn newer_snapshot_format_is_rejected_before_writing() {
    let handle = StoreHandle::open_in_memory().unwrap();
    let snapshot = Snapshot {
        format_version: SNAPSHOT_FORMAT_VERSION + 1,
        exported_at: 0,
        collections: Default::default(),
    };

    for mode in [ImportMode::Destructive, ImportMode::Merge] {
        let err = SnapshotService::new(&handle)
            .import(&snapshot, mode)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedFormatVersion { .. }));
    }
}

#[test]
fn snapshot_files_roundtrip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    let source = StoreHandle::open_in_memory().unwrap();
    seed(&source);

    let written = SnapshotService::new(&source).export_to_path(&path).unwrap();
    let target = StoreHandle::open_in_memory().unwrap();
    let report = SnapshotService::new(&target)
        .import_from_path(&path, ImportMode::Destructive)
        .unwrap();
    assert_eq!(report.created, written.record_count());

    let err = SnapshotService::new(&target)
        .import_from_path(dir.path().join("missing.json"), ImportMode::Merge)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Io { .. }));
}
