use cujboard_core::{
    Cuj, CujFields, HistoryAction, LifecycleError, LifecycleService, Service, ServiceFields,
    StoreConfig, StoreError, StoreHandle, Team, TeamFields,
};
use std::sync::{Arc, Barrier};
use std::thread;

fn shared_store() -> (tempfile::TempDir, Arc<StoreHandle>) {
    let dir = tempfile::tempdir().unwrap();
    let handle = StoreHandle::open(StoreConfig::file(dir.path().join("store.db"))).unwrap();
    (dir, Arc::new(handle))
}

fn create_team(handle: &StoreHandle, name: &str) -> Team {
    LifecycleService::new(handle)
        .create_entity(
            TeamFields {
                name: name.to_string(),
                ..TeamFields::default()
            },
            "carol",
        )
        .unwrap()
}

#[test]
fn racing_parent_delete_and_child_create_never_orphans() {
    let (_dir, handle) = shared_store();

    for round in 0..10 {
        let team = create_team(&handle, &format!("team {round}"));
        let barrier = Arc::new(Barrier::new(2));

        let deleter = {
            let handle = Arc::clone(&handle);
            let barrier = Arc::clone(&barrier);
            let team_id = team.id.clone();
            thread::spawn(move || {
                barrier.wait();
                LifecycleService::new(&handle).delete_entity::<Team>(&team_id, "carol")
            })
        };
        let creator = {
            let handle = Arc::clone(&handle);
            let barrier = Arc::clone(&barrier);
            let team_id = team.id.clone();
            thread::spawn(move || {
                barrier.wait();
                LifecycleService::new(&handle).create_entity::<Service>(
                    ServiceFields {
                        name: format!("api {round}"),
                        team_id,
                        ..ServiceFields::default()
                    },
                    "dave",
                )
            })
        };

        let deleted = deleter.join().unwrap();
        let created = creator.join().unwrap();
        match (&deleted, &created) {
            (Ok(()), Err(LifecycleError::Store(StoreError::NotFound { collection, .. }))) => {
                assert_eq!(*collection, "teams");
            }
            (
                Err(LifecycleError::HasDependents {
                    child_collection, ..
                }),
                Ok(_),
            ) => assert_eq!(*child_collection, "services"),
            other => panic!("round {round}: unexpected outcome {other:?}"),
        }
    }

    let lifecycle = LifecycleService::new(&handle);
    let teams: Vec<Team> = lifecycle.list().unwrap();
    for service in lifecycle.list::<Service>().unwrap() {
        assert!(
            teams.iter().any(|team| team.id == service.fields.team_id),
            "service {} references missing team {}",
            service.id,
            service.fields.team_id
        );
    }
}

#[test]
fn concurrent_field_updates_are_both_kept() {
    let (_dir, handle) = shared_store();
    let lifecycle = LifecycleService::new(&handle);
    let team = create_team(&handle, "Payments");
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
                ..CujFields::default()
            },
            "carol",
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let describe = {
        let handle = Arc::clone(&handle);
        let barrier = Arc::clone(&barrier);
        let key = cuj.id.clone();
        thread::spawn(move || {
            barrier.wait();
            LifecycleService::new(&handle).update_fields::<Cuj>(&key, "dave", |fields| {
                fields.description = "pay for a basket".into()
            })
        })
    };
    let assign = {
        let handle = Arc::clone(&handle);
        let barrier = Arc::clone(&barrier);
        let key = cuj.id.clone();
        thread::spawn(move || {
            barrier.wait();
            LifecycleService::new(&handle).update_fields::<Cuj>(&key, "erin", |fields| {
                fields.owner = Some("erin".into())
            })
        })
    };
    describe.join().unwrap().unwrap();
    assign.join().unwrap().unwrap();

    let stored: Cuj = lifecycle.get(&cuj.id).unwrap();
    assert_eq!(stored.fields.description, "pay for a basket");
    assert_eq!(stored.fields.owner.as_deref(), Some("erin"));

    let actions: Vec<HistoryAction> = stored
        .review
        .history
        .iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            HistoryAction::Created,
            HistoryAction::Updated,
            HistoryAction::Updated
        ]
    );
    let mut authors = stored.review.authors.clone();
    authors.sort();
    assert_eq!(authors, vec!["carol", "dave", "erin"]);
}
