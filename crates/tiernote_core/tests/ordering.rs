use std::sync::Arc;
use tiernote_core::repo::order_repo::write_sort_order;
use tiernote_core::{
    CoreError, Module, OrderScope, OrderingConfig, Placement, QuotaConfig, QuotaGuard,
    QuotaResource, RetryPolicy, SqliteCounterStore, TierPolicy, WorkspaceService,
};
use uuid::Uuid;

fn store() -> SqliteCounterStore {
    SqliteCounterStore::open_in_memory(RetryPolicy::default()).unwrap()
}

fn workspace(store: &SqliteCounterStore) -> WorkspaceService<'_, SqliteCounterStore> {
    WorkspaceService::new(
        store,
        QuotaGuard::new(Arc::new(TierPolicy::builtin()), QuotaConfig::default()),
        OrderingConfig::default(),
    )
}

fn module_names(modules: &[Module]) -> Vec<&str> {
    modules.iter().map(|module| module.name.as_str()).collect()
}

#[test]
fn appended_modules_get_spaced_keys() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();

    let a = service.create_module("u1", "a").unwrap();
    let b = service.create_module("u1", "b").unwrap();
    assert_eq!(a.sort_order, 1_000);
    assert_eq!(b.sort_order, 2_000);
}

#[test]
fn reorder_applies_requested_order_and_is_idempotent() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();
    let a = service.create_module("u1", "a").unwrap();
    let b = service.create_module("u1", "b").unwrap();
    let c = service.create_module("u1", "c").unwrap();

    let scope = OrderScope::UserModules("u1".to_string());
    let requested = [c.module_id, a.module_id, b.module_id];
    let first = service
        .ordering()
        .reorder("u1", &scope, &requested)
        .unwrap();
    let keys: Vec<i64> = first.iter().map(|item| item.sort_order).collect();
    assert_eq!(keys, vec![1_000, 2_000, 3_000]);
    assert_eq!(
        module_names(&service.ordering().list_modules("u1").unwrap()),
        vec!["c", "a", "b"]
    );

    let second = service
        .ordering()
        .reorder("u1", &scope, &requested)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        module_names(&service.ordering().list_modules("u1").unwrap()),
        vec!["c", "a", "b"]
    );
}

#[test]
fn reorder_rejects_stale_or_duplicate_id_sets() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();
    let a = service.create_module("u1", "a").unwrap();
    let b = service.create_module("u1", "b").unwrap();
    let c = service.create_module("u1", "c").unwrap();
    let scope = OrderScope::UserModules("u1".to_string());

    // Concurrent delete: the client still lists `c`.
    service.delete_module("u1", c.module_id).unwrap();
    let err = service
        .ordering()
        .reorder("u1", &scope, &[c.module_id, b.module_id, a.module_id])
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    // Missing member.
    let err = service
        .ordering()
        .reorder("u1", &scope, &[b.module_id])
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let err = service
        .ordering()
        .reorder("u1", &scope, &[a.module_id, a.module_id])
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    // Order unchanged by the rejected requests.
    assert_eq!(
        module_names(&service.ordering().list_modules("u1").unwrap()),
        vec!["a", "b"]
    );
}

#[test]
fn reorder_of_foreign_scope_is_not_found() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();
    service.provision_user("u2", "pro").unwrap();
    let module = service.create_module("u2", "theirs").unwrap();

    let err = service
        .ordering()
        .reorder(
            "u1",
            &OrderScope::ModuleNotes(module.module_id),
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "module", .. }));
}

#[test]
fn reposition_uses_midpoint_between_neighbours() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();
    let module = service.create_module("u1", "m").unwrap();
    let first = service.create_note("u1", module.module_id, "1").unwrap();
    let second = service.create_note("u1", module.module_id, "2").unwrap();
    let third = service.create_note("u1", module.module_id, "3").unwrap();

    let scope = OrderScope::ModuleNotes(module.module_id);
    let key = service
        .ordering()
        .reposition(
            "u1",
            &scope,
            third.note_id,
            Placement::Between {
                prev: Some(first.note_id),
                next: Some(second.note_id),
            },
        )
        .unwrap();
    assert_eq!(key, 1_500);

    let titles: Vec<String> = service
        .ordering()
        .list_notes("u1", module.module_id)
        .unwrap()
        .into_iter()
        .map(|note| note.title)
        .collect();
    assert_eq!(titles, vec!["1", "3", "2"]);
}

#[test]
fn converged_keys_trigger_renumber_with_requested_position() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();
    let a = service.create_module("u1", "a").unwrap();
    let b = service.create_module("u1", "b").unwrap();
    let c = service.create_module("u1", "c").unwrap();

    let scope = OrderScope::UserModules("u1".to_string());
    write_sort_order(store.connection(), &scope, a.module_id, 10).unwrap();
    write_sort_order(store.connection(), &scope, b.module_id, 11).unwrap();
    write_sort_order(store.connection(), &scope, c.module_id, 12).unwrap();

    let key = service
        .ordering()
        .reposition(
            "u1",
            &scope,
            c.module_id,
            Placement::Between {
                prev: Some(a.module_id),
                next: Some(b.module_id),
            },
        )
        .unwrap();
    assert_eq!(key, 2_000);

    let modules = service.ordering().list_modules("u1").unwrap();
    assert_eq!(module_names(&modules), vec!["a", "c", "b"]);
    let keys: Vec<i64> = modules.iter().map(|module| module.sort_order).collect();
    assert_eq!(keys, vec![1_000, 2_000, 3_000]);
}

#[test]
fn reposition_with_stale_neighbours_conflicts() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();
    let a = service.create_module("u1", "a").unwrap();
    let b = service.create_module("u1", "b").unwrap();
    let c = service.create_module("u1", "c").unwrap();
    let scope = OrderScope::UserModules("u1".to_string());

    let err = service
        .ordering()
        .reposition(
            "u1",
            &scope,
            b.module_id,
            Placement::Between {
                prev: Some(Uuid::new_v4()),
                next: Some(c.module_id),
            },
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let err = service
        .ordering()
        .reposition(
            "u1",
            &scope,
            Uuid::new_v4(),
            Placement::Between {
                prev: Some(a.module_id),
                next: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "module", .. }));
}

#[test]
fn move_note_updates_both_modules_atomically() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "free").unwrap();
    let source = service.create_module("u1", "source").unwrap();
    let target = service.create_module("u1", "target").unwrap();
    let moving = service.create_note("u1", source.module_id, "moving").unwrap();
    let existing = service.create_note("u1", target.module_id, "existing").unwrap();

    let moved = service
        .ordering()
        .move_note_to_module(
            "u1",
            moving.note_id,
            source.module_id,
            target.module_id,
            Placement::Between {
                prev: None,
                next: Some(existing.note_id),
            },
        )
        .unwrap();
    assert_eq!(moved.module_id, target.module_id);
    assert!(moved.sort_order < existing.sort_order);

    let modules = service.ordering().list_modules("u1").unwrap();
    assert_eq!(modules[0].note_count, 0);
    assert_eq!(modules[1].note_count, 2);
    assert_eq!(service.get_user("u1").unwrap().note_count, 2);
}

#[test]
fn move_into_full_module_leaves_everything_unchanged() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "free").unwrap();
    let source = service.create_module("u1", "source").unwrap();
    let full = service.create_module("u1", "full").unwrap();
    let note = service.create_note("u1", source.module_id, "stay").unwrap();
    for index in 0..20 {
        service
            .create_note("u1", full.module_id, &format!("n{index}"))
            .unwrap();
    }

    let err = service
        .ordering()
        .move_note_to_module(
            "u1",
            note.note_id,
            source.module_id,
            full.module_id,
            Placement::End,
        )
        .unwrap_err();
    match err {
        CoreError::QuotaExceeded(details) => {
            assert_eq!(details.resource, QuotaResource::NotesPerModule);
            assert_eq!(details.limit, 20);
        }
        other => panic!("unexpected error: {other}"),
    }

    let source_notes = service
        .ordering()
        .list_notes("u1", source.module_id)
        .unwrap();
    assert_eq!(source_notes.len(), 1);
    assert_eq!(source_notes[0].note_id, note.note_id);
    assert_eq!(source_notes[0].sort_order, note.sort_order);

    let modules = service.ordering().list_modules("u1").unwrap();
    assert_eq!(modules[0].note_count, 1);
    assert_eq!(modules[1].note_count, 20);
}

#[test]
fn move_with_stale_source_conflicts_and_missing_note_is_not_found() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();
    let a = service.create_module("u1", "a").unwrap();
    let b = service.create_module("u1", "b").unwrap();
    let note = service.create_note("u1", a.module_id, "n").unwrap();

    let err = service
        .ordering()
        .move_note_to_module("u1", note.note_id, b.module_id, a.module_id, Placement::End)
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    service.delete_note("u1", note.note_id).unwrap();
    let err = service
        .ordering()
        .move_note_to_module("u1", note.note_id, a.module_id, b.module_id, Placement::End)
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "note", .. }));
}

#[test]
fn move_within_same_module_repositions() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "free").unwrap();
    let module = service.create_module("u1", "m").unwrap();
    let first = service.create_note("u1", module.module_id, "first").unwrap();
    let second = service.create_note("u1", module.module_id, "second").unwrap();

    let moved = service
        .ordering()
        .move_note_to_module(
            "u1",
            first.note_id,
            module.module_id,
            module.module_id,
            Placement::Between {
                prev: Some(second.note_id),
                next: None,
            },
        )
        .unwrap();
    assert_eq!(moved.sort_order, second.sort_order + 1_000);

    let listed = service.ordering().list_modules("u1").unwrap();
    assert_eq!(listed[0].note_count, 2);
}

#[test]
fn move_between_converged_notes_renumbers_destination() {
    let store = store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();
    let source = service.create_module("u1", "source").unwrap();
    let target = service.create_module("u1", "target").unwrap();
    let moving = service.create_note("u1", source.module_id, "moving").unwrap();
    let first = service.create_note("u1", target.module_id, "first").unwrap();
    let second = service.create_note("u1", target.module_id, "second").unwrap();
    let third = service.create_note("u1", target.module_id, "third").unwrap();

    let scope = OrderScope::ModuleNotes(target.module_id);
    write_sort_order(store.connection(), &scope, first.note_id, 10).unwrap();
    write_sort_order(store.connection(), &scope, second.note_id, 11).unwrap();
    write_sort_order(store.connection(), &scope, third.note_id, 12).unwrap();

    let moved = service
        .ordering()
        .move_note_to_module(
            "u1",
            moving.note_id,
            source.module_id,
            target.module_id,
            Placement::Between {
                prev: Some(first.note_id),
                next: Some(second.note_id),
            },
        )
        .unwrap();
    assert_eq!(moved.module_id, target.module_id);
    assert_eq!(moved.sort_order, 2_000);

    let notes = service.ordering().list_notes("u1", target.module_id).unwrap();
    let titles: Vec<&str> = notes.iter().map(|note| note.title.as_str()).collect();
    assert_eq!(titles, vec!["first", "moving", "second", "third"]);
    let keys: Vec<i64> = notes.iter().map(|note| note.sort_order).collect();
    assert_eq!(keys, vec![1_000, 2_000, 3_000, 4_000]);

    assert!(service
        .ordering()
        .list_notes("u1", source.module_id)
        .unwrap()
        .is_empty());
    let modules = service.ordering().list_modules("u1").unwrap();
    assert_eq!(modules[0].note_count, 0);
    assert_eq!(modules[1].note_count, 4);
}
