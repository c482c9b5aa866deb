use rusqlite::Connection;
use std::sync::Arc;
use std::thread;
use tiernote_core::db::open_db;
use tiernote_core::repo::note_repo::count_live_notes;
use tiernote_core::{
    CoreError, Limit, OrderingConfig, Placement, QuotaConfig, QuotaGuard, QuotaResource,
    RetryPolicy, SqliteCounterStore, TierPolicy, WorkspaceService,
};

fn guard(config: QuotaConfig) -> QuotaGuard {
    QuotaGuard::new(Arc::new(TierPolicy::builtin()), config)
}

fn workspace(store: &SqliteCounterStore) -> WorkspaceService<'_, SqliteCounterStore> {
    WorkspaceService::new(store, guard(QuotaConfig::default()), OrderingConfig::default())
}

fn memory_store() -> SqliteCounterStore {
    SqliteCounterStore::open_in_memory(RetryPolicy::default()).unwrap()
}

fn patient_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 50,
        busy_timeout_ms: 5_000,
        request_timeout_ms: 60_000,
        ..RetryPolicy::default()
    }
}

fn count_rows(conn: &Connection, sql: &str, user_id: &str) -> u64 {
    conn.query_row(sql, [user_id], |row| row.get::<_, i64>(0))
        .unwrap() as u64
}

#[test]
fn concurrent_module_creation_never_exceeds_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quota.db");
    drop(open_db(&path).unwrap());

    let setup = SqliteCounterStore::open(&path, patient_retry()).unwrap();
    workspace(&setup).provision_user("u1", "free").unwrap();

    let stores: Vec<SqliteCounterStore> = (0..8)
        .map(|_| SqliteCounterStore::open(&path, patient_retry()).unwrap())
        .collect();
    let handles: Vec<_> = stores
        .into_iter()
        .enumerate()
        .map(|(index, store)| {
            thread::spawn(move || {
                let service = workspace(&store);
                service.create_module("u1", &format!("m{index}"))
            })
        })
        .collect();

    let mut created = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => created += 1,
            Err(CoreError::QuotaExceeded(details)) => {
                assert_eq!(details.resource, QuotaResource::Modules);
                assert_eq!(details.limit, 3);
                assert_eq!(details.used, 3);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 3);
    assert_eq!(rejected, 5);

    let service = workspace(&setup);
    assert_eq!(service.get_user("u1").unwrap().module_count, 3);
    let modules = service.ordering().list_modules("u1").unwrap();
    assert_eq!(modules.len(), 3);
    let mut keys: Vec<i64> = modules.iter().map(|module| module.sort_order).collect();
    keys.dedup();
    assert_eq!(keys.len(), 3, "sort_order keys must stay distinct");
}

#[test]
fn concurrent_note_creation_saturates_module_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.db");
    drop(open_db(&path).unwrap());

    let setup = SqliteCounterStore::open(&path, patient_retry()).unwrap();
    let service = workspace(&setup);
    service.provision_user("u1", "free").unwrap();
    let module = service.create_module("u1", "inbox").unwrap();
    for index in 0..18 {
        service
            .create_note("u1", module.module_id, &format!("seed {index}"))
            .unwrap();
    }

    let stores: Vec<SqliteCounterStore> = (0..6)
        .map(|_| SqliteCounterStore::open(&path, patient_retry()).unwrap())
        .collect();
    let handles: Vec<_> = stores
        .into_iter()
        .map(|store| {
            let module_id = module.module_id;
            thread::spawn(move || {
                let service = workspace(&store);
                service.create_note("u1", module_id, "race")
            })
        })
        .collect();
    let created = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(Result::is_ok)
        .count();
    assert_eq!(created, 2);

    let notes = service.ordering().list_notes("u1", module.module_id).unwrap();
    assert_eq!(notes.len(), 20);
    assert_eq!(service.get_user("u1").unwrap().note_count, 20);
}

#[test]
fn counters_match_live_rows_after_mixed_operations() {
    let store = memory_store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();

    let first = service.create_module("u1", "first").unwrap();
    let second = service.create_module("u1", "second").unwrap();
    let third = service.create_module("u1", "third").unwrap();
    let mut notes = Vec::new();
    for index in 0..4 {
        notes.push(
            service
                .create_note("u1", first.module_id, &format!("a{index}"))
                .unwrap(),
        );
        service
            .create_note("u1", third.module_id, &format!("c{index}"))
            .unwrap();
    }
    service.delete_note("u1", notes[0].note_id).unwrap();
    service
        .ordering()
        .move_note_to_module(
            "u1",
            notes[1].note_id,
            first.module_id,
            second.module_id,
            Placement::End,
        )
        .unwrap();
    service.delete_module("u1", third.module_id).unwrap();
    let tag = service.create_tag("u1", "Work").unwrap();
    service.create_tag("u1", "home").unwrap();
    service.delete_tag("u1", tag.tag_id).unwrap();

    let conn = store.connection();
    let user = service.get_user("u1").unwrap();
    assert_eq!(
        user.module_count,
        count_rows(
            conn,
            "SELECT COUNT(*) FROM modules WHERE user_id = ?1 AND is_deleted = 0;",
            "u1"
        )
    );
    assert_eq!(
        user.note_count,
        count_rows(
            conn,
            "SELECT COUNT(*) FROM notes WHERE user_id = ?1 AND is_deleted = 0;",
            "u1"
        )
    );
    assert_eq!(
        user.tag_count,
        count_rows(
            conn,
            "SELECT COUNT(*) FROM tags WHERE user_id = ?1 AND is_deleted = 0;",
            "u1"
        )
    );
    assert_eq!((user.module_count, user.note_count, user.tag_count), (2, 3, 1));

    for module in service.ordering().list_modules("u1").unwrap() {
        let live = count_live_notes(conn, module.module_id).unwrap();
        assert_eq!(module.note_count, live, "module {}", module.name);
    }
}

#[test]
fn unknown_tier_falls_back_to_most_restrictive() {
    let store = memory_store();
    let service = workspace(&store);
    service.provision_user("u1", "enterprise").unwrap();

    for index in 0..3 {
        service.create_module("u1", &format!("m{index}")).unwrap();
    }
    let err = service.create_module("u1", "one too many").unwrap_err();
    match err {
        CoreError::QuotaExceeded(details) => assert_eq!(details.limit, 3),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn strict_mode_rejects_unknown_tier() {
    let store = memory_store();
    let service = WorkspaceService::new(
        &store,
        guard(QuotaConfig {
            reject_unknown_tiers: true,
        }),
        OrderingConfig::default(),
    );
    service.provision_user("u1", "enterprise").unwrap();

    let err = service.create_module("u1", "m").unwrap_err();
    assert!(matches!(err, CoreError::TierUnknown(ref tier) if tier == "enterprise"));
    assert_eq!(service.get_user("u1").unwrap().module_count, 0);
}

#[test]
fn downgrade_keeps_resources_but_blocks_creation() {
    let store = memory_store();
    let service = workspace(&store);
    service.provision_user("u1", "pro").unwrap();
    let modules: Vec<_> = (0..5)
        .map(|index| service.create_module("u1", &format!("m{index}")).unwrap())
        .collect();

    let user = service.provision_user("u1", "FREE").unwrap();
    assert_eq!(user.tier, "free");
    assert_eq!(user.module_count, 5);
    assert_eq!(service.ordering().list_modules("u1").unwrap().len(), 5);

    match service.create_module("u1", "blocked").unwrap_err() {
        CoreError::QuotaExceeded(details) => {
            assert_eq!(details.limit, 3);
            assert_eq!(details.used, 5);
        }
        other => panic!("unexpected error: {other}"),
    }

    service.delete_module("u1", modules[0].module_id).unwrap();
    service.delete_module("u1", modules[1].module_id).unwrap();
    assert!(matches!(
        service.create_module("u1", "still blocked"),
        Err(CoreError::QuotaExceeded(_))
    ));

    service.delete_module("u1", modules[2].module_id).unwrap();
    service.create_module("u1", "fits again").unwrap();
    assert_eq!(service.get_user("u1").unwrap().module_count, 3);
}

#[test]
fn per_module_note_limit_is_enforced() {
    let store = memory_store();
    let service = workspace(&store);
    service.provision_user("u1", "free").unwrap();
    let module = service.create_module("u1", "inbox").unwrap();
    let other = service.create_module("u1", "other").unwrap();

    for index in 0..20 {
        service
            .create_note("u1", module.module_id, &format!("n{index}"))
            .unwrap();
    }
    match service
        .create_note("u1", module.module_id, "overflow")
        .unwrap_err()
    {
        CoreError::QuotaExceeded(details) => {
            assert_eq!(details.resource, QuotaResource::NotesPerModule);
            assert_eq!(details.limit, 20);
            assert_eq!(details.used, 20);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The limit is per module, not per user.
    service.create_note("u1", other.module_id, "fine").unwrap();
}

#[test]
fn tag_names_are_unique_and_quota_checked() {
    let store = memory_store();
    let service = workspace(&store);
    service.provision_user("u1", "free").unwrap();

    service.create_tag("u1", "Reading").unwrap();
    assert!(matches!(
        service.create_tag("u1", " reading "),
        Err(CoreError::Conflict(_))
    ));
    for index in 1..10 {
        service.create_tag("u1", &format!("tag {index}")).unwrap();
    }
    assert!(matches!(
        service.create_tag("u1", "eleventh"),
        Err(CoreError::QuotaExceeded(_))
    ));
    assert_eq!(service.list_tags("u1").unwrap().len(), 10);
    assert_eq!(service.get_user("u1").unwrap().tag_count, 10);
}

#[test]
fn advisory_checks_report_remaining_capacity() {
    let store = memory_store();
    let service = workspace(&store);
    service.provision_user("free-user", "free").unwrap();
    service.provision_user("pro-user", "pro").unwrap();

    let status = service.quota().check_module_creation("free-user").unwrap();
    assert!(status.allowed);
    assert_eq!(status.used, 0);
    assert_eq!(status.limit, Limit::Finite(3));
    assert_eq!(status.remaining, Some(3));

    for index in 0..3 {
        service
            .create_module("free-user", &format!("m{index}"))
            .unwrap();
    }
    let status = service.quota().check_module_creation("free-user").unwrap();
    assert!(!status.allowed);
    assert_eq!(status.remaining, Some(0));

    let status = service.quota().check_module_creation("pro-user").unwrap();
    assert!(status.allowed);
    assert_eq!(status.limit, Limit::Unbounded);
    assert_eq!(status.remaining, None);
    let json = serde_json::to_value(status).unwrap();
    assert_eq!(json["limit"], "unbounded");

    let upload = service
        .quota()
        .check_file_upload("free-user", 51 * 1024 * 1024)
        .unwrap();
    assert!(!upload.allowed);
    assert_eq!(upload.limit, Limit::Finite(50 * 1024 * 1024));

    assert!(matches!(
        service.quota().check_module_creation("nobody"),
        Err(CoreError::NotFound { entity: "user", .. })
    ));
}

#[test]
fn held_write_lock_exhausts_retries_as_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.db");
    let setup = SqliteCounterStore::open(&path, RetryPolicy::default()).unwrap();
    workspace(&setup).provision_user("u1", "pro").unwrap();

    let contender = SqliteCounterStore::open(
        &path,
        RetryPolicy {
            max_attempts: 2,
            base_backoff_ms: 1,
            max_backoff_ms: 1,
            request_timeout_ms: 60_000,
            busy_timeout_ms: 10,
        },
    )
    .unwrap();

    let holder = Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = workspace(&contender).create_module("u1", "m").unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)), "got {err}");

    holder.execute_batch("ROLLBACK;").unwrap();
    workspace(&contender).create_module("u1", "m").unwrap();
}

#[test]
fn held_write_lock_past_deadline_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deadline.db");
    let setup = SqliteCounterStore::open(&path, RetryPolicy::default()).unwrap();
    workspace(&setup).provision_user("u1", "pro").unwrap();

    let contender = SqliteCounterStore::open(
        &path,
        RetryPolicy {
            max_attempts: 10,
            base_backoff_ms: 5,
            max_backoff_ms: 5,
            request_timeout_ms: 1,
            busy_timeout_ms: 10,
        },
    )
    .unwrap();

    let holder = Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = workspace(&contender).create_module("u1", "m").unwrap_err();
    assert!(matches!(err, CoreError::Unavailable(_)), "got {err}");

    holder.execute_batch("ROLLBACK;").unwrap();
    assert_eq!(workspace(&setup).get_user("u1").unwrap().module_count, 0);
}
