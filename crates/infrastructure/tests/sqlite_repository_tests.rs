//! SQLite 仓储集成测试，使用内存数据库

use chrono::{Duration, Utc};
use coordinator_domain::entities::{Disponents, Dispatch, DispatchStatus, Unit, UnitStatus};
use coordinator_domain::repositories::{DispatchRepository, SettingsRepository, UnitRepository};
use coordinator_domain::status::{DispatchStatusKind, OperatingMode, UnitStatusKind};
use coordinator_infrastructure::{
    DatabaseManager, SqliteDispatchRepository, SqliteSettingsRepository, SqliteUnitRepository,
};
use coordinator_testing_utils::SettingsBuilder;

struct TestStore {
    _db: DatabaseManager,
    dispatches: SqliteDispatchRepository,
    units: SqliteUnitRepository,
    settings: SqliteSettingsRepository,
}

async fn setup() -> TestStore {
    let db = DatabaseManager::in_memory().await.unwrap();
    TestStore {
        dispatches: SqliteDispatchRepository::new(db.pool().clone()),
        units: SqliteUnitRepository::new(db.pool().clone()),
        settings: SqliteSettingsRepository::new(db.pool().clone()),
        _db: db,
    }
}

async fn create_unit(store: &TestStore, job: &str, name: &str) -> Unit {
    store
        .units
        .create(&Unit::new(job, name, &name[..1]))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_dispatch_create_get_and_latest_status() {
    let store = setup().await;
    let now = Utc::now();

    let created = store
        .dispatches
        .create(&Dispatch::new("ambulance", "Unfall", 1.0, 2.0))
        .await
        .unwrap();
    assert!(created.id > 0);

    let new_status = store
        .dispatches
        .add_status(&DispatchStatus::new(created.id, DispatchStatusKind::New, now))
        .await
        .unwrap();
    let en_route = store
        .dispatches
        .add_status(&DispatchStatus::new(
            created.id,
            DispatchStatusKind::EnRoute,
            now + Duration::seconds(1),
        ))
        .await
        .unwrap();
    assert!(en_route.id > new_status.id);

    let loaded = store
        .dispatches
        .get("ambulance", created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.message, "Unfall");
    assert_eq!(loaded.status_kind(), Some(DispatchStatusKind::EnRoute));

    // 其他组织看不到
    assert!(store.dispatches.get("police", created.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_assignments_and_expiry() {
    let store = setup().await;
    let now = Utc::now();
    let unit_a = create_unit(&store, "ambulance", "Alpha").await;
    let unit_b = create_unit(&store, "ambulance", "Bravo").await;
    let dispatch = store
        .dispatches
        .create(&Dispatch::new("ambulance", "Brand", 0.0, 0.0))
        .await
        .unwrap();

    let assignments = store
        .dispatches
        .update_assignments(
            "ambulance",
            dispatch.id,
            &[unit_a.id, unit_b.id],
            &[],
            Some(now + Duration::seconds(20)),
            now,
        )
        .await
        .unwrap();
    assert_eq!(assignments.len(), 2);
    assert!(assignments.iter().all(|a| a.is_proposal()));

    assert!(store
        .dispatches
        .accept_assignment(dispatch.id, unit_a.id)
        .await
        .unwrap());
    // 已确认的分配不能再次接受
    assert!(!store
        .dispatches
        .accept_assignment(dispatch.id, unit_a.id)
        .await
        .unwrap());

    let expired = store
        .dispatches
        .list_expired_assignments(now + Duration::seconds(21))
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].unit_id, unit_b.id);
    assert_eq!(expired[0].job, "ambulance");

    let remaining = store
        .dispatches
        .update_assignments("ambulance", dispatch.id, &[], &[unit_b.id], None, now)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].unit_id, unit_a.id);
    assert!(remaining[0].expires_at.is_none());
}

#[tokio::test]
async fn test_update_assignments_unknown_dispatch_fails() {
    let store = setup().await;
    let result = store
        .dispatches
        .update_assignments("ambulance", 999, &[1], &[], None, Utc::now())
        .await;
    assert!(result.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_list_by_latest_status_and_delete() {
    let store = setup().await;
    let now = Utc::now();

    let completed = store
        .dispatches
        .create(&Dispatch::new("ambulance", "Erledigt", 0.0, 0.0))
        .await
        .unwrap();
    store
        .dispatches
        .add_status(&DispatchStatus::new(
            completed.id,
            DispatchStatusKind::Completed,
            now - Duration::minutes(6),
        ))
        .await
        .unwrap();

    let active = store
        .dispatches
        .create(&Dispatch::new("ambulance", "Aktiv", 0.0, 0.0))
        .await
        .unwrap();
    store
        .dispatches
        .add_status(&DispatchStatus::new(
            active.id,
            DispatchStatusKind::EnRoute,
            now - Duration::minutes(6),
        ))
        .await
        .unwrap();

    let terminal = store
        .dispatches
        .list_by_latest_status(
            &[DispatchStatusKind::Completed, DispatchStatusKind::Cancelled],
            now - Duration::minutes(5),
        )
        .await
        .unwrap();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].id, completed.id);

    let stale = store
        .dispatches
        .list_by_latest_status(&[], now - Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(stale.len(), 2);

    assert!(store.dispatches.delete("ambulance", completed.id).await.unwrap());
    assert!(!store.dispatches.delete("ambulance", completed.id).await.unwrap());
    assert_eq!(store.dispatches.list("ambulance", true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_excludes_archived() {
    let store = setup().await;
    let dispatch = store
        .dispatches
        .create(&Dispatch::new("ambulance", "Alt", 0.0, 0.0))
        .await
        .unwrap();
    store
        .dispatches
        .add_status(&DispatchStatus::new(
            dispatch.id,
            DispatchStatusKind::Archived,
            Utc::now(),
        ))
        .await
        .unwrap();

    assert!(store.dispatches.list("ambulance", false).await.unwrap().is_empty());
    assert_eq!(store.dispatches.list("ambulance", true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_members_moves_user_between_units() {
    let store = setup().await;
    let now = Utc::now();
    let unit_a = create_unit(&store, "ambulance", "Alpha").await;
    let unit_b = create_unit(&store, "ambulance", "Bravo").await;

    let change = store
        .units
        .update_members("ambulance", unit_a.id, &[7, 8], &[], now)
        .await
        .unwrap();
    assert_eq!(change.added, vec![7, 8]);
    assert_eq!(change.members.len(), 2);
    assert!(change.moved_from.is_empty());
    assert_eq!(change.revision, 1);

    let change = store
        .units
        .update_members("ambulance", unit_b.id, &[7], &[], now)
        .await
        .unwrap();
    assert_eq!(change.moved_from, vec![(unit_a.id, 7)]);
    assert_eq!(change.revision, 1);

    // 被移出成员的单元同样递增修订号
    let unit_a = store.units.get("ambulance", unit_a.id).await.unwrap().unwrap();
    assert_eq!(unit_a.users.len(), 1);
    assert_eq!(unit_a.users[0].user_id, 8);
    assert_eq!(unit_a.revision, 2);

    let mappings = store.units.list_user_unit_mappings("ambulance").await.unwrap();
    assert_eq!(mappings.len(), 2);
    assert!(mappings.iter().any(|m| m.user_id == 7 && m.unit_id == unit_b.id));

    let change = store
        .units
        .update_members("ambulance", unit_b.id, &[], &[7, 99], now)
        .await
        .unwrap();
    assert_eq!(change.removed, vec![7]);
    assert!(change.members.is_empty());
    assert_eq!(change.revision, 2);

    let unchanged = store
        .units
        .update_members("ambulance", unit_b.id, &[], &[7], now)
        .await
        .unwrap();
    assert_eq!(unchanged.revision, 2);
}

#[tokio::test]
async fn test_unit_status_and_list() {
    let store = setup().await;
    let unit = create_unit(&store, "police", "Adam").await;
    store
        .units
        .add_status(&UnitStatus::new(unit.id, UnitStatusKind::Available, Utc::now()))
        .await
        .unwrap();

    let units = store.units.list("police").await.unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].status_kind(), Some(UnitStatusKind::Available));

    let mut renamed = units[0].clone();
    renamed.name = "Adam-12".to_string();
    assert_eq!(store.units.update(&renamed).await.unwrap(), 1);
    assert_eq!(
        store.units.get("police", unit.id).await.unwrap().unwrap().name,
        "Adam-12"
    );

    assert!(store.units.delete("police", unit.id).await.unwrap());
    assert!(store.units.list("police").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_settings_and_disponents() {
    let store = setup().await;
    let settings = SettingsBuilder::new()
        .with_job("police")
        .with_mode(OperatingMode::CentralCommand)
        .with_fallback_mode(OperatingMode::AutoRoundRobin)
        .build();

    store.settings.upsert(&settings).await.unwrap();
    assert_eq!(store.settings.get("police").await.unwrap(), Some(settings.clone()));

    let mut updated = settings.clone();
    updated.enabled = false;
    store.settings.upsert(&updated).await.unwrap();
    assert_eq!(store.settings.list().await.unwrap(), vec![updated]);

    assert!(store
        .settings
        .get_disponents("police")
        .await
        .unwrap()
        .user_ids
        .is_empty());

    store
        .settings
        .set_disponents(&Disponents {
            job: "police".to_string(),
            user_ids: vec![3, 1],
        })
        .await
        .unwrap();
    assert_eq!(
        store.settings.get_disponents("police").await.unwrap().user_ids,
        vec![1, 3]
    );
}
