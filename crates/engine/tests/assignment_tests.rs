mod common;

use chrono::Utc;
use common::{Harness, JOB};
use coordinator_domain::entities::DispatchStatus;
use coordinator_domain::events::BusEvent;
use coordinator_domain::status::{DispatchStatusKind, OperatingMode, UnitStatusKind};
use coordinator_engine::TakeDispatchResponse;
use coordinator_errors::CoordinatorError;
use coordinator_testing_utils::{DispatchBuilder, SettingsBuilder, UnitBuilder};

async fn harness_with_unit() -> Harness {
    let harness = Harness::new();
    harness
        .seed_unit(
            UnitBuilder::new()
                .with_id(3)
                .with_user(10)
                .with_status(UnitStatusKind::Available)
                .build(),
        )
        .await;
    harness
}

#[tokio::test]
async fn test_assign_and_unassign_unit_writes_status_log() {
    let harness = harness_with_unit().await;
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_status(DispatchStatusKind::New, Utc::now())
                .build(),
        )
        .await;

    let dispatch = harness
        .engine()
        .assign_units(JOB, 1, &[3], &[], None, Some(99))
        .await
        .unwrap();
    assert!(dispatch.has_unit(3));
    assert!(!dispatch.units[0].is_proposal());
    assert_eq!(dispatch.status_kind(), Some(DispatchStatusKind::UnitAssigned));
    assert_eq!(harness.cached_dispatch(1).unwrap().units.len(), 1);

    let dispatch = harness
        .engine()
        .assign_units(JOB, 1, &[], &[3], None, Some(99))
        .await
        .unwrap();
    assert!(dispatch.units.is_empty());
    assert_eq!(dispatch.status_kind(), Some(DispatchStatusKind::Unassigned));
    assert_eq!(
        harness.dispatches.status_kinds_for(1),
        vec![
            DispatchStatusKind::New,
            DispatchStatusKind::UnitAssigned,
            DispatchStatusKind::UnitUnassigned,
            DispatchStatusKind::Unassigned,
        ]
    );

    assert!(
        harness
            .wait_for_event(|e| matches!(e, BusEvent::DispatchUpdated(d) if d.id == 1 && d.units.is_empty()))
            .await
    );
}

#[tokio::test]
async fn test_assign_units_ignores_duplicates() {
    let harness = harness_with_unit().await;
    harness
        .seed_dispatch(DispatchBuilder::new().with_id(1).with_unit(3).build())
        .await;

    let dispatch = harness
        .engine()
        .assign_units(JOB, 1, &[3, 3], &[], None, None)
        .await
        .unwrap();
    assert_eq!(dispatch.units.len(), 1);
    assert!(harness.dispatches.status_kinds_for(1).is_empty());
}

#[tokio::test]
async fn test_assign_unknown_unit_fails() {
    let harness = Harness::new();
    harness
        .seed_dispatch(DispatchBuilder::new().with_id(1).build())
        .await;

    let err = harness
        .engine()
        .assign_units(JOB, 1, &[42], &[], None, None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_terminal_suppression() {
    let harness = harness_with_unit().await;
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_unit(3)
                .with_status(DispatchStatusKind::Completed, Utc::now())
                .build(),
        )
        .await;

    for kind in [
        DispatchStatusKind::Unassigned,
        DispatchStatusKind::UnitUnassigned,
        DispatchStatusKind::UnitAccepted,
        DispatchStatusKind::UnitDeclined,
    ] {
        let status = DispatchStatus::new(1, kind, Utc::now());
        let dispatch = harness
            .engine()
            .update_dispatch_status(JOB, status)
            .await
            .unwrap();
        assert_eq!(dispatch.status_kind(), Some(DispatchStatusKind::Completed));
    }

    // 撤下单元也不会改变终态
    let dispatch = harness
        .engine()
        .assign_units(JOB, 1, &[], &[3], None, None)
        .await
        .unwrap();
    assert_eq!(dispatch.status_kind(), Some(DispatchStatusKind::Completed));
    assert_eq!(
        harness.dispatches.status_kinds_for(1),
        vec![DispatchStatusKind::Completed]
    );

    let err = harness
        .engine()
        .assign_units(JOB, 1, &[3], &[], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::DispatchAlreadyCompleted { id: 1 }));
}

#[tokio::test]
async fn test_repeated_new_status_is_suppressed() {
    let harness = Harness::new();
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_status(DispatchStatusKind::New, Utc::now())
                .build(),
        )
        .await;

    harness
        .engine()
        .update_dispatch_status(JOB, DispatchStatus::new(1, DispatchStatusKind::New, Utc::now()))
        .await
        .unwrap();
    assert_eq!(
        harness.dispatches.status_kinds_for(1),
        vec![DispatchStatusKind::New]
    );
}

#[tokio::test]
async fn test_status_with_foreign_unit_is_rejected() {
    let harness = harness_with_unit().await;
    harness
        .seed_dispatch(DispatchBuilder::new().with_id(1).build())
        .await;

    let status = DispatchStatus::new(1, DispatchStatusKind::EnRoute, Utc::now()).with_unit(Some(3));
    let err = harness
        .engine()
        .update_dispatch_status(JOB, status)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::NotPartOfDispatch {
            unit_id: 3,
            dispatch_id: 1
        }
    ));
}

#[tokio::test]
async fn test_archived_status_evicts_dispatch() {
    let harness = Harness::new();
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_status(DispatchStatusKind::Cancelled, Utc::now())
                .build(),
        )
        .await;

    harness
        .engine()
        .update_dispatch_status(JOB, DispatchStatus::new(1, DispatchStatusKind::Archived, Utc::now()))
        .await
        .unwrap();
    assert!(harness.cached_dispatch(1).is_none());
    assert!(harness.dispatches.contains(1));
}

#[tokio::test]
async fn test_mode_enforcement() {
    let harness = harness_with_unit().await;
    harness
        .seed_settings(
            SettingsBuilder::new()
                .with_mode(OperatingMode::CentralCommand)
                .build(),
        )
        .await;
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_status(DispatchStatusKind::New, Utc::now())
                .build(),
        )
        .await;
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(2)
                .with_unit(3)
                .with_status(DispatchStatusKind::UnitAssigned, Utc::now())
                .build(),
        )
        .await;
    assert_eq!(
        harness.engine().effective_mode(JOB),
        OperatingMode::CentralCommand
    );

    let err = harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Accepted, &[1], Some(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::ModeForbidsAction));
    assert!(err.is_invalid_argument());
    assert!(!harness.cached_dispatch(1).unwrap().has_unit(3));

    let taken = harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Accepted, &[2], Some(10))
        .await
        .unwrap();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].status_kind(), Some(DispatchStatusKind::UnitAccepted));
}

#[tokio::test]
async fn test_accepting_proposal_sets_unit_busy() {
    let harness = harness_with_unit().await;
    let expires_at = harness.engine().now() + chrono::Duration::seconds(20);
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_proposal(3, expires_at)
                .with_status(DispatchStatusKind::UnitAssigned, Utc::now())
                .build(),
        )
        .await;

    let taken = harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Accepted, &[1], Some(10))
        .await
        .unwrap();
    let assignment = taken[0].assignment(3).unwrap();
    assert!(!assignment.is_proposal());
    assert_eq!(taken[0].status_kind(), Some(DispatchStatusKind::UnitAccepted));

    let unit = harness.cached_unit(3).unwrap();
    assert_eq!(unit.status_kind(), Some(UnitStatusKind::Busy));
    assert_eq!(
        harness.units.statuses_for(3).last().map(|s| s.status),
        Some(UnitStatusKind::Busy)
    );
}

#[tokio::test]
async fn test_failed_take_keeps_earlier_busy_status_in_cache() {
    let harness = harness_with_unit().await;
    let expires_at = harness.engine().now() + chrono::Duration::seconds(20);
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_proposal(3, expires_at)
                .with_status(DispatchStatusKind::UnitAssigned, Utc::now())
                .build(),
        )
        .await;
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(2)
                .with_unit(3)
                .with_status(DispatchStatusKind::Completed, Utc::now())
                .build(),
        )
        .await;

    let err = harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Accepted, &[1, 2], Some(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::DispatchAlreadyCompleted { id: 2 }));

    assert_eq!(
        harness.cached_unit(3).unwrap().status_kind(),
        Some(UnitStatusKind::Busy)
    );
    assert_eq!(
        harness.cached_dispatch(1).unwrap().status_kind(),
        Some(DispatchStatusKind::UnitAccepted)
    );
}

#[tokio::test]
async fn test_accepting_confirmed_assignment_keeps_unit_status() {
    let harness = harness_with_unit().await;
    harness
        .seed_dispatch(DispatchBuilder::new().with_id(1).with_unit(3).build())
        .await;

    harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Accepted, &[1], Some(10))
        .await
        .unwrap();
    assert_eq!(
        harness.cached_unit(3).unwrap().status_kind(),
        Some(UnitStatusKind::Available)
    );
}

#[tokio::test]
async fn test_accepting_expired_proposal_fails() {
    let harness = harness_with_unit().await;
    let expires_at = harness.engine().now() + chrono::Duration::seconds(5);
    harness
        .seed_dispatch(DispatchBuilder::new().with_id(1).with_proposal(3, expires_at).build())
        .await;
    harness.advance_seconds(6);

    let err = harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Accepted, &[1], Some(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotPartOfDispatch { .. }));
}

#[tokio::test]
async fn test_declining_last_unit_unassigns_dispatch() {
    let harness = harness_with_unit().await;
    let expires_at = harness.engine().now() + chrono::Duration::seconds(20);
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_proposal(3, expires_at)
                .with_status(DispatchStatusKind::UnitAssigned, Utc::now())
                .build(),
        )
        .await;

    let taken = harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Declined, &[1], Some(10))
        .await
        .unwrap();
    assert!(taken[0].units.is_empty());
    assert_eq!(
        harness.dispatches.status_kinds_for(1),
        vec![
            DispatchStatusKind::UnitAssigned,
            DispatchStatusKind::UnitDeclined,
            DispatchStatusKind::Unassigned,
        ]
    );
}

#[tokio::test]
async fn test_take_dispatch_rules() {
    let harness = harness_with_unit().await;
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_status(DispatchStatusKind::Completed, Utc::now())
                .build(),
        )
        .await;
    harness
        .seed_dispatch(DispatchBuilder::new().with_id(2).build())
        .await;

    let err = harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Accepted, &[2], Some(11))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::NotPartOfUnit {
            user_id: 11,
            unit_id: 3
        }
    ));

    let err = harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Accepted, &[1], Some(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::DispatchAlreadyCompleted { id: 1 }));

    let err = harness
        .engine()
        .take_dispatch(JOB, 3, TakeDispatchResponse::Declined, &[2], Some(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotPartOfDispatch { .. }));
}

#[tokio::test]
async fn test_empty_unit_invariant() {
    let harness = harness_with_unit().await;
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_unit(3)
                .with_status(DispatchStatusKind::UnitAssigned, Utc::now())
                .build(),
        )
        .await;

    let unit = harness
        .engine()
        .assign_unit_members(JOB, 3, &[], &[10], Some(1))
        .await
        .unwrap();
    assert!(unit.is_empty());
    assert_eq!(unit.status_kind(), Some(UnitStatusKind::Unavailable));

    let dispatch = harness.cached_dispatch(1).unwrap();
    assert!(dispatch.units.is_empty());
    assert_eq!(dispatch.status_kind(), Some(DispatchStatusKind::Unassigned));
    assert_eq!(harness.container.cache.get_user_unit(JOB, 10), None);
}

#[tokio::test]
async fn test_first_member_makes_unit_available() {
    let harness = Harness::new();
    harness
        .seed_unit(
            UnitBuilder::new()
                .with_id(4)
                .with_status(UnitStatusKind::Unavailable)
                .build(),
        )
        .await;

    let unit = harness
        .engine()
        .assign_unit_members(JOB, 4, &[20], &[], Some(1))
        .await
        .unwrap();
    assert!(unit.has_user(20));
    assert_eq!(unit.status_kind(), Some(UnitStatusKind::Available));
    let kinds: Vec<UnitStatusKind> = harness
        .units
        .statuses_for(4)
        .into_iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(
        kinds,
        vec![
            UnitStatusKind::Unavailable,
            UnitStatusKind::UserAdded,
            UnitStatusKind::Available,
        ]
    );
    assert_eq!(harness.container.cache.get_user_unit(JOB, 20), Some(4));
}

#[tokio::test]
async fn test_joining_another_unit_empties_previous_unit() {
    let harness = harness_with_unit().await;
    harness
        .seed_unit(
            UnitBuilder::new()
                .with_id(4)
                .with_status(UnitStatusKind::Unavailable)
                .build(),
        )
        .await;
    harness
        .seed_dispatch(DispatchBuilder::new().with_id(1).with_unit(3).build())
        .await;

    harness
        .engine()
        .assign_unit_members(JOB, 4, &[10], &[], Some(1))
        .await
        .unwrap();

    let previous = harness.cached_unit(3).unwrap();
    assert!(previous.is_empty());
    assert_eq!(previous.status_kind(), Some(UnitStatusKind::Unavailable));
    assert_eq!(
        harness.cached_unit(4).unwrap().status_kind(),
        Some(UnitStatusKind::Available)
    );
    assert_eq!(harness.container.cache.get_user_unit(JOB, 10), Some(4));
    assert!(harness.cached_dispatch(1).unwrap().units.is_empty());
}

#[tokio::test]
async fn test_delete_unit_unassigns_it_first() {
    let harness = harness_with_unit().await;
    harness
        .seed_dispatch(DispatchBuilder::new().with_id(1).with_unit(3).build())
        .await;

    assert!(harness.engine().delete_unit(JOB, 3, Some(1)).await.unwrap());
    assert!(harness.cached_unit(3).is_none());
    assert!(harness.cached_dispatch(1).unwrap().units.is_empty());
    assert!(harness.wait_for_event(|e| *e == BusEvent::UnitDeleted { id: 3 }).await);
}

#[tokio::test]
async fn test_repeated_steady_unit_status_is_suppressed() {
    let harness = harness_with_unit().await;
    let status = coordinator_domain::entities::UnitStatus::new(3, UnitStatusKind::Available, Utc::now());

    harness
        .engine()
        .update_unit_status(JOB, status)
        .await
        .unwrap();
    assert_eq!(harness.units.statuses_for(3).len(), 1);

    let on_break = coordinator_domain::entities::UnitStatus::new(3, UnitStatusKind::OnBreak, Utc::now());
    let unit = harness
        .engine()
        .update_unit_status(JOB, on_break)
        .await
        .unwrap();
    assert_eq!(unit.status_kind(), Some(UnitStatusKind::OnBreak));
    assert_eq!(harness.units.statuses_for(3).len(), 2);
}
