mod common;

use chrono::Utc;
use common::{Harness, JOB};
use coordinator_domain::entities::ATTRIBUTE_DUPLICATE;
use coordinator_domain::events::BusEvent;
use coordinator_domain::status::{DispatchStatusKind, OperatingMode, UnitStatusKind};
use coordinator_engine::{
    AssignDispatchRequest, CreateDispatchRequest, CreateOrUpdateUnitRequest, ListDispatchesRequest,
    StreamMessage, TakeDispatchRequest, TakeDispatchResponse, UpdateSettingsRequest,
    UpdateUnitStatusRequest,
};
use coordinator_errors::CoordinatorError;
use coordinator_testing_utils::{DispatchBuilder, SettingsBuilder, UnitBuilder};
use futures::StreamExt;

fn create_request(x: f64, y: f64) -> CreateDispatchRequest {
    CreateDispatchRequest {
        message: "Verkehrsunfall".to_string(),
        description: None,
        x,
        y,
        postal: Some("1010".to_string()),
        anon: false,
    }
}

#[tokio::test]
async fn test_create_dispatch_flags_nearby_duplicates() {
    let harness = Harness::new();
    let service = harness.container.service.clone();
    let caller = harness.caller(1);

    let first = service
        .create_dispatch(&caller, create_request(0.0, 0.0))
        .await
        .unwrap();
    assert_eq!(first.status_kind(), Some(DispatchStatusKind::New));
    assert!(!first.attributes.has(ATTRIBUTE_DUPLICATE));
    assert_eq!(first.creator_id, Some(1));

    let nearby = service
        .create_dispatch(&caller, create_request(10.0, 10.0))
        .await
        .unwrap();
    assert!(nearby.attributes.has(ATTRIBUTE_DUPLICATE));

    let far = service
        .create_dispatch(&caller, create_request(500.0, 500.0))
        .await
        .unwrap();
    assert!(!far.attributes.has(ATTRIBUTE_DUPLICATE));

    let err = service
        .create_dispatch(&caller, create_request(f64::NAN, 0.0))
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn test_finished_dispatches_do_not_count_as_duplicates() {
    let harness = Harness::new();
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_location(0.0, 0.0)
                .with_status(DispatchStatusKind::Completed, Utc::now())
                .build(),
        )
        .await;

    let created = harness
        .container
        .service
        .create_dispatch(&harness.caller(1), create_request(5.0, 5.0))
        .await
        .unwrap();
    assert!(!created.attributes.has(ATTRIBUTE_DUPLICATE));
}

#[tokio::test]
async fn test_take_control_switches_effective_mode() {
    let harness = Harness::new();
    harness
        .seed_settings(
            SettingsBuilder::new()
                .with_mode(OperatingMode::Manual)
                .with_fallback_mode(OperatingMode::AutoRoundRobin)
                .build(),
        )
        .await;
    let service = harness.container.service.clone();
    assert_eq!(service.effective_mode(JOB), OperatingMode::AutoRoundRobin);

    let disponents = service.take_control(&harness.caller(5), true).await.unwrap();
    assert_eq!(disponents.user_ids, vec![5]);
    assert_eq!(service.effective_mode(JOB), OperatingMode::Manual);
    assert!(
        harness
            .wait_for_event(|e| matches!(e, BusEvent::Disponents(d) if d.user_ids == vec![5]))
            .await
    );

    let disponents = service.take_control(&harness.caller(5), false).await.unwrap();
    assert!(disponents.user_ids.is_empty());
    assert_eq!(service.effective_mode(JOB), OperatingMode::AutoRoundRobin);
}

#[tokio::test]
async fn test_central_command_assignment_requires_disponent() {
    let harness = Harness::new();
    harness
        .seed_settings(
            SettingsBuilder::new()
                .with_mode(OperatingMode::CentralCommand)
                .build(),
        )
        .await;
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
        .seed_dispatch(DispatchBuilder::new().with_id(1).build())
        .await;
    let service = harness.container.service.clone();

    let request = AssignDispatchRequest {
        dispatch_id: 1,
        to_add: vec![3],
        to_remove: vec![],
        forced: false,
    };
    let err = service
        .assign_dispatch(&harness.caller(7), request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotOnDuty { user_id: 7 }));

    service.take_control(&harness.caller(7), true).await.unwrap();
    let dispatch = service
        .assign_dispatch(&harness.caller(7), request)
        .await
        .unwrap();
    let assignment = dispatch.assignment(3).unwrap();
    assert_eq!(
        assignment.expires_at,
        Some(harness.engine().now() + chrono::Duration::seconds(20))
    );
}

#[tokio::test]
async fn test_forced_assignment_is_confirmed() {
    let harness = Harness::new();
    harness
        .seed_unit(UnitBuilder::new().with_id(3).with_user(10).build())
        .await;
    harness
        .seed_dispatch(DispatchBuilder::new().with_id(1).build())
        .await;

    let dispatch = harness
        .container
        .service
        .assign_dispatch(
            &harness.caller(1),
            AssignDispatchRequest {
                dispatch_id: 1,
                to_add: vec![3],
                to_remove: vec![],
                forced: true,
            },
        )
        .await
        .unwrap();
    assert!(!dispatch.assignment(3).unwrap().is_proposal());
}

#[tokio::test]
async fn test_take_dispatch_uses_callers_unit() {
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
        .seed_dispatch(DispatchBuilder::new().with_id(1).build())
        .await;
    let service = harness.container.service.clone();

    let taken = service
        .take_dispatch(
            &harness.caller(10),
            TakeDispatchRequest {
                dispatch_ids: vec![1],
                unit_id: None,
                response: TakeDispatchResponse::Accepted,
            },
        )
        .await
        .unwrap();
    assert!(taken[0].has_unit(3));
    assert_eq!(
        harness.cached_unit(3).unwrap().status_kind(),
        Some(UnitStatusKind::Busy)
    );

    let err = service
        .take_dispatch(
            &harness.caller(99),
            TakeDispatchRequest {
                dispatch_ids: vec![1],
                unit_id: None,
                response: TakeDispatchResponse::Accepted,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn test_unit_status_requires_membership_or_duty() {
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
    let service = harness.container.service.clone();
    let request = UpdateUnitStatusRequest {
        unit_id: 3,
        status: UnitStatusKind::OnBreak,
        reason: Some("Mittagspause".to_string()),
        code: None,
        x: None,
        y: None,
        postal: None,
    };

    let err = service
        .update_unit_status(&harness.caller(11), request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NotPartOfUnit { user_id: 11, unit_id: 3 }));

    let unit = service
        .update_unit_status(&harness.caller(10), request.clone())
        .await
        .unwrap();
    assert_eq!(unit.status_kind(), Some(UnitStatusKind::OnBreak));

    service.take_control(&harness.caller(11), true).await.unwrap();
    let unit = service
        .update_unit_status(
            &harness.caller(11),
            UpdateUnitStatusRequest {
                status: UnitStatusKind::Available,
                ..request
            },
        )
        .await
        .unwrap();
    assert_eq!(unit.status_kind(), Some(UnitStatusKind::Available));
}

#[tokio::test]
async fn test_create_and_update_unit() {
    let harness = Harness::new();
    let service = harness.container.service.clone();

    let unit = service
        .create_or_update_unit(
            &harness.caller(1),
            CreateOrUpdateUnitRequest {
                id: None,
                name: "Notarzt 2".to_string(),
                initials: "NEF2".to_string(),
                color: "#00ff00".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
    assert!(unit.is_empty());
    assert_eq!(unit.status_kind(), Some(UnitStatusKind::Unavailable));

    let renamed = service
        .create_or_update_unit(
            &harness.caller(1),
            CreateOrUpdateUnitRequest {
                id: Some(unit.id),
                name: "Notarzt 3".to_string(),
                initials: "NEF3".to_string(),
                color: "#00ff00".to_string(),
                description: Some("Nachtschicht".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.id, unit.id);
    assert_eq!(renamed.name, "Notarzt 3");
    assert_eq!(renamed.status_kind(), Some(UnitStatusKind::Unavailable));

    let err = service
        .create_or_update_unit(
            &harness.caller(1),
            CreateOrUpdateUnitRequest {
                id: None,
                name: " ".to_string(),
                initials: "X".to_string(),
                color: String::new(),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn test_update_settings_publishes_last_value() {
    let harness = Harness::new();
    let settings = harness
        .container
        .service
        .update_settings(
            &harness.caller(1),
            UpdateSettingsRequest {
                enabled: true,
                mode: OperatingMode::AutoRoundRobin,
                fallback_mode: OperatingMode::Unspecified,
            },
        )
        .await
        .unwrap();
    assert_eq!(settings.job, JOB);
    assert_eq!(
        harness.container.service.get_settings(&harness.caller(2)).await.unwrap(),
        settings
    );
    assert!(
        harness
            .wait_for_event(|e| matches!(e, BusEvent::Settings(s) if s.mode == OperatingMode::AutoRoundRobin))
            .await
    );
    let subjects: Vec<String> = harness.bus.published().into_iter().map(|m| m.subject).collect();
    assert!(subjects.contains(&"centrum.ambulance.general.settings".to_string()));
}

#[tokio::test]
async fn test_list_dispatches_filters() {
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
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(2)
                .with_status(DispatchStatusKind::Completed, Utc::now())
                .build(),
        )
        .await;
    let service = harness.container.service.clone();
    let caller = harness.caller(1);

    let ids = |dispatches: Vec<coordinator_domain::entities::Dispatch>| {
        dispatches.into_iter().map(|d| d.id).collect::<Vec<_>>()
    };

    let all = service
        .list_dispatches(&caller, ListDispatchesRequest::default())
        .await
        .unwrap();
    assert_eq!(ids(all), vec![1, 2]);

    let open = service
        .list_dispatches(
            &caller,
            ListDispatchesRequest {
                not_status: DispatchStatusKind::TERMINAL.to_vec(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ids(open), vec![1]);

    let by_id = service
        .list_dispatches(
            &caller,
            ListDispatchesRequest {
                ids: vec![2],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ids(by_id), vec![2]);
}

#[tokio::test]
async fn test_stream_starts_with_snapshot() {
    let harness = Harness::new();
    harness
        .seed_unit(UnitBuilder::new().with_id(3).with_user(10).build())
        .await;
    let mut stream = harness
        .container
        .service
        .stream(&harness.caller(10))
        .await
        .unwrap();

    match stream.next().await {
        Some(StreamMessage::Snapshot(snapshot)) => {
            assert_eq!(snapshot.own_unit_id, Some(3));
            assert_eq!(snapshot.settings.job, JOB);
        }
        other => panic!("expected snapshot, got {other:?}"),
    }
    assert_eq!(harness.container.service.stream_clients(JOB), 1);
}
