mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{Harness, JOB};
use coordinator_domain::entities::ATTRIBUTE_AUTO_ASSIGNED;
use coordinator_domain::status::{DispatchStatusKind, OperatingMode, UnitStatusKind};
use coordinator_engine::{
    BotTiming, DispatchBot, RoundRobinStrategy, UpdateSettingsRequest,
};
use coordinator_infrastructure::MetricsCollector;
use coordinator_testing_utils::{DispatchBuilder, SettingsBuilder, UnitBuilder};

fn bot(harness: &Harness) -> DispatchBot {
    DispatchBot::new(
        JOB,
        harness.container.engine.clone(),
        harness.container.cache.clone(),
        Arc::new(harness.clock.clone()),
        Arc::new(RoundRobinStrategy),
        Arc::new(MetricsCollector::new()),
        BotTiming {
            interval: Duration::from_secs(7),
            expiry: Duration::from_secs(20),
            cooldown: Duration::from_secs(35),
        },
    )
}

async fn seed_available_unit(harness: &Harness, id: u64, user_id: i32) {
    harness
        .seed_unit(
            UnitBuilder::new()
                .with_id(id)
                .with_user(user_id)
                .with_status(UnitStatusKind::Available)
                .build(),
        )
        .await;
}

async fn seed_new_dispatch(harness: &Harness, id: u64) {
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(id)
                .with_status(DispatchStatusKind::New, Utc::now())
                .build(),
        )
        .await;
}

#[tokio::test]
async fn test_bot_proposes_dispatch_to_available_unit() {
    let harness = Harness::new();
    seed_available_unit(&harness, 3, 10).await;
    seed_new_dispatch(&harness, 1).await;

    let proposed = bot(&harness).run_once().await.unwrap();
    assert_eq!(proposed, 1);

    let dispatch = harness.cached_dispatch(1).unwrap();
    let assignment = dispatch.assignment(3).unwrap();
    assert_eq!(
        assignment.expires_at,
        Some(harness.engine().now() + chrono::Duration::seconds(20))
    );
    assert!(dispatch.attributes.has(ATTRIBUTE_AUTO_ASSIGNED));
    assert_eq!(dispatch.status_kind(), Some(DispatchStatusKind::UnitAssigned));

    // 提议不改变单元状态，接受之后才变为 Busy
    assert_eq!(
        harness.cached_unit(3).unwrap().status_kind(),
        Some(UnitStatusKind::Available)
    );
}

#[tokio::test]
async fn test_cooldown_keeps_unit_from_back_to_back_proposals() {
    let harness = Harness::new();
    seed_available_unit(&harness, 3, 10).await;
    seed_new_dispatch(&harness, 1).await;
    seed_new_dispatch(&harness, 2).await;
    let bot = bot(&harness);

    assert_eq!(bot.run_once().await.unwrap(), 1);
    assert!(harness.cached_dispatch(1).unwrap().has_unit(3));
    assert!(harness.cached_dispatch(2).unwrap().units.is_empty());

    harness.advance_seconds(10);
    assert_eq!(bot.run_once().await.unwrap(), 0);

    harness.advance_seconds(30);
    assert_eq!(bot.run_once().await.unwrap(), 1);
    assert!(harness.cached_dispatch(2).unwrap().has_unit(3));
}

#[tokio::test]
async fn test_bot_skips_units_that_cannot_respond() {
    let harness = Harness::new();
    harness
        .seed_unit(
            UnitBuilder::new()
                .with_id(3)
                .with_status(UnitStatusKind::Unavailable)
                .build(),
        )
        .await;
    harness
        .seed_unit(
            UnitBuilder::new()
                .with_id(4)
                .with_user(11)
                .with_status(UnitStatusKind::OnBreak)
                .build(),
        )
        .await;
    seed_new_dispatch(&harness, 1).await;

    assert_eq!(bot(&harness).run_once().await.unwrap(), 0);
    let dispatch = harness.cached_dispatch(1).unwrap();
    assert!(dispatch.units.is_empty());
    assert!(!dispatch.attributes.has(ATTRIBUTE_AUTO_ASSIGNED));
}

#[tokio::test]
async fn test_bot_ignores_dispatches_already_in_progress() {
    let harness = Harness::new();
    seed_available_unit(&harness, 3, 10).await;
    harness
        .seed_dispatch(
            DispatchBuilder::new()
                .with_id(1)
                .with_status(DispatchStatusKind::EnRoute, Utc::now())
                .build(),
        )
        .await;

    assert_eq!(bot(&harness).run_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_manager_follows_settings() {
    let harness = Harness::new();
    let manager = harness.container.bots.clone();

    harness
        .seed_settings(
            SettingsBuilder::new()
                .with_enabled(false)
                .with_mode(OperatingMode::AutoRoundRobin)
                .build(),
        )
        .await;
    assert_eq!(manager.reconcile(), (0, 0));
    assert!(manager.running_bots().is_empty());

    harness
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
    assert_eq!(manager.reconcile(), (1, 0));
    assert_eq!(manager.running_bots(), vec![JOB.to_string()]);
    assert_eq!(manager.reconcile(), (0, 0));

    harness
        .container
        .service
        .update_settings(
            &harness.caller(1),
            UpdateSettingsRequest {
                enabled: true,
                mode: OperatingMode::Manual,
                fallback_mode: OperatingMode::Unspecified,
            },
        )
        .await
        .unwrap();
    assert_eq!(manager.reconcile(), (0, 1));
    assert!(manager.running_bots().is_empty());

    manager.stop_all();
}

#[tokio::test]
async fn test_manager_runs_bot_when_nobody_is_on_duty() {
    let harness = Harness::new();
    let manager = harness.container.bots.clone();
    harness
        .seed_settings(
            SettingsBuilder::new()
                .with_mode(OperatingMode::Manual)
                .with_fallback_mode(OperatingMode::AutoRoundRobin)
                .build(),
        )
        .await;

    assert_eq!(manager.reconcile(), (1, 0));

    harness
        .container
        .service
        .take_control(&harness.caller(5), true)
        .await
        .unwrap();
    assert_eq!(manager.reconcile(), (0, 1));

    manager.stop_all();
}
