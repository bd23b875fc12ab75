#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use coordinator_config::{BrokerConfig, EngineConfig};
use coordinator_domain::entities::{Dispatch, Settings, Unit};
use coordinator_domain::events::BusEvent;
use coordinator_engine::{AssignmentEngine, Caller, EngineContainer, EngineDeps};
use coordinator_infrastructure::MetricsCollector;
use coordinator_testing_utils::{
    ManualClock, MockDispatchRepository, MockSettingsRepository, MockUnitRepository,
    RecordingMessageBus, TestEnv,
};
use tokio::sync::broadcast;

pub const JOB: &str = "ambulance";

/// 一个使用内存仓储、记录总线和手动时钟的副本
pub struct Harness {
    pub dispatches: MockDispatchRepository,
    pub units: MockUnitRepository,
    pub settings: MockSettingsRepository,
    pub bus: RecordingMessageBus,
    pub clock: ManualClock,
    pub container: EngineContainer,
    pub shutdown: broadcast::Sender<()>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::on_bus(RecordingMessageBus::new(), config)
    }

    /// 共享同一条总线的另一个副本
    pub fn on_bus(bus: RecordingMessageBus, config: EngineConfig) -> Self {
        let dispatches = MockDispatchRepository::new();
        let units = MockUnitRepository::new();
        let settings = MockSettingsRepository::new();
        let clock = ManualClock::new(Utc::now());
        let (shutdown, _) = broadcast::channel(4);

        let deps = EngineDeps {
            dispatches: Arc::new(dispatches.clone()),
            units: Arc::new(units.clone()),
            settings: Arc::new(settings.clone()),
            bus: Arc::new(bus.clone()),
            clock: Arc::new(clock.clone()),
            metrics: Arc::new(MetricsCollector::new()),
        };
        let container = EngineContainer::build(
            deps,
            &config,
            &BrokerConfig::default(),
            "centrum",
            shutdown.clone(),
        );

        Self {
            dispatches,
            units,
            settings,
            bus,
            clock,
            container,
            shutdown,
        }
    }

    /// 共享同一存储和总线、但拥有独立缓存的第二个副本
    pub fn replica(&self, config: EngineConfig) -> EngineContainer {
        let deps = EngineDeps {
            dispatches: Arc::new(self.dispatches.clone()),
            units: Arc::new(self.units.clone()),
            settings: Arc::new(self.settings.clone()),
            bus: Arc::new(self.bus.clone()),
            clock: Arc::new(self.clock.clone()),
            metrics: Arc::new(MetricsCollector::new()),
        };
        EngineContainer::build(
            deps,
            &config,
            &BrokerConfig::default(),
            "centrum",
            self.shutdown.clone(),
        )
    }

    pub fn engine(&self) -> &Arc<AssignmentEngine> {
        &self.container.engine
    }

    pub fn caller(&self, user_id: i32) -> Caller {
        Caller::new(JOB, user_id)
    }

    pub async fn seed_dispatch(&self, dispatch: Dispatch) {
        self.dispatches.insert(dispatch);
        self.reload().await;
    }

    pub async fn seed_unit(&self, unit: Unit) {
        self.units.insert(unit);
        self.reload().await;
    }

    pub async fn seed_settings(&self, settings: Settings) {
        use coordinator_domain::repositories::SettingsRepository;
        self.settings.upsert(&settings).await.unwrap();
        self.reload().await;
    }

    pub async fn reload(&self) {
        self.container.loader.load_job(JOB).await.unwrap();
    }

    pub fn cached_dispatch(&self, id: u64) -> Option<Dispatch> {
        self.container.cache.get_dispatch(JOB, id)
    }

    pub fn cached_unit(&self, id: u64) -> Option<Unit> {
        self.container.cache.get_unit(JOB, id)
    }

    /// 等待后台发布的事件到达总线
    pub async fn wait_for_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&BusEvent) -> bool,
    {
        TestEnv::wait_for(
            || {
                let found = self.bus.published_events().iter().any(&predicate);
                async move { found }
            },
            Duration::from_secs(2),
        )
        .await
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.clock.advance(chrono::Duration::seconds(seconds));
    }
}
