use std::sync::Arc;

use coordinator_config::{BrokerConfig, EngineConfig};
use coordinator_domain::clock::Clock;
use coordinator_domain::messaging::MessageBus;
use coordinator_domain::repositories::{DispatchRepository, SettingsRepository, UnitRepository};
use coordinator_errors::CoordinatorResult;
use coordinator_infrastructure::MetricsCollector;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::assignment::AssignmentEngine;
use crate::bot::{BotManager, BotTiming};
use crate::broker::BrokerRegistry;
use crate::housekeeping::Housekeeper;
use crate::service::CoordinatorService;
use crate::state::StateCache;
use crate::strategies::{RoundRobinStrategy, UnitSelectionStrategy};
use crate::stream::StreamHub;
use crate::sync::{EventPublisher, StateListener, StateLoader};

/// 引擎依赖的外部组件
#[derive(Clone)]
pub struct EngineDeps {
    pub dispatches: Arc<dyn DispatchRepository>,
    pub units: Arc<dyn UnitRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub bus: Arc<dyn MessageBus>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<MetricsCollector>,
}

/// 一个副本上的全部引擎组件，所有共享状态都经由这里显式传递
pub struct EngineContainer {
    pub cache: Arc<StateCache>,
    pub loader: Arc<StateLoader>,
    pub publisher: Arc<EventPublisher>,
    pub brokers: Arc<BrokerRegistry>,
    pub listener: Arc<StateListener>,
    pub engine: Arc<AssignmentEngine>,
    pub housekeeper: Arc<Housekeeper>,
    pub bots: Arc<BotManager>,
    pub streams: Arc<StreamHub>,
    pub service: Arc<CoordinatorService>,
    shutdown: broadcast::Sender<()>,
}

impl EngineContainer {
    pub fn build(
        deps: EngineDeps,
        engine_config: &EngineConfig,
        broker_config: &BrokerConfig,
        subject_base: &str,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self::build_with_strategy(
            deps,
            engine_config,
            broker_config,
            subject_base,
            shutdown,
            Arc::new(RoundRobinStrategy::new()),
        )
    }

    pub fn build_with_strategy(
        deps: EngineDeps,
        engine_config: &EngineConfig,
        broker_config: &BrokerConfig,
        subject_base: &str,
        shutdown: broadcast::Sender<()>,
        strategy: Arc<dyn UnitSelectionStrategy>,
    ) -> Self {
        let EngineDeps {
            dispatches,
            units,
            settings,
            bus,
            clock,
            metrics,
        } = deps;

        let cache = Arc::new(StateCache::new());
        let loader = Arc::new(StateLoader::new(
            dispatches.clone(),
            units.clone(),
            settings.clone(),
            cache.clone(),
            metrics.clone(),
        ));
        let publisher = Arc::new(EventPublisher::new(
            bus.clone(),
            subject_base,
            metrics.clone(),
        ));
        let brokers = Arc::new(BrokerRegistry::new(
            broker_config.subscriber_capacity,
            metrics.clone(),
        ));
        let listener = Arc::new(StateListener::new(
            bus,
            subject_base,
            cache.clone(),
            loader.clone(),
            brokers.clone(),
            metrics.clone(),
        ));
        let engine = Arc::new(AssignmentEngine::new(
            dispatches.clone(),
            units,
            cache.clone(),
            loader.clone(),
            publisher.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let housekeeper = Arc::new(Housekeeper::new(
            engine.clone(),
            dispatches,
            cache.clone(),
            loader.clone(),
            clock.clone(),
            metrics.clone(),
            engine_config.clone(),
        ));
        let bots = Arc::new(BotManager::new(
            engine.clone(),
            cache.clone(),
            clock,
            strategy,
            metrics.clone(),
            BotTiming {
                interval: engine_config.bot_interval(),
                expiry: engine_config.assignment_expiry(),
                cooldown: engine_config.bot_cooldown(),
            },
            engine_config.bot_manager_interval(),
            shutdown.clone(),
        ));
        let streams = Arc::new(StreamHub::new(
            cache.clone(),
            brokers.clone(),
            metrics,
            shutdown.clone(),
        ));
        let service = Arc::new(CoordinatorService::new(
            engine.clone(),
            settings,
            cache.clone(),
            loader.clone(),
            publisher.clone(),
            streams.clone(),
            engine_config.clone(),
        ));

        Self {
            cache,
            loader,
            publisher,
            brokers,
            listener,
            engine,
            housekeeper,
            bots,
            streams,
            service,
            shutdown,
        }
    }

    /// 加载缓存、订阅同步主题并启动后台循环
    pub async fn start(&self) -> CoordinatorResult<Vec<JoinHandle<()>>> {
        let jobs = self.loader.load_all().await?;

        let mut handles = vec![
            self.listener
                .clone()
                .start(self.shutdown.subscribe())
                .await?,
        ];
        handles.extend(self.housekeeper.spawn(&self.shutdown));
        handles.push(tokio::spawn(
            self.bots.clone().run(self.shutdown.subscribe()),
        ));

        info!(jobs, tasks = handles.len(), "引擎已启动");
        Ok(handles)
    }
}
