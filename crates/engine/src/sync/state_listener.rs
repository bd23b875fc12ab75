use std::sync::Arc;

use coordinator_domain::events::{BusEvent, Subject};
use coordinator_domain::messaging::{BusMessage, MessageBus};
use coordinator_domain::status::DispatchStatusKind;
use coordinator_errors::CoordinatorResult;
use coordinator_infrastructure::MetricsCollector;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::BrokerRegistry;
use crate::state::{AttachOutcome, StateCache};
use crate::sync::loader::StateLoader;

/// 消费同步主题，更新本副本缓存并转发给实时推送代理
pub struct StateListener {
    bus: Arc<dyn MessageBus>,
    subject_base: String,
    cache: Arc<StateCache>,
    loader: Arc<StateLoader>,
    brokers: Arc<BrokerRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl StateListener {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        subject_base: impl Into<String>,
        cache: Arc<StateCache>,
        loader: Arc<StateLoader>,
        brokers: Arc<BrokerRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            bus,
            subject_base: subject_base.into(),
            cache,
            loader,
            brokers,
            metrics,
        }
    }

    /// 订阅全部同步主题并在后台处理，收到关闭信号后退出
    pub async fn start(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> CoordinatorResult<JoinHandle<()>> {
        let pattern = Subject::wildcard_all(&self.subject_base);
        let mut subscription = self.bus.subscribe(&pattern).await?;
        info!(pattern = %pattern, "状态监听器已订阅同步主题");

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("收到停止信号，状态监听器退出");
                        break;
                    }
                    message = subscription.recv() => {
                        let Some(message) = message else {
                            warn!("同步订阅已关闭，状态监听器退出");
                            break;
                        };
                        if let Err(e) = self.handle_message(message).await {
                            error!(error = %e, "处理同步事件失败");
                        }
                    }
                }
            }
        }))
    }

    /// 无法解析的消息只记录并丢弃，之后的重新加载会修正状态
    pub async fn handle_message(&self, message: BusMessage) -> CoordinatorResult<()> {
        let Some(subject) = Subject::parse(&self.subject_base, &message.subject) else {
            warn!(subject = %message.subject, "无法识别的同步主题");
            self.metrics.record_bus_decode_failure(&message.subject);
            return Ok(());
        };

        let event = match BusEvent::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(subject = %message.subject, error = %e, "同步事件解析失败，已丢弃");
                self.metrics.record_bus_decode_failure(&message.subject);
                return Ok(());
            }
        };

        self.apply(&subject.job, &event).await?;
        self.brokers.publish(&subject.job, &event);
        Ok(())
    }

    /// 把事件应用到缓存，返回缓存是否变化
    pub async fn apply(&self, job: &str, event: &BusEvent) -> CoordinatorResult<bool> {
        let changed = match event {
            BusEvent::Settings(settings) => {
                let changed = self.cache.get_settings(job).as_ref() != Some(settings);
                self.cache.set_settings(settings.clone());
                changed
            }
            BusEvent::Disponents(disponents) => {
                let changed = self.cache.get_disponents(job) != *disponents;
                self.cache.set_disponents(disponents.clone());
                changed
            }
            BusEvent::DispatchCreated(dispatch) | BusEvent::DispatchUpdated(dispatch) => {
                if dispatch.status_kind() == Some(DispatchStatusKind::Archived) {
                    self.cache.remove_dispatch(job, dispatch.id).is_some()
                } else {
                    self.cache.merge_dispatch(dispatch.clone())
                }
            }
            BusEvent::DispatchDeleted { id } => self.cache.remove_dispatch(job, *id).is_some(),
            BusEvent::DispatchStatus(status) => {
                match self.cache.attach_dispatch_status(job, status) {
                    AttachOutcome::Applied => {
                        if status.status == DispatchStatusKind::Archived {
                            self.cache.remove_dispatch(job, status.dispatch_id);
                        }
                        true
                    }
                    AttachOutcome::Stale => false,
                    AttachOutcome::Missing => {
                        debug!(job, dispatch_id = status.dispatch_id, "状态事件缓存未命中，从存储加载");
                        self.loader
                            .reload_dispatch(job, status.dispatch_id)
                            .await?
                            .is_some()
                    }
                }
            }
            BusEvent::UnitCreated(unit) | BusEvent::UnitUpdated(unit) => {
                self.cache.merge_unit(unit.clone())
            }
            BusEvent::UnitDeleted { id } => self.cache.remove_unit(job, *id).is_some(),
            BusEvent::UnitStatus(status) => match self.cache.attach_unit_status(job, status) {
                AttachOutcome::Applied => true,
                AttachOutcome::Stale => false,
                AttachOutcome::Missing => {
                    debug!(job, unit_id = status.unit_id, "状态事件缓存未命中，从存储加载");
                    self.loader.reload_unit(job, status.unit_id).await?.is_some()
                }
            },
        };

        if changed {
            self.metrics.record_bus_event_applied();
        }
        Ok(changed)
    }
}
