use std::sync::Arc;

use coordinator_domain::events::BusEvent;
use coordinator_domain::messaging::{BusMessage, MessageBus, Retention};
use coordinator_errors::CoordinatorResult;
use coordinator_infrastructure::MetricsCollector;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// 把已提交的变更广播给所有副本
///
/// 调用方必须在持久化写入成功之后再发布。
pub struct EventPublisher {
    bus: Arc<dyn MessageBus>,
    subject_base: String,
    metrics: Arc<MetricsCollector>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, subject_base: impl Into<String>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            bus,
            subject_base: subject_base.into(),
            metrics,
        }
    }

    pub fn subject_base(&self) -> &str {
        &self.subject_base
    }

    /// 在后台任务中发布，不等待结果；失败只记录日志和指标
    pub fn publish(&self, job: &str, event: BusEvent) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let metrics = self.metrics.clone();
        let base = self.subject_base.clone();
        let job = job.to_string();

        tokio::spawn(async move {
            if let Err(e) = Self::send(bus.as_ref(), &metrics, &base, &job, &event).await {
                error!(job = %job, event = event.name(), error = %e, "同步事件发布失败");
            }
        })
    }

    /// 发布并等待总线确认
    pub async fn publish_now(&self, job: &str, event: &BusEvent) -> CoordinatorResult<()> {
        Self::send(self.bus.as_ref(), &self.metrics, &self.subject_base, job, event).await
    }

    async fn send(
        bus: &dyn MessageBus,
        metrics: &MetricsCollector,
        base: &str,
        job: &str,
        event: &BusEvent,
    ) -> CoordinatorResult<()> {
        let subject = event.subject(job);
        let retention = if subject.is_last_value() {
            Retention::LastValue
        } else {
            Retention::Transient
        };
        let rendered = subject.render(base);
        let payload = event.encode()?;

        let result = bus.publish(BusMessage::new(rendered.clone(), payload), retention).await;
        metrics.record_bus_publish(&rendered, result.is_ok());
        if result.is_ok() {
            debug!(subject = %rendered, "同步事件已发布");
        }
        result
    }
}
