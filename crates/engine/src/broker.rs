//! 每个组织一个的实时推送代理
//!
//! 发布方从不阻塞：订阅者缓冲区写满时新事件直接丢弃，
//! 接收端已关闭的订阅在下一次发布时被移除。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use coordinator_domain::events::BusEvent;
use coordinator_infrastructure::MetricsCollector;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

pub struct Broker {
    job: String,
    capacity: usize,
    next_id: AtomicU64,
    subscribers: DashMap<u64, mpsc::Sender<BusEvent>>,
    metrics: Arc<MetricsCollector>,
}

impl Broker {
    pub fn new(job: impl Into<String>, capacity: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            job: job.into(),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
            metrics,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// 新建一个私有的有界订阅，丢弃返回值即退订
    pub fn subscribe(self: &Arc<Self>) -> BrokerSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers.insert(id, sender);
        debug!(job = %self.job, subscriber = id, "实时订阅已建立");

        BrokerSubscription {
            id,
            receiver,
            broker: Arc::clone(self),
        }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// 向全部订阅者非阻塞发送，返回成功投递的数量
    pub fn publish(&self, event: &BusEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.metrics.record_broker_drop();
                    debug!(job = %self.job, subscriber = *entry.key(), "订阅者缓冲区已满，事件被丢弃");
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// 一个订阅者的接收端
pub struct BrokerSubscription {
    id: u64,
    receiver: mpsc::Receiver<BusEvent>,
    broker: Arc<Broker>,
}

impl BrokerSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for BrokerSubscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

/// 组织到推送代理的注册表
pub struct BrokerRegistry {
    capacity: usize,
    brokers: DashMap<String, Arc<Broker>>,
    metrics: Arc<MetricsCollector>,
}

impl BrokerRegistry {
    pub fn new(capacity: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            capacity,
            brokers: DashMap::new(),
            metrics,
        }
    }

    pub fn broker(&self, job: &str) -> Arc<Broker> {
        if let Some(existing) = self.brokers.get(job) {
            return existing.clone();
        }
        self.brokers
            .entry(job.to_string())
            .or_insert_with(|| Arc::new(Broker::new(job, self.capacity, self.metrics.clone())))
            .clone()
    }

    /// 只有已存在的代理会收到事件，没有订阅者的组织不创建代理
    pub fn publish(&self, job: &str, event: &BusEvent) -> usize {
        let broker = self.brokers.get(job).map(|b| b.clone());
        broker.map(|b| b.publish(event)).unwrap_or(0)
    }

    pub fn subscriber_count(&self, job: &str) -> usize {
        self.brokers
            .get(job)
            .map(|b| b.subscriber_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(capacity: usize) -> BrokerRegistry {
        BrokerRegistry::new(capacity, Arc::new(MetricsCollector::new()))
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let registry = registry(8);
        let broker = registry.broker("police");
        let mut first = broker.subscribe();
        let mut second = broker.subscribe();

        let event = BusEvent::DispatchDeleted { id: 1 };
        assert_eq!(registry.publish("police", &event), 2);
        assert_eq!(first.recv().await, Some(event.clone()));
        assert_eq!(second.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_full_subscriber_drops_events() {
        let registry = registry(1);
        let broker = registry.broker("police");
        let mut slow = broker.subscribe();

        assert_eq!(broker.publish(&BusEvent::UnitDeleted { id: 1 }), 1);
        assert_eq!(broker.publish(&BusEvent::UnitDeleted { id: 2 }), 0);

        assert_eq!(slow.recv().await, Some(BusEvent::UnitDeleted { id: 1 }));
        assert!(slow.try_recv().is_none());
        // 订阅仍然有效
        assert_eq!(broker.subscriber_count(), 1);
    }

    #[test]
    fn test_dropped_subscription_unsubscribes() {
        let registry = registry(4);
        let broker = registry.broker("ems");
        let subscription = broker.subscribe();
        assert_eq!(registry.subscriber_count("ems"), 1);

        drop(subscription);
        assert_eq!(registry.subscriber_count("ems"), 0);
        assert_eq!(broker.publish(&BusEvent::UnitDeleted { id: 1 }), 0);
    }

    #[test]
    fn test_publish_to_unknown_job_is_noop() {
        let registry = registry(4);
        assert_eq!(registry.publish("nobody", &BusEvent::UnitDeleted { id: 1 }), 0);
        assert_eq!(registry.subscriber_count("nobody"), 0);
    }
}
