//! 客户端实时流：先发送一次全量快照，之后转发推送代理中的每个事件

use std::pin::Pin;
use std::sync::Arc;

use coordinator_domain::entities::{Dispatch, Disponents, Settings, Unit};
use coordinator_domain::events::BusEvent;
use coordinator_infrastructure::MetricsCollector;
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::broker::{BrokerRegistry, BrokerSubscription};
use crate::state::StateCache;

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub settings: Settings,
    pub disponents: Disponents,
    pub own_unit_id: Option<u64>,
    pub units: Vec<Unit>,
    /// 只包含未结束的派遣单
    pub dispatches: Vec<Dispatch>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    Snapshot(Box<Snapshot>),
    Event(BusEvent),
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamMessage> + Send>>;

/// 活跃连接计数，流结束时自动减一
struct ClientGuard {
    metrics: Arc<MetricsCollector>,
}

impl ClientGuard {
    fn new(metrics: Arc<MetricsCollector>) -> Self {
        metrics.stream_client_connected();
        Self { metrics }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.metrics.stream_client_disconnected();
    }
}

struct StreamState {
    snapshot: Option<Snapshot>,
    subscription: BrokerSubscription,
    shutdown: broadcast::Receiver<()>,
    _guard: ClientGuard,
}

pub struct StreamHub {
    cache: Arc<StateCache>,
    brokers: Arc<BrokerRegistry>,
    metrics: Arc<MetricsCollector>,
    shutdown: broadcast::Sender<()>,
}

impl StreamHub {
    pub fn new(
        cache: Arc<StateCache>,
        brokers: Arc<BrokerRegistry>,
        metrics: Arc<MetricsCollector>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            cache,
            brokers,
            metrics,
            shutdown,
        }
    }

    pub fn snapshot(&self, job: &str, user_id: Option<i32>) -> Snapshot {
        Snapshot {
            settings: self
                .cache
                .get_settings(job)
                .unwrap_or_else(|| Settings::new(job)),
            disponents: self.cache.get_disponents(job),
            own_unit_id: user_id.and_then(|user_id| self.cache.get_user_unit(job, user_id)),
            units: self.cache.list_units(job),
            dispatches: self
                .cache
                .list_dispatches(job)
                .into_iter()
                .filter(|d| !d.is_terminal())
                .collect(),
        }
    }

    /// 先订阅再生成快照，快照之后发生的变更不会丢失
    pub fn open(&self, job: &str, user_id: Option<i32>) -> EventStream {
        let subscription = self.brokers.broker(job).subscribe();
        let state = StreamState {
            snapshot: Some(self.snapshot(job, user_id)),
            subscription,
            shutdown: self.shutdown.subscribe(),
            _guard: ClientGuard::new(self.metrics.clone()),
        };
        debug!(job, user_id = ?user_id, "客户端实时流已打开");

        Box::pin(stream::unfold(state, |mut state| async move {
            if let Some(snapshot) = state.snapshot.take() {
                return Some((StreamMessage::Snapshot(Box::new(snapshot)), state));
            }
            tokio::select! {
                _ = state.shutdown.recv() => None,
                event = state.subscription.recv() => {
                    event.map(|event| (StreamMessage::Event(event), state))
                }
            }
        }))
    }

    pub fn subscriber_count(&self, job: &str) -> usize {
        self.brokers.subscriber_count(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_domain::status::DispatchStatusKind;
    use coordinator_testing_utils::{DispatchBuilder, UnitBuilder};
    use futures::StreamExt;

    fn hub() -> (StreamHub, Arc<StateCache>, Arc<BrokerRegistry>, broadcast::Sender<()>) {
        let cache = Arc::new(StateCache::new());
        let metrics = Arc::new(MetricsCollector::new());
        let brokers = Arc::new(BrokerRegistry::new(8, metrics.clone()));
        let (shutdown, _) = broadcast::channel(1);
        let hub = StreamHub::new(cache.clone(), brokers.clone(), metrics, shutdown.clone());
        (hub, cache, brokers, shutdown)
    }

    #[tokio::test]
    async fn test_snapshot_then_events() {
        let (hub, cache, brokers, _shutdown) = hub();
        cache.put_unit(UnitBuilder::new().with_id(3).with_user(12).build());
        cache.put_dispatch(DispatchBuilder::new().with_id(1).build());
        cache.put_dispatch(
            DispatchBuilder::new()
                .with_id(2)
                .with_status(DispatchStatusKind::Completed, chrono::Utc::now())
                .build(),
        );

        let mut stream = hub.open("ambulance", Some(12));
        assert_eq!(hub.subscriber_count("ambulance"), 1);

        match stream.next().await {
            Some(StreamMessage::Snapshot(snapshot)) => {
                assert_eq!(snapshot.own_unit_id, Some(3));
                assert_eq!(snapshot.units.len(), 1);
                let ids: Vec<u64> = snapshot.dispatches.iter().map(|d| d.id).collect();
                assert_eq!(ids, vec![1]);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        brokers.publish("ambulance", &BusEvent::DispatchDeleted { id: 1 });
        match stream.next().await {
            Some(StreamMessage::Event(event)) => {
                assert_eq!(event, BusEvent::DispatchDeleted { id: 1 })
            }
            other => panic!("expected event, got {other:?}"),
        }

        drop(stream);
        assert_eq!(hub.subscriber_count("ambulance"), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream() {
        let (hub, _cache, _brokers, shutdown) = hub();
        let mut stream = hub.open("police", None);
        assert!(matches!(stream.next().await, Some(StreamMessage::Snapshot(_))));

        shutdown.send(()).unwrap();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_message_is_tagged_by_kind() {
        let value =
            serde_json::to_value(StreamMessage::Event(BusEvent::DispatchDeleted { id: 1 })).unwrap();
        assert_eq!(value["kind"], "event");
        assert!(value.get("data").is_some());
    }
}
