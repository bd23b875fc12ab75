use async_trait::async_trait;
use coordinator_domain::messaging::{
    subject_matches, BusMessage, BusSubscription, MessageBus, Retention,
};
use coordinator_errors::CoordinatorResult;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// 进程内消息总线
///
/// 基于 tokio broadcast，每个订阅通过独立的转发任务按主题过滤。
/// 标记为 `LastValue` 的消息按主题保留最新一条，新订阅者先收到这些消息。
#[derive(Debug, Clone)]
pub struct InMemoryMessageBus {
    sender: broadcast::Sender<BusMessage>,
    retained: Arc<DashMap<String, BusMessage>>,
    capacity: usize,
}

impl InMemoryMessageBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            retained: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, message: BusMessage, retention: Retention) -> CoordinatorResult<()> {
        if retention == Retention::LastValue {
            self.retained.insert(message.subject.clone(), message.clone());
        }

        // 没有订阅者时 send 返回错误，消息直接丢弃
        if self.sender.send(message).is_err() {
            debug!("内存消息总线当前没有订阅者");
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> CoordinatorResult<BusSubscription> {
        // 先订阅再取保留消息，避免两者之间发布的消息丢失
        let mut receiver = self.sender.subscribe();
        let replay: Vec<BusMessage> = self
            .retained
            .iter()
            .filter(|entry| subject_matches(pattern, entry.key()))
            .map(|entry| entry.value().clone())
            .collect();

        let (tx, rx) = mpsc::channel(self.capacity);
        let pattern = pattern.to_string();

        tokio::spawn(async move {
            for message in replay {
                if tx.send(message).await.is_err() {
                    return;
                }
            }

            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if !subject_matches(&pattern, &message.subject) {
                            continue;
                        }
                        if tx.send(message).await.is_err() {
                            debug!(pattern = %pattern, "订阅已关闭");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(pattern = %pattern, skipped, "订阅者处理过慢，部分消息被跳过");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}
