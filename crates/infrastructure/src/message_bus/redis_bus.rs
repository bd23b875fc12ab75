use async_trait::async_trait;
use coordinator_domain::messaging::{
    subject_matches, BusMessage, BusSubscription, MessageBus, Retention,
};
use coordinator_errors::{CoordinatorError, CoordinatorResult};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

const RETAINED_KEY_PREFIX: &str = "retained:";

/// 基于 Redis pub/sub 的消息总线
///
/// 主题直接作为频道名，订阅使用 PSUBSCRIBE。保留消息额外写入
/// `retained:<subject>` 键，订阅时先通过 SCAN 回放。
pub struct RedisMessageBus {
    client: Client,
    conn: ConnectionManager,
    capacity: usize,
}

impl RedisMessageBus {
    pub async fn connect(url: &str, capacity: usize) -> CoordinatorResult<Self> {
        let client = Client::open(url)
            .map_err(|e| CoordinatorError::bus_error(format!("创建Redis客户端失败: {e}")))?;

        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CoordinatorError::bus_error(format!("连接Redis失败: {e}")))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CoordinatorError::bus_error(e.to_string()))?;

        info!("Redis消息总线已连接");
        Ok(Self {
            client,
            conn,
            capacity: capacity.max(1),
        })
    }

    fn retained_key(subject: &str) -> String {
        format!("{RETAINED_KEY_PREFIX}{subject}")
    }

    async fn load_retained(&self, pattern: &str) -> CoordinatorResult<Vec<BusMessage>> {
        let mut conn = self.conn.clone();
        let key_pattern = Self::retained_key(&to_glob(pattern));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&key_pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| CoordinatorError::bus_error(e.to_string()))?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        let mut messages = Vec::new();
        for key in keys {
            let Some(subject) = key.strip_prefix(RETAINED_KEY_PREFIX) else {
                continue;
            };
            if !subject_matches(pattern, subject) {
                continue;
            }
            let payload: Option<Vec<u8>> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| CoordinatorError::bus_error(e.to_string()))?;
            if let Some(payload) = payload {
                messages.push(BusMessage::new(subject, payload));
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl MessageBus for RedisMessageBus {
    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn publish(&self, message: BusMessage, retention: Retention) -> CoordinatorResult<()> {
        let mut conn = self.conn.clone();

        if retention == Retention::LastValue {
            let _: () = redis::cmd("SET")
                .arg(Self::retained_key(&message.subject))
                .arg(&message.payload)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    error!("保存保留消息失败: {}", e);
                    CoordinatorError::bus_error(e.to_string())
                })?;
        }

        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&message.subject)
            .arg(&message.payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoordinatorError::bus_error(e.to_string()))?;

        debug!(receivers, "消息已发布");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> CoordinatorResult<BusSubscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CoordinatorError::bus_error(format!("创建订阅连接失败: {e}")))?;
        pubsub
            .psubscribe(to_glob(pattern))
            .await
            .map_err(|e| CoordinatorError::bus_error(e.to_string()))?;

        let replay = self.load_retained(pattern).await?;
        let (tx, rx) = mpsc::channel(self.capacity);
        let pattern = pattern.to_string();

        tokio::spawn(async move {
            for message in replay {
                if tx.send(message).await.is_err() {
                    return;
                }
            }

            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let subject = msg.get_channel_name().to_string();
                if !subject_matches(&pattern, &subject) {
                    continue;
                }
                let message = BusMessage::new(subject, msg.get_payload_bytes().to_vec());
                if tx.send(message).await.is_err() {
                    debug!(pattern = %pattern, "订阅已关闭");
                    return;
                }
            }
            warn!(pattern = %pattern, "Redis订阅连接已断开");
        });

        Ok(rx)
    }
}

/// 把 `*` / `>` 通配符主题转换为 Redis glob 模式
///
/// glob 的 `*` 会跨越 `.`，因此收到消息后仍需用 `subject_matches` 精确过滤
pub fn to_glob(pattern: &str) -> String {
    pattern
        .split('.')
        .map(|token| match token {
            "*" | ">" => "*".to_string(),
            literal => literal
                .chars()
                .flat_map(|c| match c {
                    '?' | '[' | ']' | '\\' => vec!['\\', c],
                    other => vec![other],
                })
                .collect(),
        })
        .collect::<Vec<_>>()
        .join(".")
}
