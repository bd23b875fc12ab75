pub mod in_memory_bus;
pub mod redis_bus;

pub use in_memory_bus::InMemoryMessageBus;
pub use redis_bus::RedisMessageBus;

use coordinator_config::{MessageBusConfig, MessageBusType};
use coordinator_domain::MessageBus;
use coordinator_errors::CoordinatorResult;
use std::sync::Arc;
use tracing::info;

/// 根据配置创建消息总线
pub async fn create_message_bus(config: &MessageBusConfig) -> CoordinatorResult<Arc<dyn MessageBus>> {
    match config.r#type {
        MessageBusType::InMemory => {
            info!("使用内存消息总线（仅适用于单副本部署）");
            Ok(Arc::new(InMemoryMessageBus::new(config.channel_capacity)))
        }
        MessageBusType::Redis => {
            info!(url = %config.url, "使用Redis消息总线");
            let bus = RedisMessageBus::connect(&config.url, config.channel_capacity).await?;
            Ok(Arc::new(bus))
        }
    }
}
