use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBusType {
    InMemory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBusConfig {
    pub r#type: MessageBusType,
    pub url: String,
    /// 所有主题的根前缀，形如 `<base>.<job>.<topic>.<type>[.<id>]`
    pub subject_base: String,
    pub channel_capacity: usize,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            r#type: MessageBusType::InMemory,
            url: "redis://localhost:6379".to_string(),
            subject_base: "centrum".to_string(),
            channel_capacity: 1024,
        }
    }
}

impl MessageBusConfig {
    pub fn is_redis(&self) -> bool {
        self.r#type == MessageBusType::Redis
    }
}

impl ConfigValidator for MessageBusConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.is_redis() {
            ValidationUtils::validate_url(&self.url, "message_bus.url")?;
            if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
                return Err(crate::ConfigError::Validation(
                    "message_bus.url must start with redis:// or rediss://".to_string(),
                ));
            }
        }
        ValidationUtils::validate_subject_token(&self.subject_base, "message_bus.subject_base")?;
        ValidationUtils::validate_count(self.channel_capacity, "message_bus.channel_capacity")?;
        Ok(())
    }
}
