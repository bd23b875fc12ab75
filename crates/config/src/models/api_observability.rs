use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl ConfigValidator for ApiConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.enabled {
            ValidationUtils::validate_not_empty(&self.bind_address, "api.bind_address")?;
            if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
                return Err(crate::ConfigError::Validation(format!(
                    "api.bind_address is not a valid socket address: {}",
                    self.bind_address
                )));
            }
        }
        Ok(())
    }
}

/// 每个组织的实时推送代理
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// 单个订阅者的缓冲区大小，写满后新事件被丢弃
    pub subscriber_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 64,
        }
    }
}

impl ConfigValidator for BrokerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.subscriber_capacity, "broker.subscriber_capacity")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub metrics_endpoint: String,
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_endpoint: "/metrics".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.metrics_enabled {
            ValidationUtils::validate_not_empty(
                &self.metrics_endpoint,
                "observability.metrics_endpoint",
            )?;
            if !self.metrics_endpoint.starts_with('/') {
                return Err(crate::ConfigError::Validation(
                    "observability.metrics_endpoint must start with /".to_string(),
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(crate::ConfigError::Validation(format!(
                "observability.log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_config_validation() {
        let mut config = ApiConfig::default();
        assert!(config.validate().is_ok());

        config.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());

        // 关闭API时不校验地址
        config.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broker_config_validation() {
        assert!(BrokerConfig::default().validate().is_ok());
        assert!(BrokerConfig {
            subscriber_capacity: 0
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_observability_config_validation() {
        let mut config = ObservabilityConfig::default();
        assert!(config.validate().is_ok());

        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.log_level = "DEBUG".to_string();
        config.metrics_endpoint = "metrics".to_string();
        assert!(config.validate().is_err());
    }
}
