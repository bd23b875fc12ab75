use std::time::Duration;

use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 派遣引擎、后台维护循环与自动派遣机器人的时间参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 自动派遣提议的有效期
    pub assignment_expiry_seconds: u64,
    /// 同一单元两次被自动派遣之间的冷却时间
    pub bot_cooldown_seconds: u64,
    pub bot_interval_seconds: u64,
    pub bot_manager_interval_seconds: u64,
    pub expiration_interval_seconds: u64,
    pub archival_interval_seconds: u64,
    pub unit_prune_interval_seconds: u64,
    pub resync_interval_seconds: u64,
    /// 已完成/已取消的派遣单在此时间后归档
    pub archive_after_seconds: u64,
    /// 最新状态超过此时间的派遣单被彻底删除
    pub cleanup_after_seconds: u64,
    /// 新派遣单与现有派遣单距离小于该值时标记为重复
    pub duplicate_radius: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assignment_expiry_seconds: 20,
            bot_cooldown_seconds: 35,
            bot_interval_seconds: 7,
            bot_manager_interval_seconds: 5,
            expiration_interval_seconds: 1,
            archival_interval_seconds: 5,
            unit_prune_interval_seconds: 3,
            resync_interval_seconds: 600,
            archive_after_seconds: 5 * 60,
            cleanup_after_seconds: 2 * 60 * 60,
            duplicate_radius: 45.0,
        }
    }
}

impl EngineConfig {
    pub fn assignment_expiry(&self) -> Duration {
        Duration::from_secs(self.assignment_expiry_seconds)
    }

    pub fn bot_cooldown(&self) -> Duration {
        Duration::from_secs(self.bot_cooldown_seconds)
    }

    pub fn bot_interval(&self) -> Duration {
        Duration::from_secs(self.bot_interval_seconds)
    }

    pub fn bot_manager_interval(&self) -> Duration {
        Duration::from_secs(self.bot_manager_interval_seconds)
    }

    pub fn expiration_interval(&self) -> Duration {
        Duration::from_secs(self.expiration_interval_seconds)
    }

    pub fn archival_interval(&self) -> Duration {
        Duration::from_secs(self.archival_interval_seconds)
    }

    pub fn unit_prune_interval(&self) -> Duration {
        Duration::from_secs(self.unit_prune_interval_seconds)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }

    pub fn archive_after(&self) -> Duration {
        Duration::from_secs(self.archive_after_seconds)
    }

    pub fn cleanup_after(&self) -> Duration {
        Duration::from_secs(self.cleanup_after_seconds)
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_interval_seconds(
            self.assignment_expiry_seconds,
            "engine.assignment_expiry_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.bot_cooldown_seconds,
            "engine.bot_cooldown_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.bot_interval_seconds,
            "engine.bot_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.bot_manager_interval_seconds,
            "engine.bot_manager_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.expiration_interval_seconds,
            "engine.expiration_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.archival_interval_seconds,
            "engine.archival_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.unit_prune_interval_seconds,
            "engine.unit_prune_interval_seconds",
        )?;
        ValidationUtils::validate_range(
            self.resync_interval_seconds,
            10,
            24 * 3600,
            "engine.resync_interval_seconds",
        )?;
        ValidationUtils::validate_range(
            self.archive_after_seconds,
            1,
            7 * 24 * 3600,
            "engine.archive_after_seconds",
        )?;
        ValidationUtils::validate_range(
            self.cleanup_after_seconds,
            1,
            30 * 24 * 3600,
            "engine.cleanup_after_seconds",
        )?;

        if self.cleanup_after_seconds <= self.archive_after_seconds {
            return Err(crate::ConfigError::Validation(
                "engine.cleanup_after_seconds must be greater than archive_after_seconds"
                    .to_string(),
            ));
        }

        if !self.duplicate_radius.is_finite() || self.duplicate_radius < 0.0 {
            return Err(crate::ConfigError::Validation(
                "engine.duplicate_radius must be a non-negative number".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.assignment_expiry(), Duration::from_secs(20));
        assert_eq!(config.bot_cooldown(), Duration::from_secs(35));
        assert_eq!(config.archive_after(), Duration::from_secs(300));
        assert_eq!(config.cleanup_after(), Duration::from_secs(7200));
    }

    #[test]
    fn test_engine_config_validation() {
        let mut config = EngineConfig::default();
        config.bot_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cleanup_after_seconds = config.archive_after_seconds;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.duplicate_radius = f64::NAN;
        assert!(config.validate().is_err());
    }
}
