use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Interval in seconds, bounded to one hour
    pub fn validate_interval_seconds(value: u64, field_name: &str) -> ConfigResult<()> {
        Self::validate_range(value, 1, 3600, field_name)
    }

    pub fn validate_range(value: u64, min: u64, max: u64, field_name: &str) -> ConfigResult<()> {
        if value < min || value > max {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be between {min} and {max}, got {value}"
            )));
        }
        Ok(())
    }

    pub fn validate_count(count: usize, field_name: &str) -> ConfigResult<()> {
        if count == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > 100_000 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 100000"
            )));
        }
        Ok(())
    }

    pub fn validate_url(url: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !url.contains("://") && !url.starts_with("sqlite:") {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be a valid URL with protocol"
            )));
        }
        Ok(())
    }

    /// 主题前缀不能包含通配符或空段
    pub fn validate_subject_token(value: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(value, field_name)?;
        if value
            .split('.')
            .any(|token| token.is_empty() || token == "*" || token == ">")
        {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be a dot separated subject without wildcards"
            )));
        }
        Ok(())
    }
}
