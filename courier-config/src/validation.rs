//! Configuration validation.

use crate::{ConfigError, Result};

/// Implemented by settings structs that check their own invariants.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable field checks.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!("{} cannot be empty", field)));
        }
        Ok(())
    }

    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    pub fn one_of(value: &str, allowed: &[&str], field: &str) -> Result<()> {
        if !allowed.contains(&value) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be one of {:?}, got '{}'",
                field, allowed, value
            )));
        }
        Ok(())
    }

    /// Accepts `redis://` and `rediss://` URLs.
    pub fn is_redis_url(value: &str, field: &str) -> Result<()> {
        if !value.starts_with("redis://") && !value.starts_with("rediss://") {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a redis:// or rediss:// URL",
                field
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty() {
        assert!(ConfigValidator::not_empty("courier", "prefix").is_ok());
        assert!(ConfigValidator::not_empty("  ", "prefix").is_err());
    }

    #[test]
    fn test_in_range() {
        assert!(ConfigValidator::in_range(5, 1, 100, "max_attempts").is_ok());
        assert!(ConfigValidator::in_range(0, 1, 100, "max_attempts").is_err());
    }

    #[test]
    fn test_one_of() {
        assert!(ConfigValidator::one_of("memory", &["redis", "memory"], "store").is_ok());
        assert!(ConfigValidator::one_of("sqlite", &["redis", "memory"], "store").is_err());
    }

    #[test]
    fn test_redis_url() {
        assert!(ConfigValidator::is_redis_url("redis://localhost:6379", "redis_url").is_ok());
        assert!(ConfigValidator::is_redis_url("rediss://cache:6380", "redis_url").is_ok());
        assert!(ConfigValidator::is_redis_url("http://localhost", "redis_url").is_err());
    }
}
