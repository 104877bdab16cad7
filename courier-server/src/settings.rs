//! Server settings.
//!
//! Read from, in increasing precedence: the file named by
//! `COURIER_CONFIG_FILE`, a `.env` file, and `COURIER_*` environment
//! variables.

use courier_config::{ConfigError, ConfigManager, ConfigValidator, Validate};
use courier_queue::{
    DEFAULT_BACKOFF_CAP_SECONDS, DEFAULT_IDEMPOTENCY_TTL_SECONDS, DEFAULT_MAX_ATTEMPTS,
    QueueConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_PREFIX: &str = "COURIER";

/// Which queue store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Redis,
    Memory,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreKind::Redis),
            "memory" => Ok(StoreKind::Memory),
            other => Err(ConfigError::invalid(
                "store",
                format!("expected 'redis' or 'memory', got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: SocketAddr,
    pub store: StoreKind,
    /// `None` leaves a Redis-backed queue unconfigured.
    pub redis_url: Option<String>,
    pub queue_prefix: String,
    pub api_tokens: Vec<String>,
    pub default_max_attempts: u32,
    pub backoff_cap_seconds: u64,
    pub idempotency_ttl_seconds: u64,
    pub max_page_size: usize,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store: StoreKind::Redis,
            redis_url: None,
            queue_prefix: "courier:webhooks".to_string(),
            api_tokens: Vec::new(),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_cap_seconds: DEFAULT_BACKOFF_CAP_SECONDS,
            idempotency_ttl_seconds: DEFAULT_IDEMPOTENCY_TTL_SECONDS,
            max_page_size: 500,
            max_body_bytes: courier_core::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Settings {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let manager = ConfigManager::with_prefix(ENV_PREFIX);

        if let Ok(path) = std::env::var("COURIER_CONFIG_FILE")
            && !path.trim().is_empty()
        {
            manager.load_file(PathBuf::from(path))?;
        }
        manager.load_dotenv(None)?;

        if !manager.has("redis_url")
            && let Ok(url) = std::env::var("REDIS_URL")
        {
            manager.set("redis_url", url)?;
        }

        Self::from_manager(&manager)
    }

    /// Build from already loaded values. Absent keys keep their defaults.
    pub fn from_manager(manager: &ConfigManager) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let settings = Self {
            bind: manager.get_parsed("bind")?.unwrap_or(defaults.bind),
            store: manager.get_parsed("store")?.unwrap_or(defaults.store),
            redis_url: manager.get_string("redis_url"),
            queue_prefix: manager
                .get_string("queue_prefix")
                .unwrap_or(defaults.queue_prefix),
            api_tokens: manager.get_list("api_tokens"),
            default_max_attempts: manager
                .get_parsed("default_max_attempts")?
                .unwrap_or(defaults.default_max_attempts),
            backoff_cap_seconds: manager
                .get_parsed("backoff_cap_seconds")?
                .unwrap_or(defaults.backoff_cap_seconds),
            idempotency_ttl_seconds: manager
                .get_parsed("idempotency_ttl_seconds")?
                .unwrap_or(defaults.idempotency_ttl_seconds),
            max_page_size: manager
                .get_parsed("max_page_size")?
                .unwrap_or(defaults.max_page_size),
            max_body_bytes: manager
                .get_parsed("max_body_bytes")?
                .unwrap_or(defaults.max_body_bytes),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::default()
            .with_default_max_attempts(self.default_max_attempts)
            .with_backoff_cap(self.backoff_cap_seconds)
            .with_idempotency_ttl(self.idempotency_ttl_seconds)
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<(), ConfigError> {
        ConfigValidator::not_empty(&self.queue_prefix, "queue_prefix")?;
        ConfigValidator::in_range(self.default_max_attempts, 1, 1_000, "default_max_attempts")?;
        ConfigValidator::in_range(self.backoff_cap_seconds, 1, 86_400, "backoff_cap_seconds")?;
        ConfigValidator::in_range(
            self.idempotency_ttl_seconds,
            1,
            30 * 86_400,
            "idempotency_ttl_seconds",
        )?;
        ConfigValidator::in_range(self.max_page_size, 1, 10_000, "max_page_size")?;
        if let Some(url) = &self.redis_url {
            ConfigValidator::is_redis_url(url, "redis_url")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_manager(&ConfigManager::new()).unwrap();
        assert_eq!(settings.bind.port(), 8080);
        assert_eq!(settings.store, StoreKind::Redis);
        assert_eq!(settings.redis_url, None);
        assert_eq!(settings.queue_prefix, "courier:webhooks");
        assert_eq!(settings.default_max_attempts, 5);
        assert_eq!(settings.backoff_cap_seconds, 300);
        assert_eq!(settings.idempotency_ttl_seconds, 86_400);
        assert!(settings.api_tokens.is_empty());
    }

    #[test]
    fn test_string_values_are_parsed() {
        let manager = ConfigManager::new();
        manager.set("bind", "127.0.0.1:9000").unwrap();
        manager.set("store", "Memory").unwrap();
        manager.set("api_tokens", "alpha,beta").unwrap();
        manager.set("default_max_attempts", "8").unwrap();

        let settings = Settings::from_manager(&manager).unwrap();
        assert_eq!(settings.bind.port(), 9000);
        assert_eq!(settings.store, StoreKind::Memory);
        assert_eq!(settings.api_tokens, vec!["alpha", "beta"]);
        assert_eq!(settings.queue_config().default_max_attempts, 8);
    }

    #[test]
    fn test_unknown_store_rejected() {
        let manager = ConfigManager::new();
        manager.set("store", "sqlite").unwrap();
        assert!(matches!(
            Settings::from_manager(&manager),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validation() {
        let manager = ConfigManager::new();
        manager.set("default_max_attempts", 0).unwrap();
        assert!(matches!(
            Settings::from_manager(&manager),
            Err(ConfigError::ValidationError(_))
        ));

        let manager = ConfigManager::new();
        manager.set("redis_url", "http://cache:6379").unwrap();
        assert!(Settings::from_manager(&manager).is_err());
    }

    #[test]
    fn test_toml_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(
            &path,
            "store = \"memory\"\nmax_page_size = 25\napi_tokens = [\"alpha\"]\n",
        )
        .unwrap();

        let manager = ConfigManager::new();
        manager.load_file(&path).unwrap();

        let settings = Settings::from_manager(&manager).unwrap();
        assert_eq!(settings.store, StoreKind::Memory);
        assert_eq!(settings.max_page_size, 25);
        assert_eq!(settings.api_tokens, vec!["alpha"]);
    }
}
