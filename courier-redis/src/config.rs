//! Redis configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `redis://host:port` or `rediss://host:port`.
    pub url: String,
    pub pool_size: u32,
    pub min_idle: Option<u32>,
    #[serde(with = "secs", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    /// Logical database (0-15).
    pub database: Option<u8>,
    /// Redis 6+ ACL user.
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            min_idle: Some(1),
            connection_timeout: default_connection_timeout(),
            database: None,
            username: None,
            password: None,
            tls: false,
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::new()
    }

    /// Start from `REDIS_*` environment variables. Returns `None` when
    /// `REDIS_URL` is not set, so callers can tell "not configured" apart
    /// from "configured with defaults".
    pub fn from_env() -> Option<RedisConfigBuilder> {
        let url = std::env::var("REDIS_URL").ok().filter(|u| !u.trim().is_empty())?;
        let mut builder = RedisConfigBuilder::new().url(url);

        if let Ok(size) = std::env::var("REDIS_POOL_SIZE")
            && let Ok(size) = size.parse()
        {
            builder = builder.pool_size(size);
        }

        if let Ok(db) = std::env::var("REDIS_DATABASE")
            && let Ok(db) = db.parse()
        {
            builder = builder.database(db);
        }

        if let Ok(username) = std::env::var("REDIS_USERNAME") {
            builder = builder.username(username);
        }

        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            builder = builder.password(password);
        }

        if std::env::var("REDIS_TLS").is_ok() {
            builder = builder.tls(true);
        }

        Some(builder)
    }

    /// URL with credentials and database number applied.
    pub fn connection_url(&self) -> String {
        let mut url = self.url.clone();

        if let Some(password) = &self.password {
            let auth = match &self.username {
                Some(username) => format!("{}:{}@", username, password),
                None => format!(":{}@", password),
            };
            for scheme in ["rediss://", "redis://"] {
                if let Some(rest) = url.strip_prefix(scheme) {
                    url = format!("{}{}{}", scheme, auth, rest);
                    break;
                }
            }
        }

        if let Some(db) = self.database {
            let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(&url);
            if !after_scheme.contains('/') {
                url = format!("{}/{}", url, db);
            }
        }

        url
    }

    /// The URL with any password masked, for logs.
    pub fn display_url(&self) -> String {
        match (&self.password, self.url.split_once("://")) {
            (Some(_), Some((scheme, rest))) => format!("{}://***@{}", scheme, rest),
            _ => self.url.clone(),
        }
    }
}

/// Builder for [`RedisConfig`].
#[derive(Default)]
pub struct RedisConfigBuilder {
    config: RedisConfig,
}

impl RedisConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.config.pool_size = size;
        self
    }

    pub fn min_idle(mut self, min_idle: u32) -> Self {
        self.config.min_idle = Some(min_idle);
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn database(mut self, db: u8) -> Self {
        self.config.database = Some(db);
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Enabling TLS also upgrades a `redis://` URL to `rediss://`.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.config.tls = enabled;
        if enabled && let Some(rest) = self.config.url.strip_prefix("redis://") {
            self.config.url = format!("rediss://{}", rest);
        }
        self
    }

    pub fn build(self) -> RedisConfig {
        self.config
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
