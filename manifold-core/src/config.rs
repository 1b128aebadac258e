//! Engine configuration loaded from the environment at startup.
//!
//! Invalid values are a fatal initialization error: the binary reports the
//! problem and exits non-zero.

use std::time::Duration;

/// Which queue backend the engine runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueBackendKind {
    InMemory,
    RabbitMq,
    Kafka,
}

impl std::str::FromStr for QueueBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inmemory" | "in-memory" | "memory" => Ok(QueueBackendKind::InMemory),
            "rabbitmq" | "amqp" => Ok(QueueBackendKind::RabbitMq),
            "kafka" => Ok(QueueBackendKind::Kafka),
            other => Err(ConfigError::Invalid {
                key: "QUEUE_BACKEND".into(),
                message: format!("unknown backend '{other}'"),
            }),
        }
    }
}

impl QueueBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueBackendKind::InMemory => "inmemory",
            QueueBackendKind::RabbitMq => "rabbitmq",
            QueueBackendKind::Kafka => "kafka",
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing { key: String },
    Invalid { key: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing { key } => write!(f, "missing required config '{key}'"),
            ConfigError::Invalid { key, message } => {
                write!(f, "invalid config '{key}': {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// All tunables of the engine process.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Storage endpoint; absent means the in-memory gateway.
    pub database_url: Option<String>,
    /// Signing secret for engine-issued session tokens (distinct from the
    /// vault-derived key).
    pub jwt_secret: Option<String>,
    pub queue_backend: QueueBackendKind,
    /// Connection string for the selected queue backend, when remote.
    pub queue_url: Option<String>,
    pub token_refresh_skew: Duration,
    pub token_refresh_stuck_threshold: Duration,
    pub join_default_timeout: Duration,
    pub poller_default_interval: Duration,
    pub poller_fingerprint_ring_size: usize,
    pub http_bind_addr: String,
    /// Optional master seed for non-interactive vault unlock at boot.
    pub vault_auto_unlock_seed: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            jwt_secret: None,
            queue_backend: QueueBackendKind::InMemory,
            queue_url: None,
            token_refresh_skew: Duration::from_secs(300),
            token_refresh_stuck_threshold: Duration::from_secs(60),
            join_default_timeout: Duration::from_secs(1440 * 60),
            poller_default_interval: Duration::from_secs(5 * 60),
            poller_fingerprint_ring_size: 100,
            http_bind_addr: "0.0.0.0:8080".to_string(),
            vault_auto_unlock_seed: None,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment. `.env` files are honored when
    /// present (the caller runs `dotenvy::dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        cfg.database_url = optional("DATABASE_URL");
        cfg.jwt_secret = optional("JWT_SECRET");
        if let Some(raw) = optional("QUEUE_BACKEND") {
            cfg.queue_backend = raw.parse()?;
        }
        cfg.queue_url = optional("QUEUE_URL");
        if cfg.queue_backend != QueueBackendKind::InMemory && cfg.queue_url.is_none() {
            return Err(ConfigError::Missing {
                key: "QUEUE_URL".into(),
            });
        }
        if let Some(secs) = parse_u64("TOKEN_REFRESH_SKEW_SECONDS")? {
            cfg.token_refresh_skew = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64("TOKEN_REFRESH_STUCK_THRESHOLD_SECONDS")? {
            cfg.token_refresh_stuck_threshold = Duration::from_secs(secs);
        }
        if let Some(mins) = parse_u64("JOIN_DEFAULT_TIMEOUT_MINUTES")? {
            cfg.join_default_timeout = Duration::from_secs(mins * 60);
        }
        if let Some(mins) = parse_u64("POLLER_DEFAULT_INTERVAL_MINUTES")? {
            cfg.poller_default_interval = Duration::from_secs(mins * 60);
        }
        if let Some(size) = parse_u64("POLLER_FINGERPRINT_RING_SIZE")? {
            if size == 0 {
                return Err(ConfigError::Invalid {
                    key: "POLLER_FINGERPRINT_RING_SIZE".into(),
                    message: "must be positive".into(),
                });
            }
            cfg.poller_fingerprint_ring_size = size as usize;
        }
        if let Some(addr) = optional("HTTP_BIND_ADDR") {
            cfg.http_bind_addr = addr;
        }
        cfg.vault_auto_unlock_seed = optional("VAULT_AUTO_UNLOCK_SEED");

        Ok(cfg)
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match optional(key) {
        None => Ok(None),
        Some(raw) => raw.parse::<u64>().map(Some).map_err(|_| ConfigError::Invalid {
            key: key.into(),
            message: format!("expected an integer, got '{raw}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "JWT_SECRET",
            "QUEUE_BACKEND",
            "QUEUE_URL",
            "TOKEN_REFRESH_SKEW_SECONDS",
            "TOKEN_REFRESH_STUCK_THRESHOLD_SECONDS",
            "JOIN_DEFAULT_TIMEOUT_MINUTES",
            "POLLER_DEFAULT_INTERVAL_MINUTES",
            "POLLER_FINGERPRINT_RING_SIZE",
            "HTTP_BIND_ADDR",
            "VAULT_AUTO_UNLOCK_SEED",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() {
        clear_env();
        let cfg = EngineConfig::from_env().unwrap();
        assert_eq!(cfg.queue_backend, QueueBackendKind::InMemory);
        assert_eq!(cfg.token_refresh_skew, Duration::from_secs(300));
        assert_eq!(cfg.token_refresh_stuck_threshold, Duration::from_secs(60));
        assert_eq!(cfg.join_default_timeout, Duration::from_secs(86_400));
        assert_eq!(cfg.poller_default_interval, Duration::from_secs(300));
        assert_eq!(cfg.poller_fingerprint_ring_size, 100);
    }

    #[test]
    #[serial]
    fn remote_backend_requires_url() {
        clear_env();
        std::env::set_var("QUEUE_BACKEND", "kafka");
        let err = EngineConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));

        std::env::set_var("QUEUE_URL", "localhost:9092");
        let cfg = EngineConfig::from_env().unwrap();
        assert_eq!(cfg.queue_backend, QueueBackendKind::Kafka);
        clear_env();
    }

    #[test]
    #[serial]
    fn rejects_bad_integers() {
        clear_env();
        std::env::set_var("TOKEN_REFRESH_SKEW_SECONDS", "soon");
        let err = EngineConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        clear_env();
    }

    #[test]
    #[serial]
    fn rejects_zero_ring_size() {
        clear_env();
        std::env::set_var("POLLER_FINGERPRINT_RING_SIZE", "0");
        assert!(EngineConfig::from_env().is_err());
        clear_env();
    }
}
