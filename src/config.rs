use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub tokens: TokenConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// How often the background cleaner sweeps expired sessions (seconds)
    pub cleanup_interval_seconds: u64,
    /// TTL applied when a refreshed entry has no usable remaining TTL
    pub fallback_ttl_seconds: u64,
    /// Sessions with less remaining TTL than this are renewed to the full
    /// session TTL on their next authenticated request (sliding expiry)
    pub renew_threshold_seconds: u64,
    pub session_ttl_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 60,
            fallback_ttl_seconds: 86400,
            renew_threshold_seconds: 3600,
            session_ttl_seconds: 86400, // 24 hours
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let defaults = TokenConfig::default();
        let tokens = TokenConfig {
            cleanup_interval_seconds: env_u64(
                "CLEANUP_INTERVAL_SECONDS",
                defaults.cleanup_interval_seconds,
            ),
            fallback_ttl_seconds: env_u64("FALLBACK_TTL_SECONDS", defaults.fallback_ttl_seconds),
            renew_threshold_seconds: env_u64(
                "RENEW_THRESHOLD_SECONDS",
                defaults.renew_threshold_seconds,
            ),
            session_ttl_seconds: env_u64("SESSION_TTL_SECONDS", defaults.session_ttl_seconds),
        };

        let config = Config {
            server: ServerConfig {
                bind_address,
                data_dir,
            },
            tokens,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.session_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "SESSION_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }

        if self.tokens.renew_threshold_seconds >= self.tokens.session_ttl_seconds {
            tracing::warn!(
                "Renew threshold {}s is not below the session TTL {}s. \
                 Every authenticated request will renew the session.",
                self.tokens.renew_threshold_seconds,
                self.tokens.session_ttl_seconds
            );
        }

        Ok(())
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
