//! C2 configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

/// Development default values - NEVER use in production.
pub mod defaults {
    pub const DEV_DATABASE_URL: &str = "sqlite://secchiware.db?mode=rwc";
    pub const DEV_CLIENT_SECRET: &str = "dev-client-secret-do-not-use-in-production";
    pub const DEV_NODE_SECRET: &str = "dev-node-secret-do-not-use-in-production";
    pub const DEV_HOST: &str = "127.0.0.1";
    pub const DEV_PORT: u16 = 5000;
    pub const DEV_TESTS_PATH: &str = "test_sets";

    pub const DEV_DB_MAX_CONNECTIONS: u32 = 20;
    pub const DEV_DB_MIN_CONNECTIONS: u32 = 2;
    pub const DEV_DB_CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const DEV_DB_ACQUIRE_TIMEOUT_SECS: u64 = 10;

    pub const DEV_SKEW_SECS: i64 = 300;
    pub const DEV_NODE_TIMEOUT_MS: u64 = 10_000;
    pub const DEV_SWEEP_INTERVAL_SECS: u64 = 60;
    pub const DEV_LOCK_TTL_SECS: u64 = 30;
    pub const DEV_LOCK_WAIT_SECS: u64 = 30;
}

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Database connection and pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS. Empty means same-origin only.
    pub allowed_origins: Vec<String>,
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Signing identities and freshness policy.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Secret shared with operator clients (keyId `Client`).
    pub client_secret: String,
    /// Secret shared with nodes (keyId `Node`), also used to sign C2-issued
    /// node requests (keyId `C2`).
    pub node_secret: String,
    /// Additional per-node identities as `keyId=secret` pairs.
    pub node_keys: Vec<(String, String)>,
    /// Freshness window for signed requests, in seconds.
    pub skew_secs: i64,
}

/// Behavior toward the managed nodes and the broker.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub timeout_ms: u64,
    pub sweep_interval_secs: u64,
    pub lock_ttl_secs: u64,
    pub lock_wait_secs: u64,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    /// Root directory of the master test-package repository.
    pub tests_path: PathBuf,
    pub auth: AuthSettings,
    pub node: NodeSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `RUST_ENV`: development/production - REQUIRED
    /// - `C2_HOST`, `C2_PORT`: bind address (default 127.0.0.1:5000)
    /// - `C2_ALLOWED_ORIGINS`: comma-separated CORS origin list
    /// - `C2_DATABASE_URL`: sea-orm connection string
    /// - `C2_DB_MAX_CONNECTIONS`, `C2_DB_MIN_CONNECTIONS`,
    ///   `C2_DB_CONNECT_TIMEOUT_SECS`, `C2_DB_ACQUIRE_TIMEOUT_SECS`
    /// - `C2_TESTS_PATH`: master repository directory (default test_sets)
    /// - `C2_CLIENT_SECRET`, `C2_NODE_SECRET`: shared signing secrets
    /// - `C2_NODE_KEYS`: extra per-node identities, `id=secret,id2=secret2`
    /// - `C2_SKEW_SECS`: signed-request freshness window (default 300)
    /// - `C2_NODE_TIMEOUT_MS`: C2->node request timeout (default 10000)
    /// - `C2_SWEEP_INTERVAL_SECS`: liveness sweep period (default 60)
    /// - `C2_LOCK_TTL_SECS`, `C2_LOCK_WAIT_SECS`: broker mutex policy
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_str = env::var("RUST_ENV").map_err(|_| ConfigError::MissingEnvVar("RUST_ENV"))?;
        let environment = Environment::parse(&env_str).ok_or(ConfigError::InvalidValue(
            "RUST_ENV must be 'development' or 'production'",
        ))?;

        let config = Config {
            environment,
            server: Self::load_server_settings()?,
            database: Self::load_database_settings()?,
            tests_path: PathBuf::from(
                env::var("C2_TESTS_PATH").unwrap_or_else(|_| defaults::DEV_TESTS_PATH.to_string()),
            ),
            auth: Self::load_auth_settings()?,
            node: Self::load_node_settings()?,
        };

        if !environment.is_development() {
            config.validate_production()?;
        }

        Ok(config)
    }

    fn load_server_settings() -> Result<ServerSettings, ConfigError> {
        Ok(ServerSettings {
            host: env::var("C2_HOST").unwrap_or_else(|_| defaults::DEV_HOST.to_string()),
            port: env::var("C2_PORT")
                .unwrap_or_else(|_| defaults::DEV_PORT.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("C2_PORT must be a valid port number"))?,
            allowed_origins: env::var("C2_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    fn load_database_settings() -> Result<DatabaseSettings, ConfigError> {
        Ok(DatabaseSettings {
            url: env::var("C2_DATABASE_URL")
                .unwrap_or_else(|_| defaults::DEV_DATABASE_URL.to_string()),
            max_connections: parse_env(
                "C2_DB_MAX_CONNECTIONS",
                defaults::DEV_DB_MAX_CONNECTIONS,
            )?,
            min_connections: parse_env(
                "C2_DB_MIN_CONNECTIONS",
                defaults::DEV_DB_MIN_CONNECTIONS,
            )?,
            connect_timeout_secs: parse_env(
                "C2_DB_CONNECT_TIMEOUT_SECS",
                defaults::DEV_DB_CONNECT_TIMEOUT_SECS,
            )?,
            acquire_timeout_secs: parse_env(
                "C2_DB_ACQUIRE_TIMEOUT_SECS",
                defaults::DEV_DB_ACQUIRE_TIMEOUT_SECS,
            )?,
        })
    }

    fn load_auth_settings() -> Result<AuthSettings, ConfigError> {
        let node_keys = env::var("C2_NODE_KEYS")
            .map(|raw| {
                raw.split(',')
                    .filter(|p| !p.trim().is_empty())
                    .map(|pair| {
                        pair.split_once('=')
                            .map(|(id, secret)| (id.trim().to_string(), secret.to_string()))
                            .ok_or(ConfigError::InvalidValue(
                                "C2_NODE_KEYS entries must look like 'keyId=secret'",
                            ))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .unwrap_or_else(|_| Ok(Vec::new()))?;

        Ok(AuthSettings {
            client_secret: env::var("C2_CLIENT_SECRET")
                .unwrap_or_else(|_| defaults::DEV_CLIENT_SECRET.to_string()),
            node_secret: env::var("C2_NODE_SECRET")
                .unwrap_or_else(|_| defaults::DEV_NODE_SECRET.to_string()),
            node_keys,
            skew_secs: parse_env("C2_SKEW_SECS", defaults::DEV_SKEW_SECS)?,
        })
    }

    fn load_node_settings() -> Result<NodeSettings, ConfigError> {
        Ok(NodeSettings {
            timeout_ms: parse_env("C2_NODE_TIMEOUT_MS", defaults::DEV_NODE_TIMEOUT_MS)?,
            sweep_interval_secs: parse_env(
                "C2_SWEEP_INTERVAL_SECS",
                defaults::DEV_SWEEP_INTERVAL_SECS,
            )?,
            lock_ttl_secs: parse_env("C2_LOCK_TTL_SECS", defaults::DEV_LOCK_TTL_SECS)?,
            lock_wait_secs: parse_env("C2_LOCK_WAIT_SECS", defaults::DEV_LOCK_WAIT_SECS)?,
        })
    }

    /// Validate that production configuration does not use development
    /// defaults.
    fn validate_production(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.database.url == defaults::DEV_DATABASE_URL {
            errors.push(
                "C2_DATABASE_URL is using the development default. Set a production database URL."
                    .to_string(),
            );
        }
        if self.auth.client_secret == defaults::DEV_CLIENT_SECRET {
            errors.push(
                "C2_CLIENT_SECRET is using the development default. Set a strong shared secret."
                    .to_string(),
            );
        }
        if self.auth.node_secret == defaults::DEV_NODE_SECRET {
            errors.push(
                "C2_NODE_SECRET is using the development default. Set a strong shared secret."
                    .to_string(),
            );
        }

        if !errors.is_empty() {
            return Err(ConfigError::ProductionValidation(errors));
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment.is_development()
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValueFor(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(&'static str),

    #[error("{0} must be a valid number")]
    InvalidValueFor(&'static str),

    #[error("Production configuration validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    ProductionValidation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(environment: Environment) -> Config {
        Config {
            environment,
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 5000,
                allowed_origins: vec!["http://operator.local".to_string()],
            },
            database: DatabaseSettings {
                url: "postgres://c2:c2@db:5432/secchiware".to_string(),
                max_connections: 20,
                min_connections: 2,
                connect_timeout_secs: 10,
                acquire_timeout_secs: 10,
            },
            tests_path: PathBuf::from("/var/lib/secchiware/test_sets"),
            auth: AuthSettings {
                client_secret: "prod-client".to_string(),
                node_secret: "prod-node".to_string(),
                node_keys: Vec::new(),
                skew_secs: 300,
            },
            node: NodeSettings {
                timeout_ms: 10_000,
                sweep_interval_secs: 60,
                lock_ttl_secs: 30,
                lock_wait_secs: 30,
            },
        }
    }

    #[test]
    fn bind_address_joins_host_and_port() {
        let config = test_config(Environment::Development);
        assert_eq!(config.server.bind_address(), "0.0.0.0:5000");
    }

    #[test]
    fn environment_parsing() {
        assert_eq!(Environment::parse("dev"), Some(Environment::Development));
        assert_eq!(
            Environment::parse("Production"),
            Some(Environment::Production)
        );
        assert_eq!(Environment::parse("staging"), None);
    }

    #[test]
    fn production_validation_rejects_dev_secrets() {
        let mut config = test_config(Environment::Production);
        config.auth.client_secret = defaults::DEV_CLIENT_SECRET.to_string();
        config.auth.node_secret = defaults::DEV_NODE_SECRET.to_string();
        let result = config.validate_production();
        match result {
            Err(ConfigError::ProductionValidation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected production validation failure, got {other:?}"),
        }
    }

    #[test]
    fn production_validation_passes_with_proper_config() {
        let config = test_config(Environment::Production);
        assert!(config.validate_production().is_ok());
    }
}
