//! Node configuration, loaded from a JSON file given on the command line.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default freshness window for incoming signed requests, in seconds.
const DEFAULT_SKEW_SECS: i64 = 300;
/// Default timeout for requests against the C2, in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default node listen port.
const DEFAULT_LISTEN_PORT: u16 = 4900;

fn default_key_id() -> String {
    "Node".to_string()
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_c2_key_id() -> String {
    "C2".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_skew_secs() -> i64 {
    DEFAULT_SKEW_SECS
}

/// Contents of the node's config file.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Host of the C2 server.
    pub c2_host: String,
    /// Port of the C2 server.
    pub c2_port: u16,
    /// Address the node's own HTTP listener binds to.
    pub listen_ip: String,
    /// Port the node's own HTTP listener binds to.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Identity this node signs its requests to the C2 with.
    #[serde(default = "default_key_id")]
    pub key_id: String,
    /// Secret shared with the C2 for outgoing requests.
    pub secret: String,
    /// Directory holding the installed test packages.
    pub test_root: PathBuf,
    /// Identity expected on incoming C2-signed requests.
    #[serde(default = "default_c2_key_id")]
    pub c2_key_id: String,
    /// Secret used to verify incoming C2-signed requests.
    pub c2_secret: String,
    /// Timeout for requests against the C2, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Freshness window for incoming signed requests, in seconds.
    #[serde(default = "default_skew_secs")]
    pub skew_secs: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.c2_host.is_empty() {
            return Err(ConfigError::Invalid("c2_host must not be empty"));
        }
        if self.listen_ip.is_empty() {
            return Err(ConfigError::Invalid("listen_ip must not be empty"));
        }
        if self.listen_port == 0 || self.c2_port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero"));
        }
        if self.secret.is_empty() || self.c2_secret.is_empty() {
            return Err(ConfigError::Invalid("secrets must not be empty"));
        }
        if self.key_id.is_empty() || self.c2_key_id.is_empty() {
            return Err(ConfigError::Invalid("key identifiers must not be empty"));
        }
        if self.skew_secs <= 0 {
            return Err(ConfigError::Invalid("skew_secs must be positive"));
        }
        Ok(())
    }

    /// Address the HTTP listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_ip, self.listen_port)
    }

    /// Base URL of the C2.
    pub fn c2_base_url(&self) -> String {
        format!("http://{}:{}", self.c2_host, self.c2_port)
    }
}
