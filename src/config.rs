//! Server configuration.
//!
//! Configuration is resolved once at startup and cloned into every
//! connection; nothing here is mutated while the server is serving.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Environment variable naming a YAML config file.
pub const CONFIG_ENV: &str = "WARDEN_CONFIG";
/// Environment variable overriding the listen address (`host:port`).
pub const LISTEN_ENV: &str = "LISTEN";
/// Environment variable overriding the worker capacity.
pub const WORKERS_ENV: &str = "WARDEN_WORKERS";

/// Protocol limits applied to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Ceiling on request line + header bytes before the parser aborts.
    pub max_header_bytes: usize,
    /// Bodies larger than this are spilled to a temporary file.
    pub max_body: usize,
    /// Read granularity while streaming body bytes.
    pub chunk_size: usize,
    /// Longest accepted header name.
    pub max_field_name: usize,
    /// Longest accepted header value.
    pub max_field_value: usize,
    /// Longest accepted request target.
    pub max_request_uri: usize,
    /// Largest accepted Content-Length. `None` accepts any length; bodies
    /// past `max_body` then grow the spill file without bound.
    pub max_content_length: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        let max_header_bytes = 1024 * (80 + 32);
        Self {
            max_header_bytes,
            max_body: max_header_bytes,
            chunk_size: 16 * 1024,
            max_field_name: 256,
            max_field_value: 80 * 1024,
            max_request_uri: 12 * 1024,
            max_content_length: None,
        }
    }
}

impl Limits {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.chunk_size == 0 {
            return Err(ServerError::InvalidConfig("chunk_size must be positive".into()));
        }
        // "GET / HTTP/1.1\r\n\r\n"
        if self.max_header_bytes < 18 {
            return Err(ServerError::InvalidConfig(format!(
                "max_header_bytes ({}) cannot hold a minimal request",
                self.max_header_bytes
            )));
        }
        if self.max_field_name == 0 || self.max_request_uri == 0 {
            return Err(ServerError::InvalidConfig(
                "field and URI limits must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Number of worker slots; connections beyond this are rejected.
    pub capacity: usize,
    /// Upper bound on a single read wait. `None` waits forever.
    pub idle_timeout_ms: Option<u64>,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            capacity: 1024,
            idle_timeout_ms: None,
            limits: Limits::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    ///
    /// `WARDEN_CONFIG` points at an optional YAML file; `LISTEN` and
    /// `WARDEN_WORKERS` override individual values on top of it.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] but reads variables through `lookup`.
    pub fn from_env_with<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(listen) = lookup(LISTEN_ENV) {
            let (host, port) = listen
                .rsplit_once(':')
                .with_context(|| format!("{LISTEN_ENV} must be host:port, got {listen:?}"))?;
            cfg.host = host.to_string();
            cfg.port = port
                .parse()
                .with_context(|| format!("invalid port in {LISTEN_ENV}: {port:?}"))?;
        }

        if let Some(workers) = lookup(WORKERS_ENV) {
            cfg.capacity = workers
                .parse()
                .with_context(|| format!("invalid {WORKERS_ENV}: {workers:?}"))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(source: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(source).context("invalid YAML configuration")?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&source)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.capacity == 0 {
            return Err(ServerError::InvalidConfig("capacity must be at least 1".into()));
        }
        self.limits.validate()
    }

    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}
