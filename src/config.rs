//! Stack file loading
//!
//! A stack file is TOML with three sections:
//!
//! ```toml
//! [stack]
//! name = "dev"
//!
//! [config]
//! projectName = "shop"
//! webMinSize = 2
//! dbPassword = { secret_env = "SHOP_DB_PASSWORD" }
//!
//! [engine]
//! parallelism = 8
//! timeout_secs = 1800
//!
//! [engine.retry]
//! max_attempts = 5
//! base_delay_ms = 500
//! ```

use anyhow::{Context, Result};
use converge::{ExecuteOptions, RetryConfig, Secret};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Problems reading a typed value out of `[config]`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration key `{key}`")]
    Missing { key: String },

    #[error("configuration key `{key}` must be a {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("configuration key `{key}` reads environment variable `{var}`, which is not set")]
    SecretEnv { key: String, var: String },
}

/// One value under `[config]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Secret(SecretSource),
}

/// Where a secret's plaintext comes from
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SecretSource {
    Inline { secret: String },
    Env { secret_env: String },
}

impl std::fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline { .. } => f.write_str("Inline(***)"),
            Self::Env { secret_env } => write!(f, "Env({secret_env})"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StackSection {
    name: String,
}

/// `[engine]`: execution tuning
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub parallelism: Option<usize>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: RetrySection,
}

/// `[engine.retry]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStackFile {
    stack: StackSection,
    #[serde(default)]
    config: BTreeMap<String, ConfigValue>,
    #[serde(default)]
    engine: EngineConfig,
}

/// A loaded stack file
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// File the stack was loaded from
    pub path: PathBuf,
    /// Stack (environment) name; also names the state files
    pub name: String,
    pub values: BTreeMap<String, ConfigValue>,
    pub engine: EngineConfig,
}

impl StackConfig {
    /// Load and parse a stack file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read stack file {}", path.display()))?;
        let config = Self::parse(&content, path)
            .with_context(|| format!("Invalid stack file {}", path.display()))?;
        log::debug!(
            "Loaded stack `{}` with {} config value(s) from {}",
            config.name,
            config.values.len(),
            path.display()
        );
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let raw: RawStackFile = toml::from_str(content)?;
        anyhow::ensure!(!raw.stack.name.trim().is_empty(), "[stack] name is empty");
        Ok(Self {
            path: path.to_path_buf(),
            name: raw.stack.name,
            values: raw.config,
            engine: raw.engine,
        })
    }

    fn require(&self, key: &str) -> Result<&ConfigValue, ConfigError> {
        self.values.get(key).ok_or_else(|| ConfigError::Missing {
            key: key.to_string(),
        })
    }

    /// A plain string value
    pub fn get_str(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ConfigValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str, ConfigError> {
        self.require(key)?;
        self.get_str(key)?.ok_or_else(|| ConfigError::Missing {
            key: key.to_string(),
        })
    }

    /// A number; integers are widened
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ConfigValue::Float(x)) => Ok(Some(*x)),
            Some(ConfigValue::Int(i)) => Ok(Some(*i as f64)),
            Some(_) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "number",
            }),
        }
    }

    /// A secret value
    ///
    /// Plain strings are accepted too and wrapped, so they never show up
    /// in state or output.
    pub fn require_secret(&self, key: &str) -> Result<Secret, ConfigError> {
        match self.require(key)? {
            ConfigValue::Secret(SecretSource::Inline { secret }) => Ok(Secret::new(secret.clone())),
            ConfigValue::Secret(SecretSource::Env { secret_env }) => std::env::var(secret_env)
                .map(Secret::new)
                .map_err(|_| ConfigError::SecretEnv {
                    key: key.to_string(),
                    var: secret_env.clone(),
                }),
            ConfigValue::String(s) => {
                log::warn!("Configuration key `{key}` holds a secret in plain text");
                Ok(Secret::new(s.clone()))
            }
            _ => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "secret",
            }),
        }
    }

    /// Execution options from `[engine]`, with engine defaults for gaps
    pub fn execute_options(&self) -> ExecuteOptions {
        let defaults = ExecuteOptions::default();
        let retry_defaults = RetryConfig::default();
        let retry = &self.engine.retry;
        ExecuteOptions {
            parallelism: self.engine.parallelism.unwrap_or(defaults.parallelism).max(1),
            retry: RetryConfig {
                max_attempts: retry.max_attempts.unwrap_or(retry_defaults.max_attempts).max(1),
                base_delay: retry
                    .base_delay_ms
                    .map_or(retry_defaults.base_delay, Duration::from_millis),
                backoff_factor: retry.backoff_factor.unwrap_or(retry_defaults.backoff_factor),
                max_delay: retry
                    .max_delay_ms
                    .map_or(retry_defaults.max_delay, Duration::from_millis),
            },
            timeout: self.engine.timeout_secs.map(Duration::from_secs),
            dry_run: false,
        }
    }
}
