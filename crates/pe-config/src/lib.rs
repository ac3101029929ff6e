// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the provision engine.
//!
//! This crate provides [`EngineConfig`], the settings constructed once at
//! process start and handed to the orchestrator and platform gateway, together
//! with helpers for loading from TOML files, applying environment overrides
//! and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// An environment override could not be interpreted.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv {
        /// Name of the offending variable.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The in-memory mock platform is selected.
    MockPlatform,
    /// The synchronization budget keeps request workers busy for a long time.
    LargeSyncBudget {
        /// Worst-case wall-clock seconds a create or get call may block.
        secs: u64,
    },
    /// Plain HTTP is used to reach a remote platform endpoint.
    InsecureEndpoint {
        /// Config key holding the endpoint.
        field: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MockPlatform => {
                write!(f, "platform 'mock' selected: runtimes are not provisioned")
            }
            ConfigWarning::LargeSyncBudget { secs } => {
                write!(f, "synchronization may block a request for up to {secs}s")
            }
            ConfigWarning::InsecureEndpoint { field } => {
                write!(f, "'{field}' uses plain http to a non-local host")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Which platform gateway the engine talks to.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// OpenNebula (OneFlow REST + oned XML-RPC).
    #[default]
    Opennebula,
    /// In-memory platform for local development.
    Mock,
}

impl std::str::FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opennebula" => Ok(Self::Opennebula),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

/// Bounded polling policy of the synchronization engine.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of polling rounds.
    pub timeout_secs: u64,
    /// Milliseconds between two rounds.
    pub interval_ms: u64,
    /// Upper bound on synchronizations running at the same time.
    pub max_concurrent: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            interval_ms: 1_000,
            max_concurrent: 64,
        }
    }
}

impl SyncConfig {
    /// Interval between two rounds.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Worst-case time a single synchronization may take, in whole seconds.
    pub fn budget_secs(&self) -> u64 {
        self.timeout_secs.saturating_mul(self.interval_ms) / 1_000
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the HTTP API binds to.
    pub host: String,
    /// Port the HTTP API binds to.
    pub port: u16,
    /// Log level (`"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`).
    pub log_level: String,
    /// OpenNebula XML-RPC endpoint.
    pub one_xmlrpc: String,
    /// OneFlow REST endpoint.
    pub oneflow_server: String,
    /// Platform gateway implementation.
    pub platform: PlatformKind,
    /// Directory holding runtime documents.
    pub store_dir: String,
    /// Timeout applied to every HTTP call made to the platform.
    pub request_timeout_secs: u64,
    /// Synchronization policy.
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1337,
            log_level: "info".into(),
            one_xmlrpc: "http://localhost:2633/RPC2".into(),
            oneflow_server: "http://localhost:2474".into(),
            platform: PlatformKind::default(),
            store_dir: "/var/lib/provision-engine/runtimes".into(),
            request_timeout_secs: 30,
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// `host:port` string suitable for binding a listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Timeout applied to platform HTTP calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Location of the configuration file when none is given explicitly.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/provision-engine/engine.toml";

/// Maximum allowed number of synchronization rounds.
const MAX_SYNC_ROUNDS: u64 = 3_600;

/// Maximum allowed interval between rounds (one minute).
const MAX_SYNC_INTERVAL_MS: u64 = 60_000;

/// Worst-case blocking time above which a warning is produced.
const LARGE_SYNC_BUDGET_SECS: u64 = 300;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`EngineConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`EngineConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => EngineConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Parse a TOML string into an [`EngineConfig`].
pub fn parse_toml(content: &str) -> Result<EngineConfig, ConfigError> {
    toml::from_str::<EngineConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// JSON Schema describing [`EngineConfig`] as accepted in the TOML file.
pub fn config_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(EngineConfig)).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `PE_HOST`
/// - `PE_PORT`
/// - `PE_LOG_LEVEL`
/// - `PE_ONE_XMLRPC`
/// - `PE_ONEFLOW_SERVER`
/// - `PE_STORE_DIR`
/// - `PE_PLATFORM`
pub fn apply_env_overrides(config: &mut EngineConfig) -> Result<(), ConfigError> {
    apply_overrides(config, |var| std::env::var(var).ok())
}

fn apply_overrides(
    config: &mut EngineConfig,
    lookup: impl Fn(&'static str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = lookup("PE_HOST") {
        config.host = val;
    }
    if let Some(val) = lookup("PE_PORT") {
        config.port = val.parse().map_err(|e| ConfigError::InvalidEnv {
            var: "PE_PORT",
            reason: format!("{e}"),
        })?;
    }
    if let Some(val) = lookup("PE_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(val) = lookup("PE_ONE_XMLRPC") {
        config.one_xmlrpc = val;
    }
    if let Some(val) = lookup("PE_ONEFLOW_SERVER") {
        config.oneflow_server = val;
    }
    if let Some(val) = lookup("PE_STORE_DIR") {
        config.store_dir = val;
    }
    if let Some(val) = lookup("PE_PLATFORM") {
        config.platform = val.parse().map_err(|reason| ConfigError::InvalidEnv {
            var: "PE_PLATFORM",
            reason,
        })?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (unknown log level, zero port, out-of-range polling policy,
/// malformed endpoints) are returned as a [`ConfigError::ValidationError`];
/// soft issues come back as warnings.
pub fn validate_config(config: &EngineConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if !VALID_LOG_LEVELS.contains(&config.log_level.as_str()) {
        errors.push(format!("invalid log_level '{}'", config.log_level));
    }
    if config.host.trim().is_empty() {
        errors.push("host must not be empty".into());
    }
    if config.port == 0 {
        errors.push("port must not be 0".into());
    }
    if config.store_dir.trim().is_empty() {
        errors.push("store_dir must not be empty".into());
    }
    if config.request_timeout_secs == 0 {
        errors.push("request_timeout_secs must be at least 1".into());
    }

    let sync = &config.sync;
    if sync.timeout_secs == 0 || sync.timeout_secs > MAX_SYNC_ROUNDS {
        errors.push(format!(
            "sync.timeout_secs {} out of range (1..{MAX_SYNC_ROUNDS})",
            sync.timeout_secs
        ));
    }
    if sync.interval_ms == 0 || sync.interval_ms > MAX_SYNC_INTERVAL_MS {
        errors.push(format!(
            "sync.interval_ms {} out of range (1..{MAX_SYNC_INTERVAL_MS})",
            sync.interval_ms
        ));
    }
    if sync.max_concurrent == 0 {
        errors.push("sync.max_concurrent must be at least 1".into());
    }
    if sync.budget_secs() > LARGE_SYNC_BUDGET_SECS {
        warnings.push(ConfigWarning::LargeSyncBudget {
            secs: sync.budget_secs(),
        });
    }

    if config.platform == PlatformKind::Mock {
        warnings.push(ConfigWarning::MockPlatform);
    } else {
        for (field, url) in [
            ("one_xmlrpc", &config.one_xmlrpc),
            ("oneflow_server", &config.oneflow_server),
        ] {
            match endpoint_host(url) {
                None => errors.push(format!("{field}: '{url}' is not an http(s) URL")),
                Some((false, host)) if !is_local(host) => {
                    warnings.push(ConfigWarning::InsecureEndpoint {
                        field: field.into(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

/// Split an endpoint into (is_https, host). `None` if the scheme is not http(s).
fn endpoint_host(url: &str) -> Option<(bool, &str)> {
    let (tls, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        return None;
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let host = authority.rsplit_once(':').map_or(authority, |(h, _)| h);
    if host.is_empty() {
        return None;
    }
    Some((tls, host))
}

fn is_local(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
