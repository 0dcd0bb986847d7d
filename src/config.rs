//! Application configuration module
//!
//! Settings are layered: optional config file (`docgate.{toml,yaml,json}` or
//! the path in `DOCGATE_CONFIG`), then `DOCGATE_*` environment variables
//! (`__` separates sections), with `.env` honored for local development.
//! Every section has working defaults so the gateway boots with nothing but
//! an endpoint list.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::registry::EndpointDescriptor;

#[derive(Error, Debug)]
#[allow(dead_code)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for container deployments
            port: 3000,
        }
    }
}

/// Session pool configuration, applied per endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum pooled sessions per endpoint.
    pub max_size: usize,
    /// How long an acquire may wait for a free session before failing.
    pub acquire_wait_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_wait_ms: 5_000,
        }
    }
}

/// Health probing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Baseline interval between probes of a healthy endpoint.
    pub probe_interval_secs: u64,
    /// Deadline for a single liveness probe.
    pub probe_timeout_ms: u64,
    /// Consecutive probe failures before an endpoint is marked degraded.
    pub degraded_threshold: u32,
    /// First retry delay after a failed probe.
    pub backoff_base_ms: u64,
    /// Upper bound for the probe retry delay.
    pub backoff_cap_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 60,
            probe_timeout_ms: 3_000,
            degraded_threshold: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
        }
    }
}

/// Scan guard tuning: rejects unselective queries against large collections.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanGuardConfig {
    /// Estimated document count above which an unselective, unlimited query
    /// is rejected.
    pub max_unscoped_docs: u64,
    /// How long a cached collection size estimate stays valid.
    pub stats_ttl_secs: u64,
}

impl Default for ScanGuardConfig {
    fn default() -> Self {
        Self {
            max_unscoped_docs: 100_000,
            stats_ttl_secs: 300,
        }
    }
}

/// Query governance configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Operation kinds the gateway will execute at all.
    pub allowed_operations: Vec<String>,
    /// Hard ceiling on documents returned by one query; requested limits
    /// above it are clamped, never rejected.
    pub max_documents: u64,
    /// Hard ceiling on per-query execution time; requested timeouts above it
    /// are clamped.
    pub max_timeout_ms: u64,
    pub scan_guard: ScanGuardConfig,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            allowed_operations: vec![
                "find".to_string(),
                "count".to_string(),
                "aggregate".to_string(),
                "distinct".to_string(),
            ],
            max_documents: 1_000,
            max_timeout_ms: 30_000,
            scan_guard: ScanGuardConfig::default(),
        }
    }
}

/// Masking strategy for sensitive fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskStrategy {
    /// Keep the first and last `keep_chars` characters, mask the middle.
    Partial,
    /// Replace the whole value with a fixed placeholder.
    Full,
}

/// Result masking configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    /// Field-name patterns considered sensitive. Plain entries match as
    /// case-insensitive substrings; entries wrapped in slashes (`/.../`) are
    /// compiled as regular expressions.
    pub patterns: Vec<String>,
    pub strategy: MaskStrategy,
    /// Characters kept at each end under the partial strategy.
    pub keep_chars: usize,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                "password".to_string(),
                "secret".to_string(),
                "token".to_string(),
                "key".to_string(),
                "phone".to_string(),
                "email".to_string(),
                "id_card".to_string(),
                "credit_card".to_string(),
            ],
            strategy: MaskStrategy::Partial,
            keep_chars: 2,
        }
    }
}

/// Metadata storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Name of the dedicated metadata database on every endpoint (primary
    /// location).
    pub database: String,
    /// Name of the shadow collection embedded in target databases (fallback
    /// location).
    pub shadow_collection: String,
    /// Per-location wait during fan-out reads; a slower location is skipped.
    pub read_wait_ms: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            database: "docgate_meta".to_string(),
            shadow_collection: "_docgate_semantics".to_string(),
            read_wait_ms: 2_000,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub health: HealthConfig,
    pub governance: GovernanceConfig,
    pub masking: MaskingConfig,
    pub metadata: MetadataConfig,
    pub cors: CorsConfig,
    /// Registered database endpoints; usually supplied by the config file.
    pub endpoints: Vec<EndpointDescriptor>,
    /// Static bearer token for the API. Absent means the API is open.
    pub api_token: Option<String>,
    /// Optional JSON seed file loaded into the embedded engine at startup.
    pub seed_file: Option<String>,
}

impl Settings {
    /// Load settings from the config file (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let file = std::env::var("DOCGATE_CONFIG").unwrap_or_else(|_| "docgate".to_string());

        let layered = Config::builder()
            .add_source(File::with_name(&file).required(false))
            .add_source(
                Environment::with_prefix("DOCGATE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("governance.allowed_operations")
                    .with_list_parse_key("masking.patterns")
                    .with_list_parse_key("cors.allowed_origins"),
            )
            .build()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let settings: Settings = layered
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.governance.max_documents == 0 {
            return Err(ConfigError::InvalidValue(
                "governance.max_documents must be positive".to_string(),
            ));
        }
        if self.governance.max_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "governance.max_timeout_ms must be positive".to_string(),
            ));
        }
        if self.pool.max_size == 0 {
            return Err(ConfigError::InvalidValue(
                "pool.max_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
