//! Configuration management with validation and defaults
//!
//! Sections are plain serde structs with `Default`, so a TOML file only has
//! to name the values it changes. [`ConfigLoader`] layers environment
//! overrides on top and validates the result.

use crate::anchor::Network;
use crate::errors::{ConfigurationError, FairdeckResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for the claim timeout and seed TTL (ten years)
pub const MAX_SWEEP_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FairdeckConfig {
    pub pool: PoolConfig,
    pub session: SessionConfig,
    pub anchor: AnchorConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

/// Commitment pool sizing and sweep timing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool is reported unhealthy below this many available seeds
    pub minimum_threshold: u64,
    /// Refill aims for this many available seeds
    pub target_size: u64,
    /// Upper bound on seeds forged per refill cycle
    pub refill_batch_size: u64,
    pub refill_interval_ms: u64,
    pub sweep_interval_ms: u64,
    /// Unbound claims older than this are returned to the pool
    pub claim_timeout_secs: u64,
    /// Available seeds older than this expire
    pub seed_ttl_secs: u64,
    /// Candidates fetched per claim attempt
    pub claim_candidates: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            minimum_threshold: 20,
            target_size: 50,
            refill_batch_size: 10,
            refill_interval_ms: 5_000,
            sweep_interval_ms: 60_000,
            claim_timeout_secs: 300,
            seed_ttl_secs: 7 * 24 * 60 * 60,
            claim_candidates: 8,
        }
    }
}

/// Session fairness behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Forge and anchor a seed inline when the pool is empty
    pub allow_on_demand_mint: bool,
    /// Bound on conditional-update attempts for one nonce allocation
    pub max_cas_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_on_demand_mint: true,
            max_cas_retries: 1_000,
        }
    }
}

/// Ledger anchoring
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub network: Network,
    /// Permit the in-memory stub on non-production networks
    pub allow_stub_fallback: bool,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            allow_stub_fallback: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "rocksdb" | "rocks" => Ok(StorageBackend::RocksDb),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    /// Whether to clear the database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_directory: "./DB/fairness_data".to_string(),
            clear_on_start: false,
        }
    }
}

/// Monitoring and metrics configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: LogLevel,
    pub enable_metrics: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string for an `EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            enable_metrics: true,
        }
    }
}

/// Presets, validation and duration helpers
impl FairdeckConfig {
    /// Local development: stub anchoring, in-memory store, chatty logs
    pub fn development() -> Self {
        Self {
            anchor: AnchorConfig {
                network: Network::Regtest,
                allow_stub_fallback: true,
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Small pool and fast sweeps for tests
    pub fn testing() -> Self {
        Self {
            pool: PoolConfig {
                minimum_threshold: 2,
                target_size: 5,
                refill_batch_size: 5,
                refill_interval_ms: 50,
                sweep_interval_ms: 50,
                claim_timeout_secs: 1,
                seed_ttl_secs: 60,
                claim_candidates: 4,
            },
            anchor: AnchorConfig {
                network: Network::Regtest,
                allow_stub_fallback: true,
            },
            storage: StorageConfig {
                clear_on_start: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Production: mainnet, persistent store, no stub anchoring
    pub fn production() -> Self {
        Self {
            pool: PoolConfig {
                minimum_threshold: 50,
                target_size: 200,
                refill_batch_size: 20,
                ..Default::default()
            },
            anchor: AnchorConfig {
                network: Network::Mainnet,
                allow_stub_fallback: false,
            },
            storage: StorageConfig {
                backend: StorageBackend::RocksDb,
                clear_on_start: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let pool = &self.pool;
        let nonzero = [
            ("pool.minimum_threshold", pool.minimum_threshold),
            ("pool.target_size", pool.target_size),
            ("pool.refill_batch_size", pool.refill_batch_size),
            ("pool.refill_interval_ms", pool.refill_interval_ms),
            ("pool.sweep_interval_ms", pool.sweep_interval_ms),
            ("pool.claim_timeout_secs", pool.claim_timeout_secs),
            ("pool.claim_candidates", pool.claim_candidates as u64),
            ("session.max_cas_retries", self.session.max_cas_retries as u64),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigurationError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be > 0".to_string(),
                });
            }
        }

        for (field, value) in [
            ("pool.claim_timeout_secs", pool.claim_timeout_secs),
            ("pool.seed_ttl_secs", pool.seed_ttl_secs),
        ] {
            if value > MAX_SWEEP_WINDOW_SECS {
                return Err(ConfigurationError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: format!("must be at most {} seconds", MAX_SWEEP_WINDOW_SECS),
                });
            }
        }

        if pool.minimum_threshold > pool.target_size {
            return Err(ConfigurationError::ValidationFailed(format!(
                "pool.minimum_threshold ({}) exceeds pool.target_size ({})",
                pool.minimum_threshold, pool.target_size
            )));
        }

        if pool.seed_ttl_secs <= pool.claim_timeout_secs {
            return Err(ConfigurationError::ValidationFailed(
                "pool.seed_ttl_secs must be longer than pool.claim_timeout_secs".to_string(),
            ));
        }

        if self.anchor.network.is_production() && self.anchor.allow_stub_fallback {
            return Err(ConfigurationError::ValidationFailed(
                "stub anchoring cannot be enabled on mainnet".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::RocksDb && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: "storage.data_directory".to_string(),
                value: String::new(),
                reason: "required for the rocksdb backend".to_string(),
            });
        }

        Ok(())
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.pool.refill_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.pool.sweep_interval_ms)
    }

    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pool.claim_timeout_secs.min(MAX_SWEEP_WINDOW_SECS) as i64)
    }

    pub fn seed_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pool.seed_ttl_secs.min(MAX_SWEEP_WINDOW_SECS) as i64)
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
    base: Option<FairdeckConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a preset instead of the defaults when no file is given
    pub fn with_base(mut self, base: FairdeckConfig) -> Self {
        self.base = Some(base);
        self
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> FairdeckResult<FairdeckConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => self.base.clone().unwrap_or_default(),
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    fn load_from_file(&self, path: &str) -> FairdeckResult<FairdeckConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut FairdeckConfig) -> FairdeckResult<()> {
        if let Ok(network) = env::var("FAIRDECK_NETWORK") {
            config.anchor.network = parse_env("FAIRDECK_NETWORK", network)?;
            if config.anchor.network.is_production() {
                config.anchor.allow_stub_fallback = false;
            }
        }

        if let Ok(data_dir) = env::var("FAIRDECK_DATA_DIR") {
            config.storage.data_directory = data_dir;
        }

        if let Ok(backend) = env::var("FAIRDECK_STORAGE_BACKEND") {
            config.storage.backend = parse_env("FAIRDECK_STORAGE_BACKEND", backend)?;
        }

        if let Ok(mint) = env::var("FAIRDECK_ON_DEMAND_MINT") {
            config.session.allow_on_demand_mint = mint.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "FAIRDECK_ON_DEMAND_MINT".to_string(),
                value: mint,
                reason: "Invalid boolean value".to_string(),
            })?;
        }

        if let Ok(level) = env::var("FAIRDECK_LOG_LEVEL") {
            config.monitoring.log_level = parse_env("FAIRDECK_LOG_LEVEL", level)?;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &FairdeckConfig, path: &str) -> FairdeckResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

fn parse_env<T: FromStr<Err = String>>(field: &str, value: String) -> Result<T, ConfigurationError> {
    value.parse().map_err(|reason| ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason,
    })
}
