//! Engine configuration
//!
//! Resolved once at startup, in priority order: command-line flags,
//! environment variables (both via clap), the optional TOML file, and
//! compiled defaults. The result is passed explicitly to the oracle client,
//! pipeline and orchestrator.

use clap::Parser;
use nomen_common::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5741;
pub const DEFAULT_MODEL: &str = "GLM-4.5-Air";
pub const DEFAULT_ORACLE_URL: &str = "https://api.arliai.com/v1/chat/completions";
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 500;
pub const DEFAULT_STRATEGY: &str = "top_priority";
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
pub const DATA_FOLDER_ENV: &str = "NOMEN_DATA_FOLDER";

/// Command-line interface of the `nomen-engine` binary
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "nomen-engine", version, about = "Catalog name normalization service")]
pub struct CliArgs {
    /// HTTP port
    #[arg(long, env = "NOMEN_PORT")]
    pub port: Option<u16>,

    /// Folder holding `nomen.db` when `--database` is not given (env `NOMEN_DATA_FOLDER`)
    #[arg(long)]
    pub data_folder: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "NOMEN_DATABASE")]
    pub database: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "NOMEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Tab-separated reference classifier listing to import at startup
    #[arg(long)]
    pub reference_file: Option<PathBuf>,

    #[arg(long, env = "ARLIAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "ARLIAI_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "NOMEN_ORACLE_URL")]
    pub oracle_url: Option<String>,

    #[arg(long, env = "NOMEN_WORKERS")]
    pub workers: Option<usize>,

    #[arg(long, env = "NOMEN_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    #[arg(long, env = "NOMEN_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "NOMEN_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    #[arg(long, env = "NOMEN_RATE_LIMIT_DELAY_MS")]
    pub rate_limit_delay_ms: Option<u64>,
}

/// `[oracle]` table of the TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OracleToml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub worker_count: Option<usize>,
    pub max_retries: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub rate_limit_delay_ms: Option<u64>,
    pub retry_backoff_multiplier: Option<f64>,
    pub retry_jitter: Option<bool>,
    pub cache_ttl_secs: Option<u64>,
    pub cache_max_entries: Option<usize>,
}

/// `[batch]` table of the TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchToml {
    pub batch_size: Option<usize>,
    pub strategy_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub data_folder: Option<PathBuf>,
    pub port: Option<u16>,
    #[serde(default)]
    pub oracle: OracleToml,
    #[serde(default)]
    pub batch: BatchToml,
}

/// Settings of the external text oracle client
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// `None` disables AI-assisted stages
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Hard ceiling on concurrent oracle calls
    pub worker_count: usize,
    /// Total attempts per call, first attempt included
    pub max_retries: u32,
    pub request_timeout: Duration,
    /// Minimum spacing between two calls on the same worker slot
    pub inter_call_delay: Duration,
    /// Growth of the retry delay per attempt; 1.0 keeps it fixed
    pub retry_backoff_multiplier: f64,
    pub retry_jitter: bool,
    pub cache_ttl: Duration,
    /// Per-cache ceiling for corrections and classification hints
    pub cache_max_entries: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_ORACLE_URL.to_string(),
            worker_count: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            inter_call_delay: Duration::from_millis(DEFAULT_RATE_LIMIT_DELAY_MS),
            retry_backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            retry_jitter: false,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl OracleConfig {
    pub fn ai_enabled(&self) -> bool {
        self.api_key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub strategy_id: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            strategy_id: DEFAULT_STRATEGY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port: u16,
    pub database_path: PathBuf,
    pub reference_file: Option<PathBuf>,
    pub oracle: OracleConfig,
    pub batch: BatchConfig,
}

impl EngineConfig {
    /// Merge CLI/env values over the TOML file and defaults, then validate
    pub fn resolve(args: &CliArgs) -> Result<Self> {
        let config_file = args.config.clone().or_else(nomen_common::config::locate_config_file);
        let toml_config = match &config_file {
            Some(path) => load_toml(path)?,
            None => TomlConfig::default(),
        };
        Self::merge(args, toml_config)
    }

    pub fn merge(args: &CliArgs, file: TomlConfig) -> Result<Self> {
        let defaults = OracleConfig::default();

        let data_folder = nomen_common::config::resolve_data_folder(
            args.data_folder.as_deref(),
            DATA_FOLDER_ENV,
            file.data_folder.as_deref(),
        );
        let database_path = args
            .database
            .clone()
            .unwrap_or_else(|| data_folder.join("nomen.db"));

        let api_key = args
            .api_key
            .clone()
            .or(file.oracle.api_key)
            .filter(|k| !k.trim().is_empty());

        let oracle = OracleConfig {
            api_key,
            model: args.model.clone().or(file.oracle.model).unwrap_or(defaults.model),
            base_url: args
                .oracle_url
                .clone()
                .or(file.oracle.base_url)
                .unwrap_or(defaults.base_url),
            worker_count: args.workers.or(file.oracle.worker_count).unwrap_or(DEFAULT_WORKERS),
            max_retries: args
                .max_retries
                .or(file.oracle.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            request_timeout: Duration::from_secs(
                args.request_timeout_secs
                    .or(file.oracle.request_timeout_secs)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            inter_call_delay: Duration::from_millis(
                args.rate_limit_delay_ms
                    .or(file.oracle.rate_limit_delay_ms)
                    .unwrap_or(DEFAULT_RATE_LIMIT_DELAY_MS),
            ),
            retry_backoff_multiplier: file
                .oracle
                .retry_backoff_multiplier
                .unwrap_or(defaults.retry_backoff_multiplier),
            retry_jitter: file.oracle.retry_jitter.unwrap_or(defaults.retry_jitter),
            cache_ttl: file
                .oracle
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_max_entries: file
                .oracle
                .cache_max_entries
                .unwrap_or(defaults.cache_max_entries),
        };

        let batch = BatchConfig {
            batch_size: args
                .batch_size
                .or(file.batch.batch_size)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            strategy_id: file
                .batch
                .strategy_id
                .unwrap_or_else(|| DEFAULT_STRATEGY.to_string()),
        };

        let config = Self {
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            database_path,
            reference_file: args.reference_file.clone(),
            oracle,
            batch,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.oracle.worker_count == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }
        if self.oracle.max_retries == 0 {
            return Err(Error::Config("max retries must be at least 1".to_string()));
        }
        if self.oracle.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be positive".to_string()));
        }
        let multiplier = self.oracle.retry_backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(Error::Config("retry backoff multiplier must be at least 1.0".to_string()));
        }
        if self.oracle.cache_max_entries == 0 {
            return Err(Error::Config("cache size must be at least 1".to_string()));
        }
        if self.batch.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn load_toml(path: &Path) -> Result<TomlConfig> {
    let config: TomlConfig = nomen_common::config::read_toml(path)?;
    tracing::info!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}
