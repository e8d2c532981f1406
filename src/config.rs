//! Configuration management for powledger

use crate::blockchain::{validate_difficulty_prefix, SolvencyPolicy, DEFAULT_VERSION};
use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_difficulty_prefix")]
    pub difficulty_prefix: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub solvency: SolvencyPolicy,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty_prefix: default_difficulty_prefix(),
            version: default_version(),
            batch_size: default_batch_size(),
            solvency: SolvencyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    /// Worker threads; 0 uses every core.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// 0 means no attempt cap.
    #[serde(default)]
    pub max_attempts: u64,
    /// 0 means no deadline.
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            max_attempts: 0,
            timeout_ms: 0,
            progress_interval: default_progress_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_accounts")]
    pub accounts: usize,
    #[serde(default = "default_transactions")]
    pub transactions: usize,
    #[serde(default = "default_min_balance")]
    pub min_balance: i64,
    #[serde(default = "default_max_balance")]
    pub max_balance: i64,
    #[serde(default = "default_min_amount")]
    pub min_amount: u64,
    #[serde(default = "default_max_amount")]
    pub max_amount: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            accounts: default_accounts(),
            transactions: default_transactions(),
            min_balance: default_min_balance(),
            max_balance: default_max_balance(),
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            seed: None,
        }
    }
}

fn default_difficulty_prefix() -> String {
    "000".to_string()
}

fn default_version() -> u32 {
    DEFAULT_VERSION
}

fn default_batch_size() -> usize {
    100
}

fn default_threads() -> usize {
    1
}

fn default_progress_interval() -> u64 {
    100_000
}

fn default_accounts() -> usize {
    50
}

fn default_transactions() -> usize {
    1000
}

fn default_min_balance() -> i64 {
    100
}

fn default_max_balance() -> i64 {
    1_000_000
}

fn default_min_amount() -> u64 {
    1
}

fn default_max_amount() -> u64 {
    5000
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ChainError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<(), ChainError> {
        validate_difficulty_prefix(&self.chain.difficulty_prefix)?;

        if self.chain.batch_size == 0 {
            return Err(ChainError::ConfigError("chain.batch_size must be greater than zero".to_string()));
        }

        let g = &self.generator;
        if g.min_balance > g.max_balance {
            return Err(ChainError::ConfigError(format!(
                "generator.min_balance ({}) exceeds generator.max_balance ({})",
                g.min_balance, g.max_balance
            )));
        }
        if g.min_amount > g.max_amount {
            return Err(ChainError::ConfigError(format!(
                "generator.min_amount ({}) exceeds generator.max_amount ({})",
                g.min_amount, g.max_amount
            )));
        }
        if g.transactions > 0 && g.accounts < 2 {
            return Err(ChainError::InsufficientAccounts { available: g.accounts });
        }

        Ok(())
    }
}

/// Load configuration from `path`, falling back to defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    match fs::read_to_string(path.as_ref()) {
        Ok(s) => Config::from_toml_str(&s),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
        Err(e) => Err(e.into()),
    }
}
