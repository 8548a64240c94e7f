//! Configuration management for the simulator
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON) with validation and defaults.

use crate::simulation::{priority_hook, SimulationConfig, ThreadHook};
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Plain,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Plain => write!(f, "plain"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Complete configuration for the simulator
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "pow-chain-simulator",
    version = env!("CARGO_PKG_VERSION"),
    about = "Proof-of-work chain simulator",
    long_about = "Races honest miners and a faulty miner against a single validator that extends a shared chain"
)]
pub struct Config {
    /// Print program info and exit
    #[arg(long)]
    #[serde(skip)]
    pub info: bool,

    /// Print detailed program info and exit
    #[arg(long)]
    #[serde(skip)]
    pub long_info: bool,

    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Print the final chain as JSON when the run ends
    #[arg(long)]
    #[serde(default)]
    pub print_chain: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Number of honest miners (0 = one per CPU)
    #[arg(short = 'm', long, env = "POW_SIM_MINERS", default_value = "4")]
    #[serde(default = "default_miners")]
    pub miners: usize,

    /// Leading zero bits required in every block hash (0-32)
    #[arg(short = 'd', long, env = "POW_SIM_DIFFICULTY", default_value = "16")]
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,

    /// Stop once the chain height exceeds this
    #[arg(short = 'b', long, env = "POW_SIM_MAX_HEIGHT", default_value = "100")]
    #[serde(default = "default_max_height")]
    pub max_height: u64,

    /// Delay between forged submissions (e.g. "1s", "250ms")
    #[arg(long, default_value = "1s")]
    #[serde(default = "default_faulty_interval")]
    pub faulty_interval: String,

    /// Scheduling priority for the validator thread (0-99, higher runs first)
    #[arg(long, env = "POW_SIM_VALIDATOR_PRIORITY", value_name = "0-99")]
    #[serde(default)]
    pub validator_priority: Option<u8>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Parse the command line, then apply the config file if one is given
    pub async fn load() -> Result<Self> {
        Self::load_from(Self::parse()).await
    }

    /// Apply the config file named by `config` and validate the result
    pub async fn load_from(mut config: Self) -> Result<Self> {
        if let Some(config_file) = &config.config_file {
            let file_config = Self::load_from_file(config_file).await?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge CLI config with file config.
    ///
    /// A command line value that differs from its default wins; otherwise the
    /// file's value is used.
    fn merge_with_file(mut self, file: Self) -> Self {
        if self.miners == default_miners() {
            self.miners = file.miners;
        }
        if self.difficulty == default_difficulty() {
            self.difficulty = file.difficulty;
        }
        if self.max_height == default_max_height() {
            self.max_height = file.max_height;
        }
        if self.faulty_interval == default_faulty_interval() {
            self.faulty_interval = file.faulty_interval;
        }
        if self.log_level == default_log_level() {
            self.log_level = file.log_level;
        }
        if self.log_format == default_log_format() {
            self.log_format = file.log_format;
        }
        if self.log_file.is_none() {
            self.log_file = file.log_file;
        }
        if self.validator_priority.is_none() {
            self.validator_priority = file.validator_priority;
        }
        self.print_chain |= file.print_chain;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.simulation_config()?;
        self.validator_hook()?;
        Ok(())
    }

    /// Hook applying `--validator-priority`, if one was given
    pub fn validator_hook(&self) -> Result<Option<ThreadHook>> {
        self.validator_priority.map(priority_hook).transpose()
    }

    /// Parsed interval between forged submissions
    pub fn faulty_interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.faulty_interval).map_err(|e| {
            Error::config(format!(
                "Invalid faulty interval '{}': {}",
                self.faulty_interval, e
            ))
        })
    }

    /// Number of honest miners, resolving 0 to the CPU count
    pub fn miner_count(&self) -> usize {
        if self.miners == 0 {
            num_cpus::get()
        } else {
            self.miners
        }
    }

    /// Parameters for a run
    pub fn simulation_config(&self) -> Result<SimulationConfig> {
        let config = SimulationConfig {
            miners: self.miner_count(),
            difficulty: self.difficulty,
            max_height: self.max_height,
            faulty_interval: self.faulty_interval()?,
        };
        config.validate()?;
        Ok(config)
    }
}

// Default value functions for serde
fn default_miners() -> usize { 4 }
fn default_difficulty() -> u32 { 16 }
fn default_max_height() -> u64 { 100 }
fn default_faulty_interval() -> String { "1s".to_string() }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }
