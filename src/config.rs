// Configuration management for the route loader
// Supports CLI arguments, config file (TOML), and environment variables

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Semaphore;
use tracing::Level;

use crate::stats::duplicates::DuplicateLogConfig;

/// Route loader - install routes from JSON destination lists in bulk
#[derive(Parser, Debug, Clone)]
#[command(name = "route-loader")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "iproute.toml", env = "ROUTE_LOADER_CONFIG")]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, env = "ROUTE_LOADER_LOG")]
    pub log_level: Option<String>,

    /// Maximum number of route-add calls in flight
    #[arg(short = 'j', long, env = "ROUTE_LOADER_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Log every failed route
    #[arg(long, env = "ROUTE_LOADER_DEBUG")]
    pub debug: bool,
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// Main gateway and interface
    #[serde(default)]
    pub primary: RouteGroupConfig,

    /// Default gateway and interface
    #[serde(default)]
    pub fallback: RouteGroupConfig,

    /// Worker pool settings
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Duplicate-route log settings
    #[serde(default)]
    pub duplicates: DuplicatesConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteGroupConfig {
    /// Next-hop address; the group is skipped when empty
    #[serde(default)]
    pub gateway: String,

    /// Outgoing interface name; the group is skipped when empty
    #[serde(default)]
    pub interface: String,

    /// Directory searched for *.json route files
    #[serde(default)]
    pub routes_dir: Option<PathBuf>,

    /// Assign <gateway>/24 to the interface and bring it up before adding routes
    #[serde(default)]
    pub configure_interface: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicatesConfig {
    #[serde(default = "default_duplicates_dir")]
    pub directory: PathBuf,

    #[serde(default = "default_duplicates_prefix")]
    pub prefix: String,

    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_concurrency() -> usize {
    100
}
fn default_duplicates_dir() -> PathBuf {
    PathBuf::from("/tmp")
}
fn default_duplicates_prefix() -> String {
    "route_duplicates_".to_string()
}
fn default_flush_threshold() -> usize {
    10_000
}
fn default_queue_capacity() -> usize {
    50_000
}
fn default_log_level() -> String {
    "info".to_string()
}

const PRIMARY_ROUTES_DIR: &str = "data";
const FALLBACK_ROUTES_DIR: &str = "default_route";

/// Upper bound on records buffered by the duplicate writer between writes.
const MAX_FLUSH_THRESHOLD: usize = 1_000_000;

impl Default for WorkersConfig {
    fn default() -> Self {
        WorkersConfig {
            concurrency: default_concurrency(),
            debug: false,
        }
    }
}

impl Default for DuplicatesConfig {
    fn default() -> Self {
        DuplicatesConfig {
            directory: default_duplicates_dir(),
            prefix: default_duplicates_prefix(),
            flush_threshold: default_flush_threshold(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

/// A gateway/interface pair and the route files to install through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGroup {
    pub label: &'static str,
    pub gateway: String,
    pub interface: String,
    pub routes_dir: PathBuf,
}

/// Merged configuration from all sources
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: Level,
    pub concurrency: usize,
    pub debug: bool,
    /// Groups with both gateway and interface set, primary first
    pub groups: Vec<RouteGroup>,
    pub configure_primary_interface: bool,
    pub duplicates: DuplicateLogConfig,
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> anyhow::Result<Self> {
        let cli_args = CliArgs::parse();

        let config_content = std::fs::read_to_string(&cli_args.config).map_err(|e| {
            anyhow::anyhow!("cannot read {}: {}", cli_args.config.display(), e)
        })?;
        let config_file = toml::from_str::<ConfigFile>(&config_content)?;

        Self::merge(cli_args, config_file)
    }

    /// Merge configuration (CLI args override config file) and validate it
    pub fn merge(cli_args: CliArgs, config_file: ConfigFile) -> anyhow::Result<Self> {
        let level = cli_args
            .log_level
            .unwrap_or(config_file.logging.level);
        let log_level = parse_log_level(&level)?;

        let concurrency = cli_args
            .concurrency
            .unwrap_or(config_file.workers.concurrency);
        if concurrency == 0 || concurrency > Semaphore::MAX_PERMITS {
            anyhow::bail!("concurrency must be between 1 and {}", Semaphore::MAX_PERMITS);
        }

        let debug = cli_args.debug || config_file.workers.debug;

        let duplicates = config_file.duplicates;
        if duplicates.flush_threshold == 0 || duplicates.flush_threshold > MAX_FLUSH_THRESHOLD {
            anyhow::bail!(
                "duplicates.flush_threshold must be between 1 and {}",
                MAX_FLUSH_THRESHOLD
            );
        }
        if duplicates.queue_capacity == 0 || duplicates.queue_capacity > Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "duplicates.queue_capacity must be between 1 and {}",
                Semaphore::MAX_PERMITS
            );
        }

        let configure_primary_interface = config_file.primary.configure_interface;
        let groups = [
            ("primary", config_file.primary, PRIMARY_ROUTES_DIR),
            ("fallback", config_file.fallback, FALLBACK_ROUTES_DIR),
        ]
        .into_iter()
        .filter(|(_, group, _)| !group.gateway.is_empty() && !group.interface.is_empty())
        .map(|(label, group, default_dir)| RouteGroup {
            label,
            gateway: group.gateway,
            interface: group.interface,
            routes_dir: group.routes_dir.unwrap_or_else(|| PathBuf::from(default_dir)),
        })
        .collect();

        Ok(Config {
            log_level,
            concurrency,
            debug,
            groups,
            configure_primary_interface,
            duplicates: DuplicateLogConfig {
                directory: duplicates.directory,
                prefix: duplicates.prefix,
                flush_threshold: duplicates.flush_threshold,
                queue_capacity: duplicates.queue_capacity,
            },
        })
    }

    pub fn primary(&self) -> Option<&RouteGroup> {
        self.groups.iter().find(|g| g.label == "primary")
    }
}

fn parse_log_level(level_str: &str) -> anyhow::Result<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level_str)),
    }
}
