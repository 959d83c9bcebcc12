//! Configuration types and CLI options.
//!
//! This module defines enums and structs used for command-line argument parsing
//! and configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::constants::{DEFAULT_CATALOG_PATH, DEFAULT_DB_PATH, DEFAULT_USER_AGENT};

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted:
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Configuration, doubling as the CLI option surface.
///
/// All options have defaults and can be overridden via command-line flags.
/// The struct can also be constructed programmatically (`Default` plus field
/// overrides) when the library is embedded.
///
/// # Examples
///
/// ```bash
/// # Search two usernames across every site tagged "social"
/// account_scout jdoe john.doe --catalog sites.json --tag social
///
/// # Restrict to named sites and match against a real name
/// account_scout jdoe --site Wikipedia --site GitHub --first-name John --last-name Doe
///
/// # Verify catalog detection rules instead of searching
/// account_scout --check-sites --catalog sites.json
/// ```
#[derive(Debug, Clone, Parser)]
#[command(
    name = "account_scout",
    about = "Searches a catalog of third-party sites for accounts held under the given usernames."
)]
pub struct Config {
    /// Username(s) to probe for
    #[arg(value_parser)]
    pub user_names: Vec<String>,

    /// Site catalog path (JSON object mapping site name to descriptor)
    #[arg(long, value_parser, default_value = DEFAULT_CATALOG_PATH)]
    pub catalog: PathBuf,

    /// Database path (SQLite file)
    #[arg(long, value_parser, default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// Restrict the search to this catalog site (repeatable)
    #[arg(long = "site")]
    pub sites: Vec<String>,

    /// Include every catalog site carrying this tag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// First name(s) to match in discovered pages (repeatable)
    #[arg(long = "first-name")]
    pub first_names: Vec<String>,

    /// Last name(s) to match in discovered pages (repeatable)
    #[arg(long = "last-name")]
    pub last_names: Vec<String>,

    /// Name recorded on the search definition
    #[arg(long, default_value = "ad hoc search")]
    pub search_name: String,

    /// Per-probe timeout in seconds
    #[arg(long, default_value_t = 8)]
    pub probe_timeout_seconds: u64,

    /// HTTP User-Agent header value.
    ///
    /// Defaults to a Chrome-like browser string; some sites serve different
    /// "not found" pages to obvious bots.
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Verify catalog detection rules against each site's example usernames
    /// instead of running a search
    #[arg(long, default_value_t = false)]
    pub check_sites: bool,

    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Log format: plain|json
    #[arg(long, value_enum, default_value = "plain")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_names: Vec::new(),
            catalog: PathBuf::from(DEFAULT_CATALOG_PATH),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            sites: Vec::new(),
            tags: Vec::new(),
            first_names: Vec::new(),
            last_names: Vec::new(),
            search_name: "ad hoc search".to_string(),
            probe_timeout_seconds: 8,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            check_sites: false,
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
        }
    }
}
