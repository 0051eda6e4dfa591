//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// alert-relay - Forward security events to the configured outputs
#[derive(Parser, Debug)]
#[command(
    name = "alert-relay",
    author,
    version,
    about = "Security event output dispatcher",
    long_about = "Reads security events and delivers each one to every enabled output \n\
                  (Elasticsearch, MQTT, webhook), counting every delivery attempt."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "ALERT_RELAY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "ALERT_RELAY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log level implied by `-q` / `-v` flags
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read events and dispatch them to the outputs
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Send one test event to every enabled output
    Test(TestArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "config.toml",
        env = "ALERT_RELAY_CONFIG"
    )]
    pub config: PathBuf,

    /// Newline-delimited JSON events to read ("-" or absent = stdin)
    #[arg(short, long, env = "ALERT_RELAY_INPUT")]
    pub input: Option<PathBuf>,

    /// Validate configuration and exit without dispatching
    #[arg(long)]
    pub dry_run: bool,

    /// Capacity of the queue between the reader and the dispatcher
    #[arg(long, default_value = "100", env = "ALERT_RELAY_BUFFER_SIZE")]
    pub buffer_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "ALERT_RELAY_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml", env = "ALERT_RELAY_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `test` command
#[derive(Parser, Debug)]
pub struct TestArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "ALERT_RELAY_CONFIG")]
    pub config: PathBuf,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
