//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// CQL sync broker demo - runs the broker against an in-memory chain
#[derive(Parser, Debug)]
#[command(
    name = "cql-broker-demo",
    author,
    version,
    about = "Sync broker demo with in-memory chain and mock or MQTT transport",
    long_about = "Starts the sync broker on a mock pub/sub transport or a real MQTT server, \n\
                  drives simulated client writes into in-memory chains, seals blocks \n\
                  periodically and reports what the broker published."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CQL_BROKER_VERBOSE")]
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
        env = "CQL_BROKER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the broker with simulated clients
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); built-in defaults when absent
    #[arg(short, long, env = "CQL_BROKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Pub/sub transport the broker and simulated clients use
    #[arg(long, value_enum, default_value = "mock", env = "CQL_BROKER_TRANSPORT")]
    pub transport: TransportKind,

    /// Override the node identity (transport user)
    #[arg(long, env = "CQL_BROKER_USER")]
    pub user: Option<String>,

    /// Override the newest publish period in milliseconds
    #[arg(long, env = "CQL_BROKER_PERIOD_MS")]
    pub period_ms: Option<u64>,

    /// Number of simulated databases
    #[arg(long, default_value = "3")]
    pub databases: usize,

    /// Number of simulated writing clients
    #[arg(long, default_value = "2")]
    pub clients: usize,

    /// Writes per second per client
    #[arg(long, default_value = "20")]
    pub write_rate: u32,

    /// Block sealing interval in milliseconds
    #[arg(long, default_value = "500")]
    pub seal_ms: u64,

    /// Run time in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "10", env = "CQL_BROKER_DURATION")]
    pub duration: u64,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "CQL_BROKER_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "broker.toml")]
    pub config: PathBuf,

    /// Print the effective configuration as JSON instead of TOML
    #[arg(long)]
    pub json: bool,
}

/// Transport selection
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// In-process transport, no server needed
    #[default]
    Mock,
    /// MQTT server at `transport.addr`
    Mqtt,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON structured logs
    Json,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
            LogFormat::Json => observability::LogFormat::Json,
        }
    }
}
