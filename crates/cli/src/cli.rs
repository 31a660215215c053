//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Fanout - distribute one payload stream over HTTP, UDP, WebSocket and SSE
#[derive(Parser, Debug)]
#[command(
    name = "fanout",
    author,
    version,
    about = "Multi-protocol payload fan-out",
    long_about = "Fans each incoming payload out to the configured distributors.\n\n\
                  Builds a session from a named template plus an optional TOML/JSON \n\
                  file, starts the protocol servers, then distributes newline-delimited \n\
                  JSON envelopes read from stdin."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FANOUT_VERBOSE")]
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
        env = "FANOUT_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the distributors and fan out envelopes from stdin
    Run(RunArgs),

    /// Validate a session file without starting anything
    Validate(ValidateArgs),

    /// Show templates and the resolved session
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Session file (TOML or JSON); the template alone is used when omitted
    #[arg(short, long, env = "FANOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Template name (overrides the file's `template` key)
    #[arg(short, long, env = "FANOUT_TEMPLATE")]
    pub template: Option<String>,

    /// Override the WebSocket listening port
    #[arg(long)]
    pub ws_port: Option<u16>,

    /// Override the SSE listening port
    #[arg(long)]
    pub sse_port: Option<u16>,

    /// Override the HTTP distributor base URL
    #[arg(long)]
    pub http_base_url: Option<String>,

    /// Read envelopes from this file instead of stdin
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Stop after this many envelopes (0 = unlimited)
    #[arg(long, default_value = "0", env = "FANOUT_MAX_MESSAGES")]
    pub max_messages: u64,

    /// Stop after this many seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "FANOUT_TIMEOUT")]
    pub timeout: u64,

    /// Prometheus exporter port (0 = disabled)
    #[arg(long, default_value = "0", env = "FANOUT_METRICS_PORT")]
    pub metrics_port: u16,

    /// Broadcast discovery announcements even if the session disables them
    #[arg(long)]
    pub discovery: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Session file to validate
    #[arg(short, long, default_value = "session.toml")]
    pub config: PathBuf,

    /// Template name (overrides the file's `template` key)
    #[arg(short, long)]
    pub template: Option<String>,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Session file to resolve
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Template to resolve (default when neither flag is given)
    #[arg(short, long)]
    pub template: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
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
