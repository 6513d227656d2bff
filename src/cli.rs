use beacon::{ConfigOverrides, Environment};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

/// Output format for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

impl OutputFormat {
    /// Resolve the effective output format.
    /// If user specified a format, use it.
    /// Otherwise: TTY → Text, non-TTY (pipe) → Json
    pub fn resolve(user_choice: Option<OutputFormat>) -> OutputFormat {
        match user_choice {
            Some(fmt) => fmt,
            None => {
                if std::io::stdout().is_terminal() {
                    OutputFormat::Text
                } else {
                    OutputFormat::Json
                }
            }
        }
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EnvArg {
    Prod,
    Dev,
}

impl From<EnvArg> for Environment {
    fn from(arg: EnvArg) -> Self {
        match arg {
            EnvArg::Prod => Environment::Prod,
            EnvArg::Dev => Environment::Dev,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "beacon",
    about = "Batch interaction events and deliver them on a schedule",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/beacon/logs/beacon.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to beacon.yaml config file")]
    pub config: Option<PathBuf>,

    /// Suppress non-error output
    #[arg(short, long, global = true, help = "Suppress non-error output")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read producer records and dispatch them through a provider
    Run(RunArgs),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    /// JSON-lines file of producer records (reads stdin if omitted or "-")
    #[arg(long, short = 'i')]
    pub input: Option<PathBuf>,

    /// Flush period in milliseconds
    #[arg(long)]
    pub batch_interval: Option<u64>,

    /// Heartbeat period in milliseconds
    #[arg(long)]
    pub metadata_interval: Option<u64>,

    /// Deployment environment (dev enables lifecycle logging)
    #[arg(long = "env", value_enum)]
    pub environment: Option<EnvArg>,

    /// Log every built event
    #[arg(long)]
    pub debug: bool,

    /// Disable the metadata heartbeat
    #[arg(long)]
    pub no_metadata: bool,

    /// Only send heartbeats while stdout is a terminal
    #[arg(long)]
    pub only_when_visible: bool,

    /// Stdout sink format (default: text for TTY, json for pipes)
    #[arg(long, short = 'o', value_enum)]
    pub format: Option<OutputFormat>,
}

impl RunArgs {
    /// Flags as config overrides; unset flags leave the file config alone
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            batch_interval: self.batch_interval,
            metadata_interval: self.metadata_interval,
            send_metadata: self.no_metadata.then_some(false),
            send_metadata_only_when_visible: self.only_when_visible.then_some(true),
            environment: self.environment.map(Environment::from),
            debug: self.debug.then_some(true),
            default_metadata: None,
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Output format (default: text for TTY, json for pipes)
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Get a configuration value
    Get {
        /// Configuration key (dot notation)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// New value
        value: String,
    },
}
