//! Command-line interface for Lightkeeper
//!
//! Uses clap with derive for type-safe CLI parsing. Every fleet setting can
//! also come from the environment, which is how the daemon is usually run.

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Lightkeeper - self-healing watchdog for Lightsail instances
#[derive(Parser)]
#[command(name = "lightkeeper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Timing tuning file (TOML)
    #[arg(short, long, env = "LIGHTKEEPER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub fleet: FleetArgs,

    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Account, endpoint and schedule settings
#[derive(Args, Debug, Clone, Default)]
pub struct FleetArgs {
    /// AWS access key id
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    /// AWS secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// AWS session token for temporary credentials
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// Region used to list the other regions
    #[arg(long, env = "LIGHTSAIL_DEFAULT_REGION", default_value = "us-west-2")]
    pub default_region: String,

    /// Send every Lightsail call to this endpoint (e.g. a local emulator)
    #[arg(long, env = "LIGHTSAIL_ENDPOINT")]
    pub lightsail_endpoint: Option<String>,

    /// Only scan these regions (comma-separated)
    #[arg(long, env = "LIGHTSAIL_REGIONS", value_delimiter = ',')]
    pub regions: Option<Vec<String>>,

    /// Gotify server URL
    #[arg(long, env = "GOTIFY_URL")]
    pub gotify_url: Option<String>,

    /// Gotify application token
    #[arg(long, env = "GOTIFY_TOKEN", hide_env_values = true)]
    pub gotify_token: Option<String>,

    /// Cloudflare zone holding the service records
    #[arg(long, env = "CLOUDFLARE_ZONE_ID")]
    pub cloudflare_zone_id: Option<String>,

    /// Cloudflare API token, or the global API key when an email is set
    #[arg(long, env = "CLOUDFLARE_TOKEN", hide_env_values = true)]
    pub cloudflare_token: Option<String>,

    /// Cloudflare account email (selects global API key auth)
    #[arg(long, env = "CLOUDFLARE_EMAIL")]
    pub cloudflare_email: Option<String>,

    /// Minutes between reconciliation passes
    #[arg(long, env = "CHECK_PERIOD_MINUTES", default_value_t = 60)]
    pub check_period_minutes: u64,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Watch the fleet until interrupted
    Run,

    /// Run a single reconciliation pass and exit
    Once {
        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List managed instances per region
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check whether a host answers on any of the given ports
    Probe {
        /// Host name or address
        host: String,

        /// Slash-delimited ports, e.g. 443/8443
        #[arg(short, long)]
        ports: String,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "lightkeeper", &mut std::io::stdout());
    }
}
