//! CLI Command Definitions
//!
//! Argument parsing for every shadowtrade command.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Shadowtrade - linked-account trade monitor with cascade auto-close
#[derive(Parser, Debug)]
#[command(
    name = "shadowtrade",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Linked-account trade monitor with cascade auto-close",
    long_about = "Shadowtrade watches Owner, Shadow and Slave accounts on a futures venue, \
                  detects closed positions and closes linked positions according to the \
                  cascade rules, with an audit trail and live notifications."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

impl CliApp {
    /// Config file of the selected command
    pub fn config_path(&self) -> &Path {
        match &self.command {
            Command::Run(cmd) => &cmd.config,
            Command::Check(cmd) => &cmd.config,
            Command::Token(cmd) => &cmd.config,
            Command::Validate(cmd) => &cmd.config,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the monitor and the realtime gateway
    Run(RunCmd),

    /// Run a single monitor cycle and print the report
    Check(CheckCmd),

    /// Issue a signed gateway token for a user
    Token(TokenCmd),

    /// Validate the config file and the account registry
    Validate(ValidateCmd),
}

/// Start the service
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/shadowtrade.toml")]
    pub config: PathBuf,

    /// Override gateway bind address
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Leave the monitor stopped until started over the API
    #[arg(long)]
    pub no_auto_start: bool,
}

/// One-shot monitor cycle
#[derive(Parser, Debug)]
pub struct CheckCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/shadowtrade.toml")]
    pub config: PathBuf,

    /// Output format (text, json)
    #[arg(short, long, value_name = "FORMAT", default_value = "text")]
    pub format: String,
}

/// Issue a token
#[derive(Parser, Debug)]
pub struct TokenCmd {
    /// User the token authenticates
    #[arg(value_name = "USER_ID")]
    pub user_id: String,

    /// Email recorded in the claims
    #[arg(value_name = "EMAIL")]
    pub email: String,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/shadowtrade.toml")]
    pub config: PathBuf,

    /// Override token lifetime
    #[arg(long, value_name = "HOURS")]
    pub ttl_hours: Option<i64>,
}

/// Validate configuration
#[derive(Parser, Debug)]
pub struct ValidateCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/shadowtrade.toml")]
    pub config: PathBuf,
}
