//! CLI Adapter
//!
//! Command-line interface for shadowtrade.
//! Uses clap derive macros for argument parsing.

mod commands;
mod services;

pub use commands::{CheckCmd, CliApp, Command, RunCmd, TokenCmd, ValidateCmd};
pub use services::Services;

/// Initialize the CLI application
pub fn init() -> CliApp {
    use clap::Parser;
    CliApp::parse()
}
