// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # ICMS Casework CLI
//!
//! The `icms` binary runs the casework server and administers its
//! configuration and database.
//!
//! ## Commands
//!
//! - `icms serve` - Run the HTTP API, CHIEF callbacks and background job runner
//! - `icms config show|validate|generate` - Configuration management
//! - `icms update` - Apply pending database migrations

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use icms_cli::commands::{self, ConfigCommand, ServeCommand, UpdateCommand};
use icms_cli::logging::{init_logging, LogFormat};
use icms_core::domain::config::IcmsConfigManifest;

/// ICMS casework server
#[derive(Parser)]
#[command(name = "icms")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "ICMS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to
    /// `spec.observability.log_level`
    #[arg(long, global = true, env = "ICMS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format; defaults to `spec.observability.log_format`
    #[arg(long, global = true, env = "ICMS_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the casework server
    #[command(name = "serve")]
    Serve {
        #[command(flatten)]
        command: ServeCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Apply database migrations
    #[command(name = "update")]
    Update {
        #[command(flatten)]
        command: UpdateCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let (level, format) = resolve_logging(&cli);
    init_logging(&level, format)?;

    match cli.command {
        Commands::Serve { command } => commands::serve::execute(command, cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Update { command } => commands::update::execute(command, cli.config).await,
    }
}

/// Flags win; otherwise the observability section of the configuration, read
/// before the subscriber exists.
fn resolve_logging(cli: &Cli) -> (String, LogFormat) {
    let observability = match (&cli.log_level, cli.log_format) {
        (Some(_), Some(_)) => None,
        _ => IcmsConfigManifest::load_or_default(cli.config.clone())
            .ok()
            .map(|config| config.spec.observability),
    };

    let level = cli
        .log_level
        .clone()
        .or_else(|| observability.as_ref().map(|o| o.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli.log_format.unwrap_or_else(|| match observability {
        Some(o) if o.log_format.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Compact,
    });
    (level, format)
}
