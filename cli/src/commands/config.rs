// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use icms_core::domain::config::IcmsConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./icms-config.yaml)
        #[arg(short, long, default_value = "./icms-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(output, examples),
    }
}

fn set_or_dimmed(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "(not set)".dimmed().to_string(),
    }
}

/// Secrets are shown only as `env:` references or masked.
fn masked(value: &str) -> String {
    if value.is_empty() {
        "(not set)".dimmed().to_string()
    } else if value.starts_with("env:") {
        value.to_string()
    } else {
        "********".to_string()
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = IcmsConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. ICMS_CONFIG_PATH: {}",
            set_or_dimmed(std::env::var("ICMS_CONFIG_PATH").ok().as_deref())
        );
        println!("  3. ./icms-config.yaml");
        println!("  4. ~/.icms/config.yaml");
        println!("  5. /etc/icms/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{} {}", "Configuration:".bold(), config.metadata.name);
    println!();

    println!("{}", "Server:".bold());
    println!("  Listen: {}:{}", spec.server.bind_address, spec.server.port);
    println!(
        "  Storage: {}",
        if spec.database.is_some() { "postgres" } else { "in-memory" }
    );
    println!();

    println!("{}", "CHIEF:".bold());
    println!("  Send licences: {}", spec.chief.send_licence_to_chief);
    println!("  ICMS-HMRC URL: {}", set_or_dimmed(spec.chief.base_url.as_deref()));
    println!("  Update endpoint: {}", spec.chief.update_licence_endpoint);
    println!("  Hawk id: {}", set_or_dimmed(Some(&spec.hawk.auth_id)));
    println!("  Hawk key: {}", masked(&spec.hawk.auth_key));
    println!("  Bypass allowed: {}", spec.features.allow_bypass_chief);
    println!();

    println!("{}", "Email:".bold());
    println!("  Backend: {:?}", spec.email.backend);
    println!("  From: {}", spec.email.from);
    println!(
        "  Attempts: {} ({} ms apart)",
        spec.email.max_attempts, spec.email.retry_delay_ms
    );
    println!();

    println!("{}", "Documents:".bold());
    println!("  Storage path: {}", spec.documents.storage_path.display());
    println!();

    println!("{}", "Bootstrap:".bold());
    println!("  Organisations: {}", spec.bootstrap.organisations.len());
    println!("  Users: {}", spec.bootstrap.users.len());

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = IcmsConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}
