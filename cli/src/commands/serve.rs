// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `icms serve`

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use icms_core::domain::config::IcmsConfigManifest;

use crate::server;

#[derive(Args)]
pub struct ServeCommand {
    /// HTTP API bind address (default: spec.server.bind_address)
    #[arg(long, env = "ICMS_HOST")]
    host: Option<String>,

    /// HTTP API port (default: spec.server.port)
    #[arg(long)]
    port: Option<u16>,
}

pub async fn execute(cmd: ServeCommand, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = IcmsConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    if let Some(host) = cmd.host {
        config.spec.server.bind_address = host;
    }
    if let Some(port) = cmd.port {
        config.spec.server.port = port;
    }

    server::start_server(config).await
}
