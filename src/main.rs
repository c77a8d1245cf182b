// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use devicestatus_intention_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    services::Services,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("config/logger.yaml")?;

    let cfg = resolve_config_path("config/service.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load service config")?;

    let services = Services::new(cfg).await;
    services
        .softbus
        .enable()
        .await
        .context("failed to bind soft-bus listener")?;
    info!(
        network_id = %services.config.runtime.local_network_id,
        "intention-server ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    services.shutdown().await;

    Ok(())
}
