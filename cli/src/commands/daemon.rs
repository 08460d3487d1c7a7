// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Orchestrator daemon
//!
//! Wires the services, relaunches setups left pending by a previous process
//! and runs until Ctrl+C or SIGTERM. Shutdown cancels every in-flight setup and
//! waits for each one to close its SSH session.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

use veil_core::application::InstanceService;
use veil_core::domain::service_config::ServiceConfig;

use crate::wiring::Services;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = ServiceConfig::load_or_default(config_path).context("Failed to load configuration")?;

    info!(
        provider = config.provider.name.as_str(),
        region = %config.provider.region,
        "VEIL orchestrator starting"
    );

    let services = Services::build(&config).await?;

    match services.instances.resume_pending_setups().await {
        Ok(count) => info!(count, "Resumed pending instance setups"),
        Err(e) => warn!(error = %e, "Failed to resume pending instance setups"),
    }

    shutdown_signal().await?;

    info!("Cancelling in-flight setups");
    services.setup.shutdown().await;

    info!("VEIL orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to install Ctrl+C handler")?;
                info!("Received Ctrl+C signal");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM signal");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("Failed to install Ctrl+C handler")?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}
