// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Instance lifecycle commands
//!
//! Commands: create, get, list, delete. Every command acts on behalf of the
//! access user given with `--user`.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use veil_core::application::InstanceService;
use veil_core::domain::instance::{Instance, InstanceId, InstanceStatus};
use veil_core::domain::service_config::ServiceConfig;

use crate::wiring::Services;

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Subcommand)]
pub enum InstanceCommand {
    /// Provision the user's instance (returns the existing one if live)
    Create {
        /// Acting user id
        #[arg(long, env = "VEIL_USER")]
        user: String,

        /// Keep running until setup has finished
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "900")]
        timeout: u64,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show one instance
    Get {
        #[arg(long, env = "VEIL_USER")]
        user: String,

        #[arg(value_name = "INSTANCE_ID")]
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// List the instances visible to the user
    List {
        #[arg(long, env = "VEIL_USER")]
        user: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete an instance and its remote host
    Delete {
        #[arg(long, env = "VEIL_USER")]
        user: String,

        #[arg(value_name = "INSTANCE_ID")]
        id: String,
    },
}

pub async fn handle_command(command: InstanceCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = ServiceConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let services = Services::build(&config).await?;

    match command {
        InstanceCommand::Create {
            user,
            wait,
            timeout,
            json,
        } => create(&services, &user, wait, Duration::from_secs(timeout), json).await,
        InstanceCommand::Get { user, id, json } => get(&services, &user, &id, json).await,
        InstanceCommand::List { user, json } => list(&services, &user, json).await,
        InstanceCommand::Delete { user, id } => delete(&services, &user, &id).await,
    }
}

fn parse_instance_id(id: &str) -> Result<InstanceId> {
    InstanceId::from_string(id).with_context(|| format!("'{}' is not a valid instance id", id))
}

async fn create(
    services: &Services,
    user: &str,
    wait: bool,
    timeout: Duration,
    json: bool,
) -> Result<()> {
    let principal = services.principal(user).await?;
    let mut instance = services
        .instances
        .create_instance(&principal)
        .await
        .context("Failed to create instance")?;

    if wait && instance.status != InstanceStatus::Ok {
        println!("Waiting for instance {} to finish setup...", instance.id);
        let deadline = tokio::time::Instant::now() + timeout;

        while instance.status != InstanceStatus::Ok {
            if tokio::time::Instant::now() >= deadline {
                services.setup.shutdown().await;
                anyhow::bail!("Timed out waiting for instance {} setup", instance.id);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            instance = services
                .instances
                .get_instance(&principal, instance.id)
                .await
                .context("Failed to refresh instance")?;
        }
    }

    print_instance(&instance, json)
}

async fn get(services: &Services, user: &str, id: &str, json: bool) -> Result<()> {
    let principal = services.principal(user).await?;
    let instance = services
        .instances
        .get_instance(&principal, parse_instance_id(id)?)
        .await
        .context("Failed to get instance")?;

    print_instance(&instance, json)
}

async fn list(services: &Services, user: &str, json: bool) -> Result<()> {
    let principal = services.principal(user).await?;
    let instances = services
        .instances
        .list_instances(&principal)
        .await
        .context("Failed to list instances")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!("{}", "No instances".dimmed());
        return Ok(());
    }

    println!(
        "{:<38} {:<14} {:<16} {:<38}",
        "ID".bold(),
        "STATUS".bold(),
        "IP".bold(),
        "OWNER".bold()
    );
    for instance in &instances {
        println!(
            "{:<38} {:<14} {:<16} {:<38}",
            instance.id,
            colorize_status(instance.status),
            instance
                .ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "-".to_string()),
            instance.owner
        );
    }

    Ok(())
}

async fn delete(services: &Services, user: &str, id: &str) -> Result<()> {
    let principal = services.principal(user).await?;
    let id = parse_instance_id(id)?;
    services
        .instances
        .delete_instance(&principal, id)
        .await
        .context("Failed to delete instance")?;

    println!("{}", format!("✓ Instance {} deleted", id).green());
    Ok(())
}

fn print_instance(instance: &Instance, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(instance)?);
        return Ok(());
    }

    println!("{}", "Instance:".bold());
    println!("  ID: {}", instance.id);
    println!("  Remote ID: {}", instance.remote_id);
    println!("  Owner: {}", instance.owner);
    println!("  Status: {}", colorize_status(instance.status));
    if let Some(ip) = instance.ip {
        println!("  IP: {}", ip);
    }
    match &instance.connection_string {
        Some(link) => println!("  Connection: {}", link),
        None => println!("  Connection: {}", "(setup pending)".dimmed()),
    }
    println!("  Created: {}", instance.created_at.to_rfc3339());
    Ok(())
}

fn colorize_status(status: InstanceStatus) -> colored::ColoredString {
    match status {
        InstanceStatus::Ok => status.as_str().green(),
        InstanceStatus::Initializing => status.as_str().yellow(),
        InstanceStatus::Off | InstanceStatus::Unknown => status.as_str().red(),
    }
}
