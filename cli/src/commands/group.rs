// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Group management commands
//!
//! Commands: create

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use veil_core::application::{AccessService, CreateGroupRequest};
use veil_core::domain::service_config::ServiceConfig;

use crate::wiring::Services;

#[derive(Subcommand)]
pub enum GroupCommand {
    /// Create a group; the creating user becomes its admin
    Create {
        /// Acting user id
        #[arg(long, env = "VEIL_USER")]
        user: String,

        /// Group name
        #[arg(value_name = "NAME")]
        name: String,

        /// Provider API base URL of the group's account
        #[arg(long, default_value = "https://api.vultr.com")]
        provider_url: String,

        /// Provider API key of the group's account
        #[arg(long, env = "VEIL_PROVIDER_API_KEY", hide_env_values = true)]
        api_key: String,
    },
}

pub async fn handle_command(command: GroupCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = ServiceConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let services = Services::build(&config).await?;

    match command {
        GroupCommand::Create {
            user,
            name,
            provider_url,
            api_key,
        } => {
            let principal = services.principal(&user).await?;
            let group = services
                .access
                .create_group(
                    &principal,
                    CreateGroupRequest {
                        name,
                        provider_url,
                        api_key,
                    },
                )
                .await
                .context("Failed to create group")?;

            println!("{}", format!("✓ Group '{}' created", group.name).green());
            println!("  ID: {}", group.id);
            println!("  Provider: {} ({})", group.provider_name.as_str(), group.provider_url);
            println!("  Admin: {}", principal.id);
            Ok(())
        }
    }
}
