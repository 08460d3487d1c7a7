// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Access user commands
//!
//! Commands: add, login, show, list, update. `add` without `--group` is an
//! open sign-up; the others act on behalf of the user given with `--user`.

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use veil_core::application::{AccessService, CreateUserRequest, UpdateUserRequest};
use veil_core::domain::access::{AccessUser, Credentials};
use veil_core::domain::principal::{GroupId, Principal, Role, UserId};
use veil_core::domain::service_config::ServiceConfig;

use crate::wiring::Services;

#[derive(Subcommand)]
pub enum UserCommand {
    /// Create a user, optionally joining an existing group
    Add {
        #[arg(value_name = "USERNAME")]
        username: String,

        #[arg(long, env = "VEIL_PASSWORD", hide_env_values = true)]
        password: String,

        /// Group to join; requires `--user` to be an admin of it
        #[arg(long, value_name = "GROUP_ID")]
        group: Option<String>,

        /// Acting user id
        #[arg(long, env = "VEIL_USER")]
        user: Option<String>,
    },

    /// Check credentials and print the resulting identity
    Login {
        #[arg(value_name = "USERNAME")]
        username: String,

        #[arg(long, env = "VEIL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show a user's role and group
    Show {
        #[arg(long, env = "VEIL_USER")]
        user: String,

        #[arg(value_name = "USER_ID")]
        id: String,
    },

    /// List the users visible to the acting user
    List {
        #[arg(long, env = "VEIL_USER")]
        user: String,
    },

    /// Change a user's name, password, role or group
    Update {
        #[arg(long, env = "VEIL_USER")]
        user: String,

        #[arg(value_name = "USER_ID")]
        id: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,

        #[arg(long, value_parser = ["client", "admin"])]
        role: Option<String>,

        #[arg(long, value_name = "GROUP_ID")]
        group: Option<String>,
    },
}

pub async fn handle_command(command: UserCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = ServiceConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let services = Services::build(&config).await?;

    match command {
        UserCommand::Add {
            username,
            password,
            group,
            user,
        } => {
            let principal: Option<Principal> = match &user {
                Some(user) => Some(services.principal(user).await?),
                None => None,
            };
            let created = services
                .access
                .create_user(
                    principal.as_ref(),
                    CreateUserRequest {
                        username,
                        password,
                        group_id: group.as_deref().map(parse_group_id).transpose()?,
                    },
                )
                .await
                .context("Failed to create user")?;
            println!("{}", format!("✓ User '{}' created", created.username).green());
            print_user(&created);
        }
        UserCommand::Login { username, password } => {
            let principal = services
                .access
                .authenticate(&Credentials { username, password })
                .await
                .context("Login failed")?;
            println!("{}", "✓ Credentials accepted".green());
            println!("  ID: {}", principal.id);
            println!("  Role: {}", principal.role);
            print_group(principal.group_id);
        }
        UserCommand::Show { user, id } => {
            let principal = services.principal(&user).await?;
            let shown = services
                .access
                .get_user(&principal, parse_user_id(&id)?)
                .await
                .context("Failed to get user")?;
            print_user(&shown);
        }
        UserCommand::List { user } => {
            let principal = services.principal(&user).await?;
            let users = services
                .access
                .list_users(&principal)
                .await
                .context("Failed to list users")?;

            if users.is_empty() {
                println!("{}", "No users".dimmed());
                return Ok(());
            }
            println!("{:<38} {:<20} {:<8} {}", "ID", "USERNAME", "ROLE", "GROUP");
            for listed in users {
                println!(
                    "{:<38} {:<20} {:<8} {}",
                    listed.id,
                    listed.username,
                    listed.role,
                    listed
                        .group_id
                        .map(|g| g.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        UserCommand::Update {
            user,
            id,
            username,
            password,
            role,
            group,
        } => {
            let principal = services.principal(&user).await?;
            let request = UpdateUserRequest {
                username,
                password,
                role: role
                    .as_deref()
                    .map(|r| r.parse::<Role>().map_err(|e| anyhow!(e)))
                    .transpose()?,
                group_id: group.as_deref().map(parse_group_id).transpose()?,
            };
            let updated = services
                .access
                .update_user(&principal, parse_user_id(&id)?, request)
                .await
                .context("Failed to update user")?;
            println!("{}", format!("✓ User '{}' updated", updated.username).green());
            print_user(&updated);
        }
    }

    Ok(())
}

fn parse_user_id(id: &str) -> Result<UserId> {
    UserId::from_string(id).with_context(|| format!("'{}' is not a valid user id", id))
}

fn parse_group_id(id: &str) -> Result<GroupId> {
    GroupId::from_string(id).with_context(|| format!("'{}' is not a valid group id", id))
}

fn print_user(user: &AccessUser) {
    println!("  ID: {}", user.id);
    println!("  Username: {}", user.username);
    println!("  Role: {}", user.role);
    print_group(user.group_id);
}

fn print_group(group_id: Option<GroupId>) {
    match group_id {
        Some(group_id) => println!("  Group: {}", group_id),
        None => println!("  Group: {}", "(none)".dimmed()),
    }
}
