// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use veil_core::domain::service_config::ServiceConfig;

use crate::wiring::{load_policy, load_startup_script, load_system_key};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file and the files it references
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, yaml: bool) -> Result<()> {
    let config = ServiceConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. VEIL_CONFIG_PATH: {}",
            std::env::var("VEIL_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./veil-config.yaml");
        println!("  4. ~/.veil/config.yaml");
        println!("  5. /etc/veil/config.yaml");
        println!();
    }

    if yaml {
        print!("{}", config.to_yaml_string()?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Storage:".bold());
    println!("  Access: {}", storage_label(config.database.access_url.is_some()));
    println!("  Hosting: {}", storage_label(config.database.hosting_url.is_some()));
    println!();

    println!("{}", "Provider:".bold());
    println!("  Name: {}", config.provider.name.as_str());
    println!("  Endpoint: {}", config.provider.base_url);
    println!(
        "  Shape: {} / {} / os {}",
        config.provider.region, config.provider.plan, config.provider.os_id
    );
    println!();

    println!("{}", "Setup:".bold());
    println!("  SSH user: {}", config.ssh.username);
    println!("  Poll interval: {}s", config.setup.poll_interval_secs);
    println!("  Remote config: {}", config.setup.remote_config_path);
    println!("  Camouflage domain: {}", config.protocol.fake_domain);
    println!();

    Ok(())
}

fn storage_label(postgres: bool) -> colored::ColoredString {
    if postgres {
        "PostgreSQL".green()
    } else {
        "in-memory".yellow()
    }
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ServiceConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;
    load_system_key(&config.ssh).context("System SSH key is unusable")?;
    load_startup_script(&config.startup_script).context("Startup script is unusable")?;
    load_policy(&config).context("Policy rules are unusable")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}
