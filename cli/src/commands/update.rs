// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Database Update Command
//!
//! This module implements the `veil update` command for applying database
//! migrations to keep both schemas in sync with the application version.
//!
//! # Usage
//!
//! ```bash
//! # Apply all pending migrations
//! veil update
//!
//! # Preview migrations without applying
//! veil update --dry-run
//! ```
//!
//! Database URLs come from the configuration file or the
//! `VEIL_ACCESS_DATABASE_URL` / `VEIL_HOSTING_DATABASE_URL` overrides.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use sqlx::migrate::Migrator;
use std::path::PathBuf;

use veil_core::domain::repository::PostgresConfig;
use veil_core::domain::service_config::ServiceConfig;
use veil_core::infrastructure::db::{Database, ACCESS_MIGRATOR, HOSTING_MIGRATOR};

#[derive(Args)]
pub struct UpdateCommand {
    /// Perform a dry run without applying changes
    #[arg(long)]
    dry_run: bool,
}

pub async fn execute(cmd: UpdateCommand, config_path: Option<PathBuf>) -> Result<()> {
    println!("{}", "VEIL Update".bold().green());

    let config = ServiceConfig::load_or_default(config_path).context("Failed to load configuration")?;

    let targets = [
        ("access", config.database.access_url.as_deref(), &ACCESS_MIGRATOR),
        ("hosting", config.database.hosting_url.as_deref(), &HOSTING_MIGRATOR),
    ];

    if targets.iter().all(|(_, url, _)| url.is_none()) {
        anyhow::bail!(
            "No database configured. Set database.access_url / database.hosting_url \
             or VEIL_ACCESS_DATABASE_URL / VEIL_HOSTING_DATABASE_URL."
        );
    }

    for (name, url, migrator) in targets {
        match url {
            Some(url) => update_database(name, url, migrator, cmd.dry_run).await?,
            None => println!("{}", format!("Skipping {} database (not configured)", name).dimmed()),
        }
    }

    Ok(())
}

async fn update_database(name: &str, url: &str, migrator: &Migrator, dry_run: bool) -> Result<()> {
    println!("Connecting to {} database...", name);
    let db = Database::new(&PostgresConfig {
        connection_string: url.to_string(),
        max_connections: 1,
    })
    .await
    .with_context(|| format!("Failed to connect to {} database", name))?;

    let applied_count = db.applied_migrations().await;
    let total_migrations = migrator.iter().count();

    println!(
        "Migration status: {} applied, {} total available.",
        applied_count, total_migrations
    );

    if applied_count < total_migrations {
        if dry_run {
            println!("Pending migrations found (Dry Run):");
            for migration in migrator.iter().skip(applied_count) {
                println!(" - {} {}", migration.version, migration.description);
            }
            println!("Skipping application due to --dry-run");
            return Ok(());
        }

        println!("Applying pending migrations...");
        db.migrate(migrator).await?;
        println!("{}", format!("✓ {} database updated successfully.", name).green());
    } else {
        println!("{}", format!("✓ {} database is up to date.", name).green());
    }

    Ok(())
}
