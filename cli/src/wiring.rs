// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service Wiring
//!
//! Builds the application services of both bounded contexts from a
//! [`ServiceConfig`]. PostgreSQL stores are used when a database URL is
//! configured, in-memory stores otherwise.
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Composition root shared by every command

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use veil_core::application::{
    AccessService, Authorizer, CredentialCache, GroupOnboardingService, InstanceSetupWorkflow,
    SetupSettings, StandardAccessService, StandardInstanceService,
};
use veil_core::domain::group::{SshKeyPair, StartupScript, DEFAULT_STARTUP_SCRIPT};
use veil_core::domain::principal::{Principal, UserId};
use veil_core::domain::repository::{AccessStore, HostingStore, StorageBackend};
use veil_core::domain::service_config::{ServiceConfig, SshConfig, StartupScriptConfig};
use veil_core::infrastructure::db::{Database, ACCESS_MIGRATOR, HOSTING_MIGRATOR};
use veil_core::infrastructure::repositories::{
    InMemoryAccessStore, InMemoryHostingStore, PostgresAccessStore, PostgresHostingStore,
};
use veil_core::infrastructure::{HostingGroupNotifier, RulePolicyEngine, RusshExecutor, VultrClient};

/// Fully wired services of one orchestrator process
pub struct Services {
    pub instances: Arc<StandardInstanceService>,
    pub access: Arc<StandardAccessService>,
    pub setup: Arc<InstanceSetupWorkflow>,
}

impl Services {
    pub async fn build(config: &ServiceConfig) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;

        let hosting_store = hosting_store(config).await?;
        let access_store = access_store(config).await?;

        let provider = Arc::new(
            VultrClient::new(&config.provider).context("Failed to initialize provider client")?,
        );
        let credentials = Arc::new(CredentialCache::new(provider.clone()));
        let authorizer = Arc::new(Authorizer::new(Arc::new(load_policy(config)?)));
        let setup = Arc::new(InstanceSetupWorkflow::new(
            hosting_store.clone(),
            provider.clone(),
            Arc::new(RusshExecutor::new(config.ssh.dial_timeout())),
            SetupSettings::from(config),
            CancellationToken::new(),
        ));

        let instances = Arc::new(StandardInstanceService::new(
            hosting_store.clone(),
            provider,
            credentials.clone(),
            authorizer.clone(),
            setup.clone(),
            config.protocol.fake_domain.clone(),
        ));

        let onboarding = Arc::new(GroupOnboardingService::new(
            hosting_store,
            credentials,
            load_system_key(&config.ssh)?,
            load_startup_script(&config.startup_script)?,
            config.protocol.fake_domain.clone(),
        ));

        let access = Arc::new(StandardAccessService::new(
            access_store,
            Arc::new(HostingGroupNotifier::new(onboarding)),
            authorizer,
        ));

        Ok(Self {
            instances,
            access,
            setup,
        })
    }

    /// Resolve the caller identity from the access read model.
    pub async fn principal(&self, user: &str) -> Result<Principal> {
        let id = UserId::from_string(user)
            .with_context(|| format!("'{}' is not a valid user id", user))?;
        self.access
            .resolve_principal(id)
            .await
            .with_context(|| format!("Failed to load user {}", id))
    }
}

async fn hosting_store(config: &ServiceConfig) -> Result<Arc<dyn HostingStore>> {
    match config.database.hosting_backend() {
        StorageBackend::PostgreSQL(pg) => {
            let db = Database::new(&pg)
                .await
                .context("Failed to connect to hosting database")?;
            db.migrate(&HOSTING_MIGRATOR).await?;
            info!("Hosting store: PostgreSQL");
            Ok(Arc::new(PostgresHostingStore::new(db.get_pool().clone())))
        }
        StorageBackend::InMemory => {
            warn!("No hosting database configured, instances are kept in memory");
            Ok(Arc::new(InMemoryHostingStore::new()))
        }
    }
}

async fn access_store(config: &ServiceConfig) -> Result<Arc<dyn AccessStore>> {
    match config.database.access_backend() {
        StorageBackend::PostgreSQL(pg) => {
            let db = Database::new(&pg)
                .await
                .context("Failed to connect to access database")?;
            db.migrate(&ACCESS_MIGRATOR).await?;
            info!("Access store: PostgreSQL");
            Ok(Arc::new(PostgresAccessStore::new(db.get_pool().clone())))
        }
        StorageBackend::InMemory => {
            warn!("No access database configured, users and groups are kept in memory");
            Ok(Arc::new(InMemoryAccessStore::new()))
        }
    }
}

pub fn load_policy(config: &ServiceConfig) -> Result<RulePolicyEngine> {
    match &config.policy.rules_path {
        Some(path) => RulePolicyEngine::from_yaml_file(path)
            .with_context(|| format!("Failed to load policy rules from {:?}", path)),
        None => Ok(RulePolicyEngine::with_default_rules()),
    }
}

pub fn load_system_key(ssh: &SshConfig) -> Result<SshKeyPair> {
    let private_path = ssh
        .private_key_path
        .as_deref()
        .context("ssh.private_key_path is not configured")?;
    let public_path = ssh
        .public_key_path
        .as_deref()
        .context("ssh.public_key_path is not configured")?;

    Ok(SshKeyPair::new(
        ssh.key_name.clone(),
        read_trimmed(public_path)?,
        read_file(private_path)?,
    ))
}

pub fn load_startup_script(script: &StartupScriptConfig) -> Result<StartupScript> {
    let content = match &script.path {
        Some(path) => read_file(path)?,
        None => DEFAULT_STARTUP_SCRIPT.to_string(),
    };
    Ok(StartupScript::new(script.name.clone(), content))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

fn read_trimmed(path: &Path) -> Result<String> {
    Ok(read_file(path)?.trim().to_string())
}
