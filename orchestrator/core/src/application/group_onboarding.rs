// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Group Onboarding (Hosting Context)
//!
//! Brings a group announced by the access domain into the hosting read model:
//! a default Reality template is generated once, the system SSH key and the
//! default startup script are registered with the group's provider account
//! (at most once, through the [`CredentialCache`]), and the group is upserted.

use std::sync::Arc;
use tracing::info;

use crate::application::credential_cache::CredentialCache;
use crate::application::error::ServiceError;
use crate::domain::group::{Group, Provider, ProviderName, SshKeyPair, StartupScript};
use crate::domain::principal::GroupId;
use crate::domain::protocol::ProtocolTemplate;
use crate::domain::repository::{HostingStore, IsolationLevel};

/// A group as announced by the access domain
#[derive(Debug, Clone)]
pub struct GroupRegistration {
    pub id: GroupId,
    pub name: String,
    pub provider_name: ProviderName,
    pub provider_url: String,
    pub api_key: String,
}

pub struct GroupOnboardingService {
    store: Arc<dyn HostingStore>,
    credentials: Arc<CredentialCache>,
    system_key: SshKeyPair,
    startup_script: StartupScript,
    fake_domain: String,
}

impl GroupOnboardingService {
    pub fn new(
        store: Arc<dyn HostingStore>,
        credentials: Arc<CredentialCache>,
        system_key: SshKeyPair,
        startup_script: StartupScript,
        fake_domain: impl Into<String>,
    ) -> Self {
        Self {
            store,
            credentials,
            system_key,
            startup_script,
            fake_domain: fake_domain.into(),
        }
    }

    /// Create or refresh the hosting-side record of a group.
    pub async fn save_group(&self, registration: GroupRegistration) -> Result<Group, ServiceError> {
        if registration.api_key.is_empty() {
            return Err(ServiceError::BadRequest("provider api key is required".to_string()));
        }
        url::Url::parse(&registration.provider_url).map_err(|e| {
            ServiceError::BadRequest(format!("invalid provider url '{}': {}", registration.provider_url, e))
        })?;

        info!(group_id = %registration.id, name = %registration.name, "Onboarding group");

        let mut tx = self.store.begin(IsolationLevel::Linearizable).await?;

        let provider = Provider {
            name: registration.provider_name,
            base_url: registration.provider_url,
            api_key: registration.api_key,
        };

        let mut group = match tx.find_group(registration.id).await? {
            Some(mut existing) => {
                existing.name = registration.name;
                existing.provider = provider;
                existing
            }
            None => Group {
                id: registration.id,
                name: registration.name,
                provider,
                ssh_key: SshKeyPair::new(
                    self.system_key.name.clone(),
                    self.system_key.public_key.clone(),
                    self.system_key.private_key.clone(),
                ),
                startup_script: StartupScript::new(
                    self.startup_script.name.clone(),
                    self.startup_script.content.clone(),
                ),
                templates: Default::default(),
                default_template_id: None,
            },
        };

        if group.default_template().is_none() {
            let template = ProtocolTemplate::generate(&self.fake_domain)
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
            group.ensure_default_template(template);
        }

        let api_key = group.provider.api_key.clone();
        let key_id = self
            .credentials
            .resolve_ssh_key(&api_key, &group.ssh_key)
            .await?;
        let script_id = self
            .credentials
            .resolve_startup_script(&api_key, &group.startup_script)
            .await?;
        group.ssh_key.remote_id = Some(key_id);
        group.startup_script.remote_id = Some(script_id);

        tx.save_group(&group).await?;
        tx.commit().await?;

        info!(
            group_id = %group.id,
            ssh_key = ?group.ssh_key.remote_id,
            startup_script = ?group.startup_script.remote_id,
            "Group onboarded"
        );
        Ok(group)
    }
}
