// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Group Aggregate (Hosting Read Model)
//!
//! A group owns exactly one VPS provider credential set, shared by every
//! instance its members create. The default SSH key pair and startup script
//! are registered with the provider at most once; afterwards they are only
//! annotated with the remote ids the provider returned.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::principal::{GroupId, UserId};
use crate::domain::protocol::{ProtocolTemplate, TemplateId};

/// Xray install script run by new instances on first boot
pub const DEFAULT_STARTUP_SCRIPT: &str = include_str!("../../assets/startup.sh");

/// Supported VPS providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Vultr,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Vultr => "vultr",
        }
    }
}

impl std::str::FromStr for ProviderName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vultr" => Ok(ProviderName::Vultr),
            other => Err(format!("unsupported provider: {}", other)),
        }
    }
}

/// Provider credential set of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub name: ProviderName,
    pub base_url: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKeyPair {
    pub id: Uuid,
    /// Set once the provider has registered the public key
    pub remote_id: Option<String>,
    pub name: String,
    pub public_key: String,
    #[serde(skip_serializing, default)]
    pub private_key: String,
}

impl SshKeyPair {
    pub fn new(name: impl Into<String>, public_key: String, private_key: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_id: None,
            name: name.into(),
            public_key,
            private_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupScript {
    pub id: Uuid,
    pub remote_id: Option<String>,
    pub name: String,
    pub content: String,
}

impl StartupScript {
    pub fn new(name: impl Into<String>, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_id: None,
            name: name.into(),
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub provider: Provider,
    pub ssh_key: SshKeyPair,
    pub startup_script: StartupScript,
    pub templates: HashMap<TemplateId, ProtocolTemplate>,
    pub default_template_id: Option<TemplateId>,
}

impl Group {
    pub fn default_template(&self) -> Option<&ProtocolTemplate> {
        self.default_template_id
            .as_ref()
            .and_then(|id| self.templates.get(id))
    }

    /// Install `template` as the default unless the group already has one.
    /// Returns `true` when the template was installed.
    pub fn ensure_default_template(&mut self, template: ProtocolTemplate) -> bool {
        if self.default_template().is_some() {
            return false;
        }
        let id = template.id;
        self.templates.insert(id, template);
        self.default_template_id = Some(id);
        true
    }

    /// Fake-SNI domain instances of this group are configured with.
    pub fn fake_domain(&self) -> Option<&str> {
        self.default_template().map(|t| t.fake_domain.as_str())
    }
}

/// Hosting-side reference to an access-domain user, created lazily
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingUser {
    pub id: UserId,
    pub group_id: GroupId,
}
