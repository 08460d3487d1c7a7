// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Vultr VPS Provider
//!
//! REST adapter for the Vultr v2 API implementing [`VpsProvider`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Create, inspect and delete instances; register SSH keys and
//!   startup scripts
//! - **Integration:** Application services → VultrClient → `https://api.vultr.com/v2`
//!
//! One client serves every group: the API key travels with each call and is
//! sent as a bearer token. Region, plan, OS image and tag come from
//! [`ProviderConfig`].

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::group::{SshKeyPair, StartupScript};
use crate::domain::instance::{RemoteInstance, RemoteInstanceId};
use crate::domain::provider::{CreateInstanceParams, ProviderError, VpsProvider};
use crate::domain::service_config::ProviderConfig;

const PAGE_SIZE: u32 = 500;

// ============================================================================
// Wire Types
// ============================================================================

/// Cursor pagination block of list responses
#[derive(Debug, Default, Deserialize)]
struct ListMeta {
    #[serde(default)]
    links: ListLinks,
}

#[derive(Debug, Default, Deserialize)]
struct ListLinks {
    /// Cursor of the next page, empty on the last one
    #[serde(default)]
    next: String,
}

/// A list response: one page of items plus the next cursor
trait Paged: DeserializeOwned {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, String);
}

#[derive(Debug, Deserialize)]
struct VultrInstance {
    id: String,
    #[serde(default)]
    main_ip: String,
}

impl From<VultrInstance> for RemoteInstance {
    fn from(instance: VultrInstance) -> Self {
        // Vultr reports 0.0.0.0 until an address is assigned
        let ip = instance
            .main_ip
            .parse::<IpAddr>()
            .ok()
            .filter(|ip| !ip.is_unspecified());
        RemoteInstance {
            id: RemoteInstanceId(instance.id),
            ip,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstanceEnvelope {
    instance: VultrInstance,
}

#[derive(Debug, Serialize)]
struct CreateInstanceRequest<'a> {
    region: &'a str,
    plan: &'a str,
    os_id: u32,
    label: &'a str,
    tags: Vec<&'a str>,
    sshkey_id: Vec<&'a str>,
    script_id: &'a str,
    backups: &'a str,
}

#[derive(Debug, Deserialize)]
struct VultrSshKey {
    id: String,
    name: String,
    #[serde(default)]
    ssh_key: String,
}

#[derive(Debug, Deserialize)]
struct SshKeyEnvelope {
    ssh_key: VultrSshKey,
}

#[derive(Debug, Deserialize)]
struct SshKeyList {
    ssh_keys: Vec<VultrSshKey>,
    #[serde(default)]
    meta: ListMeta,
}

impl Paged for SshKeyList {
    type Item = VultrSshKey;

    fn into_parts(self) -> (Vec<VultrSshKey>, String) {
        (self.ssh_keys, self.meta.links.next)
    }
}

#[derive(Debug, Serialize)]
struct CreateSshKeyRequest<'a> {
    name: &'a str,
    ssh_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct VultrStartupScript {
    id: String,
    name: String,
    /// Base64 content; only present on single-script reads
    #[serde(default)]
    script: String,
}

#[derive(Debug, Deserialize)]
struct StartupScriptEnvelope {
    startup_script: VultrStartupScript,
}

#[derive(Debug, Deserialize)]
struct StartupScriptList {
    startup_scripts: Vec<VultrStartupScript>,
    #[serde(default)]
    meta: ListMeta,
}

impl Paged for StartupScriptList {
    type Item = VultrStartupScript;

    fn into_parts(self) -> (Vec<VultrStartupScript>, String) {
        (self.startup_scripts, self.meta.links.next)
    }
}

#[derive(Debug, Serialize)]
struct CreateStartupScriptRequest<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    script: String,
}

// ============================================================================
// Client Implementation
// ============================================================================

pub struct VultrClient {
    base_url: String,
    region: String,
    plan: String,
    os_id: u32,
    tag: String,
    client: Client,
}

impl VultrClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("veil/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            region: config.region.clone(),
            plan: config.plan.clone(),
            os_id: config.os_id,
            tag: config.instance_tag.clone(),
            client,
        })
    }

    fn request(&self, method: Method, path: &str, api_key: &str) -> RequestBuilder {
        let url = format!("{}/v2/{}", self.base_url, path);
        self.client.request(method, url).bearer_auth(api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    /// Decode a response carrying `expected`; 404 becomes `NotFound`.
    async fn decode<T: DeserializeOwned>(
        response: Response,
        expected: StatusCode,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound);
        }
        if status != expected {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    /// Read every page of a list endpoint, following `meta.links.next`.
    async fn fetch_all<P: Paged>(
        &self,
        api_key: &str,
        resource: &str,
    ) -> Result<Vec<P::Item>, ProviderError> {
        let mut items = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut path = format!("{}?per_page={}", resource, PAGE_SIZE);
            if !cursor.is_empty() {
                path.push_str("&cursor=");
                path.extend(url::form_urlencoded::byte_serialize(cursor.as_bytes()));
            }

            let response = self.send(self.request(Method::GET, &path, api_key)).await?;
            let page: P = Self::decode(response, StatusCode::OK).await?;
            let (batch, next) = page.into_parts();
            items.extend(batch);

            if next.is_empty() {
                return Ok(items);
            }
            if next == cursor {
                warn!(resource, cursor = %next, "Provider repeated a page cursor, stopping");
                return Ok(items);
            }
            debug!(resource, fetched = items.len(), "Fetching next page");
            cursor = next;
        }
    }

    async fn fetch_ssh_keys(&self, api_key: &str) -> Result<Vec<VultrSshKey>, ProviderError> {
        self.fetch_all::<SshKeyList>(api_key, "ssh-keys").await
    }

    async fn fetch_startup_scripts(
        &self,
        api_key: &str,
    ) -> Result<Vec<VultrStartupScript>, ProviderError> {
        self.fetch_all::<StartupScriptList>(api_key, "startup-scripts").await
    }

    async fn fetch_startup_script(
        &self,
        api_key: &str,
        id: &str,
    ) -> Result<VultrStartupScript, ProviderError> {
        let response = self
            .send(self.request(Method::GET, &format!("startup-scripts/{}", id), api_key))
            .await?;
        let envelope: StartupScriptEnvelope = Self::decode(response, StatusCode::OK).await?;
        Ok(envelope.startup_script)
    }
}

#[async_trait]
impl VpsProvider for VultrClient {
    async fn create_instance(
        &self,
        api_key: &str,
        params: &CreateInstanceParams,
    ) -> Result<RemoteInstance, ProviderError> {
        let body = CreateInstanceRequest {
            region: &self.region,
            plan: &self.plan,
            os_id: self.os_id,
            label: &params.label,
            tags: vec![self.tag.as_str()],
            sshkey_id: vec![params.ssh_key_id.as_str()],
            script_id: &params.startup_script_id,
            backups: "disabled",
        };

        let response = self
            .send(self.request(Method::POST, "instances", api_key).json(&body))
            .await?;
        let envelope: InstanceEnvelope = Self::decode(response, StatusCode::ACCEPTED).await?;

        info!(remote_id = %envelope.instance.id, label = %params.label, "Vultr instance created");
        Ok(envelope.instance.into())
    }

    async fn get_instance(
        &self,
        api_key: &str,
        id: &RemoteInstanceId,
    ) -> Result<RemoteInstance, ProviderError> {
        let response = self
            .send(self.request(Method::GET, &format!("instances/{}", id), api_key))
            .await?;
        let envelope: InstanceEnvelope = Self::decode(response, StatusCode::OK).await?;
        Ok(envelope.instance.into())
    }

    async fn delete_instance(&self, api_key: &str, id: &RemoteInstanceId) -> Result<(), ProviderError> {
        let response = self
            .send(self.request(Method::DELETE, &format!("instances/{}", id), api_key))
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => {
                info!(remote_id = %id, "Vultr instance deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound),
            status => Err(ProviderError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn create_ssh_key(&self, api_key: &str, key: &SshKeyPair) -> Result<String, ProviderError> {
        let wanted = key.public_key.trim();
        let existing = self.fetch_ssh_keys(api_key).await?;
        if let Some(found) = existing
            .iter()
            .find(|k| k.name == key.name && k.ssh_key.trim() == wanted)
        {
            debug!(id = %found.id, name = %found.name, "Reusing registered ssh key");
            return Ok(found.id.clone());
        }

        let body = CreateSshKeyRequest {
            name: &key.name,
            ssh_key: wanted,
        };
        let response = self
            .send(self.request(Method::POST, "ssh-keys", api_key).json(&body))
            .await?;
        let envelope: SshKeyEnvelope = Self::decode(response, StatusCode::CREATED).await?;

        info!(id = %envelope.ssh_key.id, name = %key.name, "Registered ssh key");
        Ok(envelope.ssh_key.id)
    }

    async fn create_startup_script(
        &self,
        api_key: &str,
        script: &StartupScript,
    ) -> Result<String, ProviderError> {
        let encoded = STANDARD.encode(script.content.as_bytes());

        for candidate in self.fetch_startup_scripts(api_key).await? {
            if candidate.name != script.name {
                continue;
            }
            match self.fetch_startup_script(api_key, &candidate.id).await {
                Ok(full) if full.script == encoded => {
                    debug!(id = %full.id, name = %full.name, "Reusing registered startup script");
                    return Ok(full.id);
                }
                Ok(_) => {}
                Err(e) => warn!(id = %candidate.id, error = %e, "Failed to read startup script"),
            }
        }

        let body = CreateStartupScriptRequest {
            name: &script.name,
            kind: "boot",
            script: encoded,
        };
        let response = self
            .send(self.request(Method::POST, "startup-scripts", api_key).json(&body))
            .await?;
        let envelope: StartupScriptEnvelope = Self::decode(response, StatusCode::CREATED).await?;

        info!(id = %envelope.startup_script.id, name = %script.name, "Registered startup script");
        Ok(envelope.startup_script.id)
    }

    async fn list_ssh_keys(&self, api_key: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self
            .fetch_ssh_keys(api_key)
            .await?
            .into_iter()
            .map(|k| k.id)
            .collect())
    }

    async fn list_startup_scripts(&self, api_key: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self
            .fetch_startup_scripts(api_key)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect())
    }
}
