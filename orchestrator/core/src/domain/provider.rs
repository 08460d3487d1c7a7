// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # VPS Provider Contract
//!
//! Typed operations the orchestrator needs from a VPS provider. The API key is
//! always passed per call: one adapter instance serves every group.
//!
//! Implemented by `crate::infrastructure::vultr::VultrClient`.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::group::{SshKeyPair, StartupScript};
use crate::domain::instance::{RemoteInstance, RemoteInstanceId};

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The remote resource does not exist (anymore).
    #[error("Remote resource not found")]
    NotFound,

    #[error("Provider API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound)
    }
}

/// Parameters of a remote instance creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstanceParams {
    /// Deterministic label derived from the owner
    pub label: String,
    pub ssh_key_id: String,
    pub startup_script_id: String,
}

#[async_trait]
pub trait VpsProvider: Send + Sync {
    async fn create_instance(
        &self,
        api_key: &str,
        params: &CreateInstanceParams,
    ) -> Result<RemoteInstance, ProviderError>;

    async fn get_instance(
        &self,
        api_key: &str,
        id: &RemoteInstanceId,
    ) -> Result<RemoteInstance, ProviderError>;

    /// Fails with [`ProviderError::NotFound`] when the instance is already gone.
    async fn delete_instance(&self, api_key: &str, id: &RemoteInstanceId) -> Result<(), ProviderError>;

    /// Register a public key, returning its remote id.
    async fn create_ssh_key(&self, api_key: &str, key: &SshKeyPair) -> Result<String, ProviderError>;

    /// Register a startup script, returning its remote id.
    async fn create_startup_script(
        &self,
        api_key: &str,
        script: &StartupScript,
    ) -> Result<String, ProviderError>;

    /// Remote ids of every SSH key registered under `api_key`.
    async fn list_ssh_keys(&self, api_key: &str) -> Result<Vec<String>, ProviderError>;

    /// Remote ids of every startup script registered under `api_key`.
    async fn list_startup_scripts(&self, api_key: &str) -> Result<Vec<String>, ProviderError>;
}
