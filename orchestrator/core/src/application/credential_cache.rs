// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Credential Cache
//!
//! Per-API-key record of the SSH keys and startup scripts already registered
//! with the VPS provider. Lookups that miss fall back to a provider listing
//! and, if the resource is still unknown, register it.
//!
//! The cache is advisory: a miss costs a remote round trip, never
//! correctness. Entries for one API key are updated atomically, with
//! last-writer-wins between racing registrations. A transient duplicate
//! remote registration is tolerated.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::group::{SshKeyPair, StartupScript};
use crate::domain::provider::{ProviderError, VpsProvider};

#[derive(Debug, Default, Clone)]
struct CachedCredentials {
    ssh_keys: HashSet<String>,
    startup_scripts: HashSet<String>,
}

pub struct CredentialCache {
    provider: Arc<dyn VpsProvider>,
    entries: DashMap<String, CachedCredentials>,
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn VpsProvider>) -> Self {
        Self {
            provider,
            entries: DashMap::new(),
        }
    }

    /// Remote id of `key` under `api_key`, registering the key if needed.
    pub async fn resolve_ssh_key(
        &self,
        api_key: &str,
        key: &SshKeyPair,
    ) -> Result<String, ProviderError> {
        if let Some(remote_id) = key.remote_id.as_deref() {
            if self.contains(api_key, |c| c.ssh_keys.contains(remote_id)) {
                return Ok(remote_id.to_string());
            }
        }

        let registered = self.provider.list_ssh_keys(api_key).await?;
        debug!(count = registered.len(), "Refreshed cached ssh keys");
        self.entries
            .entry(api_key.to_string())
            .or_default()
            .ssh_keys = registered.into_iter().collect();

        if let Some(remote_id) = key.remote_id.as_deref() {
            if self.contains(api_key, |c| c.ssh_keys.contains(remote_id)) {
                return Ok(remote_id.to_string());
            }
        }

        let remote_id = self.provider.create_ssh_key(api_key, key).await?;
        info!(key = %key.name, remote_id = %remote_id, "Registered ssh key with provider");
        self.entries
            .entry(api_key.to_string())
            .or_default()
            .ssh_keys
            .insert(remote_id.clone());
        Ok(remote_id)
    }

    /// Remote id of `script` under `api_key`, registering the script if needed.
    pub async fn resolve_startup_script(
        &self,
        api_key: &str,
        script: &StartupScript,
    ) -> Result<String, ProviderError> {
        if let Some(remote_id) = script.remote_id.as_deref() {
            if self.contains(api_key, |c| c.startup_scripts.contains(remote_id)) {
                return Ok(remote_id.to_string());
            }
        }

        let registered = self.provider.list_startup_scripts(api_key).await?;
        debug!(count = registered.len(), "Refreshed cached startup scripts");
        self.entries
            .entry(api_key.to_string())
            .or_default()
            .startup_scripts = registered.into_iter().collect();

        if let Some(remote_id) = script.remote_id.as_deref() {
            if self.contains(api_key, |c| c.startup_scripts.contains(remote_id)) {
                return Ok(remote_id.to_string());
            }
        }

        let remote_id = self.provider.create_startup_script(api_key, script).await?;
        info!(script = %script.name, remote_id = %remote_id, "Registered startup script with provider");
        self.entries
            .entry(api_key.to_string())
            .or_default()
            .startup_scripts
            .insert(remote_id.clone());
        Ok(remote_id)
    }

    /// Forget everything cached for `api_key`.
    pub fn invalidate(&self, api_key: &str) {
        self.entries.remove(api_key);
    }

    fn contains(&self, api_key: &str, predicate: impl Fn(&CachedCredentials) -> bool) -> bool {
        self.entries
            .get(api_key)
            .map(|entry| predicate(entry.value()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instance::{RemoteInstance, RemoteInstanceId};
    use crate::domain::provider::CreateInstanceParams;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingProvider {
        keys: Mutex<Vec<String>>,
        list_calls: AtomicUsize,
        create_calls: AtomicUsize,
    }

    #[async_trait]
    impl VpsProvider for CountingProvider {
        async fn create_instance(
            &self,
            _api_key: &str,
            _params: &CreateInstanceParams,
        ) -> Result<RemoteInstance, ProviderError> {
            unimplemented!()
        }

        async fn get_instance(
            &self,
            _api_key: &str,
            _id: &RemoteInstanceId,
        ) -> Result<RemoteInstance, ProviderError> {
            unimplemented!()
        }

        async fn delete_instance(
            &self,
            _api_key: &str,
            _id: &RemoteInstanceId,
        ) -> Result<(), ProviderError> {
            unimplemented!()
        }

        async fn create_ssh_key(&self, _api_key: &str, _key: &SshKeyPair) -> Result<String, ProviderError> {
            let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
            let id = format!("key-{}", n);
            self.keys.lock().unwrap().push(id.clone());
            Ok(id)
        }

        async fn create_startup_script(
            &self,
            _api_key: &str,
            _script: &StartupScript,
        ) -> Result<String, ProviderError> {
            Ok("script-0".into())
        }

        async fn list_ssh_keys(&self, _api_key: &str) -> Result<Vec<String>, ProviderError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.keys.lock().unwrap().clone())
        }

        async fn list_startup_scripts(&self, _api_key: &str) -> Result<Vec<String>, ProviderError> {
            Ok(vec![])
        }
    }

    fn key(remote_id: Option<&str>) -> SshKeyPair {
        let mut key = SshKeyPair::new("veil-publickey", "ssh-ed25519 AAAA".into(), "secret".into());
        key.remote_id = remote_id.map(str::to_string);
        key
    }

    #[tokio::test]
    async fn test_unregistered_key_is_created_then_cached() {
        let provider = Arc::new(CountingProvider::default());
        let cache = CredentialCache::new(provider.clone());

        let id = cache.resolve_ssh_key("api", &key(None)).await.unwrap();
        assert_eq!(id, "key-0");
        assert_eq!(provider.create_calls.load(Ordering::SeqCst), 1);

        // Second lookup with the remote id recorded hits the cache
        let again = cache.resolve_ssh_key("api", &key(Some("key-0"))).await.unwrap();
        assert_eq!(again, "key-0");
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_miss_populates_from_listing_without_registering() {
        let provider = Arc::new(CountingProvider::default());
        provider.keys.lock().unwrap().push("existing".into());
        let cache = CredentialCache::new(provider.clone());

        let id = cache.resolve_ssh_key("api", &key(Some("existing"))).await.unwrap();
        assert_eq!(id, "existing");
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_entries_are_per_api_key() {
        let provider = Arc::new(CountingProvider::default());
        let cache = CredentialCache::new(provider.clone());

        cache.resolve_ssh_key("a", &key(None)).await.unwrap();
        cache.invalidate("a");
        // Unknown under "b" even though the provider now lists it for everyone
        cache.resolve_ssh_key("b", &key(Some("key-0"))).await.unwrap();
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 2);
    }
}
