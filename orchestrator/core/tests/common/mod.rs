// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fakes for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use veil_core::application::{
    Authorizer, CredentialCache, InstanceSetupWorkflow, SetupSettings, StandardInstanceService,
};
use veil_core::domain::authorization::{Decision, DecisionPoint, PartialClause, PolicyError, Resource, Verb};
use veil_core::domain::group::{Group, HostingUser, Provider, ProviderName, SshKeyPair, StartupScript};
use veil_core::domain::instance::{Instance, InstanceId, InstanceStatus, RemoteInstance, RemoteInstanceId};
use veil_core::domain::principal::{GroupId, Principal, Role, UserId};
use veil_core::domain::protocol::ProtocolTemplate;
use veil_core::domain::provider::{CreateInstanceParams, ProviderError, VpsProvider};
use veil_core::domain::remote::{RemoteError, RemoteExecutor, RemoteSession};
use veil_core::domain::repository::{
    HostingStore, HostingTransaction, IsolationLevel, RepositoryError,
};
use veil_core::infrastructure::policy_engine::RulePolicyEngine;
use veil_core::infrastructure::repositories::InMemoryHostingStore;

pub const API_KEY: &str = "0123456789abcdef0123456789abcdef0123";
pub const FAKE_DOMAIN: &str = "www.speedtest.net";
pub const READINESS_CHECK: &str = "which xray";
pub const RESTART: &str = "systemctl restart xray";
pub const CONFIG_PATH: &str = "/usr/local/etc/xray/config.json";

// ============================================================================
// Provider
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteBehavior {
    Succeed,
    NotFound,
    Fail,
}

pub struct FakeProvider {
    pub created: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
    pub delete_behavior: Mutex<DeleteBehavior>,
    pub assigned_ip: Mutex<Option<IpAddr>>,
    pub ssh_keys: Mutex<Vec<String>>,
    pub startup_scripts: Mutex<Vec<String>>,
    pub registrations: AtomicUsize,
    pub reject_credentials: AtomicBool,
    pub lookup_delay: Mutex<Duration>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            delete_behavior: Mutex::new(DeleteBehavior::Succeed),
            assigned_ip: Mutex::new(Some("10.0.0.5".parse().unwrap())),
            ssh_keys: Mutex::new(Vec::new()),
            startup_scripts: Mutex::new(Vec::new()),
            registrations: AtomicUsize::new(0),
            reject_credentials: AtomicBool::new(false),
            lookup_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn set_delete_behavior(&self, behavior: DeleteBehavior) {
        *self.delete_behavior.lock().unwrap() = behavior;
    }

    fn check_credentials(&self) -> Result<(), ProviderError> {
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 401,
                message: "Invalid API token.".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VpsProvider for FakeProvider {
    async fn create_instance(
        &self,
        _api_key: &str,
        _params: &CreateInstanceParams,
    ) -> Result<RemoteInstance, ProviderError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RemoteInstance {
            id: RemoteInstanceId(format!("r{}", n)),
            ip: None,
        })
    }

    async fn get_instance(
        &self,
        _api_key: &str,
        id: &RemoteInstanceId,
    ) -> Result<RemoteInstance, ProviderError> {
        let delay = *self.lookup_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(RemoteInstance {
            id: id.clone(),
            ip: *self.assigned_ip.lock().unwrap(),
        })
    }

    async fn delete_instance(&self, _api_key: &str, id: &RemoteInstanceId) -> Result<(), ProviderError> {
        self.deleted.lock().unwrap().push(id.0.clone());
        match *self.delete_behavior.lock().unwrap() {
            DeleteBehavior::Succeed => Ok(()),
            DeleteBehavior::NotFound => Err(ProviderError::NotFound),
            DeleteBehavior::Fail => Err(ProviderError::Api {
                status: 500,
                message: "provider unavailable".into(),
            }),
        }
    }

    async fn create_ssh_key(&self, _api_key: &str, _key: &SshKeyPair) -> Result<String, ProviderError> {
        self.check_credentials()?;
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let mut keys = self.ssh_keys.lock().unwrap();
        let id = format!("key-{}", keys.len() + 1);
        keys.push(id.clone());
        Ok(id)
    }

    async fn create_startup_script(
        &self,
        _api_key: &str,
        _script: &StartupScript,
    ) -> Result<String, ProviderError> {
        self.check_credentials()?;
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.startup_scripts.lock().unwrap();
        let id = format!("script-{}", scripts.len() + 1);
        scripts.push(id.clone());
        Ok(id)
    }

    async fn list_ssh_keys(&self, _api_key: &str) -> Result<Vec<String>, ProviderError> {
        self.check_credentials()?;
        Ok(self.ssh_keys.lock().unwrap().clone())
    }

    async fn list_startup_scripts(&self, _api_key: &str) -> Result<Vec<String>, ProviderError> {
        self.check_credentials()?;
        Ok(self.startup_scripts.lock().unwrap().clone())
    }
}

// ============================================================================
// Remote execution
// ============================================================================

#[derive(Default)]
pub struct ExecutorLog {
    pub dials: Mutex<Vec<(IpAddr, String)>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(String, String)>>,
}

pub struct FakeExecutor {
    pub log: Arc<ExecutorLog>,
    pub ready: Arc<AtomicBool>,
    pub readiness_delay: Duration,
}

impl FakeExecutor {
    pub fn ready() -> Self {
        Self {
            log: Arc::new(ExecutorLog::default()),
            ready: Arc::new(AtomicBool::new(true)),
            readiness_delay: Duration::ZERO,
        }
    }

    /// Readiness check that only answers after `delay`
    pub fn slow_readiness_check(delay: Duration) -> Self {
        Self {
            readiness_delay: delay,
            ..Self::ready()
        }
    }

    pub fn never_ready() -> Self {
        let executor = Self::ready();
        executor.ready.store(false, Ordering::SeqCst);
        executor
    }

    pub fn opened(&self) -> usize {
        self.log.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.log.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn dial(
        &self,
        ip: IpAddr,
        private_key: &str,
        _username: &str,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        self.log.dials.lock().unwrap().push((ip, private_key.to_string()));
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            log: self.log.clone(),
            ready: self.ready.clone(),
            readiness_delay: self.readiness_delay,
        }))
    }
}

struct FakeSession {
    log: Arc<ExecutorLog>,
    ready: Arc<AtomicBool>,
    readiness_delay: Duration,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn execute(&mut self, command: &str) -> Result<String, RemoteError> {
        self.log.commands.lock().unwrap().push(command.to_string());
        if command == READINESS_CHECK && !self.readiness_delay.is_zero() {
            tokio::time::sleep(self.readiness_delay).await;
        }
        if command == READINESS_CHECK && !self.ready.load(Ordering::SeqCst) {
            return Err(RemoteError::CommandFailed {
                command: command.to_string(),
                status: 1,
                stderr: String::new(),
            });
        }
        Ok(String::new())
    }

    async fn upload_file(&mut self, path: &str, content: &[u8]) -> Result<(), RemoteError> {
        self.log
            .uploads
            .lock()
            .unwrap()
            .push((path.to_string(), String::from_utf8_lossy(content).into_owned()));
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), RemoteError> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Authorization
// ============================================================================

pub struct BrokenDecisionPoint;

#[async_trait]
impl DecisionPoint for BrokenDecisionPoint {
    async fn decide(
        &self,
        _principal: &Principal,
        _verb: Verb,
        _resource: &Resource,
    ) -> Result<Decision, PolicyError> {
        Err(PolicyError::Evaluation("evaluator crashed".into()))
    }
}

pub fn default_authorizer() -> Arc<Authorizer> {
    Arc::new(Authorizer::new(Arc::new(RulePolicyEngine::with_default_rules())))
}

// ============================================================================
// Storage
// ============================================================================

/// Hosting store whose transactions refuse to write instances
pub struct FailingSaveStore {
    pub inner: InMemoryHostingStore,
}

#[async_trait]
impl HostingStore for FailingSaveStore {
    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn HostingTransaction>, RepositoryError> {
        Ok(Box::new(FailingSaveTransaction {
            inner: self.inner.begin(isolation).await?,
        }))
    }
}

struct FailingSaveTransaction {
    inner: Box<dyn HostingTransaction>,
}

#[async_trait]
impl HostingTransaction for FailingSaveTransaction {
    async fn find_user(&mut self, id: UserId) -> Result<Option<HostingUser>, RepositoryError> {
        self.inner.find_user(id).await
    }

    async fn save_user(&mut self, user: &HostingUser) -> Result<(), RepositoryError> {
        self.inner.save_user(user).await
    }

    async fn find_group(&mut self, id: GroupId) -> Result<Option<Group>, RepositoryError> {
        self.inner.find_group(id).await
    }

    async fn save_group(&mut self, group: &Group) -> Result<(), RepositoryError> {
        self.inner.save_group(group).await
    }

    async fn find_instance(
        &mut self,
        id: InstanceId,
        filter: &PartialClause,
    ) -> Result<Option<Instance>, RepositoryError> {
        self.inner.find_instance(id, filter).await
    }

    async fn find_instance_by_owner(
        &mut self,
        owner: UserId,
    ) -> Result<Option<Instance>, RepositoryError> {
        self.inner.find_instance_by_owner(owner).await
    }

    async fn list_instances(
        &mut self,
        filter: &PartialClause,
    ) -> Result<Vec<Instance>, RepositoryError> {
        self.inner.list_instances(filter).await
    }

    async fn list_instances_by_status(
        &mut self,
        status: InstanceStatus,
    ) -> Result<Vec<Instance>, RepositoryError> {
        self.inner.list_instances_by_status(status).await
    }

    async fn save_instance(&mut self, _instance: &Instance) -> Result<(), RepositoryError> {
        Err(RepositoryError::Database("disk full".into()))
    }

    async fn soft_delete_instance(
        &mut self,
        id: InstanceId,
        filter: &PartialClause,
    ) -> Result<u64, RepositoryError> {
        self.inner.soft_delete_instance(id, filter).await
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.inner.rollback().await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn test_group(id: GroupId) -> Group {
    let mut group = Group {
        id,
        name: "friends".into(),
        provider: Provider {
            name: ProviderName::Vultr,
            base_url: "https://api.vultr.com".into(),
            api_key: API_KEY.into(),
        },
        ssh_key: SshKeyPair::new("veil-publickey", "ssh-ed25519 AAAA".into(), "PRIVATE KEY".into()),
        startup_script: StartupScript::new("veil-script", "#!/bin/sh\n".into()),
        templates: Default::default(),
        default_template_id: None,
    };
    group.ensure_default_template(ProtocolTemplate::generate(FAKE_DOMAIN).unwrap());
    group
}

pub async fn seed_group(store: &dyn HostingStore, group: &Group) {
    let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
    tx.save_group(group).await.unwrap();
    tx.commit().await.unwrap();
}

pub fn fast_settings() -> SetupSettings {
    SetupSettings {
        poll_interval: Duration::from_millis(10),
        username: "root".into(),
        remote_config_path: CONFIG_PATH.into(),
        restart_command: RESTART.into(),
        readiness_command: READINESS_CHECK.into(),
    }
}

pub fn client(group: GroupId) -> Principal {
    Principal::new(UserId::new(), Some(group), Role::Client)
}

pub fn admin(group: GroupId) -> Principal {
    Principal::new(UserId::new(), Some(group), Role::Admin)
}

/// Instance service over an in-memory store with one seeded group
pub struct Harness {
    pub store: InMemoryHostingStore,
    pub provider: Arc<FakeProvider>,
    pub executor: Arc<FakeExecutor>,
    pub setup: Arc<InstanceSetupWorkflow>,
    pub service: StandardInstanceService,
    pub group: Group,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub async fn new(executor: FakeExecutor) -> Self {
        Self::with_store(InMemoryHostingStore::new(), None, executor, default_authorizer()).await
    }

    /// `service_store` replaces the store the instance service writes through.
    pub async fn with_store(
        store: InMemoryHostingStore,
        service_store: Option<Arc<dyn HostingStore>>,
        executor: FakeExecutor,
        authorizer: Arc<Authorizer>,
    ) -> Self {
        let group = test_group(GroupId::new());
        seed_group(&store, &group).await;

        let provider = Arc::new(FakeProvider::new());
        let executor = Arc::new(executor);
        let shutdown = CancellationToken::new();
        let shared: Arc<dyn HostingStore> = Arc::new(store.clone());

        let setup = Arc::new(InstanceSetupWorkflow::new(
            shared.clone(),
            provider.clone(),
            executor.clone(),
            fast_settings(),
            shutdown.clone(),
        ));
        let service = StandardInstanceService::new(
            service_store.unwrap_or(shared),
            provider.clone(),
            Arc::new(CredentialCache::new(provider.clone())),
            authorizer,
            setup.clone(),
            FAKE_DOMAIN,
        );

        Self {
            store,
            provider,
            executor,
            setup,
            service,
            group,
            shutdown,
        }
    }

    pub async fn instance_row(&self, id: InstanceId) -> Option<Instance> {
        self.store
            .instance_rows()
            .await
            .into_iter()
            .find(|i| i.id == id)
    }

    /// Poll the store until the instance reaches `status`.
    pub async fn wait_for_status(&self, id: InstanceId, status: InstanceStatus) -> Instance {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(instance) = self.instance_row(id).await {
                if instance.status == status {
                    return instance;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "instance {} never reached {}",
                id,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
