// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Instance Lifecycle Service
//!
//! Authorization-gated Get / List / Create / Delete of provisioned instances.
//!
//! ## Create
//!
//! Find-or-create under a serializable transaction: an owner with a live
//! instance gets it back unchanged and no provisioning happens. Otherwise the
//! remote instance is created with the group's credentials and recorded as
//! `initializing`. If anything fails after the remote create, the remote
//! instance is deleted again before the error is returned. Setup is launched
//! only for newly created instances, after the commit.
//!
//! ## Delete
//!
//! Soft-delete under the caller's row filter, then remote delete. A remote
//! instance that is already gone is tolerated; any other provider error
//! rolls the soft-delete back.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::authorization::Authorizer;
use crate::application::credential_cache::CredentialCache;
use crate::application::error::ServiceError;
use crate::application::instance_setup::{InstanceSetupWorkflow, SetupJob};
use crate::domain::authorization::{PartialClause, Resource, Verb};
use crate::domain::group::{Group, HostingUser};
use crate::domain::instance::{Instance, InstanceId, InstanceStatus, RemoteInstance, RemoteInstanceId};
use crate::domain::principal::{GroupId, Principal, UserId};
use crate::domain::provider::{CreateInstanceParams, ProviderError, VpsProvider};
use crate::domain::repository::{HostingStore, HostingTransaction, IsolationLevel};

/// Policy resource group of instances
pub const RESOURCE_INSTANCES: &str = "instances";

#[async_trait]
pub trait InstanceService: Send + Sync {
    async fn get_instance(&self, principal: &Principal, id: InstanceId) -> Result<Instance, ServiceError>;

    async fn list_instances(&self, principal: &Principal) -> Result<Vec<Instance>, ServiceError>;

    /// Return the caller's live instance, provisioning one if there is none.
    async fn create_instance(&self, principal: &Principal) -> Result<Instance, ServiceError>;

    async fn delete_instance(&self, principal: &Principal, id: InstanceId) -> Result<(), ServiceError>;

    /// Relaunch setup for every live instance still `initializing`.
    /// Returns how many setups were launched.
    async fn resume_pending_setups(&self) -> Result<usize, ServiceError>;
}

pub struct StandardInstanceService {
    store: Arc<dyn HostingStore>,
    provider: Arc<dyn VpsProvider>,
    credentials: Arc<CredentialCache>,
    authorizer: Arc<Authorizer>,
    setup: Arc<InstanceSetupWorkflow>,
    default_fake_domain: String,
}

impl StandardInstanceService {
    pub fn new(
        store: Arc<dyn HostingStore>,
        provider: Arc<dyn VpsProvider>,
        credentials: Arc<CredentialCache>,
        authorizer: Arc<Authorizer>,
        setup: Arc<InstanceSetupWorkflow>,
        default_fake_domain: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            credentials,
            authorizer,
            setup,
            default_fake_domain: default_fake_domain.into(),
        }
    }

    fn setup_job(&self, instance: Instance, group: &Group) -> SetupJob {
        SetupJob {
            instance,
            api_key: group.provider.api_key.clone(),
            fake_domain: group
                .fake_domain()
                .unwrap_or(&self.default_fake_domain)
                .to_string(),
        }
    }

    /// Create the hosting-side user row on first use.
    async fn ensure_user(
        tx: &mut dyn HostingTransaction,
        id: UserId,
        group_id: GroupId,
    ) -> Result<(), ServiceError> {
        if tx.find_user(id).await?.is_none() {
            debug!(user_id = %id, group_id = %group_id, "Creating hosting user reference");
            tx.save_user(&HostingUser { id, group_id }).await?;
        }
        Ok(())
    }

    /// Everything after a successful remote create. Errors here trigger
    /// compensation by the caller.
    async fn record_instance(
        &self,
        mut tx: Box<dyn HostingTransaction>,
        owner: UserId,
        remote: &RemoteInstance,
        group: &Group,
    ) -> Result<Instance, ServiceError> {
        let instance = Instance::provisioned(
            owner,
            remote.id.clone(),
            group.ssh_key.private_key.clone(),
        );

        info!(
            instance_id = %instance.id,
            owner = %owner,
            remote_id = %remote.id,
            "Recording instance"
        );
        tx.save_instance(&instance).await?;
        tx.save_group(group).await?;
        tx.commit().await?;
        Ok(instance)
    }

    /// Delete a remote instance whose local record could not be written.
    async fn compensate(&self, api_key: &str, remote_id: &RemoteInstanceId, cause: ServiceError) -> ServiceError {
        warn!(remote_id = %remote_id, error = %cause, "Deleting orphaned remote instance");
        match self.provider.delete_instance(api_key, remote_id).await {
            Ok(()) | Err(ProviderError::NotFound) => cause,
            Err(e) => {
                error!(
                    remote_id = %remote_id,
                    error = %e,
                    "Failed to delete orphaned remote instance"
                );
                ServiceError::Internal(format!(
                    "{}; additionally failed to delete remote instance {}: {}",
                    cause, remote_id, e
                ))
            }
        }
    }
}

#[async_trait]
impl InstanceService for StandardInstanceService {
    async fn get_instance(&self, principal: &Principal, id: InstanceId) -> Result<Instance, ServiceError> {
        let partial = self
            .authorizer
            .authorize(principal, Verb::Get, &Resource::id(RESOURCE_INSTANCES, id.0))
            .await?;

        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let instance = tx.find_instance(id, &partial).await?;
        tx.commit().await?;

        instance.ok_or(ServiceError::NotFound)
    }

    async fn list_instances(&self, principal: &Principal) -> Result<Vec<Instance>, ServiceError> {
        let partial = self
            .authorizer
            .authorize(principal, Verb::List, &Resource::group(RESOURCE_INSTANCES))
            .await?;

        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let instances = tx.list_instances(&partial).await?;
        tx.commit().await?;
        Ok(instances)
    }

    async fn create_instance(&self, principal: &Principal) -> Result<Instance, ServiceError> {
        let owner = principal.id;
        self.authorizer
            .authorize(principal, Verb::Create, &Resource::owned_by(RESOURCE_INSTANCES, owner))
            .await?;

        let group_id = principal
            .group_id
            .ok_or_else(|| ServiceError::BadRequest("caller does not belong to a group".to_string()))?;

        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;
        Self::ensure_user(tx.as_mut(), owner, group_id).await?;

        if let Some(existing) = tx.find_instance_by_owner(owner).await? {
            debug!(instance_id = %existing.id, owner = %owner, "Owner already has an instance");
            tx.commit().await?;
            return Ok(existing);
        }

        let mut group = tx.find_group(group_id).await?.ok_or(ServiceError::NotFound)?;
        let api_key = group.provider.api_key.clone();

        let ssh_key_id = self
            .credentials
            .resolve_ssh_key(&api_key, &group.ssh_key)
            .await?;
        let startup_script_id = self
            .credentials
            .resolve_startup_script(&api_key, &group.startup_script)
            .await?;
        group.ssh_key.remote_id = Some(ssh_key_id.clone());
        group.startup_script.remote_id = Some(startup_script_id.clone());

        let params = CreateInstanceParams {
            label: owner.short_label(),
            ssh_key_id,
            startup_script_id,
        };

        info!(owner = %owner, label = %params.label, "Creating remote instance");
        let remote = match self.provider.create_instance(&api_key, &params).await {
            Ok(remote) => remote,
            Err(e) => {
                // Cached ids may point at a key or script removed at the provider
                self.credentials.invalidate(&api_key);
                return Err(e.into());
            }
        };

        let instance = match self.record_instance(tx, owner, &remote, &group).await {
            Ok(instance) => instance,
            Err(e) => return Err(self.compensate(&api_key, &remote.id, e).await),
        };

        self.setup.spawn(self.setup_job(instance.clone(), &group));
        Ok(instance)
    }

    async fn delete_instance(&self, principal: &Principal, id: InstanceId) -> Result<(), ServiceError> {
        let partial = self
            .authorizer
            .authorize(principal, Verb::Delete, &Resource::id(RESOURCE_INSTANCES, id.0))
            .await?;

        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;

        // Existence is confirmed before the caller's scope is applied
        let instance = tx
            .find_instance(id, &PartialClause::none())
            .await?
            .ok_or(ServiceError::NotFound)?;

        match tx.soft_delete_instance(id, &partial).await? {
            0 => return Err(ServiceError::NotFound),
            1 => {}
            n => {
                error!(instance_id = %id, affected = n, "Soft delete matched more than one row");
                return Err(ServiceError::Internal(format!(
                    "soft delete of instance {} affected {} rows",
                    id, n
                )));
            }
        }

        let group_id = match tx.find_user(instance.owner).await? {
            Some(owner) => owner.group_id,
            None => principal.group_id.ok_or_else(|| {
                ServiceError::Internal(format!("owner of instance {} has no group", id))
            })?,
        };
        let group = tx.find_group(group_id).await?.ok_or_else(|| {
            ServiceError::Internal(format!("group {} of instance {} not found", group_id, id))
        })?;

        match self
            .provider
            .delete_instance(&group.provider.api_key, &instance.remote_id)
            .await
        {
            Ok(()) => {}
            Err(ProviderError::NotFound) => {
                warn!(
                    instance_id = %id,
                    remote_id = %instance.remote_id,
                    "Remote instance not found, treating as already deleted"
                );
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    error!(instance_id = %id, error = %rollback, "Failed to roll back soft delete");
                }
                return Err(e.into());
            }
        }

        tx.commit().await?;
        info!(instance_id = %id, remote_id = %instance.remote_id, "Instance deleted");
        Ok(())
    }

    async fn resume_pending_setups(&self) -> Result<usize, ServiceError> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let pending = tx.list_instances_by_status(InstanceStatus::Initializing).await?;

        let mut jobs = Vec::with_capacity(pending.len());
        for instance in pending {
            let Some(owner) = tx.find_user(instance.owner).await? else {
                warn!(instance_id = %instance.id, owner = %instance.owner, "Pending instance has no owner row, skipping");
                continue;
            };
            let Some(group) = tx.find_group(owner.group_id).await? else {
                warn!(instance_id = %instance.id, group_id = %owner.group_id, "Pending instance has no group, skipping");
                continue;
            };
            jobs.push(self.setup_job(instance, &group));
        }
        tx.commit().await?;

        let launched = jobs.len();
        for job in jobs {
            info!(instance_id = %job.instance.id, "Resuming instance setup");
            self.setup.spawn(job);
        }
        Ok(launched)
    }
}
