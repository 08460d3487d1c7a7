// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Access Application Service
//!
//! Users and groups of the access bounded context.
//!
//! ## Groups
//!
//! The hosting domain is notified first, synchronously and outside any
//! access transaction. Only when it has accepted the group does the access
//! side open its own transaction to store the group and promote the creator
//! to admin. A failed notification leaves no trace in either domain; a failed
//! local commit after a successful notification leaves an orphaned hosting
//! record, which is not compensated.
//!
//! ## Users
//!
//! Sign-up without a group needs no principal. Joining an existing group on
//! creation, reads, listing and updates all go through the `users` policy
//! module. Updates are authorized on both the stored and the requested role
//! and group, inside the transaction that writes them.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::authorization::Authorizer;
use crate::application::error::ServiceError;
use crate::domain::access::{AccessGroup, AccessUser, Credentials, GroupNotifier};
use crate::domain::authorization::{Resource, Verb};
use crate::domain::group::ProviderName;
use crate::domain::principal::{GroupId, Principal, Role, UserId};
use crate::domain::repository::{AccessStore, AccessTransaction, IsolationLevel, RepositoryError};

/// Policy resource group of groups
pub const RESOURCE_GROUPS: &str = "groups";

/// Policy resource group of access users
pub const RESOURCE_USERS: &str = "users";

/// Length of a Vultr API key
pub const PROVIDER_API_KEY_LEN: usize = 36;

#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub name: String,
    pub provider_url: String,
    pub api_key: String,
}

#[derive(Clone)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    /// Existing group to join
    pub group_id: Option<GroupId>,
}

impl std::fmt::Debug for CreateUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUserRequest")
            .field("username", &self.username)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

/// Fields left `None` keep their stored value.
#[derive(Clone, Default)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub group_id: Option<GroupId>,
}

impl std::fmt::Debug for UpdateUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateUserRequest")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("role", &self.role)
            .field("group_id", &self.group_id)
            .finish()
    }
}

#[async_trait]
pub trait AccessService: Send + Sync {
    async fn create_group(
        &self,
        principal: &Principal,
        request: CreateGroupRequest,
    ) -> Result<AccessGroup, ServiceError>;

    /// Create a client. `principal` is only consulted when the request
    /// joins an existing group.
    async fn create_user(
        &self,
        principal: Option<&Principal>,
        request: CreateUserRequest,
    ) -> Result<AccessUser, ServiceError>;

    /// Exchange credentials for the caller's principal.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal, ServiceError>;

    async fn get_user(&self, principal: &Principal, id: UserId) -> Result<AccessUser, ServiceError>;

    async fn list_users(&self, principal: &Principal) -> Result<Vec<AccessUser>, ServiceError>;

    async fn update_user(
        &self,
        principal: &Principal,
        id: UserId,
        request: UpdateUserRequest,
    ) -> Result<AccessUser, ServiceError>;

    /// Principal of a stored user, for callers that authenticated it
    /// out of band.
    async fn resolve_principal(&self, id: UserId) -> Result<Principal, ServiceError>;
}

pub struct StandardAccessService {
    store: Arc<dyn AccessStore>,
    notifier: Arc<dyn GroupNotifier>,
    authorizer: Arc<Authorizer>,
}

impl StandardAccessService {
    pub fn new(
        store: Arc<dyn AccessStore>,
        notifier: Arc<dyn GroupNotifier>,
        authorizer: Arc<Authorizer>,
    ) -> Self {
        Self {
            store,
            notifier,
            authorizer,
        }
    }

    fn validate(request: &CreateGroupRequest) -> Result<(), ServiceError> {
        if request.name.trim().is_empty() {
            return Err(ServiceError::BadRequest("group name is required".to_string()));
        }
        url::Url::parse(&request.provider_url).map_err(|e| {
            ServiceError::BadRequest(format!("invalid provider url '{}': {}", request.provider_url, e))
        })?;
        if request.api_key.len() != PROVIDER_API_KEY_LEN {
            return Err(ServiceError::BadRequest("invalid api key".to_string()));
        }
        Ok(())
    }

    fn validate_username(username: &str) -> Result<(), ServiceError> {
        if username.trim().is_empty() {
            return Err(ServiceError::BadRequest("username is required".to_string()));
        }
        Ok(())
    }

    fn validate_password(password: &str) -> Result<(), ServiceError> {
        if password.is_empty() {
            return Err(ServiceError::BadRequest("password is required".to_string()));
        }
        Ok(())
    }

    /// Fail with `AlreadyExists` if another user holds `username`.
    async fn ensure_username_free(
        tx: &mut dyn AccessTransaction,
        username: &str,
        except: Option<UserId>,
    ) -> Result<(), ServiceError> {
        match tx.find_user_by_name(username).await? {
            Some(existing) if Some(existing.id) != except => Err(ServiceError::AlreadyExists),
            _ => Ok(()),
        }
    }

    /// Policy input for an update: the stored and the requested role and group.
    fn update_resource(old: &AccessUser, new: &AccessUser) -> Resource {
        let mut value = serde_json::json!({
            "id": new.id.to_string(),
            "old_role": old.role.as_str(),
            "new_role": new.role.as_str(),
        });
        if let Some(group) = old.group_id {
            value["old_group_id"] = group.to_string().into();
        }
        if let Some(group) = new.group_id {
            value["new_group_id"] = group.to_string().into();
        }
        Resource::new(RESOURCE_USERS, value)
    }
}

fn username_conflict(err: RepositoryError) -> ServiceError {
    match err {
        RepositoryError::Conflict(_) => ServiceError::AlreadyExists,
        other => other.into(),
    }
}

#[async_trait]
impl AccessService for StandardAccessService {
    async fn create_group(
        &self,
        principal: &Principal,
        request: CreateGroupRequest,
    ) -> Result<AccessGroup, ServiceError> {
        Self::validate(&request)?;

        self.authorizer
            .authorize(principal, Verb::Create, &Resource::group(RESOURCE_GROUPS))
            .await?;

        // Cheap checks before touching the hosting domain
        {
            let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
            if tx.find_group_by_name(&request.name).await?.is_some() {
                return Err(ServiceError::AlreadyExists);
            }
            if tx.find_user(principal.id).await?.is_none() {
                return Err(ServiceError::NotFound);
            }
            tx.commit().await?;
        }

        let group = AccessGroup {
            id: GroupId::new(),
            name: request.name,
            provider_name: ProviderName::Vultr,
            provider_url: request.provider_url,
            api_key: request.api_key,
        };

        self.notifier.notify_group_created(&group).await.map_err(|e| {
            warn!(group = %group.name, error = %e, "Hosting domain refused group");
            ServiceError::Internal(e.to_string())
        })?;

        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;
        if tx.find_group_by_name(&group.name).await?.is_some() {
            return Err(ServiceError::AlreadyExists);
        }
        let mut user = tx.find_user(principal.id).await?.ok_or(ServiceError::NotFound)?;

        tx.save_group(&group).await?;
        user.promote_to_admin(group.id);
        tx.save_user(&user).await?;
        tx.commit().await?;

        info!(group_id = %group.id, name = %group.name, admin = %user.id, "Group created");
        Ok(group)
    }

    async fn create_user(
        &self,
        principal: Option<&Principal>,
        request: CreateUserRequest,
    ) -> Result<AccessUser, ServiceError> {
        Self::validate_username(&request.username)?;
        Self::validate_password(&request.password)?;

        if let Some(group_id) = request.group_id {
            let principal = principal.ok_or(ServiceError::Unauthorized)?;
            let resource = Resource::new(
                RESOURCE_USERS,
                serde_json::json!({ "group_id": group_id.to_string() }),
            );
            self.authorizer
                .authorize(principal, Verb::Create, &resource)
                .await?;
        }

        let user = AccessUser::new(request.username, &request.password, request.group_id);

        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;
        Self::ensure_username_free(tx.as_mut(), &user.username, None).await?;
        if let Some(group_id) = user.group_id {
            if tx.find_group(group_id).await?.is_none() {
                return Err(ServiceError::NotFound);
            }
        }
        tx.save_user(&user).await.map_err(username_conflict)?;
        tx.commit().await?;

        info!(
            user_id = %user.id,
            username = %user.username,
            group_id = ?user.group_id,
            "User created"
        );
        Ok(user)
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal, ServiceError> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let user = tx.find_user_by_name(&credentials.username).await?;
        tx.commit().await?;

        match user {
            Some(user) if user.verify_password(&credentials.password) => Ok(user.principal()),
            Some(_) => {
                debug!(username = %credentials.username, "Password mismatch");
                Err(ServiceError::Unauthorized)
            }
            None => {
                debug!(username = %credentials.username, "Unknown username");
                Err(ServiceError::Unauthorized)
            }
        }
    }

    async fn get_user(&self, principal: &Principal, id: UserId) -> Result<AccessUser, ServiceError> {
        let partial = self
            .authorizer
            .authorize(principal, Verb::Get, &Resource::id(RESOURCE_USERS, id.0))
            .await?;

        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let user = tx.find_scoped_user(id, &partial).await?;
        tx.commit().await?;
        user.ok_or(ServiceError::NotFound)
    }

    async fn list_users(&self, principal: &Principal) -> Result<Vec<AccessUser>, ServiceError> {
        let partial = self
            .authorizer
            .authorize(principal, Verb::List, &Resource::group(RESOURCE_USERS))
            .await?;

        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let users = tx.list_users(&partial).await?;
        tx.commit().await?;
        Ok(users)
    }

    async fn update_user(
        &self,
        principal: &Principal,
        id: UserId,
        request: UpdateUserRequest,
    ) -> Result<AccessUser, ServiceError> {
        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;
        let old = tx.find_user(id).await?.ok_or(ServiceError::NotFound)?;

        let mut user = old.clone();
        if let Some(username) = request.username {
            Self::validate_username(&username)?;
            if username != old.username && request.password.is_none() {
                return Err(ServiceError::BadRequest(
                    "changing the username requires a new password".to_string(),
                ));
            }
            user.username = username;
        }
        if let Some(password) = &request.password {
            Self::validate_password(password)?;
            user.set_password(password);
        }
        if let Some(role) = request.role {
            user.role = role;
        }
        if let Some(group_id) = request.group_id {
            user.group_id = Some(group_id);
        }

        let partial = self
            .authorizer
            .authorize(principal, Verb::Update, &Self::update_resource(&old, &user))
            .await?;
        if !partial.is_empty() && tx.find_scoped_user(id, &partial).await?.is_none() {
            return Err(ServiceError::NotFound);
        }

        if user.username != old.username {
            Self::ensure_username_free(tx.as_mut(), &user.username, Some(id)).await?;
        }
        if user.group_id != old.group_id {
            if let Some(group_id) = user.group_id {
                if tx.find_group(group_id).await?.is_none() {
                    return Err(ServiceError::NotFound);
                }
            }
        }

        tx.save_user(&user).await.map_err(username_conflict)?;
        tx.commit().await?;

        info!(
            user_id = %user.id,
            by = %principal.id,
            role = %user.role,
            group_id = ?user.group_id,
            "User updated"
        );
        Ok(user)
    }

    async fn resolve_principal(&self, id: UserId) -> Result<Principal, ServiceError> {
        let mut tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let user = tx.find_user(id).await?;
        tx.commit().await?;
        user.map(|u| u.principal()).ok_or(ServiceError::NotFound)
    }
}
