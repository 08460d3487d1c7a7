// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Access Bounded Context
//!
//! Users, roles and groups as seen by the access domain, plus the contract the
//! hosting domain implements to learn about newly created groups.
//!
//! Passwords are stored as the hex sha256 of the username followed by the
//! password, so renaming a user requires setting the password again.
//!
//! The two domains do not share a transaction. [`GroupNotifier`] is invoked
//! synchronously before the access-side commit; if the commit then fails the
//! hosting side keeps an orphaned group record. That window is accepted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::group::ProviderName;
use crate::domain::principal::{GroupId, Principal, Role, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessUser {
    pub id: UserId,
    pub username: String,
    pub group_id: Option<GroupId>,
    pub role: Role,
    /// Hex sha256 of username followed by password
    #[serde(skip_serializing, default)]
    pub password_hash: String,
}

impl AccessUser {
    /// A new user always starts as a client.
    pub fn new(username: impl Into<String>, password: &str, group_id: Option<GroupId>) -> Self {
        let username = username.into();
        Self {
            id: UserId::new(),
            password_hash: hash_password(&username, password),
            username,
            group_id,
            role: Role::Client,
        }
    }

    pub fn set_password(&mut self, password: &str) {
        self.password_hash = hash_password(&self.username, password);
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let candidate = hash_password(&self.username, password);
        candidate
            .as_bytes()
            .ct_eq(self.password_hash.as_bytes())
            .into()
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.id, self.group_id, self.role)
    }

    /// Make the user the administrator of `group_id`.
    pub fn promote_to_admin(&mut self, group_id: GroupId) {
        self.group_id = Some(group_id);
        self.role = Role::Admin;
    }
}

pub fn hash_password(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Username and password presented by a caller
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGroup {
    pub id: GroupId,
    pub name: String,
    pub provider_name: ProviderName,
    pub provider_url: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Hosting domain rejected group: {0}")]
    Rejected(String),

    #[error("Hosting domain unavailable: {0}")]
    Unavailable(String),
}

/// Cross-domain notification of group creation
#[async_trait]
pub trait GroupNotifier: Send + Sync {
    async fn notify_group_created(&self, group: &AccessGroup) -> Result<(), NotifyError>;
}
