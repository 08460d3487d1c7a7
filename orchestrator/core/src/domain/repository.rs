// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Transactional persistence contracts for the two bounded contexts. Every
//! read and write happens inside a transaction opened with an explicit
//! [`IsolationLevel`]; nothing in the application layer touches storage
//! outside one.
//!
//! | Trait | Context | Implementations |
//! |-------|---------|-----------------|
//! | `HostingStore` | Hosting (users, groups, instances) | `InMemoryHostingStore`, `PostgresHostingStore` |
//! | `AccessStore` | Access (users, groups) | `InMemoryAccessStore`, `PostgresAccessStore` |
//!
//! ## Transactions
//!
//! `begin` hands out a boxed transaction. Dropping it without calling
//! `commit` discards every change made through it.
//!
//! ## Row filters
//!
//! Methods taking a [`PartialClause`] AND it into their row selection.
//! Instance filters may reference `id`, `user_id`, `status` and `group_id`
//! (the owner's group).

use async_trait::async_trait;

use crate::domain::access::{AccessGroup, AccessUser};
use crate::domain::authorization::PartialClause;
use crate::domain::group::{Group, HostingUser};
use crate::domain::instance::{Instance, InstanceId, InstanceStatus};
use crate::domain::principal::{GroupId, UserId};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Isolation requested when opening a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Plain reads
    ReadCommitted,
    /// Writes that must observe a consistent snapshot
    Serializable,
    /// Strongest level the backend offers; used for racing upserts
    Linearizable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            // PostgreSQL has nothing stronger than SERIALIZABLE
            IsolationLevel::Serializable | IsolationLevel::Linearizable => "SERIALIZABLE",
        }
    }
}

#[async_trait]
pub trait HostingStore: Send + Sync {
    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn HostingTransaction>, RepositoryError>;
}

#[async_trait]
pub trait HostingTransaction: Send {
    async fn find_user(&mut self, id: UserId) -> Result<Option<HostingUser>, RepositoryError>;

    async fn save_user(&mut self, user: &HostingUser) -> Result<(), RepositoryError>;

    async fn find_group(&mut self, id: GroupId) -> Result<Option<Group>, RepositoryError>;

    /// Insert or update a group by id
    async fn save_group(&mut self, group: &Group) -> Result<(), RepositoryError>;

    /// Find a non-deleted instance by id, restricted by `filter`
    async fn find_instance(
        &mut self,
        id: InstanceId,
        filter: &PartialClause,
    ) -> Result<Option<Instance>, RepositoryError>;

    /// The owner's non-deleted instance, if any
    async fn find_instance_by_owner(
        &mut self,
        owner: UserId,
    ) -> Result<Option<Instance>, RepositoryError>;

    async fn list_instances(
        &mut self,
        filter: &PartialClause,
    ) -> Result<Vec<Instance>, RepositoryError>;

    async fn list_instances_by_status(
        &mut self,
        status: InstanceStatus,
    ) -> Result<Vec<Instance>, RepositoryError>;

    /// Insert or update a non-deleted instance by id. Saving a soft-deleted
    /// instance is a no-op.
    async fn save_instance(&mut self, instance: &Instance) -> Result<(), RepositoryError>;

    /// Mark the instance deleted, restricted by `filter`. Returns the number
    /// of affected rows.
    async fn soft_delete_instance(
        &mut self,
        id: InstanceId,
        filter: &PartialClause,
    ) -> Result<u64, RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn AccessTransaction>, RepositoryError>;
}

#[async_trait]
pub trait AccessTransaction: Send {
    async fn find_user(&mut self, id: UserId) -> Result<Option<AccessUser>, RepositoryError>;

    /// `find_user` restricted to the rows `filter` admits.
    async fn find_scoped_user(
        &mut self,
        id: UserId,
        filter: &PartialClause,
    ) -> Result<Option<AccessUser>, RepositoryError>;

    async fn find_user_by_name(
        &mut self,
        username: &str,
    ) -> Result<Option<AccessUser>, RepositoryError>;

    /// Users admitted by `filter`, ordered by username.
    async fn list_users(&mut self, filter: &PartialClause) -> Result<Vec<AccessUser>, RepositoryError>;

    /// Insert or update. Fails with `Conflict` when the username is taken.
    async fn save_user(&mut self, user: &AccessUser) -> Result<(), RepositoryError>;

    async fn find_group(&mut self, id: GroupId) -> Result<Option<AccessGroup>, RepositoryError>;

    async fn find_group_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<AccessGroup>, RepositoryError>;

    async fn save_group(&mut self, group: &AccessGroup) -> Result<(), RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Unique constraint or serialization conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unsupported filter: {0}")]
    InvalidFilter(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) => match db.code().as_deref() {
                // unique_violation, serialization_failure
                Some("23505") | Some("40001") => RepositoryError::Conflict(db.message().to_string()),
                _ => RepositoryError::Database(err.to_string()),
            },
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
