// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the transactional stores defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Stores
//!
//! - **PostgresHostingStore** - users, groups and instances of the hosting context
//! - **PostgresAccessStore** - users and groups of the access context
//!
//! ## In-Memory Stores
//!
//! Lightweight implementations for testing and development. A transaction
//! holds the store lock for its whole lifetime, so transactions are fully
//! serialized. Changes are staged on a private copy and published on commit;
//! dropping the transaction discards them.

pub mod clause;
pub mod postgres_access;
pub mod postgres_hosting;

pub use postgres_access::PostgresAccessStore;
pub use postgres_hosting::PostgresHostingStore;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::access::{AccessGroup, AccessUser};
use crate::domain::authorization::{ClauseValue, PartialClause};
use crate::domain::group::{Group, HostingUser};
use crate::domain::instance::{Instance, InstanceId, InstanceStatus};
use crate::domain::principal::{GroupId, UserId};
use crate::domain::repository::{
    AccessStore, AccessTransaction, HostingStore, HostingTransaction, IsolationLevel,
    RepositoryError,
};
use self::clause::ClauseMatcher;

// ============================================================================
// Hosting
// ============================================================================

#[derive(Debug, Clone, Default)]
struct HostingState {
    users: HashMap<UserId, HostingUser>,
    groups: HashMap<GroupId, Group>,
    instances: HashMap<InstanceId, Instance>,
}

impl HostingState {
    /// Value of a filterable instance column
    fn instance_column(&self, instance: &Instance, column: &str) -> Option<ClauseValue> {
        match column {
            "id" => Some(ClauseValue::Uuid(instance.id.0)),
            "user_id" => Some(ClauseValue::Uuid(instance.owner.0)),
            "status" => Some(ClauseValue::Text(instance.status.as_str().to_string())),
            "group_id" => self
                .users
                .get(&instance.owner)
                .map(|u| ClauseValue::Uuid(u.group_id.0)),
            _ => None,
        }
    }

    fn visible_instances<'a>(
        &'a self,
        matcher: &'a ClauseMatcher,
    ) -> impl Iterator<Item = &'a Instance> + 'a {
        self.instances
            .values()
            .filter(|i| !i.is_deleted())
            .filter(move |i| matcher.matches(|column| self.instance_column(i, column)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryHostingStore {
    state: Arc<Mutex<HostingState>>,
}

impl InMemoryHostingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every instance row, soft-deleted ones included.
    pub async fn instance_rows(&self) -> Vec<Instance> {
        self.state.lock().await.instances.values().cloned().collect()
    }
}

#[async_trait]
impl HostingStore for InMemoryHostingStore {
    async fn begin(
        &self,
        _isolation: IsolationLevel,
    ) -> Result<Box<dyn HostingTransaction>, RepositoryError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryHostingTransaction { guard, staged }))
    }
}

struct InMemoryHostingTransaction {
    guard: OwnedMutexGuard<HostingState>,
    staged: HostingState,
}

#[async_trait]
impl HostingTransaction for InMemoryHostingTransaction {
    async fn find_user(&mut self, id: UserId) -> Result<Option<HostingUser>, RepositoryError> {
        Ok(self.staged.users.get(&id).cloned())
    }

    async fn save_user(&mut self, user: &HostingUser) -> Result<(), RepositoryError> {
        self.staged.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_group(&mut self, id: GroupId) -> Result<Option<Group>, RepositoryError> {
        Ok(self.staged.groups.get(&id).cloned())
    }

    async fn save_group(&mut self, group: &Group) -> Result<(), RepositoryError> {
        self.staged.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn find_instance(
        &mut self,
        id: InstanceId,
        filter: &PartialClause,
    ) -> Result<Option<Instance>, RepositoryError> {
        let matcher = ClauseMatcher::compile(filter)?;
        let found = self
            .staged
            .visible_instances(&matcher)
            .find(|i| i.id == id)
            .cloned();
        Ok(found)
    }

    async fn find_instance_by_owner(
        &mut self,
        owner: UserId,
    ) -> Result<Option<Instance>, RepositoryError> {
        Ok(self
            .staged
            .instances
            .values()
            .find(|i| i.owner == owner && !i.is_deleted())
            .cloned())
    }

    async fn list_instances(
        &mut self,
        filter: &PartialClause,
    ) -> Result<Vec<Instance>, RepositoryError> {
        let matcher = ClauseMatcher::compile(filter)?;
        let mut instances: Vec<Instance> = self.staged.visible_instances(&matcher).cloned().collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    async fn list_instances_by_status(
        &mut self,
        status: InstanceStatus,
    ) -> Result<Vec<Instance>, RepositoryError> {
        let mut instances: Vec<Instance> = self
            .staged
            .instances
            .values()
            .filter(|i| !i.is_deleted() && i.status == status)
            .cloned()
            .collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    async fn save_instance(&mut self, instance: &Instance) -> Result<(), RepositoryError> {
        if let Some(existing) = self.staged.instances.get(&instance.id) {
            if existing.is_deleted() {
                return Ok(());
            }
        }

        let duplicate_owner = self
            .staged
            .instances
            .values()
            .any(|i| i.owner == instance.owner && i.id != instance.id && !i.is_deleted());
        if duplicate_owner {
            return Err(RepositoryError::Conflict(format!(
                "user {} already has a live instance",
                instance.owner
            )));
        }

        self.staged.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn soft_delete_instance(
        &mut self,
        id: InstanceId,
        filter: &PartialClause,
    ) -> Result<u64, RepositoryError> {
        let matcher = ClauseMatcher::compile(filter)?;
        let visible = self.staged.visible_instances(&matcher).any(|i| i.id == id);
        if !visible {
            return Ok(0);
        }
        if let Some(instance) = self.staged.instances.get_mut(&id) {
            instance.deleted_at = Some(Utc::now());
            return Ok(1);
        }
        Ok(0)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let InMemoryHostingTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}

// ============================================================================
// Access
// ============================================================================

#[derive(Debug, Clone, Default)]
struct AccessState {
    users: HashMap<UserId, AccessUser>,
    groups: HashMap<GroupId, AccessGroup>,
}

impl AccessState {
    /// Value of a filterable user column
    fn user_column(user: &AccessUser, column: &str) -> Option<ClauseValue> {
        match column {
            "id" => Some(ClauseValue::Uuid(user.id.0)),
            "group_id" => user.group_id.map(|g| ClauseValue::Uuid(g.0)),
            "role" => Some(ClauseValue::Text(user.role.as_str().to_string())),
            "username" => Some(ClauseValue::Text(user.username.clone())),
            _ => None,
        }
    }

    fn visible_users<'a>(
        &'a self,
        matcher: &'a ClauseMatcher,
    ) -> impl Iterator<Item = &'a AccessUser> + 'a {
        self.users
            .values()
            .filter(move |u| matcher.matches(|column| Self::user_column(u, column)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAccessStore {
    state: Arc<Mutex<AccessState>>,
}

impl InMemoryAccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn group_count(&self) -> usize {
        self.state.lock().await.groups.len()
    }
}

#[async_trait]
impl AccessStore for InMemoryAccessStore {
    async fn begin(
        &self,
        _isolation: IsolationLevel,
    ) -> Result<Box<dyn AccessTransaction>, RepositoryError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryAccessTransaction { guard, staged }))
    }
}

struct InMemoryAccessTransaction {
    guard: OwnedMutexGuard<AccessState>,
    staged: AccessState,
}

#[async_trait]
impl AccessTransaction for InMemoryAccessTransaction {
    async fn find_user(&mut self, id: UserId) -> Result<Option<AccessUser>, RepositoryError> {
        Ok(self.staged.users.get(&id).cloned())
    }

    async fn find_scoped_user(
        &mut self,
        id: UserId,
        filter: &PartialClause,
    ) -> Result<Option<AccessUser>, RepositoryError> {
        let matcher = ClauseMatcher::compile(filter)?;
        let found = self
            .staged
            .visible_users(&matcher)
            .find(|u| u.id == id)
            .cloned();
        Ok(found)
    }

    async fn find_user_by_name(
        &mut self,
        username: &str,
    ) -> Result<Option<AccessUser>, RepositoryError> {
        Ok(self
            .staged
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&mut self, filter: &PartialClause) -> Result<Vec<AccessUser>, RepositoryError> {
        let matcher = ClauseMatcher::compile(filter)?;
        let mut users: Vec<AccessUser> = self.staged.visible_users(&matcher).cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn save_user(&mut self, user: &AccessUser) -> Result<(), RepositoryError> {
        let taken = self
            .staged
            .users
            .values()
            .any(|u| u.username == user.username && u.id != user.id);
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "username '{}' is taken",
                user.username
            )));
        }
        self.staged.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_group(&mut self, id: GroupId) -> Result<Option<AccessGroup>, RepositoryError> {
        Ok(self.staged.groups.get(&id).cloned())
    }

    async fn find_group_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<AccessGroup>, RepositoryError> {
        Ok(self.staged.groups.values().find(|g| g.name == name).cloned())
    }

    async fn save_group(&mut self, group: &AccessGroup) -> Result<(), RepositoryError> {
        self.staged.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let InMemoryAccessTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instance::RemoteInstanceId;
    use uuid::Uuid;

    async fn seed(store: &InMemoryHostingStore, owner: UserId, group: GroupId) -> Instance {
        let instance = Instance::provisioned(owner, RemoteInstanceId("r".into()), "pk".into());
        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        tx.save_user(&HostingUser { id: owner, group_id: group }).await.unwrap();
        tx.save_instance(&instance).await.unwrap();
        tx.commit().await.unwrap();
        instance
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_discarded() {
        let store = InMemoryHostingStore::new();
        {
            let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
            tx.save_user(&HostingUser { id: UserId::new(), group_id: GroupId::new() })
                .await
                .unwrap();
            // dropped without commit
        }
        assert!(store.state.lock().await.users.is_empty());
    }

    #[tokio::test]
    async fn test_filters_by_owner_and_group() {
        let store = InMemoryHostingStore::new();
        let group = GroupId::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let a = seed(&store, alice, group).await;
        seed(&store, bob, GroupId::new()).await;

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let by_owner = PartialClause::new("user_id = ?", vec![ClauseValue::Uuid(alice.0)]).unwrap();
        let found = tx.list_instances(&by_owner).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);

        let by_group = PartialClause::new("group_id = ?", vec![ClauseValue::Uuid(group.0)]).unwrap();
        assert_eq!(tx.list_instances(&by_group).await.unwrap().len(), 1);

        let none = PartialClause::new("user_id = ?", vec![ClauseValue::Uuid(Uuid::new_v4())]).unwrap();
        assert!(tx.find_instance(a.id, &none).await.unwrap().is_none());
        assert_eq!(tx.list_instances(&PartialClause::none()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_instance_and_frees_owner() {
        let store = InMemoryHostingStore::new();
        let owner = UserId::new();
        let group = GroupId::new();
        let instance = seed(&store, owner, group).await;

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        assert_eq!(tx.soft_delete_instance(instance.id, &PartialClause::none()).await.unwrap(), 1);
        assert_eq!(tx.soft_delete_instance(instance.id, &PartialClause::none()).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let mut tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        assert!(tx.find_instance(instance.id, &PartialClause::none()).await.unwrap().is_none());
        assert!(tx.find_instance_by_owner(owner).await.unwrap().is_none());
        drop(tx);

        // Row survives, and the owner may get a new live instance
        assert_eq!(store.instance_rows().await.len(), 1);
        seed(&store, owner, group).await;
        assert_eq!(store.instance_rows().await.len(), 2);
    }

    #[tokio::test]
    async fn test_users_filtered_by_group() {
        let store = InMemoryAccessStore::new();
        let group = GroupId::new();
        let bob = AccessUser::new("bob", "pw", Some(group));
        let alice = AccessUser::new("alice", "pw", Some(group));
        let carol = AccessUser::new("carol", "pw", None);

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        for user in [&bob, &alice, &carol] {
            tx.save_user(user).await.unwrap();
        }

        let by_group = PartialClause::new("group_id = ?", vec![ClauseValue::Uuid(group.0)]).unwrap();
        let members = tx.list_users(&by_group).await.unwrap();
        let names: Vec<&str> = members.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        assert!(tx.find_scoped_user(carol.id, &by_group).await.unwrap().is_none());
        assert!(tx.find_scoped_user(carol.id, &PartialClause::none()).await.unwrap().is_some());
        assert_eq!(tx.find_user_by_name("bob").await.unwrap().unwrap().id, bob.id);

        let impostor = AccessUser::new("bob", "other", None);
        assert!(matches!(
            tx.save_user(&impostor).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_second_live_instance_per_owner_conflicts() {
        let store = InMemoryHostingStore::new();
        let owner = UserId::new();
        seed(&store, owner, GroupId::new()).await;

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        let other = Instance::provisioned(owner, RemoteInstanceId("r2".into()), "pk".into());
        assert!(matches!(
            tx.save_instance(&other).await,
            Err(RepositoryError::Conflict(_))
        ));
    }
}
