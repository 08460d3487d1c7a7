// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Access Store
//!
//! Users and groups of the access context.

const USER_COLUMNS: &str = "id, username, group_id, role, password_hash";

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};

use super::clause::push_filter;
use crate::domain::access::{AccessGroup, AccessUser};
use crate::domain::authorization::PartialClause;
use crate::domain::group::ProviderName;
use crate::domain::principal::{GroupId, Role, UserId};
use crate::domain::repository::{AccessStore, AccessTransaction, IsolationLevel, RepositoryError};

pub struct PostgresAccessStore {
    pool: PgPool,
}

impl PostgresAccessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessStore for PostgresAccessStore {
    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn AccessTransaction>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql()))
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PostgresAccessTransaction { tx }))
    }
}

pub struct PostgresAccessTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AccessTransaction for PostgresAccessTransaction {
    async fn find_user(&mut self, id: UserId) -> Result<Option<AccessUser>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(parse_user_row).transpose()
    }

    async fn find_scoped_user(
        &mut self,
        id: UserId,
        filter: &PartialClause,
    ) -> Result<Option<AccessUser>, RepositoryError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM users WHERE id = ",
            USER_COLUMNS
        ));
        builder.push_bind(id.0);
        push_filter(&mut builder, filter)?;

        let row = builder.build().fetch_optional(&mut *self.tx).await?;
        row.map(parse_user_row).transpose()
    }

    async fn find_user_by_name(
        &mut self,
        username: &str,
    ) -> Result<Option<AccessUser>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS))
            .bind(username)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(parse_user_row).transpose()
    }

    async fn list_users(&mut self, filter: &PartialClause) -> Result<Vec<AccessUser>, RepositoryError> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM users WHERE true",
            USER_COLUMNS
        ));
        push_filter(&mut builder, filter)?;
        builder.push(" ORDER BY username");

        let rows = builder.build().fetch_all(&mut *self.tx).await?;
        rows.into_iter().map(parse_user_row).collect()
    }

    async fn save_user(&mut self, user: &AccessUser) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, group_id, role, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                group_id = EXCLUDED.group_id,
                role = EXCLUDED.role,
                password_hash = EXCLUDED.password_hash
            "#,
        )
        .bind(user.id.0)
        .bind(&user.username)
        .bind(user.group_id.map(|g| g.0))
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_group(&mut self, id: GroupId) -> Result<Option<AccessGroup>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, provider_name, provider_url, api_key FROM groups WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(parse_group_row).transpose()
    }

    async fn find_group_by_name(
        &mut self,
        name: &str,
    ) -> Result<Option<AccessGroup>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, provider_name, provider_url, api_key FROM groups WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(parse_group_row).transpose()
    }

    async fn save_group(&mut self, group: &AccessGroup) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO groups (id, name, provider_name, provider_url, api_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                provider_name = EXCLUDED.provider_name,
                provider_url = EXCLUDED.provider_url,
                api_key = EXCLUDED.api_key
            "#,
        )
        .bind(group.id.0)
        .bind(&group.name)
        .bind(group.provider_name.as_str())
        .bind(&group.provider_url)
        .bind(&group.api_key)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn parse_user_row(row: PgRow) -> Result<AccessUser, RepositoryError> {
    let role: String = row.get("role");
    let role: Role = role
        .parse()
        .map_err(|e| RepositoryError::Serialization(format!("Invalid role: {}", e)))?;
    let group_id: Option<uuid::Uuid> = row.get("group_id");

    Ok(AccessUser {
        id: UserId(row.get("id")),
        username: row.get("username"),
        group_id: group_id.map(GroupId),
        role,
        password_hash: row.get("password_hash"),
    })
}

fn parse_group_row(row: PgRow) -> Result<AccessGroup, RepositoryError> {
    let provider_name: String = row.get("provider_name");
    let provider_name: ProviderName = provider_name
        .parse()
        .map_err(|e| RepositoryError::Serialization(format!("Invalid provider name: {}", e)))?;

    Ok(AccessGroup {
        id: GroupId(row.get("id")),
        name: row.get("name"),
        provider_name,
        provider_url: row.get("provider_url"),
        api_key: row.get("api_key"),
    })
}
