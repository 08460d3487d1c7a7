// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Hosting Store
//!
//! Users, groups and instances of the hosting context.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `HostingStore` on PostgreSQL
//!
//! Instance reads go through a scoped projection that joins the owner's
//! group and hides soft-deleted rows, so authorization filters can reference
//! `id`, `user_id`, `status` and `group_id` directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::collections::HashMap;
use std::net::IpAddr;

use super::clause::push_filter;
use crate::domain::authorization::PartialClause;
use crate::domain::group::{
    Group, HostingUser, Provider, ProviderName, SshKeyPair, StartupScript,
};
use crate::domain::instance::{Instance, InstanceId, InstanceStatus, RemoteInstanceId};
use crate::domain::principal::{GroupId, UserId};
use crate::domain::protocol::{ProtocolTemplate, TemplateId};
use crate::domain::repository::{
    HostingStore, HostingTransaction, IsolationLevel, RepositoryError,
};

const SCOPED_INSTANCES: &str = r#"
    SELECT i.id, i.remote_id, i.user_id, i.ip, i.status, i.connection_string,
           i.private_key, i.created_at, i.deleted_at, u.group_id
    FROM instances i
    JOIN users u ON u.id = i.user_id
    WHERE i.deleted_at IS NULL
"#;

pub struct PostgresHostingStore {
    pool: PgPool,
}

impl PostgresHostingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HostingStore for PostgresHostingStore {
    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn HostingTransaction>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql()))
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PostgresHostingTransaction { tx }))
    }
}

pub struct PostgresHostingTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresHostingTransaction {
    fn scoped_query(filter: &PartialClause) -> Result<QueryBuilder<'static, Postgres>, RepositoryError> {
        let mut builder = QueryBuilder::new("SELECT * FROM (");
        builder.push(SCOPED_INSTANCES);
        builder.push(") AS scoped WHERE true");
        push_filter(&mut builder, filter)?;
        Ok(builder)
    }
}

#[async_trait]
impl HostingTransaction for PostgresHostingTransaction {
    async fn find_user(&mut self, id: UserId) -> Result<Option<HostingUser>, RepositoryError> {
        let row = sqlx::query("SELECT id, group_id FROM users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(|row| HostingUser {
            id: UserId(row.get("id")),
            group_id: GroupId(row.get("group_id")),
        }))
    }

    async fn save_user(&mut self, user: &HostingUser) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, group_id)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET group_id = EXCLUDED.group_id
            "#,
        )
        .bind(user.id.0)
        .bind(user.group_id.0)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_group(&mut self, id: GroupId) -> Result<Option<Group>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, provider_name, provider_url, api_key,
                   ssh_key_id, ssh_key_remote_id, ssh_key_name, ssh_public_key, ssh_private_key,
                   script_id, script_remote_id, script_name, script_content,
                   templates, default_template_id
            FROM groups
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(parse_group_row).transpose()
    }

    async fn save_group(&mut self, group: &Group) -> Result<(), RepositoryError> {
        let templates: Vec<&ProtocolTemplate> = group.templates.values().collect();
        let templates_json = serde_json::to_value(&templates)?;

        sqlx::query(
            r#"
            INSERT INTO groups (
                id, name, provider_name, provider_url, api_key,
                ssh_key_id, ssh_key_remote_id, ssh_key_name, ssh_public_key, ssh_private_key,
                script_id, script_remote_id, script_name, script_content,
                templates, default_template_id, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                provider_name = EXCLUDED.provider_name,
                provider_url = EXCLUDED.provider_url,
                api_key = EXCLUDED.api_key,
                ssh_key_id = EXCLUDED.ssh_key_id,
                ssh_key_remote_id = EXCLUDED.ssh_key_remote_id,
                ssh_key_name = EXCLUDED.ssh_key_name,
                ssh_public_key = EXCLUDED.ssh_public_key,
                ssh_private_key = EXCLUDED.ssh_private_key,
                script_id = EXCLUDED.script_id,
                script_remote_id = EXCLUDED.script_remote_id,
                script_name = EXCLUDED.script_name,
                script_content = EXCLUDED.script_content,
                templates = EXCLUDED.templates,
                default_template_id = EXCLUDED.default_template_id,
                updated_at = NOW()
            "#,
        )
        .bind(group.id.0)
        .bind(&group.name)
        .bind(group.provider.name.as_str())
        .bind(&group.provider.base_url)
        .bind(&group.provider.api_key)
        .bind(group.ssh_key.id)
        .bind(&group.ssh_key.remote_id)
        .bind(&group.ssh_key.name)
        .bind(&group.ssh_key.public_key)
        .bind(&group.ssh_key.private_key)
        .bind(group.startup_script.id)
        .bind(&group.startup_script.remote_id)
        .bind(&group.startup_script.name)
        .bind(&group.startup_script.content)
        .bind(templates_json)
        .bind(group.default_template_id.map(|t| t.0))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_instance(
        &mut self,
        id: InstanceId,
        filter: &PartialClause,
    ) -> Result<Option<Instance>, RepositoryError> {
        let mut builder = Self::scoped_query(filter)?;
        builder.push(" AND id = ");
        builder.push_bind(id.0);

        let row = builder.build().fetch_optional(&mut *self.tx).await?;
        row.map(parse_instance_row).transpose()
    }

    async fn find_instance_by_owner(
        &mut self,
        owner: UserId,
    ) -> Result<Option<Instance>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, remote_id, user_id, ip, status, connection_string,
                   private_key, created_at, deleted_at
            FROM instances
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(owner.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(parse_instance_row).transpose()
    }

    async fn list_instances(
        &mut self,
        filter: &PartialClause,
    ) -> Result<Vec<Instance>, RepositoryError> {
        let mut builder = Self::scoped_query(filter)?;
        builder.push(" ORDER BY created_at");

        let rows = builder.build().fetch_all(&mut *self.tx).await?;
        rows.into_iter().map(parse_instance_row).collect()
    }

    async fn list_instances_by_status(
        &mut self,
        status: InstanceStatus,
    ) -> Result<Vec<Instance>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, remote_id, user_id, ip, status, connection_string,
                   private_key, created_at, deleted_at
            FROM instances
            WHERE status = $1 AND deleted_at IS NULL
            ORDER BY created_at
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(parse_instance_row).collect()
    }

    async fn save_instance(&mut self, instance: &Instance) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO instances (
                id, remote_id, user_id, ip, status, connection_string,
                private_key, created_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                remote_id = EXCLUDED.remote_id,
                ip = EXCLUDED.ip,
                status = EXCLUDED.status,
                connection_string = EXCLUDED.connection_string,
                private_key = EXCLUDED.private_key
            WHERE instances.deleted_at IS NULL
            "#,
        )
        .bind(instance.id.0)
        .bind(instance.remote_id.as_str())
        .bind(instance.owner.0)
        .bind(instance.ip.map(|ip| ip.to_string()))
        .bind(instance.status.as_str())
        .bind(&instance.connection_string)
        .bind(&instance.private_key)
        .bind(instance.created_at)
        .bind(instance.deleted_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn soft_delete_instance(
        &mut self,
        id: InstanceId,
        filter: &PartialClause,
    ) -> Result<u64, RepositoryError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "UPDATE instances SET deleted_at = NOW() WHERE id IN (SELECT id FROM (",
        );
        builder.push(SCOPED_INSTANCES);
        builder.push(") AS scoped WHERE id = ");
        builder.push_bind(id.0);
        push_filter(&mut builder, filter)?;
        builder.push(")");

        let result = builder.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
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

/// Parse an instance from a database row
fn parse_instance_row(row: PgRow) -> Result<Instance, RepositoryError> {
    let id: uuid::Uuid = row.get("id");
    let remote_id: String = row.get("remote_id");
    let user_id: uuid::Uuid = row.get("user_id");
    let ip: Option<String> = row.get("ip");
    let status: String = row.get("status");
    let connection_string: Option<String> = row.get("connection_string");
    let private_key: String = row.get("private_key");
    let created_at: DateTime<Utc> = row.get("created_at");
    let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");

    let ip = ip
        .map(|s| s.parse::<IpAddr>())
        .transpose()
        .map_err(|e| RepositoryError::Serialization(format!("Invalid instance ip: {}", e)))?;
    let status: InstanceStatus = status
        .parse()
        .map_err(|e| RepositoryError::Serialization(format!("Invalid instance status: {}", e)))?;

    Ok(Instance {
        id: InstanceId(id),
        remote_id: RemoteInstanceId(remote_id),
        owner: UserId(user_id),
        ip,
        status,
        connection_string,
        private_key,
        created_at,
        deleted_at,
    })
}

/// Parse a group from a database row
fn parse_group_row(row: PgRow) -> Result<Group, RepositoryError> {
    let provider_name: String = row.get("provider_name");
    let templates_val: serde_json::Value = row.get("templates");
    let default_template_id: Option<uuid::Uuid> = row.get("default_template_id");

    let provider_name: ProviderName = provider_name
        .parse()
        .map_err(|e| RepositoryError::Serialization(format!("Invalid provider name: {}", e)))?;
    let templates: Vec<ProtocolTemplate> = serde_json::from_value(templates_val).map_err(|e| {
        RepositoryError::Serialization(format!("Failed to deserialize templates: {}", e))
    })?;
    let templates: HashMap<TemplateId, ProtocolTemplate> =
        templates.into_iter().map(|t| (t.id, t)).collect();

    Ok(Group {
        id: GroupId(row.get("id")),
        name: row.get("name"),
        provider: Provider {
            name: provider_name,
            base_url: row.get("provider_url"),
            api_key: row.get("api_key"),
        },
        ssh_key: SshKeyPair {
            id: row.get("ssh_key_id"),
            remote_id: row.get("ssh_key_remote_id"),
            name: row.get("ssh_key_name"),
            public_key: row.get("ssh_public_key"),
            private_key: row.get("ssh_private_key"),
        },
        startup_script: StartupScript {
            id: row.get("script_id"),
            remote_id: row.get("script_remote_id"),
            name: row.get("script_name"),
            content: row.get("script_content"),
        },
        templates,
        default_template_id: default_template_id.map(TemplateId),
    })
}
