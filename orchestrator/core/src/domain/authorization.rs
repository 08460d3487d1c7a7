// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Authorization Contract
//!
//! Types exchanged with the policy decision point. The orchestrator never
//! interprets rules itself: it asks a [`DecisionPoint`] whether a
//! `(principal, verb, resource)` triple is allowed and receives an optional
//! row filter ([`PartialClause`]) that storage ANDs into its queries.
//!
//! ## Partial clauses
//!
//! A clause is a condition template with `?` positional placeholders plus the
//! argument list that binds them, e.g. `user_id = ?` with `[<uuid>]`.
//! Storage adapters bind every argument as a query parameter; clause text is
//! never concatenated with values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::principal::{Principal, UserId};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("No policy module for resource group '{0}'")]
    UnknownResourceGroup(String),

    #[error("Malformed partial clause: {0}")]
    MalformedClause(String),

    #[error("Policy evaluation failed: {0}")]
    Evaluation(String),
}

/// Action performed on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The target of an authorization request: a resource group (policy module)
/// and an optional value describing the concrete resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub group: String,
    pub value: serde_json::Value,
}

impl Resource {
    pub fn new(group: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            group: group.into(),
            value,
        }
    }

    /// The whole resource group, no specific resource (e.g. `list`).
    pub fn group(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            value: serde_json::Value::Null,
        }
    }

    /// A single resource identified by id.
    pub fn id(group: impl Into<String>, id: Uuid) -> Self {
        Self {
            group: group.into(),
            value: serde_json::json!({ "id": id.to_string() }),
        }
    }

    /// A resource about to be created on behalf of `owner`.
    pub fn owned_by(group: impl Into<String>, owner: UserId) -> Self {
        Self {
            group: group.into(),
            value: serde_json::json!({ "user_id": owner.to_string() }),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.field("user_id")
    }

    /// String attribute of the resource value, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.value.get(name).and_then(|v| v.as_str())
    }
}

/// Positional argument of a partial clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClauseValue {
    Uuid(Uuid),
    Int(i64),
    Text(String),
}

impl std::fmt::Display for ClauseValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClauseValue::Uuid(u) => write!(f, "{}", u),
            ClauseValue::Int(i) => write!(f, "{}", i),
            ClauseValue::Text(s) => f.write_str(s),
        }
    }
}

/// Opaque, parameterized row filter returned by an authorization decision.
///
/// An empty clause means "no additional filtering".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialClause {
    pub condition: String,
    pub args: Vec<ClauseValue>,
}

impl PartialClause {
    /// Clause that applies no filtering.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a clause, checking that the placeholder count matches the arguments.
    pub fn new(condition: impl Into<String>, args: Vec<ClauseValue>) -> Result<Self, PolicyError> {
        let condition = condition.into();
        let placeholders = condition.matches('?').count();
        if placeholders != args.len() {
            return Err(PolicyError::MalformedClause(format!(
                "'{}' has {} placeholders but {} arguments",
                condition,
                placeholders,
                args.len()
            )));
        }
        Ok(Self { condition, args })
    }

    pub fn is_empty(&self) -> bool {
        self.condition.trim().is_empty()
    }
}

/// Outcome of a policy evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    /// Only meaningful when `allow` is true.
    pub partial: PartialClause,
}

impl Decision {
    pub fn deny() -> Self {
        Self {
            allow: false,
            partial: PartialClause::none(),
        }
    }

    /// Allowed with no row scoping (unrestricted caller).
    pub fn allow_all() -> Self {
        Self {
            allow: true,
            partial: PartialClause::none(),
        }
    }

    pub fn allow_filtered(partial: PartialClause) -> Self {
        Self {
            allow: true,
            partial,
        }
    }
}

/// Policy decision point. Rule authoring and evaluation are its own concern.
#[async_trait]
pub trait DecisionPoint: Send + Sync {
    async fn decide(
        &self,
        principal: &Principal,
        verb: Verb,
        resource: &Resource,
    ) -> Result<Decision, PolicyError>;
}
