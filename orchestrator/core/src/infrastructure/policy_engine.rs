// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rule Policy Engine
//!
//! Decision point backed by ordered rule lists, one list per resource group.
//! The first rule matching `(verb, role, requirements)` decides; if none
//! matches the request is denied. A rule may attach a partial-clause template
//! whose arguments are resolved from the principal.
//!
//! Requirements compare string attributes of the resource value either with
//! a principal attribute or with another attribute of the same value. An
//! attribute missing on both sides of `equals_field` counts as equal.
//!
//! # Rule file
//!
//! ```yaml
//! instances:
//!   - verbs: [create]
//!     roles: [client, admin]
//!     require_owner: true
//!   - verbs: [get, list, delete]
//!     roles: [client]
//!     clause: "user_id = ?"
//!     args: [principal.id]
//! users:
//!   - verbs: [update]
//!     roles: [client]
//!     require:
//!       - { field: id, equals_principal: principal.id }
//!       - { field: new_role, equals_field: old_role }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::authorization::{
    ClauseValue, Decision, DecisionPoint, PartialClause, PolicyError, Resource, Verb,
};
use crate::domain::principal::{Principal, Role};

/// Principal attribute bound to a clause placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClauseArg {
    #[serde(rename = "principal.id")]
    PrincipalId,
    #[serde(rename = "principal.group_id")]
    PrincipalGroupId,
}

impl ClauseArg {
    fn resolve(self, principal: &Principal) -> Option<String> {
        match self {
            ClauseArg::PrincipalId => Some(principal.id.to_string()),
            ClauseArg::PrincipalGroupId => principal.group_id.map(|g| g.to_string()),
        }
    }
}

/// Condition on one attribute of the resource value. Without a comparison
/// the attribute only has to be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRequirement {
    pub field: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals_principal: Option<ClauseArg>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals_field: Option<String>,
}

impl FieldRequirement {
    pub fn equals_principal(field: &str, arg: ClauseArg) -> Self {
        Self {
            field: field.to_string(),
            equals_principal: Some(arg),
            equals_field: None,
        }
    }

    pub fn equals_field(field: &str, other: &str) -> Self {
        Self {
            field: field.to_string(),
            equals_principal: None,
            equals_field: Some(other.to_string()),
        }
    }

    fn holds(&self, principal: &Principal, resource: &Resource) -> bool {
        let value = resource.field(&self.field);

        if let Some(arg) = self.equals_principal {
            match arg.resolve(principal) {
                Some(expected) if value == Some(expected.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(other) = &self.equals_field {
            if value != resource.field(other) {
                return false;
            }
        }
        if self.equals_principal.is_none() && self.equals_field.is_none() {
            return value.is_some();
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub verbs: Vec<Verb>,
    pub roles: Vec<Role>,

    /// Resource `user_id` must be the principal's id
    #[serde(default)]
    pub require_owner: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<FieldRequirement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clause: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ClauseArg>,
}

impl PolicyRule {
    pub fn new(verbs: &[Verb], roles: &[Role]) -> Self {
        Self {
            verbs: verbs.to_vec(),
            roles: roles.to_vec(),
            require_owner: false,
            require: Vec::new(),
            clause: None,
            args: Vec::new(),
        }
    }

    /// Scope the allowed rows with a single-placeholder clause.
    pub fn with_clause(mut self, condition: &str, arg: ClauseArg) -> Self {
        self.clause = Some(condition.to_string());
        self.args = vec![arg];
        self
    }

    pub fn requiring(mut self, requirements: Vec<FieldRequirement>) -> Self {
        self.require = requirements;
        self
    }

    fn matches(&self, principal: &Principal, verb: Verb, resource: &Resource) -> bool {
        if !self.verbs.contains(&verb) || !self.roles.contains(&principal.role) {
            return false;
        }
        if self.require_owner {
            let owner = principal.id.to_string();
            if resource.user_id() != Some(owner.as_str()) {
                return false;
            }
        }
        self.require.iter().all(|r| r.holds(principal, resource))
    }

    fn partial(&self, principal: &Principal) -> Result<PartialClause, PolicyError> {
        let Some(condition) = &self.clause else {
            return Ok(PartialClause::none());
        };

        let args = self
            .args
            .iter()
            .map(|arg| match arg {
                ClauseArg::PrincipalId => Ok(ClauseValue::Uuid(principal.id.0)),
                ClauseArg::PrincipalGroupId => principal
                    .group_id
                    .map(|g| ClauseValue::Uuid(g.0))
                    .ok_or_else(|| {
                        PolicyError::Evaluation(format!("principal {} has no group", principal.id))
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        PartialClause::new(condition.clone(), args)
    }
}

pub struct RulePolicyEngine {
    rules: BTreeMap<String, Vec<PolicyRule>>,
}

impl RulePolicyEngine {
    pub fn new(rules: BTreeMap<String, Vec<PolicyRule>>) -> Self {
        Self { rules }
    }

    /// Built-in rules for the `instances`, `groups` and `users` resource groups.
    pub fn with_default_rules() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            "instances".to_string(),
            vec![
                PolicyRule {
                    require_owner: true,
                    ..PolicyRule::new(&[Verb::Create], &[Role::Client, Role::Admin])
                },
                PolicyRule::new(&[Verb::Get, Verb::List, Verb::Delete], &[Role::Admin])
                    .with_clause("group_id = ?", ClauseArg::PrincipalGroupId),
                PolicyRule::new(&[Verb::Get, Verb::List, Verb::Delete], &[Role::Client])
                    .with_clause("user_id = ?", ClauseArg::PrincipalId),
            ],
        );
        rules.insert(
            "groups".to_string(),
            vec![PolicyRule::new(&[Verb::Create], &[Role::Client, Role::Admin])],
        );
        rules.insert(
            "users".to_string(),
            vec![
                // Admins add members to their own group
                PolicyRule::new(&[Verb::Create], &[Role::Admin]).requiring(vec![
                    FieldRequirement::equals_principal("group_id", ClauseArg::PrincipalGroupId),
                ]),
                PolicyRule::new(&[Verb::Get, Verb::List], &[Role::Admin])
                    .with_clause("group_id = ?", ClauseArg::PrincipalGroupId),
                PolicyRule::new(&[Verb::Get, Verb::List], &[Role::Client])
                    .with_clause("id = ?", ClauseArg::PrincipalId),
                // Admins change roles of their members, but never move them across groups
                PolicyRule::new(&[Verb::Update], &[Role::Admin]).requiring(vec![
                    FieldRequirement::equals_principal("old_group_id", ClauseArg::PrincipalGroupId),
                    FieldRequirement::equals_principal("new_group_id", ClauseArg::PrincipalGroupId),
                ]),
                // Clients edit their own profile only
                PolicyRule::new(&[Verb::Update], &[Role::Client]).requiring(vec![
                    FieldRequirement::equals_principal("id", ClauseArg::PrincipalId),
                    FieldRequirement::equals_field("new_role", "old_role"),
                    FieldRequirement::equals_field("new_group_id", "old_group_id"),
                ]),
            ],
        );
        Self { rules }
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let rules = serde_yaml::from_str(yaml)?;
        Ok(Self { rules })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

#[async_trait]
impl DecisionPoint for RulePolicyEngine {
    async fn decide(
        &self,
        principal: &Principal,
        verb: Verb,
        resource: &Resource,
    ) -> Result<Decision, PolicyError> {
        let rules = self
            .rules
            .get(&resource.group)
            .ok_or_else(|| PolicyError::UnknownResourceGroup(resource.group.clone()))?;

        match rules.iter().find(|rule| rule.matches(principal, verb, resource)) {
            Some(rule) => {
                let partial = rule.partial(principal)?;
                if partial.is_empty() {
                    Ok(Decision::allow_all())
                } else {
                    Ok(Decision::allow_filtered(partial))
                }
            }
            None => Ok(Decision::deny()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::principal::{GroupId, UserId};
    use uuid::Uuid;

    fn client() -> Principal {
        Principal::new(UserId::new(), Some(GroupId::new()), Role::Client)
    }

    #[tokio::test]
    async fn test_client_creates_only_for_self() {
        let engine = RulePolicyEngine::with_default_rules();
        let me = client();

        let own = engine
            .decide(&me, Verb::Create, &Resource::owned_by("instances", me.id))
            .await
            .unwrap();
        assert!(own.allow);
        assert!(own.partial.is_empty());

        let other = engine
            .decide(&me, Verb::Create, &Resource::owned_by("instances", UserId::new()))
            .await
            .unwrap();
        assert!(!other.allow);
    }

    #[tokio::test]
    async fn test_client_reads_are_owner_scoped() {
        let engine = RulePolicyEngine::with_default_rules();
        let me = client();

        let decision = engine
            .decide(&me, Verb::List, &Resource::group("instances"))
            .await
            .unwrap();
        assert!(decision.allow);
        assert_eq!(decision.partial.condition, "user_id = ?");
        assert_eq!(decision.partial.args, vec![ClauseValue::Uuid(me.id.0)]);
    }

    #[tokio::test]
    async fn test_admin_reads_are_group_scoped() {
        let engine = RulePolicyEngine::with_default_rules();
        let group = GroupId::new();
        let admin = Principal::new(UserId::new(), Some(group), Role::Admin);

        let decision = engine
            .decide(&admin, Verb::Delete, &Resource::id("instances", Uuid::new_v4()))
            .await
            .unwrap();
        assert!(decision.allow);
        assert_eq!(decision.partial.condition, "group_id = ?");
        assert_eq!(decision.partial.args, vec![ClauseValue::Uuid(group.0)]);
    }

    #[tokio::test]
    async fn test_admin_without_group_is_evaluation_error() {
        let engine = RulePolicyEngine::with_default_rules();
        let admin = Principal::new(UserId::new(), None, Role::Admin);
        let result = engine
            .decide(&admin, Verb::List, &Resource::group("instances"))
            .await;
        assert!(matches!(result, Err(PolicyError::Evaluation(_))));
    }

    #[tokio::test]
    async fn test_unknown_resource_group() {
        let engine = RulePolicyEngine::with_default_rules();
        let result = engine
            .decide(&client(), Verb::Get, &Resource::group("volumes"))
            .await;
        assert!(matches!(result, Err(PolicyError::UnknownResourceGroup(_))));
    }

    #[tokio::test]
    async fn test_update_is_denied_by_default() {
        let engine = RulePolicyEngine::with_default_rules();
        let decision = engine
            .decide(&client(), Verb::Update, &Resource::group("instances"))
            .await
            .unwrap();
        assert!(!decision.allow);
    }

    fn user_update(id: UserId, old: (Role, Option<GroupId>), new: (Role, Option<GroupId>)) -> Resource {
        let mut value = serde_json::json!({
            "id": id.to_string(),
            "old_role": old.0.as_str(),
            "new_role": new.0.as_str(),
        });
        if let Some(group) = old.1 {
            value["old_group_id"] = group.to_string().into();
        }
        if let Some(group) = new.1 {
            value["new_group_id"] = group.to_string().into();
        }
        Resource::new("users", value)
    }

    #[tokio::test]
    async fn test_client_updates_own_profile_only() {
        let engine = RulePolicyEngine::with_default_rules();
        let me = client();
        let group = me.group_id;

        let own = user_update(me.id, (Role::Client, group), (Role::Client, group));
        assert!(engine.decide(&me, Verb::Update, &own).await.unwrap().allow);

        let escalate = user_update(me.id, (Role::Client, group), (Role::Admin, group));
        assert!(!engine.decide(&me, Verb::Update, &escalate).await.unwrap().allow);

        let hop = user_update(me.id, (Role::Client, group), (Role::Client, Some(GroupId::new())));
        assert!(!engine.decide(&me, Verb::Update, &hop).await.unwrap().allow);

        let other = user_update(UserId::new(), (Role::Client, group), (Role::Client, group));
        assert!(!engine.decide(&me, Verb::Update, &other).await.unwrap().allow);
    }

    #[tokio::test]
    async fn test_admin_manages_roles_inside_own_group() {
        let engine = RulePolicyEngine::with_default_rules();
        let group = GroupId::new();
        let admin = Principal::new(UserId::new(), Some(group), Role::Admin);

        let promote = user_update(UserId::new(), (Role::Client, Some(group)), (Role::Admin, Some(group)));
        assert!(engine.decide(&admin, Verb::Update, &promote).await.unwrap().allow);

        let foreign = GroupId::new();
        let outsider = user_update(UserId::new(), (Role::Client, Some(foreign)), (Role::Admin, Some(foreign)));
        assert!(!engine.decide(&admin, Verb::Update, &outsider).await.unwrap().allow);

        let move_out = user_update(UserId::new(), (Role::Client, Some(group)), (Role::Client, Some(foreign)));
        assert!(!engine.decide(&admin, Verb::Update, &move_out).await.unwrap().allow);

        let members = engine
            .decide(&admin, Verb::Create, &Resource::new("users", serde_json::json!({ "group_id": group.to_string() })))
            .await
            .unwrap();
        assert!(members.allow);
        let elsewhere = engine
            .decide(&admin, Verb::Create, &Resource::new("users", serde_json::json!({ "group_id": foreign.to_string() })))
            .await
            .unwrap();
        assert!(!elsewhere.allow);
    }

    #[tokio::test]
    async fn test_user_reads_are_scoped() {
        let engine = RulePolicyEngine::with_default_rules();
        let me = client();

        let own = engine
            .decide(&me, Verb::List, &Resource::group("users"))
            .await
            .unwrap();
        assert_eq!(own.partial.condition, "id = ?");
        assert_eq!(own.partial.args, vec![ClauseValue::Uuid(me.id.0)]);

        let admin = Principal::new(UserId::new(), me.group_id, Role::Admin);
        let members = engine
            .decide(&admin, Verb::Get, &Resource::id("users", me.id.0))
            .await
            .unwrap();
        assert_eq!(members.partial.condition, "group_id = ?");
    }

    #[tokio::test]
    async fn test_presence_requirement_from_yaml() {
        let yaml = r#"
users:
  - verbs: [create]
    roles: [client]
    require:
      - field: group_id
"#;
        let engine = RulePolicyEngine::from_yaml_str(yaml).unwrap();
        let me = client();

        let with_group = Resource::new("users", serde_json::json!({ "group_id": "g" }));
        assert!(engine.decide(&me, Verb::Create, &with_group).await.unwrap().allow);
        assert!(!engine
            .decide(&me, Verb::Create, &Resource::group("users"))
            .await
            .unwrap()
            .allow);
    }

    #[tokio::test]
    async fn test_rules_from_yaml() {
        let yaml = r#"
instances:
  - verbs: [list]
    roles: [client]
    clause: "user_id = ? and status = 'ok'"
    args: [principal.id]
"#;
        let engine = RulePolicyEngine::from_yaml_str(yaml).unwrap();
        let me = client();
        let decision = engine
            .decide(&me, Verb::List, &Resource::group("instances"))
            .await
            .unwrap();
        assert!(decision.allow);
        assert_eq!(decision.partial.args.len(), 1);

        let denied = engine
            .decide(&me, Verb::Get, &Resource::group("instances"))
            .await
            .unwrap();
        assert!(!denied.allow);
    }
}
