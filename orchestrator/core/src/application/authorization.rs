// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Authorization Integration
//!
//! Front door of every service operation. Translates a [`DecisionPoint`]
//! answer into either the row filter to apply or [`ServiceError::Unauthorized`].
//!
//! Fail-closed: an evaluation error is indistinguishable from a deny for the
//! caller, and a denied decision's partial clause is dropped unread.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::error::ServiceError;
use crate::domain::authorization::{DecisionPoint, PartialClause, Resource, Verb};
use crate::domain::principal::Principal;

pub struct Authorizer {
    decision_point: Arc<dyn DecisionPoint>,
}

impl Authorizer {
    pub fn new(decision_point: Arc<dyn DecisionPoint>) -> Self {
        Self { decision_point }
    }

    /// Authorize `verb` on `resource`, returning the row filter to AND into
    /// subsequent storage reads and writes.
    pub async fn authorize(
        &self,
        principal: &Principal,
        verb: Verb,
        resource: &Resource,
    ) -> Result<PartialClause, ServiceError> {
        match self.decision_point.decide(principal, verb, resource).await {
            Ok(decision) if decision.allow => Ok(decision.partial),
            Ok(_) => {
                debug!(
                    principal = %principal.id,
                    verb = %verb,
                    resource = %resource.group,
                    "Authorization denied"
                );
                Err(ServiceError::Unauthorized)
            }
            Err(e) => {
                warn!(
                    principal = %principal.id,
                    verb = %verb,
                    resource = %resource.group,
                    error = %e,
                    "Authorization evaluation failed"
                );
                Err(ServiceError::Unauthorized)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::authorization::{ClauseValue, Decision, PolicyError};
    use crate::domain::principal::{Role, UserId};
    use async_trait::async_trait;

    struct FixedDecisionPoint(Result<Decision, String>);

    #[async_trait]
    impl DecisionPoint for FixedDecisionPoint {
        async fn decide(
            &self,
            _principal: &Principal,
            _verb: Verb,
            _resource: &Resource,
        ) -> Result<Decision, PolicyError> {
            self.0.clone().map_err(PolicyError::Evaluation)
        }
    }

    fn principal() -> Principal {
        Principal::new(UserId::new(), None, Role::Client)
    }

    fn filtered() -> PartialClause {
        PartialClause::new("user_id = ?", vec![ClauseValue::Int(7)]).unwrap()
    }

    #[tokio::test]
    async fn test_allow_returns_partial() {
        let authorizer = Authorizer::new(Arc::new(FixedDecisionPoint(Ok(
            Decision::allow_filtered(filtered()),
        ))));
        let partial = authorizer
            .authorize(&principal(), Verb::List, &Resource::group("instances"))
            .await
            .unwrap();
        assert_eq!(partial, filtered());
    }

    #[tokio::test]
    async fn test_deny_discards_partial() {
        let decision = Decision {
            allow: false,
            partial: filtered(),
        };
        let authorizer = Authorizer::new(Arc::new(FixedDecisionPoint(Ok(decision))));
        let result = authorizer
            .authorize(&principal(), Verb::List, &Resource::group("instances"))
            .await;
        assert!(matches!(result, Err(ServiceError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_evaluation_error_is_unauthorized() {
        let authorizer = Authorizer::new(Arc::new(FixedDecisionPoint(Err("evaluator crashed".into()))));
        let result = authorizer
            .authorize(&principal(), Verb::Get, &Resource::group("instances"))
            .await;
        assert!(matches!(result, Err(ServiceError::Unauthorized)));
    }
}
