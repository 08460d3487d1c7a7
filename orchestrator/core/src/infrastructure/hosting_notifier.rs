// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process bridge from the access context to the hosting context.
//!
//! Implements the access-side [`GroupNotifier`] port by onboarding the group
//! through [`GroupOnboardingService`] synchronously.

use async_trait::async_trait;
use std::sync::Arc;

use crate::application::error::ServiceError;
use crate::application::group_onboarding::{GroupOnboardingService, GroupRegistration};
use crate::domain::access::{AccessGroup, GroupNotifier, NotifyError};

pub struct HostingGroupNotifier {
    onboarding: Arc<GroupOnboardingService>,
}

impl HostingGroupNotifier {
    pub fn new(onboarding: Arc<GroupOnboardingService>) -> Self {
        Self { onboarding }
    }
}

#[async_trait]
impl GroupNotifier for HostingGroupNotifier {
    async fn notify_group_created(&self, group: &AccessGroup) -> Result<(), NotifyError> {
        let registration = GroupRegistration {
            id: group.id,
            name: group.name.clone(),
            provider_name: group.provider_name,
            provider_url: group.provider_url.clone(),
            api_key: group.api_key.clone(),
        };

        match self.onboarding.save_group(registration).await {
            Ok(_) => Ok(()),
            Err(ServiceError::BadRequest(reason)) => Err(NotifyError::Rejected(reason)),
            Err(e) => Err(NotifyError::Unavailable(e.to_string())),
        }
    }
}
