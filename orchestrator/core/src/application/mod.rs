// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod error;
pub mod authorization;
pub mod credential_cache;
pub mod instance_setup;
pub mod instance_service;
pub mod group_onboarding;
pub mod access_service;

// Re-export use cases for convenience
pub use access_service::{
    AccessService, CreateGroupRequest, CreateUserRequest, StandardAccessService, UpdateUserRequest,
};
pub use authorization::Authorizer;
pub use credential_cache::CredentialCache;
pub use error::ServiceError;
pub use group_onboarding::{GroupOnboardingService, GroupRegistration};
pub use instance_service::{InstanceService, StandardInstanceService};
pub use instance_setup::{InstanceSetupWorkflow, SetupJob, SetupSettings};
