// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for cross-domain group creation
//!
//! The access service notifies the hosting domain through the in-process
//! `HostingGroupNotifier`; both sides run on in-memory stores.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use veil_core::application::{
    AccessService, CreateGroupRequest, CreateUserRequest, CredentialCache, GroupOnboardingService, GroupRegistration,
    ServiceError, StandardAccessService,
};
use veil_core::domain::access::{AccessGroup, AccessUser, Credentials, GroupNotifier, NotifyError};
use veil_core::domain::group::{Group, ProviderName, SshKeyPair, StartupScript, DEFAULT_STARTUP_SCRIPT};
use veil_core::domain::principal::{GroupId, Role};
use veil_core::domain::repository::{AccessStore, HostingStore, IsolationLevel};
use veil_core::infrastructure::repositories::{InMemoryAccessStore, InMemoryHostingStore};
use veil_core::infrastructure::HostingGroupNotifier;

struct World {
    access_store: InMemoryAccessStore,
    hosting_store: InMemoryHostingStore,
    provider: Arc<FakeProvider>,
    onboarding: Arc<GroupOnboardingService>,
    access: StandardAccessService,
}

impl World {
    fn new() -> Self {
        let access_store = InMemoryAccessStore::new();
        let hosting_store = InMemoryHostingStore::new();
        let provider = Arc::new(FakeProvider::new());

        let onboarding = Arc::new(GroupOnboardingService::new(
            Arc::new(hosting_store.clone()),
            Arc::new(CredentialCache::new(provider.clone())),
            SshKeyPair::new("veil-publickey", "ssh-ed25519 AAAA".into(), "PRIVATE KEY".into()),
            StartupScript::new("veil-script", DEFAULT_STARTUP_SCRIPT.to_string()),
            FAKE_DOMAIN,
        ));
        let access = StandardAccessService::new(
            Arc::new(access_store.clone()),
            Arc::new(HostingGroupNotifier::new(onboarding.clone())),
            default_authorizer(),
        );

        Self {
            access_store,
            hosting_store,
            provider,
            onboarding,
            access,
        }
    }

    async fn sign_up(&self, username: &str) -> AccessUser {
        self.access
            .create_user(
                None,
                CreateUserRequest {
                    username: username.into(),
                    password: "secret".into(),
                    group_id: None,
                },
            )
            .await
            .unwrap()
    }

    async fn hosting_group(&self, id: GroupId) -> Option<Group> {
        let mut tx = self.hosting_store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.find_group(id).await.unwrap()
    }

    async fn access_group_by_name(&self, name: &str) -> Option<AccessGroup> {
        let mut tx = self.access_store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.find_group_by_name(name).await.unwrap()
    }
}

fn request(name: &str) -> CreateGroupRequest {
    CreateGroupRequest {
        name: name.into(),
        provider_url: "https://api.vultr.com".into(),
        api_key: API_KEY.into(),
    }
}

#[tokio::test]
async fn test_create_group_onboards_hosting_and_promotes_creator() {
    let world = World::new();
    let user = world.sign_up("alice").await;

    let group = world
        .access
        .create_group(&user.principal(), request("friends"))
        .await
        .unwrap();

    // The new admin logs in with the group attached
    let promoted = world
        .access
        .authenticate(&Credentials {
            username: "alice".into(),
            password: "secret".into(),
        })
        .await
        .unwrap();
    assert_eq!(promoted.id, user.id);
    assert_eq!(promoted.role, Role::Admin);
    assert_eq!(promoted.group_id, Some(group.id));

    let hosted = world.hosting_group(group.id).await.expect("hosting group");
    assert_eq!(hosted.name, "friends");
    assert_eq!(hosted.provider.api_key, API_KEY);
    assert_eq!(hosted.fake_domain(), Some(FAKE_DOMAIN));
    assert_eq!(hosted.ssh_key.remote_id.as_deref(), Some("key-1"));
    assert_eq!(hosted.startup_script.remote_id.as_deref(), Some("script-1"));
    assert_eq!(hosted.startup_script.content, DEFAULT_STARTUP_SCRIPT);
}

#[tokio::test]
async fn test_hosting_failure_leaves_no_group_anywhere() {
    let world = World::new();
    world.provider.reject_credentials.store(true, Ordering::SeqCst);
    let user = world.sign_up("alice").await;

    let result = world
        .access
        .create_group(&user.principal(), request("friends"))
        .await;

    assert!(matches!(result, Err(ServiceError::Internal(_))));
    assert_eq!(world.access_store.group_count().await, 0);
    assert!(world.access_group_by_name("friends").await.is_none());

    let unchanged = world.access.resolve_principal(user.id).await.unwrap();
    assert_eq!(unchanged.role, Role::Client);
    assert_eq!(unchanged.group_id, None);
}

#[tokio::test]
async fn test_duplicate_group_name_already_exists() {
    let world = World::new();
    let alice = world.sign_up("alice").await;
    let bob = world.sign_up("bob").await;

    world
        .access
        .create_group(&alice.principal(), request("friends"))
        .await
        .unwrap();
    let registrations = world.provider.registrations.load(Ordering::SeqCst);

    assert!(matches!(
        world.access.create_group(&bob.principal(), request("friends")).await,
        Err(ServiceError::AlreadyExists)
    ));
    // Rejected before the hosting domain was contacted
    assert_eq!(world.provider.registrations.load(Ordering::SeqCst), registrations);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let world = World::new();
    let user = world.sign_up("alice").await;

    let short_key = CreateGroupRequest {
        api_key: "too-short".into(),
        ..request("friends")
    };
    assert!(matches!(
        world.access.create_group(&user.principal(), short_key).await,
        Err(ServiceError::BadRequest(_))
    ));

    let bad_url = CreateGroupRequest {
        provider_url: "not a url".into(),
        ..request("friends")
    };
    assert!(matches!(
        world.access.create_group(&user.principal(), bad_url).await,
        Err(ServiceError::BadRequest(_))
    ));

    assert!(matches!(
        world.access.create_group(&user.principal(), request("  ")).await,
        Err(ServiceError::BadRequest(_))
    ));
    assert_eq!(world.access_store.group_count().await, 0);
}

#[tokio::test]
async fn test_unregistered_creator_is_not_found() {
    let world = World::new();
    let stranger = client(GroupId::new());

    assert!(matches!(
        world.access.create_group(&stranger, request("friends")).await,
        Err(ServiceError::NotFound)
    ));
    assert_eq!(world.provider.registrations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_onboarding_again_keeps_template_and_credentials() {
    let world = World::new();
    let id = GroupId::new();
    let registration = GroupRegistration {
        id,
        name: "friends".into(),
        provider_name: ProviderName::Vultr,
        provider_url: "https://api.vultr.com".into(),
        api_key: API_KEY.into(),
    };

    let first = world.onboarding.save_group(registration.clone()).await.unwrap();
    let second = world
        .onboarding
        .save_group(GroupRegistration {
            name: "best friends".into(),
            ..registration
        })
        .await
        .unwrap();

    assert_eq!(first.default_template_id, second.default_template_id);
    assert_eq!(second.templates.len(), 1);
    assert_eq!(second.ssh_key.remote_id, first.ssh_key.remote_id);
    assert_eq!(second.name, "best friends");
    // key and script registered once
    assert_eq!(world.provider.registrations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_notifier_maps_rejection() {
    let world = World::new();
    let notifier = HostingGroupNotifier::new(world.onboarding.clone());
    let group = AccessGroup {
        id: GroupId::new(),
        name: "friends".into(),
        provider_name: ProviderName::Vultr,
        provider_url: "https://api.vultr.com".into(),
        api_key: String::new(),
    };

    assert!(matches!(
        notifier.notify_group_created(&group).await,
        Err(NotifyError::Rejected(_))
    ));
    assert!(world.hosting_group(group.id).await.is_none());
}

#[tokio::test]
async fn test_member_added_by_admin_logs_into_hosted_group() {
    let world = World::new();
    let alice = world.sign_up("alice").await;
    let group = world
        .access
        .create_group(&alice.principal(), request("friends"))
        .await
        .unwrap();
    let admin = world.access.resolve_principal(alice.id).await.unwrap();

    world
        .access
        .create_user(
            Some(&admin),
            CreateUserRequest {
                username: "bob".into(),
                password: "hunter2".into(),
                group_id: Some(group.id),
            },
        )
        .await
        .unwrap();

    let bob = world
        .access
        .authenticate(&Credentials {
            username: "bob".into(),
            password: "hunter2".into(),
        })
        .await
        .unwrap();
    assert_eq!(bob.role, Role::Client);
    assert_eq!(bob.group_id, Some(group.id));
    assert!(world.hosting_group(group.id).await.is_some());
}
