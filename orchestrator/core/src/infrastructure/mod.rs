// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod hosting_notifier;
pub mod policy_engine;
pub mod repositories;
pub mod ssh;
pub mod vultr;

pub use hosting_notifier::HostingGroupNotifier;
pub use policy_engine::RulePolicyEngine;
pub use ssh::RusshExecutor;
pub use vultr::VultrClient;
