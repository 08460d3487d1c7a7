// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for VEIL CLI

pub mod config;
pub mod daemon;
pub mod group;
pub mod instance;
pub mod update;
pub mod user;

pub use self::config::ConfigCommand;
pub use self::group::GroupCommand;
pub use self::instance::InstanceCommand;
pub use self::update::UpdateCommand;
pub use self::user::UserCommand;
