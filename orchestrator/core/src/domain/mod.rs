// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Aggregates, value objects and collaborator contracts of the hosting and
//! access bounded contexts.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and traits; no I/O

pub mod access;
pub mod authorization;
pub mod group;
pub mod instance;
pub mod principal;
pub mod protocol;
pub mod provider;
pub mod remote;
pub mod repository;
pub mod service_config;
