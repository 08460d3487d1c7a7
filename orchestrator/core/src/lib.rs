// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Core of the VEIL orchestrator: provisions per-user VPN endpoints on a VPS
//! provider and manages their lifecycle behind authorization checks.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services and adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
