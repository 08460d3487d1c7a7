// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Instance Aggregate
//!
//! A provisioned VPN endpoint: one remote virtual machine owned by exactly one
//! user. Instances are never hard-deleted; `deleted_at` marks them invisible to
//! every read path.
//!
//! ## State Machine
//!
//! ```text
//! initializing ──setup succeeded──▶ ok
//!      │
//!      └──────── delete ──────────▶ (soft-deleted)
//! ```
//!
//! `unknown` and `off` are part of the persisted vocabulary but are never
//! entered by the orchestrator itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::principal::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider-assigned identifier of the remote virtual machine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteInstanceId(pub String);

impl RemoteInstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Externally observable status vocabulary. String forms are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Unknown,
    Off,
    Initializing,
    Ok,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Unknown => "unknown",
            InstanceStatus::Off => "off",
            InstanceStatus::Initializing => "initializing",
            InstanceStatus::Ok => "ok",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(InstanceStatus::Unknown),
            "off" => Ok(InstanceStatus::Off),
            "initializing" => Ok(InstanceStatus::Initializing),
            "ok" => Ok(InstanceStatus::Ok),
            other => Err(format!("unknown instance status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub remote_id: RemoteInstanceId,
    pub owner: UserId,
    pub ip: Option<IpAddr>,
    pub status: InstanceStatus,
    /// Client-facing connection string, set once setup completes
    pub connection_string: Option<String>,
    /// Private half of the SSH key pair the remote host was provisioned with
    #[serde(skip_serializing, default)]
    pub private_key: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Instance {
    /// A freshly provisioned instance. IP is learned later by the setup workflow.
    pub fn provisioned(owner: UserId, remote_id: RemoteInstanceId, private_key: String) -> Self {
        Self {
            id: InstanceId::new(),
            remote_id,
            owner,
            ip: None,
            status: InstanceStatus::Initializing,
            connection_string: None,
            private_key,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Record the outcome of a successful setup.
    pub fn mark_ready(&mut self, ip: IpAddr, connection_string: String) {
        self.ip = Some(ip);
        self.connection_string = Some(connection_string);
        self.status = InstanceStatus::Ok;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_setup_pending(&self) -> bool {
        !self.is_deleted() && self.status == InstanceStatus::Initializing
    }
}

/// Provider-side view of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInstance {
    pub id: RemoteInstanceId,
    /// `None` while the provider has not assigned an address yet
    pub ip: Option<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioned_instance_starts_initializing() {
        let owner = UserId::new();
        let instance = Instance::provisioned(owner, RemoteInstanceId("r1".into()), "pk".into());
        assert_eq!(instance.status, InstanceStatus::Initializing);
        assert!(instance.ip.is_none());
        assert!(instance.connection_string.is_none());
        assert!(instance.is_setup_pending());
    }

    #[test]
    fn test_mark_ready() {
        let mut instance =
            Instance::provisioned(UserId::new(), RemoteInstanceId("r1".into()), "pk".into());
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        instance.mark_ready(ip, "vless://x".into());
        assert_eq!(instance.status, InstanceStatus::Ok);
        assert_eq!(instance.ip, Some(ip));
        assert!(!instance.is_setup_pending());
    }

    #[test]
    fn test_status_vocabulary() {
        for s in ["unknown", "off", "initializing", "ok"] {
            let status: InstanceStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Initializing).unwrap(),
            "\"initializing\""
        );
    }
}
