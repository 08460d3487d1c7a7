// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Remote Execution Contract
//!
//! SSH command execution and file upload against a freshly provisioned host.
//! Sessions are owned values; callers must [`RemoteSession::close`] them on
//! every exit path.

use async_trait::async_trait;
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Failed to connect to {addr}: {message}")]
    Dial { addr: String, message: String },

    #[error("Timed out connecting to {0}")]
    DialTimeout(String),

    #[error("Invalid private key: {0}")]
    Key(String),

    #[error("Authentication rejected for user '{0}'")]
    AuthenticationRejected(String),

    #[error("Command '{command}' exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: u32,
        stderr: String,
    },

    #[error("File transfer failed: {0}")]
    Transfer(String),

    #[error("SSH channel error: {0}")]
    Channel(String),
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Open an authenticated session, bounded by the executor's dial timeout.
    async fn dial(
        &self,
        ip: IpAddr,
        private_key: &str,
        username: &str,
    ) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

#[async_trait]
pub trait RemoteSession: Send {
    /// Run `command`, returning its stdout. Non-zero exit status is an error.
    async fn execute(&mut self, command: &str) -> Result<String, RemoteError>;

    /// Write `content` to `path`, replacing any existing file.
    async fn upload_file(&mut self, path: &str, content: &[u8]) -> Result<(), RemoteError>;

    async fn close(self: Box<Self>) -> Result<(), RemoteError>;
}
