// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SSH Remote Executor
//!
//! [`RemoteExecutor`] over `russh`: public-key authentication, command
//! execution on session channels and file upload through the SFTP subsystem.
//!
//! Hosts are freshly provisioned and have no known fingerprint yet, so every
//! server key is accepted.

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use russh_sftp::client::SftpSession;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::remote::{RemoteError, RemoteExecutor, RemoteSession};

const SSH_PORT: u16 = 22;

struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct RusshExecutor {
    config: Arc<client::Config>,
    dial_timeout: Duration,
}

impl RusshExecutor {
    pub fn new(dial_timeout: Duration) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            dial_timeout,
        }
    }
}

#[async_trait]
impl RemoteExecutor for RusshExecutor {
    async fn dial(
        &self,
        ip: IpAddr,
        private_key: &str,
        username: &str,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let addr = SocketAddr::new(ip, SSH_PORT);
        let key_pair =
            russh_keys::decode_secret_key(private_key, None).map_err(|e| RemoteError::Key(e.to_string()))?;

        let connect = client::connect(self.config.clone(), addr, AcceptingHandler);
        let mut handle = tokio::time::timeout(self.dial_timeout, connect)
            .await
            .map_err(|_| RemoteError::DialTimeout(addr.to_string()))?
            .map_err(|e| RemoteError::Dial {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        let authenticated = handle
            .authenticate_publickey(username, Arc::new(key_pair))
            .await
            .map_err(|e| RemoteError::Dial {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;
        if !authenticated {
            return Err(RemoteError::AuthenticationRejected(username.to_string()));
        }

        debug!(%addr, user = %username, "SSH session established");
        Ok(Box::new(RusshSession { handle }))
    }
}

pub struct RusshSession {
    handle: Handle<AcceptingHandler>,
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn execute(&mut self, command: &str) -> Result<String, RemoteError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        match exit_status {
            Some(0) => Ok(String::from_utf8_lossy(&stdout).into_owned()),
            Some(status) => Err(RemoteError::CommandFailed {
                command: command.to_string(),
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            }),
            None => Err(RemoteError::Channel(format!(
                "'{}' closed without an exit status",
                command
            ))),
        }
    }

    async fn upload_file(&mut self, path: &str, content: &[u8]) -> Result<(), RemoteError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| RemoteError::Transfer(e.to_string()))?;
        let mut file = sftp
            .create(path)
            .await
            .map_err(|e| RemoteError::Transfer(format!("{}: {}", path, e)))?;
        file.write_all(content)
            .await
            .map_err(|e| RemoteError::Transfer(format!("{}: {}", path, e)))?;
        file.shutdown()
            .await
            .map_err(|e| RemoteError::Transfer(format!("{}: {}", path, e)))?;
        sftp.close()
            .await
            .map_err(|e| RemoteError::Transfer(e.to_string()))?;

        debug!(path, bytes = content.len(), "Uploaded file");
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), RemoteError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_private_key_is_rejected_before_dialing() {
        let executor = RusshExecutor::new(Duration::from_millis(50));
        let result = executor
            .dial("127.0.0.1".parse().unwrap(), "not a key", "root")
            .await;
        assert!(matches!(result, Err(RemoteError::Key(_))));
    }
}
