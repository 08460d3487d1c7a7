// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Instance Setup Workflow - Background task driving `initializing -> ok`
//!
//! Detached from the request that created the instance and governed by a
//! process-lifetime cancellation token. Runs are tracked so that shutdown can
//! wait for them to release their sessions.
//!
//! 1. Poll on a fixed interval: learn the IP from the provider, dial SSH with
//!    the group's private key, run the readiness check. Every failed step is
//!    logged and retried on the next tick.
//! 2. Render a fresh Reality configuration and upload it.
//! 3. Restart the VPN service, mark the instance `ok` and persist it.
//!
//! Failures are logged, never surfaced; the instance stays `initializing`.
//! The SSH session is closed on every exit path, including cancellation.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Asynchronous readiness protocol and remote configuration

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::domain::authorization::PartialClause;
use crate::domain::instance::{Instance, InstanceId};
use crate::domain::protocol::{ProtocolConfigError, ProtocolTemplate};
use crate::domain::provider::VpsProvider;
use crate::domain::remote::{RemoteError, RemoteExecutor, RemoteSession};
use crate::domain::repository::{HostingStore, IsolationLevel, RepositoryError};
use crate::domain::service_config::ServiceConfig;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("setup cancelled")]
    Cancelled,

    #[error("protocol configuration failed: {0}")]
    Protocol(#[from] ProtocolConfigError),

    #[error("remote execution failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("failed to persist instance: {0}")]
    Repository(#[from] RepositoryError),

    #[error("instance {0} was deleted during setup")]
    Deleted(InstanceId),
}

/// Configuration for the setup workflow
#[derive(Debug, Clone)]
pub struct SetupSettings {
    pub poll_interval: Duration,
    pub username: String,
    pub remote_config_path: String,
    pub restart_command: String,
    pub readiness_command: String,
}

impl Default for SetupSettings {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

impl From<&ServiceConfig> for SetupSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            poll_interval: config.setup.poll_interval(),
            username: config.ssh.username.clone(),
            remote_config_path: config.setup.remote_config_path.clone(),
            restart_command: config.setup.restart_command.clone(),
            readiness_command: config.setup.readiness_command.clone(),
        }
    }
}

/// Everything one setup run needs, captured when it is launched
#[derive(Debug, Clone)]
pub struct SetupJob {
    pub instance: Instance,
    pub api_key: String,
    pub fake_domain: String,
}

pub struct InstanceSetupWorkflow {
    store: Arc<dyn HostingStore>,
    provider: Arc<dyn VpsProvider>,
    executor: Arc<dyn RemoteExecutor>,
    settings: SetupSettings,
    shutdown_token: CancellationToken,
    tasks: TaskTracker,
}

impl InstanceSetupWorkflow {
    pub fn new(
        store: Arc<dyn HostingStore>,
        provider: Arc<dyn VpsProvider>,
        executor: Arc<dyn RemoteExecutor>,
        settings: SetupSettings,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            provider,
            executor,
            settings,
            shutdown_token,
            tasks: TaskTracker::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Cancel every in-flight setup and wait until each has closed its
    /// session and exited. No setup can be launched afterwards.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.tasks.close();
        info!(in_flight = self.tasks.len(), "Waiting for instance setups to stop");
        self.tasks.wait().await;
    }

    /// Detach a setup run. Its outcome is only logged.
    pub fn spawn(self: &Arc<Self>, job: SetupJob) -> tokio::task::JoinHandle<()> {
        let workflow = Arc::clone(self);
        self.tasks.spawn(async move {
            let instance_id = job.instance.id;
            match workflow.run(job).await {
                Ok(instance) => {
                    info!(
                        instance_id = %instance.id,
                        ip = ?instance.ip,
                        "Instance setup completed"
                    );
                }
                Err(SetupError::Cancelled) => {
                    info!(instance_id = %instance_id, "Instance setup cancelled");
                }
                Err(e) => {
                    error!(
                        instance_id = %instance_id,
                        error = %e,
                        "Instance setup failed, instance remains initializing"
                    );
                }
            }
        })
    }

    /// Run the whole workflow for one instance.
    pub async fn run(&self, job: SetupJob) -> Result<Instance, SetupError> {
        let SetupJob {
            mut instance,
            api_key,
            fake_domain,
        } = job;

        info!(instance_id = %instance.id, "Waiting for instance to finish initialization");
        let (mut session, ip) = self.wait_for_session(&instance, &api_key).await?;

        let configured = self
            .until_cancelled(self.configure(session.as_mut(), &mut instance, ip, &fake_domain))
            .await
            .and_then(|configured| configured);
        if let Err(e) = session.close().await {
            debug!(instance_id = %instance.id, error = %e, "Failed to close ssh session");
        }
        configured?;

        self.persist(&instance).await?;
        Ok(instance)
    }

    /// Readiness polling: returns an SSH session that passed the readiness check.
    ///
    /// Every step is raced against the shutdown token, so a slow provider
    /// call or a hanging readiness check never delays cancellation.
    async fn wait_for_session(
        &self,
        instance: &Instance,
        api_key: &str,
    ) -> Result<(Box<dyn RemoteSession>, IpAddr), SetupError> {
        let mut ip = instance.ip;

        let mut tick = interval(self.settings.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.until_cancelled(tick.tick()).await?;

            if ip.is_none() {
                let lookup = self.provider.get_instance(api_key, &instance.remote_id);
                match self.until_cancelled(lookup).await? {
                    Ok(remote) => ip = remote.ip,
                    Err(e) => {
                        warn!(
                            instance_id = %instance.id,
                            remote_id = %instance.remote_id,
                            error = %e,
                            "Failed to query remote instance"
                        );
                        continue;
                    }
                }
            }

            let Some(addr) = ip else {
                warn!(instance_id = %instance.id, "No IP assigned to the instance yet");
                continue;
            };

            debug!(instance_id = %instance.id, ip = %addr, "Trying ssh");
            let dial = self
                .executor
                .dial(addr, &instance.private_key, &self.settings.username);
            let mut active = match self.until_cancelled(dial).await? {
                Ok(open) => open,
                Err(e) => {
                    warn!(instance_id = %instance.id, ip = %addr, error = %e, "SSH dial failed");
                    continue;
                }
            };

            let checked = self
                .until_cancelled(active.execute(&self.settings.readiness_command))
                .await;
            match checked {
                Ok(Ok(_)) => return Ok((active, addr)),
                Ok(Err(e)) => {
                    warn!(
                        instance_id = %instance.id,
                        ip = %addr,
                        error = %e,
                        "Readiness check failed"
                    );
                    close_quietly(active).await;
                }
                Err(cancelled) => {
                    close_quietly(active).await;
                    return Err(cancelled);
                }
            }
        }
    }

    /// Drive `step` to completion unless shutdown is requested first.
    async fn until_cancelled<F: Future>(&self, step: F) -> Result<F::Output, SetupError> {
        tokio::select! {
            biased;

            _ = self.shutdown_token.cancelled() => Err(SetupError::Cancelled),
            output = step => Ok(output),
        }
    }

    /// Upload a fresh Reality config and restart the VPN service.
    async fn configure(
        &self,
        session: &mut dyn RemoteSession,
        instance: &mut Instance,
        ip: IpAddr,
        fake_domain: &str,
    ) -> Result<(), SetupError> {
        info!(instance_id = %instance.id, "Uploading reality config");
        let template = ProtocolTemplate::generate(fake_domain)?;
        let document = template.render()?;
        session
            .upload_file(&self.settings.remote_config_path, document.as_bytes())
            .await?;

        info!(instance_id = %instance.id, "Restarting VPN service");
        session.execute(&self.settings.restart_command).await?;

        instance.mark_ready(ip, template.connection_string(ip));
        Ok(())
    }

    async fn persist(&self, instance: &Instance) -> Result<(), SetupError> {
        let mut tx = self.store.begin(IsolationLevel::Serializable).await?;

        if tx
            .find_instance(instance.id, &PartialClause::none())
            .await?
            .is_none()
        {
            tx.rollback().await?;
            return Err(SetupError::Deleted(instance.id));
        }

        tx.save_instance(instance).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn close_quietly(session: Box<dyn RemoteSession>) {
    if let Err(e) = session.close().await {
        debug!(error = %e, "Failed to close ssh session");
    }
}
