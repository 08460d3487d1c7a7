// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Service Configuration Types
//
// Defines the YAML configuration of a VEIL orchestrator process:
// - Access and hosting database connections
// - VPS provider endpoint and instance shape
// - System SSH key pair and remote user
// - Setup workflow timing and remote paths
// - Reality camouflage domain
// - Startup script and policy rule overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::group::ProviderName;
use crate::domain::repository::{PostgresConfig, StorageBackend};

/// Top-level configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub setup: SetupConfig,

    #[serde(default)]
    pub protocol: ProtocolSettings,

    #[serde(default)]
    pub startup_script: StartupScriptConfig,

    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL of the access read model. In-memory storage when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,

    /// PostgreSQL URL of the hosting read model. In-memory storage when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosting_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: ProviderName,

    #[serde(default = "default_provider_url")]
    pub base_url: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_plan")]
    pub plan: String,

    #[serde(default = "default_os_id")]
    pub os_id: u32,

    /// Tag attached to every instance the orchestrator creates
    #[serde(default = "default_instance_tag")]
    pub instance_tag: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// System private key installed on every provisioned host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<PathBuf>,

    /// Name the public key is registered under at the provider
    #[serde(default = "default_key_name")]
    pub key_name: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Where the rendered Xray document is uploaded
    #[serde(default = "default_remote_config_path")]
    pub remote_config_path: String,

    #[serde(default = "default_restart_command")]
    pub restart_command: String,

    /// Command whose success means the host finished its startup script
    #[serde(default = "default_readiness_command")]
    pub readiness_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSettings {
    #[serde(default = "default_fake_domain")]
    pub fake_domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupScriptConfig {
    #[serde(default = "default_script_name")]
    pub name: String,

    /// Replaces the embedded install script when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// YAML rule file replacing the built-in rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<PathBuf>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_provider_name() -> ProviderName {
    ProviderName::Vultr
}

fn default_provider_url() -> String {
    "https://api.vultr.com".to_string()
}

fn default_region() -> String {
    "fra".to_string()
}

fn default_plan() -> String {
    "vc2-1c-1gb".to_string()
}

fn default_os_id() -> u32 {
    2136
}

fn default_instance_tag() -> String {
    "veil".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_key_name() -> String {
    "veil-publickey".to_string()
}

fn default_username() -> String {
    "root".to_string()
}

fn default_dial_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    20
}

fn default_remote_config_path() -> String {
    "/usr/local/etc/xray/config.json".to_string()
}

fn default_restart_command() -> String {
    "systemctl restart xray".to_string()
}

fn default_readiness_command() -> String {
    "which xray".to_string()
}

fn default_fake_domain() -> String {
    "www.speedtest.net".to_string()
}

fn default_script_name() -> String {
    "veil-script".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            access_url: None,
            hosting_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_provider_url(),
            region: default_region(),
            plan: default_plan(),
            os_id: default_os_id(),
            instance_tag: default_instance_tag(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            private_key_path: None,
            public_key_path: None,
            key_name: default_key_name(),
            username: default_username(),
            dial_timeout_secs: default_dial_timeout(),
        }
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            remote_config_path: default_remote_config_path(),
            restart_command: default_restart_command(),
            readiness_command: default_readiness_command(),
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            fake_domain: default_fake_domain(),
        }
    }
}

impl Default for StartupScriptConfig {
    fn default() -> Self {
        Self {
            name: default_script_name(),
            path: None,
        }
    }
}

impl DatabaseConfig {
    pub fn access_backend(&self) -> StorageBackend {
        self.backend(self.access_url.as_deref())
    }

    pub fn hosting_backend(&self) -> StorageBackend {
        self.backend(self.hosting_url.as_deref())
    }

    fn backend(&self, url: Option<&str>) -> StorageBackend {
        match url {
            Some(url) => StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: url.to_string(),
                max_connections: self.max_connections,
            }),
            None => StorageBackend::InMemory,
        }
    }
}

impl SetupConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl SshConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

impl ServiceConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. VEIL_CONFIG_PATH environment variable
    /// 2. ./veil-config.yaml (working directory)
    /// 3. ~/.veil/config.yaml (user home)
    /// 4. /etc/veil/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("VEIL_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./veil-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".veil").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/veil/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VEIL_ACCESS_DATABASE_URL") {
            tracing::info!("Environment override: VEIL_ACCESS_DATABASE_URL");
            self.database.access_url = Some(val);
        }

        if let Ok(val) = std::env::var("VEIL_HOSTING_DATABASE_URL") {
            tracing::info!("Environment override: VEIL_HOSTING_DATABASE_URL");
            self.database.hosting_url = Some(val);
        }

        if let Ok(val) = std::env::var("VEIL_SSH_PRIVATE_KEY") {
            tracing::info!("Environment override: VEIL_SSH_PRIVATE_KEY={}", val);
            self.ssh.private_key_path = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("VEIL_SSH_PUBLIC_KEY") {
            tracing::info!("Environment override: VEIL_SSH_PUBLIC_KEY={}", val);
            self.ssh.public_key_path = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("VEIL_PROVIDER_URL") {
            tracing::info!("Environment override: VEIL_PROVIDER_URL={}", val);
            self.provider.base_url = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if url::Url::parse(&self.provider.base_url).is_err() {
            anyhow::bail!("provider.base_url is not a valid URL: '{}'", self.provider.base_url);
        }

        if self.setup.poll_interval_secs == 0 {
            anyhow::bail!("setup.poll_interval_secs must be greater than zero");
        }

        if self.ssh.dial_timeout_secs == 0 {
            anyhow::bail!("ssh.dial_timeout_secs must be greater than zero");
        }

        if self.ssh.username.is_empty() {
            anyhow::bail!("ssh.username cannot be empty");
        }

        if self.protocol.fake_domain.is_empty() || self.protocol.fake_domain.contains("://") {
            anyhow::bail!(
                "protocol.fake_domain must be a bare host name, got '{}'",
                self.protocol.fake_domain
            );
        }

        if self.setup.remote_config_path.is_empty() {
            anyhow::bail!("setup.remote_config_path cannot be empty");
        }

        Ok(())
    }
}
