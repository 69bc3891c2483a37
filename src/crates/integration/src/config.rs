//! Worker process configuration

use crate::error::{IntegrationError, Result};
use crate::kind::AccountTarget;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// How account workers are launched and talked to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker executable
    #[serde(default = "default_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment passed to every worker
    #[serde(default = "default_env")]
    pub env: BTreeMap<String, String>,

    /// Environment variable the resolved credential is exposed under
    #[serde(default = "default_credential_env")]
    pub credential_env: String,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Connections unused for longer than this are torn down
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Outstanding calls per connection (1 = serialized)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_catalog_max_items")]
    pub catalog_max_items: usize,
}

fn default_command() -> String {
    "calendar-worker".to_string()
}

fn default_env() -> BTreeMap<String, String> {
    BTreeMap::from([("READ_ONLY".to_string(), "true".to_string())])
}

fn default_credential_env() -> String {
    "PRIVATE_API_KEY".to_string()
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_max_in_flight() -> usize {
    1
}

fn default_catalog_max_items() -> usize {
    100
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            env: default_env(),
            credential_env: default_credential_env(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            catalog_max_items: default_catalog_max_items(),
        }
    }
}

impl WorkerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    pub fn with_catalog_max_items(mut self, max: usize) -> Self {
        self.catalog_max_items = max;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Resolves an account's credential reference to the secret handed to its worker.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, target: &AccountTarget) -> Result<String>;
}

/// Treats `credential_ref` as the name of an environment variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialResolver;

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, target: &AccountTarget) -> Result<String> {
        std::env::var(&target.credential_ref).map_err(|_| {
            IntegrationError::Credential(format!(
                "environment variable '{}' for account '{}' is not set",
                target.credential_ref, target.alias
            ))
        })
    }
}

/// Fixed credential table keyed by `credential_ref`.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    secrets: HashMap<String, String>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, credential_ref: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(credential_ref.into(), secret.into());
        self
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, target: &AccountTarget) -> Result<String> {
        self.secrets.get(&target.credential_ref).cloned().ok_or_else(|| {
            IntegrationError::Credential(format!(
                "no credential registered for '{}'",
                target.credential_ref
            ))
        })
    }
}
