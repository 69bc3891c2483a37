//! Pipeline configuration
//!
//! One TOML file describes the whole pipeline:
//!
//! ```toml
//! [worker]
//! command = "calendar-worker"
//! call_timeout_ms = 30000
//!
//! [generation]
//! api_key_env = "ANTHROPIC_API_KEY"
//! model = "${CALENDAR_MODEL:claude-sonnet-4-5-20250929}"
//!
//! [[accounts]]
//! alias = "acme"
//! platform_account_id = "pk_acme"
//! credential_ref = "ACME_API_KEY"
//! minimum_requirements = { email = 4, sms = 3 }
//! ```
//!
//! Every section is optional and falls back to its defaults. String values
//! may reference the environment as `${VAR}` or `${VAR:default}`.

pub mod loader;

pub use loader::{load_config, parse_config, resolve_config_path, CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};

use crate::registry::AccountBinding;
use crate::retry::RetryConfig;
use integration::{CacheConfig, WorkerConfig};
use llm::config::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub review: ReviewConfig,

    #[serde(default)]
    pub stages: StagesConfig,

    #[serde(default)]
    pub accounts: Vec<AccountBinding>,
}

impl PipelineConfig {
    /// Reject values that would only fail later, mid-workflow.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.command.trim().is_empty() {
            return Err(ConfigError::Invalid("worker.command must not be empty".to_string()));
        }
        if self.worker.max_in_flight == 0 {
            return Err(ConfigError::Invalid("worker.max_in_flight must be at least 1".to_string()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Invalid("cache.ttl_secs must be positive".to_string()));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        for (name, value) in [
            ("planning_max_tokens", self.generation.planning_max_tokens),
            ("structuring_max_tokens", self.generation.structuring_max_tokens),
            ("briefs_max_tokens", self.generation.briefs_max_tokens),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("generation.{} must be positive", name)));
            }
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            return Err(ConfigError::Invalid(
                "retrieval.min_relevance must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Generation service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_planning_max_tokens")]
    pub planning_max_tokens: u32,

    #[serde(default = "default_structuring_max_tokens")]
    pub structuring_max_tokens: u32,

    #[serde(default = "default_briefs_max_tokens")]
    pub briefs_max_tokens: u32,

    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_planning_max_tokens() -> u32 {
    8000
}

fn default_structuring_max_tokens() -> u32 {
    64_000
}

fn default_briefs_max_tokens() -> u32 {
    16_000
}

fn default_generation_timeout_secs() -> u64 {
    300
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            planning_max_tokens: default_planning_max_tokens(),
            structuring_max_tokens: default_structuring_max_tokens(),
            briefs_max_tokens: default_briefs_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Brand-context retrieval settings. Both sources are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Remote retrieval service, e.g. `https://rag.example.com`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Local fallback: `<local_dir>/<account>/*.md|*.txt`
    #[serde(default)]
    pub local_dir: Option<PathBuf>,

    /// Snippets per context category
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,

    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_top_k() -> usize {
    3
}

fn default_min_relevance() -> f64 {
    0.3
}

fn default_retrieval_timeout_secs() -> u64 {
    30
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            local_dir: None,
            top_k: default_top_k(),
            min_relevance: default_min_relevance(),
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Review checkpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Directory holding one JSON document per workflow
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Resume only approved records
    #[serde(default = "default_require_approval")]
    pub require_approval: bool,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("data/reviews")
}

fn default_require_approval() -> bool {
    true
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            require_approval: default_require_approval(),
        }
    }
}

/// Stage runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagesConfig {
    /// Directory with `planning.md`, `structuring.md` and `briefs.md`;
    /// built-in instructions are used for any file that is absent.
    #[serde(default)]
    pub instructions_dir: Option<PathBuf>,

    /// Shortest acceptable planning output, in characters
    #[serde(default = "default_min_planning_chars")]
    pub min_planning_chars: usize,
}

fn default_min_planning_chars() -> usize {
    500
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            instructions_dir: None,
            min_planning_chars: default_min_planning_chars(),
        }
    }
}
