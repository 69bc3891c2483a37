//! The generation service seam used by the pipeline stages.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// One text-generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Stage instructions, sent as the system prompt
    pub instructions: String,
    /// Assembled context, sent as the user turn
    pub context: String,
    /// Overrides the client's default model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(instructions: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            context: context.into(),
            model_id: None,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Produces text from instructions and context.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String>;

    /// Check that the service can take calls, e.g. that credentials resolve.
    /// Called before a workflow commits to a generation stage.
    async fn ready(&self) -> Result<()> {
        Ok(())
    }
}
