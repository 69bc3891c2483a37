//! Text generation service for the calendar pipeline.
//!
//! This crate defines the [`GenerationService`] trait the pipeline stages call,
//! and a remote implementation over Anthropic's Messages API
//! ([`remote::ClaudeClient`]).
//!
//! A generation call is one system prompt (the stage instructions) plus one
//! user turn (the assembled context). Every failure, whether rate limit,
//! timeout, malformed response, or authentication, is reported as an
//! [`LlmError`] and the caller decides what it means for the stage.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use llm::config::RemoteLlmConfig;
//! use llm::remote::ClaudeClient;
//! use llm::{GenerationRequest, GenerationService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RemoteLlmConfig::from_env(
//!         "ANTHROPIC_API_KEY",
//!         "https://api.anthropic.com",
//!         "claude-sonnet-4-5-20250929",
//!     )?;
//!     let client = ClaudeClient::new(config)?;
//!
//!     let request = GenerationRequest::new("Plan a send calendar.", "Segments: ...")
//!         .with_max_tokens(8000);
//!     println!("{}", client.generate(request).await?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod remote;
pub mod service;

pub use config::RemoteLlmConfig;
pub use error::{LlmError, Result};
pub use remote::ClaudeClient;
pub use service::{GenerationRequest, GenerationService, DEFAULT_MAX_TOKENS};
