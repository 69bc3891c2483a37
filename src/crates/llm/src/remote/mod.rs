//! Remote generation service implementations.
//!
//! - **Claude** - Anthropic Messages API

pub mod claude;

pub use claude::ClaudeClient;
