//! Error types for the integration layer

use crate::kind::DataKind;
use thiserror::Error;

/// Result type for integration operations
pub type Result<T> = std::result::Result<T, IntegrationError>;

/// Errors raised while talking to account workers
#[derive(Error, Debug)]
pub enum IntegrationError {
    /// The worker process could not be started
    #[error("Failed to spawn worker for account '{account}': {source}")]
    ProcessSpawn {
        account: String,
        #[source]
        source: std::io::Error,
    },

    /// The worker started but the handshake failed
    #[error("Handshake with worker for account '{account}' failed: {reason}")]
    Handshake { account: String, reason: String },

    /// No response within the per-call timeout
    #[error("Worker call '{operation}' timed out after {timeout_ms}ms")]
    RpcTimeout { operation: String, timeout_ms: u64 },

    /// Malformed, missing, or closed response stream
    #[error("Protocol error on '{operation}': {reason}")]
    RpcProtocol { operation: String, reason: String },

    /// The worker answered with an error payload
    #[error("Worker error on '{operation}': {message}")]
    Remote {
        operation: String,
        code: Option<i64>,
        message: String,
    },

    /// A critical data kind could not be fetched
    #[error("Critical fetch of {kind} failed: {source}")]
    CriticalFetch {
        kind: DataKind,
        #[source]
        source: Box<IntegrationError>,
    },

    /// Credential could not be resolved
    #[error("Credential error: {0}")]
    Credential(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntegrationError {
    pub(crate) fn protocol(operation: &str, reason: impl Into<String>) -> Self {
        IntegrationError::RpcProtocol {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a retry may succeed. Only call timeouts qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            IntegrationError::RpcTimeout { .. } => true,
            IntegrationError::CriticalFetch { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The data kind this error is attributed to, if any.
    pub fn kind(&self) -> Option<DataKind> {
        match self {
            IntegrationError::CriticalFetch { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = IntegrationError::RpcTimeout {
            operation: "get_segments".into(),
            timeout_ms: 100,
        };
        assert!(timeout.is_transient());

        let wrapped = IntegrationError::CriticalFetch {
            kind: DataKind::Segments,
            source: Box::new(timeout),
        };
        assert!(wrapped.is_transient());
        assert_eq!(wrapped.kind(), Some(DataKind::Segments));

        let remote = IntegrationError::Remote {
            operation: "get_segments".into(),
            code: Some(401),
            message: "unauthorized".into(),
        };
        assert!(!remote.is_transient());
        assert!(!IntegrationError::protocol("x", "closed").is_transient());
    }

    #[test]
    fn test_critical_fetch_display_names_kind() {
        let err = IntegrationError::CriticalFetch {
            kind: DataKind::Campaigns,
            source: Box::new(IntegrationError::protocol("get_campaigns", "worker closed stdout")),
        };
        let message = err.to_string();
        assert!(message.contains("campaigns"));
        assert!(message.contains("worker closed stdout"));
    }
}
