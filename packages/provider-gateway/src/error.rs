//! Typed errors for the provider gateway.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match on
//! the classification instead of parsing messages.

use thiserror::Error;

/// Errors surfaced by [`Gateway::call`](crate::Gateway::call).
///
/// Not-found and malformed responses never appear here: they are absorbed by
/// the candidate loop and normalized to an empty-but-valid result.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider was reached but refused access (credentials, subscription).
    #[error("access denied by provider for {operation} ({candidate}): {reason}")]
    Denied {
        operation: String,
        candidate: String,
        reason: String,
    },

    /// Arguments failed validation before any outbound call.
    #[error("invalid arguments for {operation}: {reason}")]
    InvalidArguments { operation: String, reason: String },

    /// No operation with this name is configured.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Every candidate failed with transient errors after retries.
    #[error("provider unavailable for {operation}: {last_error}")]
    Unavailable {
        operation: String,
        last_error: String,
    },

    /// The fallback chain points back at an operation already tried.
    #[error("fallback cycle detected at operation {0}")]
    FallbackCycle(String),
}

impl GatewayError {
    /// Whether this is a terminal-denied classification.
    pub fn is_denied(&self) -> bool {
        matches!(self, GatewayError::Denied { .. })
    }

    /// Whether retrying the whole call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable { .. })
    }

    /// Normalized reason string safe to show to callers.
    pub fn reason(&self) -> String {
        match self {
            GatewayError::Denied { operation, .. } => {
                format!("access denied for {operation}: subscription or credentials required")
            }
            GatewayError::InvalidArguments { reason, .. } => format!("invalid arguments: {reason}"),
            GatewayError::UnknownOperation(op) => format!("unknown operation {op}"),
            GatewayError::Unavailable { operation, .. } => {
                format!("provider unavailable for {operation}")
            }
            GatewayError::FallbackCycle(op) => format!("misconfigured fallback at {op}"),
        }
    }
}

/// Errors raised by a [`ProviderTransport`](crate::ProviderTransport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The per-call timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Connection failed or the response could not be read.
    #[error("network error: {0}")]
    Network(String),

    /// Credentials were rejected before a provider status was produced.
    #[error("authentication rejected: {0}")]
    Auth(String),
}

impl TransportError {
    /// Transport errors worth retrying against the same candidate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Network(_))
    }
}

/// Errors in the operation table.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("operation {operation} has no endpoint candidates")]
    NoCandidates { operation: String },

    #[error("operation {operation} falls back to unknown operation {fallback}")]
    UnknownFallback { operation: String, fallback: String },

    #[error("invalid operation table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_reason_does_not_leak_provider_detail() {
        let err = GatewayError::Denied {
            operation: "search_volume".into(),
            candidate: "/v3/keywords".into(),
            reason: "raw body: {\"status_message\": \"secret\"}".into(),
        };

        assert!(err.is_denied());
        assert!(!err.reason().contains("secret"));
        assert!(err.reason().contains("denied"));
    }

    #[test]
    fn only_network_and_timeout_are_retryable() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(!TransportError::Auth("bad key".into()).is_retryable());
    }
}
