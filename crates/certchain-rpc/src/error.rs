//! RPC error types and their retry classification.

use certchain_types::TypesError;
use thiserror::Error;

/// JSON-RPC error codes the client cares about.
pub mod error_codes {
    /// Parse error
    pub const PARSE_ERROR: i64 = -32700;
    /// Invalid request
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Server error (geth uses it for most execution failures)
    pub const SERVER_ERROR: i64 = -32000;
    /// Limit exceeded
    pub const LIMIT_EXCEEDED: i64 = -32005;
}

/// Whether an operation that failed may be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient transport or load condition
    Retryable,
    /// Retrying cannot help
    Terminal,
}

/// RPC errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Subscription error: {0}")]
    Subscription(String),
}

impl RpcError {
    /// Build a node-reported error.
    pub fn node(code: i64, message: impl Into<String>) -> Self {
        RpcError::Node {
            code,
            message: message.into(),
        }
    }

    /// Classify for retry purposes. Anything not known to be transient is
    /// terminal.
    pub fn class(&self) -> ErrorClass {
        match self {
            RpcError::Connection(_) | RpcError::Timeout(_) => ErrorClass::Retryable,
            RpcError::Node { code, .. } if *code == error_codes::LIMIT_EXCEEDED => {
                ErrorClass::Retryable
            }
            _ => ErrorClass::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// The node's error code, if the node produced this error.
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Node { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RpcError::Timeout(e.to_string())
        } else if e.is_decode() {
            RpcError::Decode(e.to_string())
        } else {
            RpcError::Connection(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Decode(e.to_string())
    }
}

impl From<TypesError> for RpcError {
    fn from(e: TypesError) -> Self {
        RpcError::Decode(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RpcError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RpcError::Connection(e.to_string())
    }
}

/// Standard RPC result type.
pub type RpcResult<T> = Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(RpcError::Connection("refused".into()).is_retryable());
        assert!(RpcError::Timeout("30s".into()).is_retryable());
        assert!(RpcError::node(error_codes::LIMIT_EXCEEDED, "rate limited").is_retryable());
    }

    #[test]
    fn test_node_errors_are_terminal() {
        let err = RpcError::node(error_codes::SERVER_ERROR, "insufficient funds for gas * price + value");
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert_eq!(err.code(), Some(-32000));

        let err = RpcError::node(error_codes::INVALID_PARAMS, "invalid argument 0");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unclassifiable_errors_are_terminal() {
        assert!(!RpcError::node(12345, "something new").is_retryable());
        assert!(!RpcError::Decode("bad json".into()).is_retryable());
        assert!(!RpcError::Subscription("closed".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = RpcError::node(-32000, "execution reverted");
        assert_eq!(err.to_string(), "Node error -32000: execution reverted");
    }
}
